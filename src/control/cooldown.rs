//! Per-room action hysteresis. A room that was just actuated gets left
//! alone for a while so the system can settle; emergencies shorten the
//! wait but never remove it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;

use crate::config::HysteresisRules;

#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_action: BTreeMap<String, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        CooldownTracker::default()
    }

    pub fn can_act(
        &self,
        room: &str,
        now: DateTime<Utc>,
        is_emergency: bool,
        rules: &HysteresisRules,
    ) -> bool {
        let Some(last) = self.last_action.get(room) else {
            return true;
        };
        let minutes = if is_emergency {
            rules.emergency_action_interval_minutes
        } else {
            rules.min_action_interval_minutes
        };
        now - *last >= ChronoDuration::minutes(minutes)
    }

    /// Called only after an action was actually committed to the hub;
    /// failed service calls must not consume the room's cooldown.
    pub fn record_action(&mut self, room: &str, now: DateTime<Utc>) {
        self.last_action.insert(room.to_string(), now);
    }

    /// True while any room is still inside its normal interval.
    pub fn any_active(&self, now: DateTime<Utc>, rules: &HysteresisRules) -> bool {
        let interval = ChronoDuration::minutes(rules.min_action_interval_minutes);
        self.last_action.values().any(|last| now - *last < interval)
    }
}
