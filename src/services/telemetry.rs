//! Publishes the controller's status entity to the hub so a dashboard
//! can show the current control picture without parsing the episode
//! log.

use serde_json::json;

use crate::client::{Hub, HubError};
use crate::config::StabilityRules;
use crate::models::episode::{EmergencyFlags, State};

pub const STATUS_ENTITY: &str = "sensor.taktguard_status";

/// The entity's state string reflects stability: `unstable` while
/// oscillation is detected, `transition` while draw sits inside the
/// unstable power zone, `stable` otherwise.
pub fn stability_state(state: &State, flags: &EmergencyFlags, rules: &StabilityRules) -> &'static str {
    if flags.stability_emergency {
        "unstable"
    } else if state.total_power >= rules.unstable_power_min
        && state.total_power <= rules.unstable_power_max
    {
        "transition"
    } else {
        "stable"
    }
}

pub fn publish<H: Hub + ?Sized>(
    hub: &H,
    state: &State,
    flags: &EmergencyFlags,
    cooldown_active: bool,
    cycles_today: u32,
    actions_today: u32,
    rules: &StabilityRules,
) -> Result<(), HubError> {
    let attributes = json!({
        "power_w": state.total_power,
        "power_degraded": state.power_degraded,
        "outdoor_temp": state.outdoor_temp,
        "total_delta_abs": state.total_delta_abs,
        "emergency_active": flags.is_emergency(),
        "cooldown_active": cooldown_active,
        "cycles_today": cycles_today,
        "actions_today": actions_today,
        "critical_room": state.critical_room(),
        "friendly_name": "taktguard status",
    });
    hub.set_state(STATUS_ENTITY, stability_state(state, flags, rules), &attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EntityState;
    use crate::models::episode::RoomState;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct RecordingHub {
        published: RefCell<Vec<(String, String, Value)>>,
    }

    impl Hub for RecordingHub {
        fn get_entity(&self, entity_id: &str) -> Result<EntityState, HubError> {
            Err(HubError::Transport(format!("no route to {}", entity_id)))
        }

        fn call_service(&self, _: &str, _: &str, _: &Value) -> Result<(), HubError> {
            Ok(())
        }

        fn set_state(&self, entity_id: &str, state: &str, attributes: &Value) -> Result<(), HubError> {
            self.published.borrow_mut().push((
                entity_id.to_string(),
                state.to_string(),
                attributes.clone(),
            ));
            Ok(())
        }
    }

    fn state(power: f64) -> State {
        let mut rooms = BTreeMap::new();
        rooms.insert("erdgeschoss".to_string(), RoomState::new(21.5, 21.0, true));
        rooms.insert("kinderzimmer".to_string(), RoomState::new(18.2, 20.0, true));
        State::new(
            Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap(),
            power,
            false,
            Some(2.5),
            rooms,
            Vec::new(),
        )
    }

    #[test]
    fn stability_state_precedence() {
        let rules = StabilityRules::default();
        let calm = EmergencyFlags::default();
        let oscillating = EmergencyFlags {
            stability_emergency: true,
            ..EmergencyFlags::default()
        };

        assert_eq!(stability_state(&state(850.0), &calm, &rules), "stable");
        assert_eq!(stability_state(&state(1200.0), &calm, &rules), "transition");
        // actual oscillation outranks zone membership
        assert_eq!(stability_state(&state(1200.0), &oscillating, &rules), "unstable");
        assert_eq!(stability_state(&state(850.0), &oscillating, &rules), "unstable");
    }

    #[test]
    fn publishes_the_status_entity_with_attributes() {
        let hub = RecordingHub::default();
        publish(
            &hub,
            &state(850.0),
            &EmergencyFlags::default(),
            true,
            12,
            3,
            &StabilityRules::default(),
        )
        .expect("publish succeeds");

        let published = hub.published.borrow();
        assert_eq!(published.len(), 1);
        let (entity, sensor_state, attrs) = &published[0];
        assert_eq!(entity, STATUS_ENTITY);
        assert_eq!(sensor_state, "stable");
        assert_eq!(attrs["power_w"], 850.0);
        assert_eq!(attrs["emergency_active"], false);
        assert_eq!(attrs["cooldown_active"], true);
        assert_eq!(attrs["cycles_today"], 12);
        assert_eq!(attrs["actions_today"], 3);
        assert_eq!(attrs["critical_room"], "kinderzimmer");
    }
}
