//! Serde types shared between the control core and the services:
//! the per-cycle state snapshot, planned actions, emergency flags,
//! the cycle reward and the JSONL episode record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::OperatingMode;

/// Per-room reading within a snapshot. `delta` is current minus target;
/// negative means too cold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    pub current_temp: f64,
    pub target_temp: f64,
    pub delta: f64,
    pub is_on: bool,
}

impl RoomState {
    pub fn new(current_temp: f64, target_temp: f64, is_on: bool) -> Self {
        RoomState {
            current_temp,
            target_temp,
            delta: current_temp - target_temp,
            is_on,
        }
    }
}

/// Immutable snapshot of one control cycle. Built once per tick, never
/// mutated, discarded after the cycle's action/reward computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub timestamp: DateTime<Utc>,
    /// Aggregated compressor draw across all outdoor units.
    pub total_power: f64,
    /// True when at least one unit's power sensor was unavailable and
    /// contributed 0 W to the total.
    pub power_degraded: bool,
    pub outdoor_temp: Option<f64>,
    pub rooms: BTreeMap<String, RoomState>,
    /// Rooms whose sensors could not be read this cycle. They are
    /// excluded from planning entirely.
    pub unknown_rooms: Vec<String>,
    pub total_delta_abs: f64,
}

impl State {
    pub fn new(
        timestamp: DateTime<Utc>,
        total_power: f64,
        power_degraded: bool,
        outdoor_temp: Option<f64>,
        rooms: BTreeMap<String, RoomState>,
        unknown_rooms: Vec<String>,
    ) -> Self {
        let total_delta_abs = rooms.values().map(|r| r.delta.abs()).sum();
        State {
            timestamp,
            total_power,
            power_degraded,
            outdoor_temp,
            rooms,
            unknown_rooms,
            total_delta_abs,
        }
    }

    /// Room with the largest absolute delta, ties broken by name.
    pub fn critical_room(&self) -> Option<&str> {
        self.rooms
            .iter()
            .max_by(|(na, a), (nb, b)| {
                a.delta
                    .abs()
                    .partial_cmp(&b.delta.abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| nb.as_str().cmp(na.as_str()))
            })
            .map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    TurnOn {
        unit_id: String,
        mode: OperatingMode,
    },
    TurnOff,
    AdjustTarget {
        old_target: f64,
        new_target: f64,
    },
}

/// A planned control action for one room. Created by the planner,
/// consumed by action execution, then logged; never retained across
/// cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub room: String,
    #[serde(flatten)]
    pub kind: ActionKind,
    pub reason: String,
}

/// Result of the two independent emergency checks, computed fresh each
/// cycle. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmergencyFlags {
    pub comfort_emergency: bool,
    /// Offending room name -> its delta, for diagnostics.
    pub offending_rooms: BTreeMap<String, f64>,
    pub stability_emergency: bool,
    pub power_std: f64,
    pub power_range: f64,
    /// Set when the historical query failed or returned too few samples
    /// and the stability check therefore failed open.
    pub history_degraded: bool,
}

impl EmergencyFlags {
    pub fn is_emergency(&self) -> bool {
        self.comfort_emergency || self.stability_emergency
    }
}

/// Per-cycle reward. Higher (less negative) is better. Write-only:
/// appended to the episode log, never read back by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub comfort: f64,
    pub stability: f64,
    pub energy: f64,
    pub total: f64,
}

/// Compact state summary stored in the episode log (full per-room
/// readings are not needed for offline analysis, deltas are).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSummary {
    pub power: f64,
    pub outdoor_temp: Option<f64>,
    pub total_delta_abs: f64,
    pub rooms: BTreeMap<String, f64>,
}

impl From<&State> for StateSummary {
    fn from(state: &State) -> Self {
        StateSummary {
            power: state.total_power,
            outdoor_temp: state.outdoor_temp,
            total_delta_abs: state.total_delta_abs,
            rooms: state
                .rooms
                .iter()
                .map(|(name, room)| (name.clone(), room.delta))
                .collect(),
        }
    }
}

/// One newline-delimited JSON record per control cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub timestamp: DateTime<Utc>,
    pub state: StateSummary,
    pub actions: Vec<Action>,
    pub reward: Reward,
}

impl Episode {
    pub fn new(state: &State, actions: &[Action], reward: Reward) -> Self {
        Episode {
            timestamp: state.timestamp,
            state: StateSummary::from(state),
            actions: actions.to_vec(),
            reward,
        }
    }
}
