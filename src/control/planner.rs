//! The decision core: turns a state snapshot plus emergency flags into
//! a bounded, ordered list of actions.
//!
//! Planning is pure. The same snapshot, flags, cooldown state and clock
//! always produce the same action list; nothing here talks to the hub
//! or mutates cross-cycle state.

use chrono::{DateTime, Utc};
use log::warn;

use crate::config::{NightRules, OperatingMode, Rules};
use crate::control::cooldown::CooldownTracker;
use crate::control::units::OutdoorUnitRegistry;
use crate::models::episode::{Action, ActionKind, EmergencyFlags, State};

pub fn plan(
    state: &State,
    flags: &EmergencyFlags,
    cooldown: &CooldownTracker,
    registry: &OutdoorUnitRegistry,
    rules: &Rules,
    now: DateTime<Utc>,
    local_hour: u32,
) -> Vec<Action> {
    let night_active = in_night_window(&rules.night, local_hour);
    let mut candidates: Vec<Action> = Vec::new();

    // Per-room rules, first hit wins. Rooms in `unknown_rooms` are not
    // in the map at all and are therefore skipped without guessing.
    for (room, reading) in &state.rooms {
        let (unit_id, unit) = match registry.unit_for_room(room) {
            Ok(found) => found,
            Err(e) => {
                warn!("skipping {}: {}", room, e);
                continue;
            }
        };

        // Overheat wins over night mode so its reason surfaces; both
        // resolve to the same turn_off.
        if unit.operating_mode == OperatingMode::Heat
            && reading.is_on
            && reading.delta > rules.comfort.overheat_delta
        {
            candidates.push(Action {
                room: room.clone(),
                kind: ActionKind::TurnOff,
                reason: format!("overheated ({:+.1}K)", reading.delta),
            });
            continue;
        }

        if night_active && reading.is_on && reading.delta >= rules.night.off_delta {
            candidates.push(Action {
                room: room.clone(),
                kind: ActionKind::TurnOff,
                reason: format!("night mode, close to target ({:+.1}K)", reading.delta),
            });
            continue;
        }

        if reading.delta < -rules.comfort.temp_tolerance_cold {
            if reading.is_on {
                if let Some(new_target) = stepped_target(
                    reading.target_temp,
                    rules.adjustments.target_step,
                    rules,
                ) {
                    candidates.push(Action {
                        room: room.clone(),
                        kind: ActionKind::AdjustTarget {
                            old_target: reading.target_temp,
                            new_target,
                        },
                        reason: format!("too cold ({:+.1}K)", reading.delta),
                    });
                }
            } else {
                candidates.push(Action {
                    room: room.clone(),
                    kind: ActionKind::TurnOn {
                        unit_id: unit_id.to_string(),
                        mode: unit.operating_mode,
                    },
                    reason: format!("too cold ({:+.1}K)", reading.delta),
                });
            }
            continue;
        }

        if reading.delta > rules.comfort.temp_tolerance_warm && reading.is_on {
            if let Some(new_target) = stepped_target(
                reading.target_temp,
                -rules.adjustments.target_step,
                rules,
            ) {
                candidates.push(Action {
                    room: room.clone(),
                    kind: ActionKind::AdjustTarget {
                        old_target: reading.target_temp,
                        new_target,
                    },
                    reason: format!("too warm ({:+.1}K)", reading.delta),
                });
            }
        }
    }

    // Stability targeting: with nothing else to do and the compressor
    // idling below a healthy load, engage the best currently-off room.
    if candidates.is_empty() && state.total_power < rules.stability.low_power_watts {
        if let Some((room, unit_id, mode)) = best_off_room(state, registry) {
            candidates.push(Action {
                room,
                kind: ActionKind::TurnOn {
                    unit_id,
                    mode,
                },
                reason: format!("low total draw ({:.0} W), raising load", state.total_power),
            });
        }
    }

    // Global constraints, applied in this order.
    if state.total_delta_abs > rules.stability.max_total_delta {
        keep_largest_delta(state, &mut candidates);
    }

    let in_unstable_zone = state.total_power >= rules.stability.unstable_power_min
        && state.total_power <= rules.stability.unstable_power_max;
    if in_unstable_zone && !flags.is_emergency() {
        candidates.retain(|a| !matches!(a.kind, ActionKind::TurnOn { .. }));
    }

    candidates.retain(|a| cooldown.can_act(&a.room, now, flags.is_emergency(), &rules.hysteresis));

    // Cap, largest |delta| first; the cap does not grow under
    // emergencies, only the cooldown shortens.
    candidates.sort_by(|a, b| {
        let da = room_delta_abs(state, &a.room);
        let db = room_delta_abs(state, &b.room);
        db.partial_cmp(&da)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.room.cmp(&b.room))
    });
    candidates.truncate(rules.stability.max_actions_per_cycle);
    candidates
}

fn in_night_window(night: &NightRules, hour: u32) -> bool {
    if !night.enabled {
        return false;
    }
    if night.start_hour <= night.end_hour {
        hour >= night.start_hour && hour < night.end_hour
    } else {
        // wraps midnight, e.g. 23-06
        hour >= night.start_hour || hour < night.end_hour
    }
}

/// Target moved by `step` and clamped to the configured band. Returns
/// None when the clamp makes the adjustment a no-op.
fn stepped_target(target: f64, step: f64, rules: &Rules) -> Option<f64> {
    let new_target =
        (target + step).clamp(rules.adjustments.target_min, rules.adjustments.target_max);
    if (new_target - target).abs() < 1e-9 {
        None
    } else {
        Some(new_target)
    }
}

/// Off room to engage for load raising: coldest delta first, then
/// lowest target, then identifier.
fn best_off_room(
    state: &State,
    registry: &OutdoorUnitRegistry,
) -> Option<(String, String, OperatingMode)> {
    let mut best: Option<(&String, f64, f64)> = None;
    for (room, reading) in &state.rooms {
        if reading.is_on || registry.unit_for_room(room).is_err() {
            continue;
        }
        let replace = match best {
            None => true,
            Some((_, delta, target)) => {
                reading.delta < delta || (reading.delta == delta && reading.target_temp < target)
            }
        };
        if replace {
            best = Some((room, reading.delta, reading.target_temp));
        }
    }
    let (room, _, _) = best?;
    let (unit_id, unit) = registry.unit_for_room(room).ok()?;
    Some((room.clone(), unit_id.to_string(), unit.operating_mode))
}

fn keep_largest_delta(state: &State, candidates: &mut Vec<Action>) {
    let largest = candidates
        .iter()
        .map(|a| a.room.clone())
        .max_by(|a, b| {
            room_delta_abs(state, a)
                .partial_cmp(&room_delta_abs(state, b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.cmp(a))
        });
    if let Some(room) = largest {
        candidates.retain(|a| a.room == room);
    }
}

fn room_delta_abs(state: &State, room: &str) -> f64 {
    state.rooms.get(room).map(|r| r.delta.abs()).unwrap_or(0.0)
}
