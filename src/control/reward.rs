//! Per-cycle reward scoring. Purely diagnostic: appended to the episode
//! log for offline analysis, never fed back into control decisions
//! within the same run.

use crate::config::{EnergyPolicy, Rules};
use crate::models::episode::{Reward, State};

/// Flat penalty for running inside the unstable power zone.
const UNSTABLE_ZONE_PENALTY: f64 = 20.0;

pub fn score(state: &State, rules: &Rules) -> Reward {
    let comfort = -state.total_delta_abs;

    let in_zone = state.total_power >= rules.stability.unstable_power_min
        && state.total_power <= rules.stability.unstable_power_max;
    let stability = if in_zone { -UNSTABLE_ZONE_PENALTY } else { 0.0 };

    let energy = -rules.energy.penalty(state.total_power);

    Reward {
        comfort,
        stability,
        energy,
        total: comfort + stability + energy,
    }
}

impl EnergyPolicy {
    /// Monotonic penalty for the current draw. Higher draw never scores
    /// better than lower draw under either policy.
    pub fn penalty(&self, watts: f64) -> f64 {
        match self {
            EnergyPolicy::Linear { watts_per_point } => {
                if *watts_per_point <= 0.0 {
                    0.0
                } else {
                    watts / watts_per_point
                }
            }
            EnergyPolicy::Stepped { thresholds } => thresholds
                .iter()
                .filter(|step| watts > step.above_watts)
                .map(|step| step.penalty)
                .fold(0.0, f64::max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnergyStep;
    use crate::models::episode::RoomState;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn state(deltas: &[f64], power: f64) -> State {
        let mut rooms = BTreeMap::new();
        for (i, delta) in deltas.iter().enumerate() {
            rooms.insert(format!("room_{i}"), RoomState::new(20.0 + delta, 20.0, true));
        }
        State::new(
            Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap(),
            power,
            false,
            None,
            rooms,
            Vec::new(),
        )
    }

    #[test]
    fn linear_reward_outside_the_zone() {
        let reward = score(&state(&[-1.8, 0.5], 850.0), &Rules::default());
        assert!((reward.comfort + 2.3).abs() < 1e-9);
        assert_eq!(reward.stability, 0.0);
        assert!((reward.energy + 1.7).abs() < 1e-9);
        assert!((reward.total - (reward.comfort + reward.stability + reward.energy)).abs() < 1e-9);
    }

    #[test]
    fn zone_membership_costs_a_flat_penalty() {
        let inside = score(&state(&[0.0], 1200.0), &Rules::default());
        let outside = score(&state(&[0.0], 900.0), &Rules::default());
        assert_eq!(inside.stability, -20.0);
        assert_eq!(outside.stability, 0.0);
        assert!(inside.total < outside.total);
    }

    #[test]
    fn stepped_policy_applies_the_highest_crossed_step() {
        let policy = EnergyPolicy::Stepped {
            thresholds: vec![
                EnergyStep { above_watts: 800.0, penalty: 1.0 },
                EnergyStep { above_watts: 1600.0, penalty: 3.0 },
            ],
        };
        assert_eq!(policy.penalty(500.0), 0.0);
        assert_eq!(policy.penalty(1000.0), 1.0);
        assert_eq!(policy.penalty(2000.0), 3.0);
    }

    #[test]
    fn both_policies_are_monotonic() {
        let linear = EnergyPolicy::default();
        let stepped = EnergyPolicy::Stepped {
            thresholds: vec![EnergyStep { above_watts: 1000.0, penalty: 2.0 }],
        };
        let draws = [0.0, 400.0, 900.0, 1100.0, 2500.0];
        for pair in draws.windows(2) {
            assert!(linear.penalty(pair[0]) <= linear.penalty(pair[1]));
            assert!(stepped.penalty(pair[0]) <= stepped.penalty(pair[1]));
        }
    }
}
