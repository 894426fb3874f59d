//! The control loop: one cycle per tick, steady cadence, no overlap.
//!
//! Commit order per action is fixed: execute against the hub, then
//! record the cooldown, then log. A failed service call therefore never
//! consumes a room's cooldown and the episode log only ever contains
//! actions that actually took effect.

use chrono::{DateTime, Local, NaiveDate, Timelike, Utc};
use log::{info, warn};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::client::{Hub, HubError};
use crate::config::ControllerConfig;
use crate::control::cooldown::CooldownTracker;
use crate::control::units::OutdoorUnitRegistry;
use crate::control::{emergency, planner, power, reward, snapshot};
use crate::influx::PowerHistory;
use crate::models::episode::{Action, ActionKind, Episode};
use crate::services::{episode_log, telemetry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyCounters {
    pub date: NaiveDate,
    pub cycles: u32,
    pub actions: u32,
}

impl DailyCounters {
    pub fn new(date: NaiveDate) -> Self {
        DailyCounters { date, cycles: 0, actions: 0 }
    }

    /// Reset at the first tick of a new local day.
    pub fn rollover(&mut self, date: NaiveDate) {
        if date != self.date {
            info!(
                "daily rollover {} -> {} (cycles={}, actions={})",
                self.date, date, self.cycles, self.actions
            );
            *self = DailyCounters::new(date);
        }
    }
}

pub fn run_loop<H: Hub + ?Sized, P: PowerHistory + ?Sized>(
    hub: &H,
    history: &P,
    cfg: &ControllerConfig,
    registry: &OutdoorUnitRegistry,
    episode_path: &Path,
    interval: Duration,
    stop: &AtomicBool,
) -> Result<(), String> {
    let mut cooldown = CooldownTracker::new();
    let mut counters = DailyCounters::new(Local::now().date_naive());

    while !stop.load(Ordering::Relaxed) {
        let tick_start = Instant::now();
        let local = Local::now();
        run_cycle(
            hub,
            history,
            cfg,
            registry,
            &mut cooldown,
            &mut counters,
            episode_path,
            Utc::now(),
            local.date_naive(),
            local.hour(),
        );

        // Maintain steady cadence; the stop flag is only honored
        // between cycles so an action is never left half-committed.
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }

    info!("stop requested, leaving control loop");
    Ok(())
}

/// One full cycle: snapshot, emergency checks, planning, execution,
/// scoring, logging, telemetry. External failures degrade the current
/// cycle and are retried implicitly next tick.
pub fn run_cycle<H: Hub + ?Sized, P: PowerHistory + ?Sized>(
    hub: &H,
    history: &P,
    cfg: &ControllerConfig,
    registry: &OutdoorUnitRegistry,
    cooldown: &mut CooldownTracker,
    counters: &mut DailyCounters,
    episode_path: &Path,
    now: DateTime<Utc>,
    local_date: NaiveDate,
    local_hour: u32,
) {
    counters.rollover(local_date);
    counters.cycles += 1;

    let reading = power::read_total(hub, registry);
    let state = snapshot::build(hub, cfg, &reading, now);
    let flags = emergency::evaluate(&state, history, registry, &cfg.rules);
    if flags.is_emergency() {
        warn!(
            "emergency active (comfort={}, stability={}, offending={:?})",
            flags.comfort_emergency, flags.stability_emergency, flags.offending_rooms
        );
    }

    let planned = planner::plan(&state, &flags, cooldown, registry, &cfg.rules, now, local_hour);

    let mut committed: Vec<Action> = Vec::new();
    for action in planned {
        match execute_action(hub, cfg, &action) {
            Ok(()) => {
                cooldown.record_action(&action.room, now);
                counters.actions += 1;
                info!("{}: {:?} ({})", action.room, action.kind, action.reason);
                committed.push(action);
            }
            Err(e) => {
                // not counted, cooldown untouched; the planner will
                // reconsider the room next cycle
                warn!("action for {} failed, skipping: {}", action.room, e);
            }
        }
    }

    let reward = reward::score(&state, &cfg.rules);
    let episode = Episode::new(&state, &committed, reward);
    if let Err(e) = episode_log::append(episode_path, &episode) {
        warn!("episode log append failed: {}", e);
    }

    let cooldown_active = cooldown.any_active(now, &cfg.rules.hysteresis);
    if let Err(e) = telemetry::publish(
        hub,
        &state,
        &flags,
        cooldown_active,
        counters.cycles,
        counters.actions,
        &cfg.rules.stability,
    ) {
        warn!("telemetry publish failed: {}", e);
    }

    info!(
        "cycle done: power={:.0}W delta={:.1}K rooms={} unknown={} actions={} reward={:.2}",
        state.total_power,
        state.total_delta_abs,
        state.rooms.len(),
        state.unknown_rooms.len(),
        committed.len(),
        reward.total
    );
}

fn execute_action<H: Hub + ?Sized>(
    hub: &H,
    cfg: &ControllerConfig,
    action: &Action,
) -> Result<(), HubError> {
    let entity = cfg
        .rooms
        .get(&action.room)
        .map(|r| r.climate_entity.as_str())
        .ok_or_else(|| HubError::Decode(format!("no climate entity for room {}", action.room)))?;

    match &action.kind {
        ActionKind::TurnOn { mode, .. } => hub.call_service(
            "climate",
            "set_hvac_mode",
            &json!({ "entity_id": entity, "hvac_mode": mode.hvac_mode() }),
        ),
        ActionKind::TurnOff => hub.call_service(
            "climate",
            "set_hvac_mode",
            &json!({ "entity_id": entity, "hvac_mode": "off" }),
        ),
        ActionKind::AdjustTarget { new_target, .. } => hub.call_service(
            "climate",
            "set_temperature",
            &json!({ "entity_id": entity, "temperature": new_target }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EntityState;
    use crate::influx::{HistoryError, PowerSample};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use serde_json::Value;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::PathBuf;

    struct TestHub {
        states: BTreeMap<String, EntityState>,
        fail_services: bool,
        calls: RefCell<Vec<(String, String, Value)>>,
    }

    impl TestHub {
        fn new(fail_services: bool) -> Self {
            let mut states = BTreeMap::new();
            states.insert("sensor.p".to_string(), entity("850", Value::Null));
            states.insert("sensor.t_kz".to_string(), entity("18.2", Value::Null));
            states.insert(
                "climate.kz".to_string(),
                entity("heat", serde_json::json!({"temperature": 20.0})),
            );
            TestHub {
                states,
                fail_services,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Hub for TestHub {
        fn get_entity(&self, entity_id: &str) -> Result<EntityState, HubError> {
            self.states
                .get(entity_id)
                .cloned()
                .ok_or_else(|| HubError::Transport(format!("no route to {}", entity_id)))
        }

        fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<(), HubError> {
            self.calls
                .borrow_mut()
                .push((domain.to_string(), service.to_string(), data.clone()));
            if self.fail_services {
                Err(HubError::Http {
                    status: http::StatusCode::BAD_GATEWAY,
                    message: "hub restarting".to_string(),
                })
            } else {
                Ok(())
            }
        }

        fn set_state(&self, _: &str, _: &str, _: &Value) -> Result<(), HubError> {
            Ok(())
        }
    }

    struct CalmHistory;

    impl PowerHistory for CalmHistory {
        fn power_window(
            &self,
            _sensor: &str,
            _window: ChronoDuration,
        ) -> Result<Vec<PowerSample>, HistoryError> {
            Ok((0..15)
                .map(|i| PowerSample {
                    time: Utc.timestamp_opt(1_700_000_000 + 60 * i, 0).single().unwrap(),
                    watts: 850.0,
                })
                .collect())
        }
    }

    struct TempLog(PathBuf);

    impl TempLog {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir()
                .join(format!("taktguard-cycle-{}-{}", name, std::process::id()))
                .join("episodes.jsonl");
            if let Some(parent) = path.parent() {
                let _ = fs::remove_dir_all(parent);
            }
            TempLog(path)
        }
    }

    impl Drop for TempLog {
        fn drop(&mut self) {
            if let Some(parent) = self.0.parent() {
                let _ = fs::remove_dir_all(parent);
            }
        }
    }

    fn entity(state: &str, attributes: Value) -> EntityState {
        EntityState {
            state: state.to_string(),
            attributes,
        }
    }

    fn config() -> ControllerConfig {
        ControllerConfig::parse(
            r#"{
                "operating_mode": "heat",
                "sensors": {"power": "sensor.p"},
                "rooms": {
                    "kinderzimmer": {"temp_sensor": "sensor.t_kz", "climate_entity": "climate.kz"}
                }
            }"#,
        )
        .expect("config parses")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap()
    }

    fn run_once(hub: &TestHub, log: &TempLog, cooldown: &mut CooldownTracker, counters: &mut DailyCounters) {
        let cfg = config();
        let registry = OutdoorUnitRegistry::from_config(&cfg).expect("registry builds");
        run_cycle(
            hub,
            &CalmHistory,
            &cfg,
            &registry,
            cooldown,
            counters,
            &log.0,
            now(),
            now().date_naive(),
            12,
        );
    }

    #[test]
    fn committed_action_records_cooldown_and_counters() {
        let hub = TestHub::new(false);
        let log = TempLog::new("commit");
        let mut cooldown = CooldownTracker::new();
        let mut counters = DailyCounters::new(now().date_naive());

        run_once(&hub, &log, &mut cooldown, &mut counters);

        // kinderzimmer at -1.8K gets its target raised
        let calls = hub.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "set_temperature");
        assert_eq!(calls[0].2["temperature"], 20.5);

        assert_eq!(counters.cycles, 1);
        assert_eq!(counters.actions, 1);
        assert!(!cooldown.can_act("kinderzimmer", now(), false, &config().rules.hysteresis));

        let content = fs::read_to_string(&log.0).expect("log written");
        let episode: Episode = serde_json::from_str(content.lines().next().unwrap()).expect("parses");
        assert_eq!(episode.actions.len(), 1);
    }

    #[test]
    fn failed_service_call_consumes_nothing() {
        let hub = TestHub::new(true);
        let log = TempLog::new("fail");
        let mut cooldown = CooldownTracker::new();
        let mut counters = DailyCounters::new(now().date_naive());

        run_once(&hub, &log, &mut cooldown, &mut counters);

        assert_eq!(hub.calls.borrow().len(), 1);
        assert_eq!(counters.actions, 0);
        // the room stays actionable for the next cycle
        assert!(cooldown.can_act("kinderzimmer", now(), false, &config().rules.hysteresis));

        let content = fs::read_to_string(&log.0).expect("log written");
        let episode: Episode = serde_json::from_str(content.lines().next().unwrap()).expect("parses");
        assert!(episode.actions.is_empty());
    }

    #[test]
    fn midnight_rollover_resets_counters() {
        let mut counters = DailyCounters::new(now().date_naive());
        counters.cycles = 200;
        counters.actions = 17;

        counters.rollover(now().date_naive());
        assert_eq!(counters.cycles, 200);

        let tomorrow = now().date_naive() + ChronoDuration::days(1);
        counters.rollover(tomorrow);
        assert_eq!(counters, DailyCounters::new(tomorrow));
    }

    #[test]
    fn second_cycle_respects_the_fresh_cooldown() {
        let hub = TestHub::new(false);
        let log = TempLog::new("cooldown");
        let mut cooldown = CooldownTracker::new();
        let mut counters = DailyCounters::new(now().date_naive());

        run_once(&hub, &log, &mut cooldown, &mut counters);
        run_once(&hub, &log, &mut cooldown, &mut counters);

        // the second cycle plans nothing for the cooled-down room
        assert_eq!(hub.calls.borrow().len(), 1);
        assert_eq!(counters.cycles, 2);
        assert_eq!(counters.actions, 1);
    }
}
