//! Simulated hub and power history for dry runs without a live Home
//! Assistant. Seeded deterministically so two runs with the same seed
//! see the same sensor world.

use chrono::{Duration as ChronoDuration, Timelike, Utc};
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::f64::consts::PI;

use crate::client::{EntityState, Hub, HubError};
use crate::config::ControllerConfig;
use crate::influx::{HistoryError, PowerHistory, PowerSample};

const DEFAULT_SEED: u64 = 0x7a6b_7467_7561_7264;
/// Rough per-room compressor share when a zone is active.
const WATTS_PER_ACTIVE_ROOM: f64 = 320.0;

struct SimRoom {
    name: String,
    temp_sensor: String,
    climate_entity: String,
}

pub struct SimulatedHub {
    rng: RefCell<SmallRng>,
    rooms: Vec<SimRoom>,
    temps: RefCell<BTreeMap<String, f64>>,
    targets: RefCell<BTreeMap<String, f64>>,
    hvac_modes: RefCell<BTreeMap<String, String>>,
    power_sensors: Vec<String>,
    outdoor_sensor: Option<String>,
}

impl SimulatedHub {
    pub fn new(cfg: &ControllerConfig, power_sensors: Vec<String>) -> Self {
        Self::with_seed(cfg, power_sensors, DEFAULT_SEED)
    }

    pub fn with_seed(cfg: &ControllerConfig, power_sensors: Vec<String>, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut rooms = Vec::new();
        let mut temps = BTreeMap::new();
        let mut targets = BTreeMap::new();
        let mut hvac_modes = BTreeMap::new();

        for (name, room) in &cfg.rooms {
            let target: f64 = 20.0 + rng.random_range(-1.0..=1.5);
            temps.insert(room.temp_sensor.clone(), target + rng.random_range(-2.5..=1.0));
            targets.insert(room.climate_entity.clone(), (target * 2.0).round() / 2.0);
            let state = if rng.random_bool(0.6) { "heat" } else { "off" };
            hvac_modes.insert(room.climate_entity.clone(), state.to_string());
            rooms.push(SimRoom {
                name: name.clone(),
                temp_sensor: room.temp_sensor.clone(),
                climate_entity: room.climate_entity.clone(),
            });
        }

        SimulatedHub {
            rng: RefCell::new(rng),
            rooms,
            temps: RefCell::new(temps),
            targets: RefCell::new(targets),
            hvac_modes: RefCell::new(hvac_modes),
            power_sensors,
            outdoor_sensor: cfg.sensors.outdoor_temp.clone(),
        }
    }

    fn outdoor_temp(&self) -> f64 {
        let day_fraction = Utc::now().time().num_seconds_from_midnight() as f64 / 86_400.0;
        let diurnal = ((day_fraction - 0.3) * 2.0 * PI).sin() * 4.0;
        3.0 + diurnal + self.rng.borrow_mut().random_range(-0.5..=0.5)
    }

    fn active_rooms(&self) -> usize {
        self.hvac_modes.borrow().values().filter(|m| m.as_str() != "off").count()
    }

    /// Nudge a room temperature toward its target (on) or the outdoor
    /// level (off) and return the new reading.
    fn drift_temp(&self, room: &SimRoom) -> f64 {
        let mut temps = self.temps.borrow_mut();
        let current = *temps.get(&room.temp_sensor).unwrap_or(&19.0);
        let target = *self.targets.borrow().get(&room.climate_entity).unwrap_or(&20.0);
        let on = self
            .hvac_modes
            .borrow()
            .get(&room.climate_entity)
            .map(|m| m != "off")
            .unwrap_or(false);

        let pull = if on { target - current } else { (6.0 - current) * 0.3 };
        let jitter = self.rng.borrow_mut().random_range(-0.15..=0.15);
        let next = current + pull * 0.2 + jitter;
        temps.insert(room.temp_sensor.clone(), next);
        next
    }

    fn entity_value(&self, value: f64) -> EntityState {
        EntityState {
            state: format!("{:.1}", value),
            attributes: Value::Null,
        }
    }
}

impl Hub for SimulatedHub {
    fn get_entity(&self, entity_id: &str) -> Result<EntityState, HubError> {
        if let Some(room) = self.rooms.iter().find(|r| r.temp_sensor == entity_id) {
            return Ok(self.entity_value(self.drift_temp(room)));
        }

        if let Some(room) = self.rooms.iter().find(|r| r.climate_entity == entity_id) {
            let state = self
                .hvac_modes
                .borrow()
                .get(entity_id)
                .cloned()
                .unwrap_or_else(|| "off".to_string());
            let target = *self.targets.borrow().get(&room.climate_entity).unwrap_or(&20.0);
            return Ok(EntityState {
                state,
                attributes: serde_json::json!({ "temperature": target }),
            });
        }

        if self.power_sensors.iter().any(|s| s == entity_id) {
            let per_sensor = self.active_rooms() as f64 * WATTS_PER_ACTIVE_ROOM
                / self.power_sensors.len().max(1) as f64;
            let jitter = self.rng.borrow_mut().random_range(-25.0..=25.0);
            return Ok(self.entity_value((per_sensor + jitter).max(0.0)));
        }

        if self.outdoor_sensor.as_deref() == Some(entity_id) {
            return Ok(self.entity_value(self.outdoor_temp()));
        }

        Err(HubError::Transport(format!("simulated hub has no entity {}", entity_id)))
    }

    fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<(), HubError> {
        let entity_id = data
            .get("entity_id")
            .and_then(Value::as_str)
            .ok_or_else(|| HubError::Decode("service call without entity_id".to_string()))?;

        match (domain, service) {
            ("climate", "set_temperature") => {
                let temperature = data
                    .get("temperature")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| HubError::Decode("set_temperature without temperature".to_string()))?;
                self.targets.borrow_mut().insert(entity_id.to_string(), temperature);
                info!("sim: {} target set to {:.1}", entity_id, temperature);
                Ok(())
            }
            ("climate", "set_hvac_mode") => {
                let mode = data
                    .get("hvac_mode")
                    .and_then(Value::as_str)
                    .ok_or_else(|| HubError::Decode("set_hvac_mode without hvac_mode".to_string()))?;
                self.hvac_modes.borrow_mut().insert(entity_id.to_string(), mode.to_string());
                info!("sim: {} hvac mode set to {}", entity_id, mode);
                Ok(())
            }
            _ => Err(HubError::Decode(format!(
                "simulated hub does not implement {}/{}",
                domain, service
            ))),
        }
    }

    fn set_state(&self, entity_id: &str, state: &str, _attributes: &Value) -> Result<(), HubError> {
        info!("sim: telemetry {} = {}", entity_id, state);
        Ok(())
    }
}

/// Calm synthetic power history: a baseline with mild jitter, enough
/// samples to satisfy the stability check.
pub struct SimulatedHistory {
    rng: RefCell<SmallRng>,
    baseline_watts: f64,
}

impl SimulatedHistory {
    pub fn new(baseline_watts: f64) -> Self {
        SimulatedHistory {
            rng: RefCell::new(SmallRng::seed_from_u64(DEFAULT_SEED ^ 0xff)),
            baseline_watts,
        }
    }
}

impl PowerHistory for SimulatedHistory {
    fn power_window(
        &self,
        _sensor: &str,
        window: ChronoDuration,
    ) -> Result<Vec<PowerSample>, HistoryError> {
        let minutes = window.num_minutes().max(1);
        let end = Utc::now();
        let mut rng = self.rng.borrow_mut();
        let samples = (0..minutes)
            .map(|i| PowerSample {
                time: end - ChronoDuration::minutes(minutes - i),
                watts: (self.baseline_watts + rng.random_range(-40.0..=40.0)).max(0.0),
            })
            .collect();
        Ok(samples)
    }
}
