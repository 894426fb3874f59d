//! Runtime configuration.
//!
//! Split the way deployments want it split: connection/runtime settings
//! come from the environment (with defaults aligned to a local Home
//! Assistant + InfluxDB pair), while the controller document (rooms,
//! outdoor units, rules) is a JSON file validated into typed structs at
//! startup. An unparsable controller document is fatal; per-room
//! problems found later degrade to skipping that room.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HASS_URL: &str = "http://localhost:8123";
pub const DEFAULT_INFLUX_URL: &str = "http://localhost:8086";
pub const DEFAULT_INFLUX_DATABASE: &str = "homeassistant";
pub const DEFAULT_INFLUX_MEASUREMENT: &str = "W";
pub const DEFAULT_CONFIG_FILE: &str = "taktguard.json";
pub const DEFAULT_EPISODE_LOG: &str = "episodes.jsonl";
pub const DEFAULT_INTERVAL_MINUTES: u64 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub hass_url: String,
    /// Long-lived Home Assistant access token. Empty in simulation mode.
    pub hass_token: String,
    pub influx_url: String,
    pub influx_database: String,
    pub influx_measurement: String,
    pub config_file: PathBuf,
    pub episode_log: PathBuf,
    /// Control cycle cadence.
    pub interval: Duration,
    /// Run against the built-in simulated hub/history instead of live
    /// services.
    pub simulation_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let simulation_enabled = std::env::var("SIMULATION_ENABLED")
            .ok()
            .map(|s| matches!(s.as_str(), "1" | "true" | "TRUE"))
            .unwrap_or(false);

        let hass_url = trimmed_var("HASS_URL").unwrap_or_else(|| DEFAULT_HASS_URL.to_string());

        // Prefer env var; fallback to token.txt in working directory.
        let hass_token = match trimmed_var("HASS_TOKEN") {
            Some(v) => v,
            None => {
                let path = Path::new("token.txt");
                match fs::read_to_string(path) {
                    Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
                    _ if simulation_enabled => String::new(),
                    _ => {
                        return Err(
                            "Missing hub token: set HASS_TOKEN or provide token.txt in working directory"
                                .to_string(),
                        );
                    }
                }
            }
        };

        let interval_minutes = match trimmed_var("INTERVAL_MINUTES") {
            Some(s) => s
                .parse::<u64>()
                .ok()
                .filter(|v| *v >= 1)
                .ok_or_else(|| "INTERVAL_MINUTES must be a positive integer".to_string())?,
            None => DEFAULT_INTERVAL_MINUTES,
        };

        Ok(Config {
            hass_url,
            hass_token,
            influx_url: trimmed_var("INFLUX_URL").unwrap_or_else(|| DEFAULT_INFLUX_URL.to_string()),
            influx_database: trimmed_var("INFLUX_DATABASE")
                .unwrap_or_else(|| DEFAULT_INFLUX_DATABASE.to_string()),
            influx_measurement: trimmed_var("INFLUX_MEASUREMENT")
                .unwrap_or_else(|| DEFAULT_INFLUX_MEASUREMENT.to_string()),
            config_file: trimmed_var("CONFIG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
            episode_log: trimmed_var("EPISODE_LOG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EPISODE_LOG)),
            interval: Duration::from_secs(interval_minutes * 60),
            simulation_enabled,
        })
    }
}

fn trimmed_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

/// Operating mode of an outdoor unit. Exactly one per unit, immutable
/// after startup validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Heat,
    Cool,
}

impl OperatingMode {
    /// The hvac_mode value the hub expects for turn-on service calls.
    pub fn hvac_mode(self) -> &'static str {
        match self {
            OperatingMode::Heat => "heat",
            OperatingMode::Cool => "cool",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoomConfig {
    pub temp_sensor: String,
    pub climate_entity: String,
    /// Unit assignment; omitted rooms fall back to the synthetic
    /// `default` unit of single-unit installations.
    #[serde(default)]
    pub outdoor_unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutdoorUnitConfig {
    pub operating_mode: OperatingMode,
    pub power_sensor: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SensorsConfig {
    /// Legacy single-unit installations configure one global power
    /// sensor here instead of per-unit sensors.
    #[serde(default)]
    pub power: Option<String>,
    #[serde(default)]
    pub outdoor_temp: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ComfortRules {
    pub temp_tolerance_cold: f64,
    pub temp_tolerance_warm: f64,
    /// Delta above which an active heat-mode room is shut off to stop
    /// wasting energy on overshoot.
    pub overheat_delta: f64,
}

impl Default for ComfortRules {
    fn default() -> Self {
        ComfortRules {
            temp_tolerance_cold: 1.5,
            temp_tolerance_warm: 1.0,
            overheat_delta: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdjustmentRules {
    pub target_step: f64,
    pub target_min: f64,
    pub target_max: f64,
}

impl Default for AdjustmentRules {
    fn default() -> Self {
        AdjustmentRules {
            target_step: 0.5,
            target_min: 16.0,
            target_max: 24.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HysteresisRules {
    pub min_action_interval_minutes: i64,
    pub emergency_action_interval_minutes: i64,
}

impl Default for HysteresisRules {
    fn default() -> Self {
        HysteresisRules {
            min_action_interval_minutes: 15,
            emergency_action_interval_minutes: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StabilityRules {
    pub max_actions_per_cycle: usize,
    /// Above this total absolute delta only the worst room may act.
    pub max_total_delta: f64,
    pub unstable_power_min: f64,
    pub unstable_power_max: f64,
    pub power_std_threshold: f64,
    pub power_range_threshold: f64,
    /// Below this draw the planner may engage an extra room to reach a
    /// healthier load range.
    pub low_power_watts: f64,
    /// Trailing window for the oscillation check.
    pub window_minutes: i64,
}

impl Default for StabilityRules {
    fn default() -> Self {
        StabilityRules {
            max_actions_per_cycle: 2,
            max_total_delta: 10.0,
            unstable_power_min: 1000.0,
            unstable_power_max: 1500.0,
            power_std_threshold: 300.0,
            power_range_threshold: 800.0,
            low_power_watts: 500.0,
            window_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NightRules {
    pub enabled: bool,
    pub start_hour: u32,
    pub end_hour: u32,
    /// Rooms at or above this delta are close enough to target to be
    /// shut off overnight.
    pub off_delta: f64,
}

impl Default for NightRules {
    fn default() -> Self {
        NightRules {
            enabled: true,
            start_hour: 23,
            end_hour: 6,
            off_delta: -0.5,
        }
    }
}

/// Shape of the energy penalty in the cycle reward. Both variants are
/// monotonic in power draw.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum EnergyPolicy {
    Linear { watts_per_point: f64 },
    Stepped { thresholds: Vec<EnergyStep> },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnergyStep {
    pub above_watts: f64,
    pub penalty: f64,
}

impl Default for EnergyPolicy {
    fn default() -> Self {
        EnergyPolicy::Linear { watts_per_point: 500.0 }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Rules {
    pub comfort: ComfortRules,
    pub adjustments: AdjustmentRules,
    pub hysteresis: HysteresisRules,
    pub stability: StabilityRules,
    pub night: NightRules,
    pub energy: EnergyPolicy,
}

/// The controller document: rooms, outdoor units and rules. Supports
/// both the explicit multi-unit shape (`outdoor_units`) and the legacy
/// single-unit shape (flat `operating_mode` + `sensors.power`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    pub rooms: BTreeMap<String, RoomConfig>,
    #[serde(default)]
    pub outdoor_units: BTreeMap<String, OutdoorUnitConfig>,
    /// Legacy flat operating mode, paired with `sensors.power`.
    #[serde(default)]
    pub operating_mode: Option<OperatingMode>,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub rules: Rules,
}

impl ControllerConfig {
    pub fn load(file: &Path) -> Result<Self, String> {
        let text = fs::read_to_string(file)
            .map_err(|e| format!("failed to read {}: {}", file.display(), e))?;
        Self::parse(&text).map_err(|e| format!("{}: {}", file.display(), e))
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let mut de = serde_json::Deserializer::from_str(text);
        let cfg: ControllerConfig = serde_path_to_error::deserialize(&mut de)
            .map_err(|e| format!("invalid controller config at `{}`: {}", e.path(), e.inner()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Structural checks that must hold for the process to start at all.
    /// Everything else (e.g. a room pointing at a missing unit) is
    /// non-fatal and handled by the registry.
    fn validate(&self) -> Result<(), String> {
        if self.rooms.is_empty() {
            return Err("controller config defines no rooms".to_string());
        }
        if self.outdoor_units.is_empty() && self.operating_mode.is_none() {
            return Err(
                "controller config needs either `outdoor_units` or a legacy flat `operating_mode`"
                    .to_string(),
            );
        }
        if self.outdoor_units.is_empty() && self.sensors.power.is_none() {
            return Err("legacy single-unit config requires `sensors.power`".to_string());
        }
        let night = &self.rules.night;
        if night.start_hour > 23 || night.end_hour > 23 {
            return Err("night hours must be within 0..=23".to_string());
        }
        let adj = &self.rules.adjustments;
        if adj.target_min >= adj.target_max {
            return Err("adjustments.target_min must be below target_max".to_string());
        }
        Ok(())
    }
}
