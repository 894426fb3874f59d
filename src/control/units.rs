//! Outdoor unit registry: the normalized view of which compressor
//! serves which room, and in which operating mode.
//!
//! Two config shapes normalize into the same registry: the explicit
//! `outdoor_units` map, and the legacy flat single-unit shape which
//! becomes a synthetic unit named `default`.

use log::warn;
use std::collections::BTreeMap;

use crate::config::{ControllerConfig, OperatingMode};

pub const DEFAULT_UNIT_ID: &str = "default";

#[derive(Debug, Clone, PartialEq)]
pub struct OutdoorUnit {
    pub operating_mode: OperatingMode,
    pub power_sensor: String,
}

#[derive(Debug)]
pub enum RegistryError {
    UnknownUnit { room: String, unit_id: String },
    UnknownRoom { room: String },
}

impl core::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RegistryError::UnknownUnit { room, unit_id } => {
                write!(f, "room {} references unknown outdoor unit {}", room, unit_id)
            }
            RegistryError::UnknownRoom { room } => write!(f, "unknown room {}", room),
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Debug, Clone)]
pub struct OutdoorUnitRegistry {
    units: BTreeMap<String, OutdoorUnit>,
    /// room name -> unit id (resolved, including the `default` fallback)
    room_units: BTreeMap<String, String>,
}

impl OutdoorUnitRegistry {
    pub fn from_config(cfg: &ControllerConfig) -> Result<Self, String> {
        let mut units = BTreeMap::new();
        if cfg.outdoor_units.is_empty() {
            let operating_mode = cfg
                .operating_mode
                .ok_or_else(|| "no outdoor units and no legacy operating_mode".to_string())?;
            let power_sensor = cfg
                .sensors
                .power
                .clone()
                .ok_or_else(|| "legacy single-unit config requires sensors.power".to_string())?;
            units.insert(
                DEFAULT_UNIT_ID.to_string(),
                OutdoorUnit { operating_mode, power_sensor },
            );
        } else {
            for (id, unit) in &cfg.outdoor_units {
                units.insert(
                    id.clone(),
                    OutdoorUnit {
                        operating_mode: unit.operating_mode,
                        power_sensor: unit.power_sensor.clone(),
                    },
                );
            }
        }

        let mut room_units = BTreeMap::new();
        for (room, room_cfg) in &cfg.rooms {
            let unit_id = room_cfg
                .outdoor_unit
                .clone()
                .unwrap_or_else(|| DEFAULT_UNIT_ID.to_string());
            room_units.insert(room.clone(), unit_id);
        }

        Ok(OutdoorUnitRegistry { units, room_units })
    }

    pub fn unit_for_room(&self, room: &str) -> Result<(&str, &OutdoorUnit), RegistryError> {
        let unit_id = self
            .room_units
            .get(room)
            .ok_or_else(|| RegistryError::UnknownRoom { room: room.to_string() })?;
        match self.units.get(unit_id) {
            Some(unit) => Ok((unit_id.as_str(), unit)),
            None => Err(RegistryError::UnknownUnit {
                room: room.to_string(),
                unit_id: unit_id.clone(),
            }),
        }
    }

    /// Structural consistency check at startup. Problems are warnings,
    /// not fatal: a room wired to a missing unit is simply skipped by
    /// the planner each cycle.
    pub fn validate(&self) -> bool {
        let mut ok = true;
        for (room, unit_id) in &self.room_units {
            if !self.units.contains_key(unit_id) {
                warn!("room {} references unknown outdoor unit {}", room, unit_id);
                ok = false;
            }
        }
        for (unit_id, unit) in &self.units {
            if unit.power_sensor.trim().is_empty() {
                warn!("outdoor unit {} has an empty power sensor", unit_id);
                ok = false;
            }
        }
        ok
    }

    /// Distinct power sensors across all units, in unit-id order.
    pub fn power_sensors(&self) -> Vec<String> {
        let mut sensors: Vec<String> = self
            .units
            .values()
            .map(|u| u.power_sensor.clone())
            .collect();
        sensors.dedup();
        sensors
    }

    pub fn units(&self) -> impl Iterator<Item = (&str, &OutdoorUnit)> {
        self.units.iter().map(|(id, unit)| (id.as_str(), unit))
    }

    pub fn is_single_unit(&self) -> bool {
        self.units.len() == 1
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }
}
