//! Builds the per-cycle state snapshot from hub reads. Read-only: no
//! service calls, no mutation of controller state.

use chrono::{DateTime, Utc};
use log::warn;
use std::collections::BTreeMap;

use crate::client::Hub;
use crate::config::ControllerConfig;
use crate::control::power::PowerReading;
use crate::models::episode::{RoomState, State};

/// One hub read per temperature sensor plus one per climate entity.
/// Rooms with any unreadable value are recorded in `unknown_rooms` and
/// excluded from deltas; they never abort the snapshot.
pub fn build<H: Hub + ?Sized>(
    hub: &H,
    cfg: &ControllerConfig,
    power: &PowerReading,
    now: DateTime<Utc>,
) -> State {
    let mut rooms = BTreeMap::new();
    let mut unknown_rooms = Vec::new();

    for (name, room_cfg) in &cfg.rooms {
        match read_room(hub, &room_cfg.temp_sensor, &room_cfg.climate_entity) {
            Ok(room) => {
                rooms.insert(name.clone(), room);
            }
            Err(reason) => {
                warn!("room {} unreadable, skipping this cycle: {}", name, reason);
                unknown_rooms.push(name.clone());
            }
        }
    }

    let outdoor_temp = cfg.sensors.outdoor_temp.as_ref().and_then(|sensor| {
        match hub.get_entity(sensor) {
            Ok(entity) => {
                let value = entity.numeric();
                if value.is_none() {
                    warn!("outdoor temp sensor {} has no numeric value", sensor);
                }
                value
            }
            Err(e) => {
                warn!("outdoor temp sensor {} unreachable: {}", sensor, e);
                None
            }
        }
    });

    State::new(
        now,
        power.total_watts,
        power.degraded(),
        outdoor_temp,
        rooms,
        unknown_rooms,
    )
}

fn read_room<H: Hub + ?Sized>(
    hub: &H,
    temp_sensor: &str,
    climate_entity: &str,
) -> Result<RoomState, String> {
    let current_temp = hub
        .get_entity(temp_sensor)
        .map_err(|e| format!("{}: {}", temp_sensor, e))?
        .numeric()
        .ok_or_else(|| format!("{}: no numeric temperature", temp_sensor))?;

    let climate = hub
        .get_entity(climate_entity)
        .map_err(|e| format!("{}: {}", climate_entity, e))?;
    if climate.is_unavailable() {
        return Err(format!("{}: climate entity unavailable", climate_entity));
    }
    let target_temp = climate
        .numeric_attribute("temperature")
        .ok_or_else(|| format!("{}: no temperature attribute", climate_entity))?;
    let is_on = climate.state != "off";

    Ok(RoomState::new(current_temp, target_temp, is_on))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{EntityState, HubError};
    use chrono::TimeZone;
    use serde_json::Value;

    struct MapHub(BTreeMap<String, EntityState>);

    impl Hub for MapHub {
        fn get_entity(&self, entity_id: &str) -> Result<EntityState, HubError> {
            match self.0.get(entity_id) {
                Some(e) => Ok(e.clone()),
                None => Err(HubError::Transport(format!("no route to {}", entity_id))),
            }
        }

        fn call_service(&self, _: &str, _: &str, _: &Value) -> Result<(), HubError> {
            Ok(())
        }

        fn set_state(&self, _: &str, _: &str, _: &Value) -> Result<(), HubError> {
            Ok(())
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
                "sensors": {"power": "sensor.p", "outdoor_temp": "sensor.outdoor"},
                "rooms": {
                    "erdgeschoss": {"temp_sensor": "sensor.t_eg", "climate_entity": "climate.eg"},
                    "kinderzimmer": {"temp_sensor": "sensor.t_kz", "climate_entity": "climate.kz"}
                }
            }"#,
        )
        .expect("config parses")
    }

    fn hub() -> MapHub {
        let mut states = BTreeMap::new();
        states.insert("sensor.t_eg".to_string(), entity("21.5", Value::Null));
        states.insert(
            "climate.eg".to_string(),
            entity("heat", serde_json::json!({"temperature": 21.0})),
        );
        states.insert("sensor.t_kz".to_string(), entity("18.2", Value::Null));
        states.insert(
            "climate.kz".to_string(),
            entity("off", serde_json::json!({"temperature": 20.0})),
        );
        states.insert("sensor.outdoor".to_string(), entity("2.5", Value::Null));
        MapHub(states)
    }

    fn reading(watts: f64) -> PowerReading {
        PowerReading {
            total_watts: watts,
            unavailable_units: Vec::new(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn builds_rooms_with_deltas_and_on_state() {
        let state = build(&hub(), &config(), &reading(850.0), now());
        assert!(state.unknown_rooms.is_empty());
        assert_eq!(state.total_power, 850.0);
        assert_eq!(state.outdoor_temp, Some(2.5));

        let eg = &state.rooms["erdgeschoss"];
        assert!((eg.delta - 0.5).abs() < 1e-9);
        assert!(eg.is_on);

        let kz = &state.rooms["kinderzimmer"];
        assert!((kz.delta + 1.8).abs() < 1e-9);
        assert!(!kz.is_on);

        assert!((state.total_delta_abs - 2.3).abs() < 1e-9);
    }

    #[test]
    fn unreadable_sensor_marks_the_room_unknown() {
        let mut h = hub();
        h.0.insert("sensor.t_kz".to_string(), entity("unavailable", Value::Null));
        let state = build(&h, &config(), &reading(850.0), now());
        assert_eq!(state.unknown_rooms, vec!["kinderzimmer"]);
        assert_eq!(state.rooms.len(), 1);
        // total over known rooms only
        assert!((state.total_delta_abs - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unavailable_climate_entity_marks_the_room_unknown() {
        let mut h = hub();
        h.0.insert("climate.eg".to_string(), entity("unavailable", Value::Null));
        let state = build(&h, &config(), &reading(850.0), now());
        assert_eq!(state.unknown_rooms, vec!["erdgeschoss"]);
    }

    #[test]
    fn missing_outdoor_sensor_is_none_not_fatal() {
        let mut h = hub();
        h.0.remove("sensor.outdoor");
        let state = build(&h, &config(), &reading(850.0), now());
        assert_eq!(state.outdoor_temp, None);
        assert_eq!(state.rooms.len(), 2);
    }
}
