//! Current total compressor draw across all outdoor units.

use log::warn;

use crate::client::Hub;
use crate::control::units::OutdoorUnitRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct PowerReading {
    pub total_watts: f64,
    /// Units whose power sensor was unreachable or non-numeric this
    /// cycle; each contributed 0 W to the total.
    pub unavailable_units: Vec<String>,
}

impl PowerReading {
    pub fn degraded(&self) -> bool {
        !self.unavailable_units.is_empty()
    }
}

/// Sum the instantaneous draw of every unit's power sensor. A failing
/// sensor degrades the total instead of failing the cycle.
pub fn read_total<H: Hub + ?Sized>(hub: &H, registry: &OutdoorUnitRegistry) -> PowerReading {
    let mut total_watts = 0.0;
    let mut unavailable_units = Vec::new();

    for (unit_id, unit) in registry.units() {
        let watts = match hub.get_entity(&unit.power_sensor) {
            Ok(entity) => entity.numeric(),
            Err(e) => {
                warn!("power sensor {} ({}) unreachable: {}", unit.power_sensor, unit_id, e);
                None
            }
        };
        match watts {
            Some(w) => total_watts += w,
            None => {
                warn!("unit {} reports no usable power value, counting 0 W", unit_id);
                unavailable_units.push(unit_id.to_string());
            }
        }
    }

    PowerReading { total_watts, unavailable_units }
}
