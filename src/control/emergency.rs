//! Two independent emergency checks, recomputed from scratch every
//! cycle: per-room comfort breaches and compressor power oscillation
//! ("Takten") over the trailing history window.

use chrono::Duration as ChronoDuration;
use log::warn;

use crate::config::Rules;
use crate::control::units::OutdoorUnitRegistry;
use crate::influx::{merged_power_window, PowerHistory};
use crate::models::episode::{EmergencyFlags, State};

/// Below this many samples the oscillation statistics are meaningless;
/// the check fails open rather than guessing.
const MIN_STABILITY_SAMPLES: usize = 5;

pub fn evaluate<H: PowerHistory + ?Sized>(
    state: &State,
    history: &H,
    registry: &OutdoorUnitRegistry,
    rules: &Rules,
) -> EmergencyFlags {
    let mut flags = EmergencyFlags::default();

    // Comfort is strictly per-room: one room far out of band is an
    // emergency even when the aggregate looks fine, and many rooms
    // slightly off are not.
    for (name, room) in &state.rooms {
        if room.delta < -rules.comfort.temp_tolerance_cold
            || room.delta > rules.comfort.temp_tolerance_warm
        {
            flags.offending_rooms.insert(name.clone(), room.delta);
        }
    }
    flags.comfort_emergency = !flags.offending_rooms.is_empty();

    let sensors = registry.power_sensors();
    let window = ChronoDuration::minutes(rules.stability.window_minutes);
    match merged_power_window(history, &sensors, window) {
        Ok(samples) if samples.len() >= MIN_STABILITY_SAMPLES => {
            let watts: Vec<f64> = samples.iter().map(|s| s.watts).collect();
            flags.power_std = sample_std(&watts);
            flags.power_range = range(&watts);
            flags.stability_emergency = flags.power_std > rules.stability.power_std_threshold
                || flags.power_range > rules.stability.power_range_threshold;
        }
        Ok(samples) => {
            warn!(
                "only {} power samples in the last {} min, skipping stability check",
                samples.len(),
                rules.stability.window_minutes
            );
            flags.history_degraded = true;
        }
        Err(e) => {
            warn!("power history unavailable, skipping stability check: {}", e);
            flags.history_degraded = true;
        }
    }

    flags
}

/// Sample standard deviation (n−1 denominator).
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

fn range(values: &[f64]) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(*v);
        max = max.max(*v);
    }
    if min.is_finite() && max.is_finite() {
        max - min
    } else {
        0.0
    }
}
