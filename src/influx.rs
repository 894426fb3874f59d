//! Read-only client for the InfluxDB v1 `/query` endpoint.
//!
//! The controller only ever asks one question of the historical store:
//! "give me the recent power draw of this sensor, bucketed to one
//! minute". Home Assistant's recorder writes watt readings into the
//! `W` measurement tagged with `entity_id`.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum HistoryError {
    Transport(String),
    Http { status: http::StatusCode, message: String },
    Decode(String),
    Query(String),
}

impl core::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HistoryError::Transport(s) => write!(f, "transport error: {}", s),
            HistoryError::Http { status, message } => {
                write!(f, "http {}: {}", status.as_u16(), message)
            }
            HistoryError::Decode(s) => write!(f, "decode error: {}", s),
            HistoryError::Query(s) => write!(f, "query error: {}", s),
        }
    }
}

impl std::error::Error for HistoryError {}

impl From<ureq::Error> for HistoryError {
    fn from(value: ureq::Error) -> Self {
        HistoryError::Transport(value.to_string())
    }
}

/// One bucketed power reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSample {
    pub time: DateTime<Utc>,
    pub watts: f64,
}

/// Source of recent power readings for the oscillation check.
pub trait PowerHistory {
    /// Mean watt readings for `sensor` over the trailing `window`,
    /// bucketed to one minute, oldest first. Buckets without data are
    /// omitted, not zero-filled.
    fn power_window(
        &self,
        sensor: &str,
        window: ChronoDuration,
    ) -> Result<Vec<PowerSample>, HistoryError>;
}

// InfluxDB v1 query response shape. Errors can appear both at the top
// level and per-result.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

pub struct InfluxClient {
    agent: ureq::Agent,
    base_url: String,
    database: String,
    measurement: String,
}

impl InfluxClient {
    pub fn new(
        base_url: impl Into<String>,
        database: impl Into<String>,
        measurement: impl Into<String>,
    ) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        InfluxClient {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            database: database.into(),
            measurement: measurement.into(),
        }
    }

    fn window_query(&self, sensor: &str, window: ChronoDuration) -> String {
        format!(
            "SELECT mean(\"value\") AS watts FROM \"{}\" WHERE \"entity_id\" = '{}' AND time > now() - {}m GROUP BY time(1m) FILL(none)",
            self.measurement,
            sensor.replace('\'', "\\'"),
            window.num_minutes().max(1),
        )
    }
}

impl PowerHistory for InfluxClient {
    fn power_window(
        &self,
        sensor: &str,
        window: ChronoDuration,
    ) -> Result<Vec<PowerSample>, HistoryError> {
        let resp = self
            .agent
            .get(format!("{}/query", self.base_url))
            .query("db", &self.database)
            .query("epoch", "s")
            .query("q", &self.window_query(sensor, window))
            .header("Accept", "application/json")
            .call()?;

        let status = resp.status();
        let mut resp = resp;
        if !status.is_success() {
            let message = resp
                .body_mut()
                .read_to_string()
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(HistoryError::Http { status, message });
        }

        let parsed: QueryResponse = resp
            .body_mut()
            .read_json()
            .map_err(|e| HistoryError::Decode(e.to_string()))?;
        parse_power_window(parsed)
    }
}

fn parse_power_window(resp: QueryResponse) -> Result<Vec<PowerSample>, HistoryError> {
    if let Some(e) = resp.error {
        return Err(HistoryError::Query(e));
    }
    let Some(result) = resp.results.into_iter().next() else {
        return Ok(Vec::new());
    };
    if let Some(e) = result.error {
        return Err(HistoryError::Query(e));
    }
    let Some(series) = result.series.into_iter().next() else {
        return Ok(Vec::new());
    };

    let time_idx = series.columns.iter().position(|c| c == "time");
    let watts_idx = series.columns.iter().position(|c| c == "watts");
    let (Some(time_idx), Some(watts_idx)) = (time_idx, watts_idx) else {
        return Err(HistoryError::Decode(format!(
            "unexpected columns: {:?}",
            series.columns
        )));
    };

    let mut samples = Vec::with_capacity(series.values.len());
    for row in &series.values {
        let epoch = row.get(time_idx).and_then(Value::as_i64);
        let watts = row.get(watts_idx).and_then(Value::as_f64);
        // FILL(none) still allows null means in edge buckets; skip them.
        let (Some(epoch), Some(watts)) = (epoch, watts) else {
            continue;
        };
        let Some(time) = Utc.timestamp_opt(epoch, 0).single() else {
            continue;
        };
        samples.push(PowerSample { time, watts });
    }
    samples.sort_by_key(|s| s.time);
    Ok(samples)
}

/// Merge the windows of several power sensors into one total-draw
/// series, summing readings that fall into the same minute bucket.
/// Sensors whose query fails are skipped; the caller decides whether a
/// partial merge is still usable.
pub fn merged_power_window<H: PowerHistory + ?Sized>(
    history: &H,
    sensors: &[String],
    window: ChronoDuration,
) -> Result<Vec<PowerSample>, HistoryError> {
    if sensors.len() == 1 {
        return history.power_window(&sensors[0], window);
    }

    let mut buckets: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
    let mut last_err = None;
    let mut succeeded = 0usize;
    for sensor in sensors {
        match history.power_window(sensor, window) {
            Ok(samples) => {
                succeeded += 1;
                for s in samples {
                    *buckets.entry(s.time).or_insert(0.0) += s.watts;
                }
            }
            Err(e) => {
                log::warn!("power history for {} unavailable: {}", sensor, e);
                last_err = Some(e);
            }
        }
    }
    if succeeded == 0 {
        if let Some(e) = last_err {
            return Err(e);
        }
        return Ok(Vec::new());
    }
    Ok(buckets
        .into_iter()
        .map(|(time, watts)| PowerSample { time, watts })
        .collect())
}
