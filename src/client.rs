//! Blocking HTTP client for the Home Assistant REST API (the subset the
//! controller needs: read entity states, call services, publish a
//! status entity).
//!
//! - Blocking client using `ureq` (no async).
//! - Authenticates with a long-lived access token (`Bearer` header).
//! - The `Hub` trait is the seam between the control core and the
//!   transport; the simulated hub implements it too.

use http::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum HubError {
    Transport(String),
    Http { status: StatusCode, message: String },
    Decode(String),
}

impl core::fmt::Display for HubError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HubError::Transport(s) => write!(f, "transport error: {}", s),
            HubError::Http { status, message } => write!(f, "http {}: {}", status.as_u16(), message),
            HubError::Decode(s) => write!(f, "decode error: {}", s),
        }
    }
}

impl std::error::Error for HubError {}

impl From<ureq::Error> for HubError {
    fn from(value: ureq::Error) -> Self {
        HubError::Transport(value.to_string())
    }
}

/// State of one hub entity: the raw state string plus its attribute
/// object.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityState {
    pub state: String,
    #[serde(default)]
    pub attributes: Value,
}

impl EntityState {
    /// Home Assistant reports sensors it cannot reach as the literal
    /// states below rather than an HTTP error.
    pub fn is_unavailable(&self) -> bool {
        matches!(self.state.as_str(), "unavailable" | "unknown" | "")
    }

    pub fn numeric(&self) -> Option<f64> {
        if self.is_unavailable() {
            return None;
        }
        self.state.trim().parse::<f64>().ok()
    }

    pub fn numeric_attribute(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).and_then(Value::as_f64)
    }
}

/// Everything the control cycle needs from the hub.
pub trait Hub {
    fn get_entity(&self, entity_id: &str) -> Result<EntityState, HubError>;
    fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<(), HubError>;
    fn set_state(&self, entity_id: &str, state: &str, attributes: &Value) -> Result<(), HubError>;
}

pub struct HassClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl HassClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        // Non-2xx responses are handled explicitly so error bodies can
        // be surfaced in HubError.
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        HassClient {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn fail_on_status(mut resp: http::Response<ureq::Body>) -> Result<http::Response<ureq::Body>, HubError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp
            .body_mut()
            .read_to_string()
            .unwrap_or_else(|_| String::from("<no body>"));
        Err(HubError::Http { status, message })
    }
}

impl Hub for HassClient {
    fn get_entity(&self, entity_id: &str) -> Result<EntityState, HubError> {
        let resp = self
            .agent
            .get(self.url(&format!("states/{}", entity_id)))
            .header("Accept", "application/json")
            .header("Authorization", &self.bearer())
            .call()?;
        let mut resp = Self::fail_on_status(resp)?;
        resp.body_mut()
            .read_json::<EntityState>()
            .map_err(|e| HubError::Decode(format!("states/{}: {}", entity_id, e)))
    }

    fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<(), HubError> {
        let resp = self
            .agent
            .post(self.url(&format!("services/{}/{}", domain, service)))
            .header("Accept", "application/json")
            .header("Authorization", &self.bearer())
            .send_json(data)?;
        Self::fail_on_status(resp).map(|_| ())
    }

    fn set_state(&self, entity_id: &str, state: &str, attributes: &Value) -> Result<(), HubError> {
        let body = serde_json::json!({
            "state": state,
            "attributes": attributes,
        });
        let resp = self
            .agent
            .post(self.url(&format!("states/{}", entity_id)))
            .header("Accept", "application/json")
            .header("Authorization", &self.bearer())
            .send_json(&body)?;
        Self::fail_on_status(resp).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(state: &str, attributes: Value) -> EntityState {
        EntityState {
            state: state.to_string(),
            attributes,
        }
    }

    #[test]
    fn numeric_parses_plain_sensor_states() {
        assert_eq!(entity("21.5", Value::Null).numeric(), Some(21.5));
        assert_eq!(entity(" 850 ", Value::Null).numeric(), Some(850.0));
        assert_eq!(entity("heat", Value::Null).numeric(), None);
    }

    #[test]
    fn unavailable_states_are_not_numeric() {
        let e = entity("unavailable", Value::Null);
        assert!(e.is_unavailable());
        assert_eq!(e.numeric(), None);
        assert!(entity("unknown", Value::Null).is_unavailable());
        assert!(!entity("off", Value::Null).is_unavailable());
    }

    #[test]
    fn numeric_attribute_reads_from_attribute_object() {
        let e = entity("heat", serde_json::json!({"temperature": 21.0, "friendly_name": "EG"}));
        assert_eq!(e.numeric_attribute("temperature"), Some(21.0));
        assert_eq!(e.numeric_attribute("friendly_name"), None);
        assert_eq!(e.numeric_attribute("missing"), None);
    }

    #[test]
    fn urls_join_without_doubled_slashes() {
        let c = HassClient::new("http://localhost:8123/", "t");
        assert_eq!(
            c.url("states/sensor.temp_eg"),
            "http://localhost:8123/api/states/sensor.temp_eg"
        );
        assert_eq!(c.url("/services/climate/turn_off"), "http://localhost:8123/api/services/climate/turn_off");
    }
}
