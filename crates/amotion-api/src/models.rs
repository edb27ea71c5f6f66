// Typed payloads for the endpoints the client consumes.
//
// Every field the unit may omit is `Option`; unknown fields are ignored.
// Wrong types fail deserialization, which callers surface as a protocol
// violation for that single request.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Deserialize a response payload into its endpoint type.
pub fn parse_payload<T: DeserializeOwned>(endpoint: &str, payload: Value) -> Result<T, Error> {
    serde_json::from_value(payload).map_err(|e| Error::ProtocolViolation {
        message: format!("unexpected '{endpoint}' payload: {e}"),
    })
}

// ── ui_info (response and push event) ───────────────────────────────

/// Body of the `ui_info` response and of the `ui_info` push event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiInfo {
    pub unit: UnitState,
    pub requests: RequestState,
}

/// Measured values reported by the unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitState {
    pub temp_sup: Option<f64>,
    pub temp_oda: Option<f64>,
    pub temp_oda_mean: Option<f64>,
    pub temp_ida: Option<f64>,
    pub temp_eha: Option<f64>,
    pub temp_eta: Option<f64>,
    pub fan_eta_factor: Option<f64>,
    pub fan_sup_factor: Option<f64>,
    /// Extract air flow (m³/h) on flow-controlled units.
    pub flow_eta: Option<f64>,
    /// Supply air flow (m³/h) on flow-controlled units.
    pub flow_sup: Option<f64>,
    pub mode_current: Option<String>,
    pub season_current: Option<String>,
}

/// Currently requested set-points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestState {
    pub temp_request: Option<f64>,
    pub fan_power_req: Option<f64>,
    pub flow_ventilation_req: Option<f64>,
    pub work_regime: Option<String>,
}

// ── Schemes ─────────────────────────────────────────────────────────

/// `ui_info_scheme`: which variables the unit reports.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InfoScheme {
    pub unit: serde_json::Map<String, Value>,
    pub requests: serde_json::Map<String, Value>,
}

impl InfoScheme {
    pub fn has_request(&self, name: &str) -> bool {
        self.requests.contains_key(name)
    }
}

/// `ui_control_scheme`: value ranges of controllable variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControlScheme {
    pub types: HashMap<String, VariableType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VariableType {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Inclusive range of a numeric control variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariableRange {
    pub min: f64,
    pub max: f64,
}

impl ControlScheme {
    /// Range for `name`, if both bounds are present and `max` is positive.
    pub fn range(&self, name: &str) -> Option<VariableRange> {
        let ty = self.types.get(name)?;
        match (ty.min, ty.max) {
            (Some(min), Some(max)) if max > 0.0 => Some(VariableRange { min, max }),
            _ => None,
        }
    }
}

// ── Identity ────────────────────────────────────────────────────────

/// `discovery`: board and product identity.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Discovery {
    #[serde(rename = "type")]
    pub model: Option<String>,
    pub production_number: Option<String>,
    pub brand: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub board_type: Option<String>,
    pub board_number: Option<String>,
    pub activation_status: Option<String>,
}

/// `version`: firmware versions per component.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VersionInfo {
    #[serde(rename = "CONTROLLER")]
    pub controller: Option<ComponentVersion>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ComponentVersion {
    pub version: Option<String>,
}

// ── Maintenance ─────────────────────────────────────────────────────

/// `moments/get`: maintenance counters and dates.
///
/// The motor registers are mandatory; a payload without them is rejected.
#[derive(Debug, Clone, Deserialize)]
pub struct Moments {
    #[serde(rename = "lastFilterReset", default)]
    pub last_filter_reset: Option<DateParts>,
    #[serde(default)]
    pub inspection: Option<DateParts>,
    /// Motor 1 operating time in seconds.
    pub m1_register: f64,
    /// Motor 2 operating time in seconds.
    pub m2_register: f64,
    #[serde(default)]
    pub uv_lamp_register: Option<f64>,
}

/// Calendar date as the unit encodes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DateParts {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl DateParts {
    /// `None` for the all-zero "never" marker and impossible dates.
    pub fn to_date(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }
}

// ── Diagram ─────────────────────────────────────────────────────────

/// `ui_diagram_data` response wrapper.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiagramResponse {
    pub ui_diagram_data: DiagramData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiagramData {
    pub bypass_estim: Option<f64>,
    pub preheater_factor: Option<f64>,
    pub preheater_active: Option<bool>,
    pub damper_io_state: Option<bool>,
    pub fan_eta_operating_time: Option<f64>,
    pub fan_sup_operating_time: Option<f64>,
    pub preheater_type: Option<String>,
}

// ── Login ───────────────────────────────────────────────────────────

/// Extract the session token from a credential-login response.
///
/// The unit answers with the bare token string; some firmware wraps
/// it as `{"token": "..."}`.
pub fn login_token(payload: &Value) -> Result<String, Error> {
    let token = match payload {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("token").and_then(Value::as_str),
        _ => None,
    };
    match token {
        Some(t) if !t.is_empty() => Ok(t.to_owned()),
        _ => Err(Error::ProtocolViolation {
            message: format!("login response carried no token: {payload}"),
        }),
    }
}
