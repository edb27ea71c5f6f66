// ── Command API ──
//
// Every write to the unit is a `control` request carrying a `variables`
// object. `Command` names the supported writes; `Unit::execute` routes
// them through the correlation table like any other request.

use amotion_api::models::VariableRange;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::{Display, EnumString};

use crate::error::CoreError;

/// Operating regime requested through `work_regime`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkRegime {
    Off,
    Auto,
    Ventilation,
    NightPrecooling,
    Disbalance,
}

/// All write operations against a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Target temperature in °C.
    SetTemperature(f64),
    /// Requested fan power in percent (0-100).
    SetFan(u8),
    SetMode(WorkRegime),
}

impl Command {
    /// Build the `control` arguments.
    ///
    /// `flow` is the unit's `flow_ventilation_req` range; when present the
    /// fan percentage is translated into an absolute air flow.
    pub fn to_control_args(&self, flow: Option<VariableRange>) -> Result<Value, CoreError> {
        let variables = match *self {
            Self::SetTemperature(celsius) => {
                if !celsius.is_finite() {
                    return Err(CoreError::InvalidCommand {
                        message: format!("temperature must be a finite number, got {celsius}"),
                    });
                }
                json!({ "temp_request": celsius })
            }
            Self::SetFan(percent) => {
                if percent > 100 {
                    return Err(CoreError::InvalidCommand {
                        message: format!("fan power must be 0-100 %, got {percent}"),
                    });
                }
                match flow {
                    Some(range) => json!({ "flow_ventilation_req": flow_request(range, percent) }),
                    None => json!({ "fan_power_req": percent }),
                }
            }
            Self::SetMode(regime) => json!({ "work_regime": regime.to_string() }),
        };
        Ok(json!({ "variables": variables }))
    }
}

/// Absolute air flow for a fan percentage, never below the unit minimum.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
pub fn flow_request(range: VariableRange, percent: u8) -> i64 {
    let flow = (range.max / 100.0) * f64::from(percent);
    flow.max(range.min).trunc() as i64
}
