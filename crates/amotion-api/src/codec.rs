//! Wire codec for the aMotion WebSocket protocol.
//!
//! Outbound requests are `{"endpoint", "args", "id"}` objects. Inbound
//! frames are either correlated responses (`"type": "response"`) or
//! unsolicited pushes (`"type": "event"`). Decoding never fails hard:
//! anything that does not fit becomes [`Message::Malformed`] so the
//! dispatch loop can log it and move on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::Error;

// ── Endpoints ────────────────────────────────────────────────────────

/// Named operations understood by the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum Endpoint {
    #[strum(serialize = "login")]
    Login,
    #[strum(serialize = "ui_info")]
    UiInfo,
    #[strum(serialize = "ui_info_scheme")]
    UiInfoScheme,
    #[strum(serialize = "ui_control_scheme")]
    UiControlScheme,
    #[strum(serialize = "discovery")]
    Discovery,
    #[strum(serialize = "version")]
    Version,
    #[strum(serialize = "moments/get")]
    MomentsGet,
    #[strum(serialize = "ui_diagram_data")]
    UiDiagramData,
    #[strum(serialize = "control")]
    Control,
    #[strum(serialize = "time")]
    Time,
}

impl Endpoint {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Name of the status push event.
pub const UI_INFO_EVENT: &str = "ui_info";

// ── Outbound ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RequestFrame<'a> {
    endpoint: &'a str,
    args: Option<&'a Value>,
    id: u64,
}

/// Encode a request envelope into a text frame.
pub fn encode(endpoint: Endpoint, args: Option<&Value>, id: u64) -> Result<String, Error> {
    let frame = RequestFrame {
        endpoint: endpoint.as_str(),
        args,
        id,
    };
    Ok(serde_json::to_string(&frame)?)
}

// ── Inbound ──────────────────────────────────────────────────────────

/// Status code carried by every response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResponseCode {
    Ok,
    Unauthorized,
    Other(String),
}

impl From<String> for ResponseCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "OK" => Self::Ok,
            "UNAUTHORIZED" => Self::Unauthorized,
            _ => Self::Other(code),
        }
    }
}

impl From<ResponseCode> for String {
    fn from(code: ResponseCode) -> Self {
        match code {
            ResponseCode::Ok => "OK".into(),
            ResponseCode::Unauthorized => "UNAUTHORIZED".into(),
            ResponseCode::Other(code) => code,
        }
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Unauthorized => f.write_str("UNAUTHORIZED"),
            Self::Other(code) => f.write_str(code),
        }
    }
}

/// A correlated (or, with `id: None`, uncorrelated) response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Option<u64>,
    pub code: ResponseCode,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub response: Option<Value>,
}

#[derive(Serialize)]
struct ResponseFrame<'a> {
    #[serde(flatten)]
    inner: &'a Response,
    #[serde(rename = "type")]
    kind: &'static str,
}

impl Response {
    /// Re-encode this response as the unit would send it.
    pub fn to_frame(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(&ResponseFrame {
            inner: self,
            kind: "response",
        })?)
    }

    /// Turn the response into the caller-facing outcome.
    ///
    /// `OK` yields the payload (`null` when absent); any other code
    /// becomes an error carrying the unit's message.
    pub fn into_result(self) -> Result<Value, Error> {
        match self.code {
            ResponseCode::Ok => Ok(self.response.unwrap_or(Value::Null)),
            ResponseCode::Unauthorized => Err(Error::Unauthorized {
                message: self.error.unwrap_or_default(),
            }),
            ResponseCode::Other(code) => Err(Error::Device {
                code,
                message: self.error.unwrap_or_default(),
            }),
        }
    }
}

/// An unsolicited push from the unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub args: Value,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Response(Response),
    /// A response with code `UNAUTHORIZED`, split out so the session
    /// reacts to it instead of treating it as data.
    Unauthorized {
        id: Option<u64>,
        error: Option<String>,
    },
    Event(Event),
    Malformed {
        reason: String,
    },
}

/// Superset of both inbound shapes.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    code: Option<ResponseCode>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    args: Option<Value>,
}

/// Decode one inbound text frame.
pub fn decode(raw: &str) -> Message {
    let frame: RawFrame = match serde_json::from_str(raw) {
        Ok(f) => f,
        Err(e) => {
            return Message::Malformed {
                reason: e.to_string(),
            };
        }
    };

    let is_event = match frame.kind.as_deref() {
        Some("event") => true,
        Some("response") => false,
        Some(other) => {
            return Message::Malformed {
                reason: format!("unknown frame type '{other}'"),
            };
        }
        // Untyped frames: classify by shape.
        None => frame.event.is_some(),
    };

    if is_event {
        let Some(name) = frame.event else {
            return Message::Malformed {
                reason: "event frame without event name".into(),
            };
        };
        return Message::Event(Event {
            name,
            args: frame.args.unwrap_or(Value::Null),
        });
    }

    let Some(code) = frame.code else {
        return Message::Malformed {
            reason: "response frame without code".into(),
        };
    };

    if code == ResponseCode::Unauthorized {
        return Message::Unauthorized {
            id: frame.id,
            error: frame.error,
        };
    }

    Message::Response(Response {
        id: frame.id,
        code,
        error: frame.error,
        response: frame.response,
    })
}

// ── Tests ────────────────────────────────────────────────────────────
