// ── Core error types ──
//
// User-facing errors from amotion-core. Callers never see raw frames or
// serde failures; the `From<amotion_api::Error>` impl translates wire-layer
// errors into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to unit at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The session lost its authorization while a request was in flight.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Connection to the unit was lost")]
    ConnectionLost,

    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Not connected to the unit")]
    NotConnected,

    // ── Protocol errors ──────────────────────────────────────────────
    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Unit rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Invalid command: {message}")]
    InvalidCommand { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the same operation may succeed if simply retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost | Self::Timeout { .. } | Self::NotConnected
        )
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<amotion_api::Error> for CoreError {
    fn from(err: amotion_api::Error) -> Self {
        match err {
            amotion_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: "<unit>".into(),
                reason,
            },
            amotion_api::Error::ConnectionLost => CoreError::ConnectionLost,
            amotion_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            amotion_api::Error::Closed => CoreError::NotConnected,
            amotion_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid unit URL: {e}"),
            },
            amotion_api::Error::Unauthorized { message } => CoreError::Unauthorized { message },
            amotion_api::Error::MalformedFrame { message } => CoreError::MalformedFrame { message },
            amotion_api::Error::ProtocolViolation { message } => {
                CoreError::ProtocolViolation { message }
            }
            amotion_api::Error::Device { code, message } => CoreError::Rejected { code, message },
            amotion_api::Error::Serialization(message) => CoreError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_kept_apart_from_bad_credentials() {
        let err: CoreError = amotion_api::Error::Unauthorized {
            message: "missing token".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Unauthorized { ref message } if message == "missing token"));
    }

    #[test]
    fn device_code_is_preserved() {
        let err: CoreError = amotion_api::Error::Device {
            code: "INVALID_ARGS".into(),
            message: "out of range".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Unit rejected the request (INVALID_ARGS): out of range"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(CoreError::from(amotion_api::Error::ConnectionLost).is_transient());
        assert!(CoreError::from(amotion_api::Error::Timeout { timeout_secs: 30 }).is_transient());
        assert!(!CoreError::AuthenticationFailed { message: String::new() }.is_transient());
    }
}
