use thiserror::Error;

/// Top-level error type for the `amotion-api` crate.
///
/// Covers every failure mode of the wire layer: the WebSocket link,
/// frame decoding, request correlation and device-reported errors.
/// `amotion-core` maps these into user-facing diagnostics.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// WebSocket connection could not be established.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The connection dropped while the operation was in flight.
    #[error("Connection to the unit was lost")]
    ConnectionLost,

    /// No matching response (or no connection) within the deadline.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The transport has been shut down; no further traffic is possible.
    #[error("Transport closed")]
    Closed,

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Authentication ──────────────────────────────────────────────
    /// Credentials rejected or token missing/expired.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // ── Protocol ────────────────────────────────────────────────────
    /// A frame could not be decoded.
    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    /// A response did not have the shape the endpoint promises,
    /// or the correlation rules were broken.
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// The unit answered with a non-OK status code.
    #[error("Unit returned {code}: {message}")]
    Device { code: String, message: String },

    /// Outbound payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns `true` if this error indicates the session must log in again.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_) | Self::ConnectionLost | Self::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
