//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use amotion_config::ConfigError;
use amotion_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to unit at {url}")]
    #[diagnostic(
        code(amotion::connection_failed),
        help(
            "Check that the unit is powered and reachable on the network.\n\
             {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Connection to the unit was lost")]
    #[diagnostic(
        code(amotion::connection_lost),
        help("The unit dropped the connection mid-request. Try again.")
    )]
    ConnectionLost,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(amotion::auth_failed),
        help(
            "Verify the username and password of the unit's web interface.\n\
             Run: amotion config set-password --profile {profile}"
        )
    )]
    AuthFailed { profile: String, message: String },

    #[error("No password configured for profile '{profile}'")]
    #[diagnostic(
        code(amotion::no_credentials),
        help(
            "Configure credentials with: amotion config init\n\
             Or set the AMOTION_PASSWORD environment variable."
        )
    )]
    NoCredentials { profile: String },

    // ── Unit ─────────────────────────────────────────────────────────
    #[error("Unit rejected the request ({code}): {message}")]
    #[diagnostic(code(amotion::rejected))]
    Rejected { code: String, message: String },

    #[error("Unexpected reply from the unit: {message}")]
    #[diagnostic(
        code(amotion::protocol),
        help("The unit's firmware may be newer than this tool understands.")
    )]
    Protocol { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(amotion::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(amotion::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: amotion config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No unit configured")]
    #[diagnostic(
        code(amotion::no_config),
        help(
            "Create a profile with: amotion config init\n\
             Or pass --url. Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(amotion::config))]
    Config(ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(amotion::timeout),
        help("Increase timeout with --timeout or check the unit's responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    #[diagnostic(code(amotion::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(amotion::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::ConnectionLost => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Attach the profile name to authentication failures.
    pub fn for_profile(self, profile: &str) -> Self {
        match self {
            Self::AuthFailed { message, .. } => Self::AuthFailed {
                profile: profile.into(),
                message,
            },
            other => other,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },

            CoreError::AuthenticationFailed { message } | CoreError::Unauthorized { message } => {
                CliError::AuthFailed {
                    profile: "default".into(),
                    message,
                }
            }

            CoreError::ConnectionLost | CoreError::NotConnected => CliError::ConnectionLost,

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::MalformedFrame { message } | CoreError::ProtocolViolation { message } => {
                CliError::Protocol { message }
            }

            CoreError::Rejected { code, message } => CliError::Rejected { code, message },

            CoreError::InvalidCommand { message } => CliError::Validation {
                field: "command".into(),
                reason: message,
            },

            CoreError::Config { message } => CliError::Validation {
                field: "url".into(),
                reason: message,
            },

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::ProfileNotFound { name, available } => {
                CliError::ProfileNotFound { name, available }
            }
            other => CliError::Config(other),
        }
    }
}
