// ── Runtime connection configuration ──
//
// These types describe *how* to talk to one aMotion unit. They carry
// credentials and tuning, but never touch disk. The CLI builds a
// `UnitConfig` (usually from a profile) and hands it to `Unit::new`.

use std::time::Duration;

use amotion_api::ReconnectConfig;
use amotion_api::correlation::{DEFAULT_TIMEOUT, MAINTENANCE_TIMEOUT};
use secrecy::SecretString;
use url::Url;

/// Login credentials for the unit's web interface.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// How the session reacts to failed logins.
#[derive(Debug, Clone)]
pub struct ConnectionPolicy {
    /// Fail [`Unit::connect`](crate::Unit::connect) on the first connect or
    /// login failure instead of retrying in the background.
    pub fail_fast_on_setup: bool,

    /// Give up after this many consecutive login failures once set up.
    /// `None` keeps retrying forever.
    pub max_login_failures: Option<u32>,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            fail_fast_on_setup: true,
            max_login_failures: None,
        }
    }
}

/// Configuration for one unit connection.
#[derive(Debug, Clone)]
pub struct UnitConfig {
    /// Base URL of the unit, e.g. `http://192.168.0.11`.
    pub url: Url,
    pub credentials: Credentials,
    pub reconnect: ReconnectConfig,
    pub policy: ConnectionPolicy,
    /// Deadline for an ordinary request/response round trip.
    pub request_timeout: Duration,
    /// Deadline for `moments/get` and `ui_diagram_data`.
    pub maintenance_timeout: Duration,
    /// How long a command waits for the session to authenticate.
    pub login_wait: Duration,
    /// Period of the background maintenance refresh. Zero disables it.
    pub maintenance_interval: Duration,
}

impl UnitConfig {
    pub fn new(url: Url, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            url,
            credentials: Credentials {
                username: username.into(),
                password,
            },
            reconnect: ReconnectConfig::default(),
            policy: ConnectionPolicy::default(),
            request_timeout: DEFAULT_TIMEOUT,
            maintenance_timeout: MAINTENANCE_TIMEOUT,
            login_wait: Duration::from_secs(60),
            maintenance_interval: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn defaults() {
        let config = UnitConfig::new(
            Url::parse("http://192.168.0.11").unwrap(),
            "admin",
            SecretString::from("secret".to_owned()),
        );
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.maintenance_timeout, Duration::from_secs(60));
        assert_eq!(config.login_wait, Duration::from_secs(60));
        assert_eq!(config.maintenance_interval, Duration::from_secs(300));
        assert!(config.policy.fail_fast_on_setup);
        assert!(config.policy.max_login_failures.is_none());
        assert_eq!(config.credentials.password.expose_secret(), "secret");
    }
}
