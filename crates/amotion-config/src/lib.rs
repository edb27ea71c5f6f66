//! Shared configuration for aMotion tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `amotion_core::UnitConfig`. The CLI layers its
//! flag overrides on top of what this crate resolves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use amotion_core::UnitConfig;

/// Keyring service name under which passwords are stored.
pub const KEYRING_SERVICE: &str = "amotion";

/// Environment variable consulted for the password of any profile.
pub const PASSWORD_ENV: &str = "AMOTION_PASSWORD";

/// Environment variable consulted for the username of any profile.
pub const USERNAME_ENV: &str = "AMOTION_USERNAME";

const DEFAULT_USERNAME: &str = "admin";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found (available: {available})")]
    ProfileNotFound { name: String, available: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is requested.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named unit profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named unit profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Base URL of the unit (e.g., "http://192.168.0.11").
    pub url: String,

    /// Web interface user. Falls back to `AMOTION_USERNAME`, then "admin".
    pub username: Option<String>,

    /// Password (plaintext, prefer the keyring).
    pub password: Option<String>,

    /// Environment variable name holding the password.
    pub password_env: Option<String>,

    /// Request timeout override in seconds.
    pub timeout: Option<u64>,

    /// Seconds a command waits for login before failing.
    pub login_wait: Option<u64>,

    /// Seconds between maintenance refreshes; 0 disables them.
    pub maintenance_interval: Option<u64>,
}

impl Profile {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            password_env: None,
            timeout: None,
            login_wait: None,
            maintenance_interval: None,
        }
    }
}

impl Config {
    /// Requested profile, else the configured default, else "default".
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.into(),
                available: self.profile_names(),
            })
    }

    /// Sorted, comma-separated profile names for diagnostics.
    pub fn profile_names(&self) -> String {
        let mut names: Vec<_> = self.profiles.keys().map(String::as_str).collect();
        if names.is_empty() {
            return "(none)".into();
        }
        names.sort_unstable();
        names.join(", ")
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("cz", "amotion", "amotion").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("amotion");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` layered over defaults, with `AMOTION_` env on top.
///
/// Nested keys use a double underscore: `AMOTION_DEFAULTS__TIMEOUT=10`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("AMOTION_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(&path, cfg)?;
    Ok(path)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution (without CLI flags) ───────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, ConfigError> {
    Ok(keyring::Entry::new(
        KEYRING_SERVICE,
        &format!("{profile_name}/password"),
    )?)
}

/// Store a profile's password in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(password)?;
    Ok(())
}

/// Username from the profile, the environment, or the unit's default.
pub fn resolve_username(profile: &Profile) -> String {
    profile
        .username
        .clone()
        .or_else(|| std::env::var(USERNAME_ENV).ok())
        .unwrap_or_else(|| DEFAULT_USERNAME.into())
}

/// Resolve a password from the credential chain (no CLI flag step).
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's password_env, then the global env var
    let env_names = profile.password_env.as_deref().into_iter().chain([PASSWORD_ENV]);
    for name in env_names {
        if let Ok(val) = std::env::var(name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(pw) = entry.get_password() {
            return Ok(SecretString::from(pw));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Parse and check a unit base URL.
pub fn parse_unit_url(raw: &str) -> Result<url::Url, ConfigError> {
    let url: url::Url = raw.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        other => Err(ConfigError::Validation {
            field: "url".into(),
            reason: format!("unsupported scheme '{other}', expected http or https"),
        }),
    }
}

/// Build a `UnitConfig` from a profile, no CLI flag overrides.
pub fn profile_to_unit_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<UnitConfig, ConfigError> {
    let password = resolve_password(profile, profile_name)?;
    unit_config_with_password(profile, password)
}

/// Build a `UnitConfig` from a profile with an already-resolved password.
pub fn unit_config_with_password(
    profile: &Profile,
    password: SecretString,
) -> Result<UnitConfig, ConfigError> {
    let url = parse_unit_url(&profile.url)?;

    let mut config = UnitConfig::new(url, resolve_username(profile), password);
    if let Some(secs) = profile.timeout {
        config.request_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.login_wait {
        config.login_wait = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.maintenance_interval {
        config.maintenance_interval = Duration::from_secs(secs);
    }
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert_eq!(cfg.defaults.output, "table");
        assert_eq!(cfg.defaults.timeout, 30);
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn loads_profiles_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
default_profile = "attic"

[defaults]
output = "json"

[profiles.attic]
url = "http://192.168.0.11"
username = "admin"
password = "plain"
timeout = 10
"#,
        );
        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.active_profile_name(None), "attic");
        assert_eq!(cfg.active_profile_name(Some("cellar")), "cellar");
        assert_eq!(cfg.defaults.output, "json");
        assert_eq!(cfg.defaults.color, "auto");

        let attic = cfg.profile("attic").unwrap();
        assert_eq!(attic.url, "http://192.168.0.11");
        assert_eq!(attic.timeout, Some(10));
    }

    #[test]
    fn unknown_profile_lists_available() {
        let mut cfg = Config::default();
        assert_eq!(cfg.profile_names(), "(none)");
        cfg.profiles.insert("b".into(), Profile::new("http://b"));
        cfg.profiles.insert("a".into(), Profile::new("http://a"));

        let err = cfg.profile("c").unwrap_err();
        match err {
            ConfigError::ProfileNotFound { name, available } => {
                assert_eq!(name, "c");
                assert_eq!(available, "a, b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        let mut profile = Profile::new("http://10.0.0.5");
        profile.maintenance_interval = Some(0);
        cfg.profiles.insert("default".into(), profile);
        save_config_to(&path, &cfg).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let profile = loaded.profile("default").unwrap();
        assert_eq!(profile.url, "http://10.0.0.5");
        assert_eq!(profile.maintenance_interval, Some(0));
        assert!(profile.password.is_none());
    }

    #[test]
    fn profile_translates_to_unit_config() {
        let mut profile = Profile::new("http://192.168.0.11");
        profile.username = Some("service".into());
        profile.password = Some("plain".into());
        profile.password_env = Some("AMOTION_TEST_UNSET_PASSWORD_VAR".into());
        profile.timeout = Some(5);
        profile.login_wait = Some(20);
        profile.maintenance_interval = Some(0);

        let config = profile_to_unit_config(&profile, "amotion-test-unknown").unwrap();
        assert_eq!(config.url.as_str(), "http://192.168.0.11/");
        assert_eq!(config.credentials.username, "service");
        assert_eq!(config.credentials.password.expose_secret(), "plain");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.login_wait, Duration::from_secs(20));
        assert!(config.maintenance_interval.is_zero());
    }

    #[test]
    fn bad_url_is_a_validation_error() {
        assert!(matches!(
            parse_unit_url("not a url"),
            Err(ConfigError::Validation { .. })
        ));
        assert!(matches!(
            parse_unit_url("ftp://192.168.0.11"),
            Err(ConfigError::Validation { .. })
        ));
        assert!(parse_unit_url("https://unit.local").is_ok());
    }
}
