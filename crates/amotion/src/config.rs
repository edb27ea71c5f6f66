//! Translate profiles plus global flags into a `UnitConfig`.
//!
//! Flags win over the profile; without any profile `--url` plus
//! `AMOTION_PASSWORD` is enough to reach a unit.

use std::time::Duration;

use amotion_config::{self as config, Config, Profile};
use amotion_core::UnitConfig;
use secrecy::SecretString;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The active profile name and the resolved unit config.
pub fn build_unit_config(global: &GlobalOpts) -> Result<(String, UnitConfig), CliError> {
    let cfg = config::load_config_or_default();
    build_from(&cfg, global)
}

fn build_from(cfg: &Config, global: &GlobalOpts) -> Result<(String, UnitConfig), CliError> {
    let profile_name = cfg.active_profile_name(global.profile.as_deref());

    let mut unit = match cfg.profiles.get(&profile_name) {
        Some(profile) => resolve_profile(profile, &profile_name, global)?,
        None if global.profile.is_some() => {
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: cfg.profile_names(),
            });
        }
        None => {
            // No profile: --url and a password from flag/env only
            let raw = global.url.as_deref().ok_or_else(|| CliError::NoConfig {
                path: config::config_path().display().to_string(),
            })?;
            let url = config::parse_unit_url(raw)?;
            let password = global
                .password
                .clone()
                .ok_or_else(|| CliError::NoCredentials {
                    profile: profile_name.clone(),
                })?;
            let username = global.username.clone().unwrap_or_else(|| "admin".into());
            let mut unit = UnitConfig::new(url, username, SecretString::from(password));
            unit.request_timeout = Duration::from_secs(cfg.defaults.timeout);
            unit
        }
    };

    if let Some(secs) = global.timeout {
        unit.request_timeout = Duration::from_secs(secs);
    }
    Ok((profile_name, unit))
}

fn resolve_profile(
    profile: &Profile,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<UnitConfig, CliError> {
    let mut profile = profile.clone();
    if let Some(ref url) = global.url {
        profile.url.clone_from(url);
    }
    if let Some(ref username) = global.username {
        profile.username = Some(username.clone());
    }

    let password = match global.password {
        Some(ref password) => SecretString::from(password.clone()),
        None => config::resolve_password(&profile, profile_name)?,
    };
    Ok(config::unit_config_with_password(&profile, password)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;
    use crate::cli::{ColorMode, OutputFormat};

    fn global() -> GlobalOpts {
        GlobalOpts {
            profile: None,
            url: None,
            username: None,
            password: None,
            output: OutputFormat::Table,
            color: ColorMode::Never,
            verbose: 0,
            quiet: false,
            timeout: None,
        }
    }

    fn with_profile() -> Config {
        let mut cfg = Config::default();
        let mut profile = Profile::new("http://192.168.0.11");
        profile.username = Some("service".into());
        profile.timeout = Some(12);
        cfg.profiles.insert("default".into(), profile);
        cfg
    }

    #[test]
    fn no_profile_and_no_url_is_no_config() {
        let err = build_from(&Config::default(), &global()).unwrap_err();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }

    #[test]
    fn url_without_password_is_no_credentials() {
        let mut opts = global();
        opts.url = Some("http://10.0.0.2".into());
        let err = build_from(&Config::default(), &opts).unwrap_err();
        assert!(matches!(err, CliError::NoCredentials { .. }));
    }

    #[test]
    fn flags_alone_are_enough() {
        let mut opts = global();
        opts.url = Some("http://10.0.0.2".into());
        opts.password = Some("pw".into());
        opts.timeout = Some(7);
        let (name, unit) = build_from(&Config::default(), &opts).unwrap();
        assert_eq!(name, "default");
        assert_eq!(unit.credentials.username, "admin");
        assert_eq!(unit.credentials.password.expose_secret(), "pw");
        assert_eq!(unit.request_timeout, Duration::from_secs(7));
    }

    #[test]
    fn flags_override_profile() {
        let mut opts = global();
        opts.url = Some("http://10.0.0.9".into());
        opts.password = Some("pw".into());
        let (_, unit) = build_from(&with_profile(), &opts).unwrap();
        assert_eq!(unit.url.as_str(), "http://10.0.0.9/");
        assert_eq!(unit.credentials.username, "service");
        assert_eq!(unit.request_timeout, Duration::from_secs(12));
    }

    #[test]
    fn unknown_requested_profile() {
        let mut opts = global();
        opts.profile = Some("cellar".into());
        let err = build_from(&with_profile(), &opts).unwrap_err();
        assert!(matches!(err, CliError::ProfileNotFound { .. }));
    }
}
