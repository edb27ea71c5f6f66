//! Config subcommand handlers.

use dialoguer::{Input, Select};
use serde_json::Value;

use amotion_config::{self as config, Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output::{self, Field};

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Serialized config with plaintext passwords masked.
fn redacted(cfg: &Config) -> Result<Value, CliError> {
    let mut value = serde_json::to_value(cfg).map_err(|e| CliError::Render(e.to_string()))?;
    if let Some(profiles) = value.get_mut("profiles").and_then(Value::as_object_mut) {
        for profile in profiles.values_mut() {
            if let Some(pw) = profile.get_mut("password").filter(|pw| !pw.is_null()) {
                *pw = Value::String("********".into());
            }
        }
    }
    Ok(value)
}

fn config_fields(cfg: &Config) -> Vec<Field> {
    let mut fields = vec![
        Field::new("Config file", config::config_path().display().to_string()),
        Field::opt("Default profile", cfg.default_profile.as_deref()),
        Field::new("Output", cfg.defaults.output.clone()),
        Field::new("Timeout", format!("{}s", cfg.defaults.timeout)),
    ];

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort_unstable();
    for name in names {
        let Some(profile) = cfg.profiles.get(name) else {
            continue;
        };
        let password = if profile.password.is_some() {
            "plaintext"
        } else if let Some(ref env) = profile.password_env {
            env.as_str()
        } else {
            "keyring / AMOTION_PASSWORD"
        };
        fields.push(Field::new(&format!("{name} url"), profile.url.clone()));
        fields.push(Field::new(
            &format!("{name} user"),
            config::resolve_username(profile),
        ));
        fields.push(Field::new(&format!("{name} password"), password));
    }
    fields
}

fn store_in_keyring(profile_name: &str, secret: &str) -> Result<(), CliError> {
    config::store_password(profile_name, secret).map_err(|e| CliError::Validation {
        field: "keyring".into(),
        reason: format!("failed to store password in keyring: {e}"),
    })
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(global),

        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            let value = redacted(&cfg)?;
            let color = output::should_color(global.color);
            let out = output::render_single(global.output, color, &value, |_| config_fields(&cfg))?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::SetPassword { profile } => {
            let cfg = config::load_config_or_default();
            let profile_name = profile
                .or_else(|| global.profile.clone())
                .unwrap_or_else(|| cfg.active_profile_name(None));
            cfg.profile(&profile_name)?;

            let secret = rpassword::prompt_password("Password: ").map_err(prompt_err)?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "value cannot be empty".into(),
                });
            }

            store_in_keyring(&profile_name, &secret)?;
            output::print_success(
                &format!("Password stored in system keyring for profile '{profile_name}'"),
                output::should_color(global.color),
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), false);
            Ok(())
        }
    }
}

// ── Init: interactive wizard ────────────────────────────────────────

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    let config_path = config::config_path();
    eprintln!("aMotion CLI configuration");
    eprintln!("   Config path: {}\n", config_path.display());

    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default(global.profile.clone().unwrap_or_else(|| "default".into()))
        .interact_text()
        .map_err(prompt_err)?;

    let url: String = Input::new()
        .with_prompt("Unit URL")
        .default("http://192.168.0.11".into())
        .validate_with(|raw: &String| {
            config::parse_unit_url(raw)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .interact_text()
        .map_err(prompt_err)?;

    let username: String = Input::new()
        .with_prompt("Username")
        .default("admin".into())
        .interact_text()
        .map_err(prompt_err)?;

    let password = rpassword::prompt_password("Password: ").map_err(prompt_err)?;
    if password.is_empty() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "password cannot be empty".into(),
        });
    }

    let store_choices = &[
        "Store password in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let store_selection = Select::new()
        .with_prompt("Where to store the password?")
        .items(store_choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    let password_field = if store_selection == 0 {
        store_in_keyring(&profile_name, &password)?;
        eprintln!("   ✓ Password stored in system keyring");
        None
    } else {
        Some(password)
    };

    let mut cfg = config::load_config_or_default();
    let mut profile = Profile::new(url);
    profile.username = Some(username);
    profile.password = password_field;
    cfg.profiles.insert(profile_name.clone(), profile);
    cfg.default_profile = Some(profile_name.clone());

    let path = config::save_config(&cfg)?;

    eprintln!("\n✓ Configuration written to {}", path.display());
    eprintln!("  Active profile: {profile_name}");
    eprintln!("\n  Test it: amotion status");
    Ok(())
}
