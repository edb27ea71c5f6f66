//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use amotion_core::Unit;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Connect and log in, with a spinner on interactive terminals.
pub async fn connect(unit: &Unit, global: &GlobalOpts) -> Result<(), CliError> {
    let spinner = (!global.quiet && std::io::stderr().is_terminal()).then(|| {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            bar.set_style(style);
        }
        bar.set_message(format!("Connecting to {}", unit.config().url));
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    });

    let result = unit.connect().await;

    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }
    result?;
    tracing::info!(unit = %unit.display_name(), "session ready");
    Ok(())
}

/// `21.5 °C`, or `-` when unknown.
pub fn celsius(value: Option<f64>) -> String {
    value.map_or_else(|| "-".into(), |v| format!("{v:.1} °C"))
}

/// `50 %`, or `-` when unknown.
pub fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "-".into(), |v| format!("{v:.0} %"))
}

/// `300 m³/h`, or `-` when unknown.
pub fn flow(value: Option<f64>) -> String {
    value.map_or_else(|| "-".into(), |v| format!("{v:.0} m³/h"))
}
