//! Output formatting: table, JSON, YAML, plain.
//!
//! Renders data in the format selected by `--output`. Detail views are a
//! two-column `tabled` table, structured formats use serde, plain emits
//! `key=value` lines.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

// ── Detail rows ──────────────────────────────────────────────────────

/// One labelled value in a detail view.
#[derive(Debug, Clone, Tabled)]
pub struct Field {
    #[tabled(rename = "Field")]
    pub label: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl Field {
    pub fn new(label: &str, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }

    /// `-` for absent values.
    pub fn opt<T: std::fmt::Display>(label: &str, value: Option<T>) -> Self {
        Self::new(label, value.map_or_else(|| "-".into(), |v| v.to_string()))
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a single serde-serializable item in the chosen format.
///
/// `fields_fn` builds the rows for `table` and `plain`.
pub fn render_single<T>(
    format: OutputFormat,
    color: bool,
    data: &T,
    fields_fn: impl Fn(&T) -> Vec<Field>,
) -> Result<String, CliError>
where
    T: serde::Serialize + ?Sized,
{
    match format {
        OutputFormat::Table => Ok(render_table(&fields_fn(data), color)),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => Ok(render_plain(&fields_fn(data))),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

/// Status line on stderr, e.g. after a successful `set`.
pub fn print_success(message: &str, color: bool, quiet: bool) {
    if quiet {
        return;
    }
    if color {
        eprintln!("{} {message}", "✓".green());
    } else {
        eprintln!("✓ {message}");
    }
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table(rows: &[Field], color: bool) -> String {
    let rows: Vec<Field> = if color {
        rows.iter()
            .map(|f| Field::new(&f.label.cyan().to_string(), f.value.clone()))
            .collect()
    } else {
        rows.to_vec()
    };
    Table::new(rows).with(Style::rounded()).to_string()
}

fn render_plain(rows: &[Field]) -> String {
    rows.iter()
        .map(|f| {
            let key = f.label.to_lowercase().replace([' ', '-'], "_");
            format!("{key}={}", f.value)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> Result<String, CliError> {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.map_err(|e| CliError::Render(e.to_string()))
}

fn render_yaml<T: serde::Serialize + ?Sized>(data: &T) -> Result<String, CliError> {
    serde_yaml::to_string(data).map_err(|e| CliError::Render(e.to_string()))
}
