//! Clap derive structures for the `amotion` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

use amotion_core::WorkRegime;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// amotion -- control Atrea aMotion ventilation units
#[derive(Debug, Parser)]
#[command(
    name = "amotion",
    version,
    about = "Monitor and control Atrea aMotion ventilation units",
    long_about = "Talks to the unit's local WebSocket API (<url>/api/ws).\n\n\
        Keeps one authenticated session per invocation and reconnects\n\
        transparently while `watch` is running.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Unit profile to use
    #[arg(long, short = 'p', env = "AMOTION_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Unit base URL (overrides profile)
    #[arg(long, short = 'u', env = "AMOTION_URL", global = true)]
    pub url: Option<String>,

    /// Web interface user (overrides profile)
    #[arg(long, env = "AMOTION_USERNAME", global = true)]
    pub username: Option<String>,

    /// Web interface password
    #[arg(long, env = "AMOTION_PASSWORD", global = true, hide = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "AMOTION_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds
    #[arg(long, env = "AMOTION_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain `key=value` lines (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show current temperatures, fan levels and mode
    #[command(alias = "st")]
    Status,

    /// Print status updates as the unit pushes them (Ctrl-C to stop)
    Watch(WatchArgs),

    /// Show unit identity and firmware
    Info,

    /// Show filter, inspection and motor-hour counters
    #[command(alias = "maint")]
    Maintenance,

    /// Change a set-point
    Set(SetArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many updates
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

// ── Set ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SetArgs {
    #[command(subcommand)]
    pub command: SetCommand,
}

#[derive(Debug, Subcommand)]
pub enum SetCommand {
    /// Requested supply temperature in °C
    #[command(alias = "temp")]
    Temperature {
        #[arg(allow_negative_numbers = true)]
        celsius: f64,
    },

    /// Fan level in percent
    Fan {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },

    /// Work regime
    Mode {
        #[arg(value_parser = parse_regime)]
        regime: WorkRegime,
    },
}

fn parse_regime(raw: &str) -> Result<WorkRegime, String> {
    raw.replace('-', "_").parse().map_err(|_| {
        format!(
            "unknown mode '{raw}', expected one of: off, auto, ventilation, \
             night-precooling, disbalance"
        )
    })
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current resolved configuration
    Show,

    /// Store a password in the system keyring
    SetPassword {
        /// Profile name (defaults to the active profile)
        #[arg(long)]
        profile: Option<String>,
    },

    /// Print the config file location
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
