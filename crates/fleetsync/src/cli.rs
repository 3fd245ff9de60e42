//! Clap derive structures for the `fleetsync` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fleetsync -- live position sync for GPS51 fleets
#[derive(Debug, Parser)]
#[command(
    name = "fleetsync",
    version,
    about = "Sync live vehicle positions from a GPS51 account",
    long_about = "Authenticates against the GPS51 open API, lists devices, fetches\n\
        their latest positions and keeps them fresh with an adaptive poller.\n\n\
        Provider calls are spaced and guarded by a circuit breaker; features\n\
        are switched off gradually when dependent services fail.",
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
    /// Account profile to use
    #[arg(long, short = 'p', env = "FLEETSYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Provider API URL (overrides profile)
    #[arg(long, env = "FLEETSYNC_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Account username (overrides profile)
    #[arg(long, short = 'u', env = "FLEETSYNC_USERNAME", global = true)]
    pub username: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "FLEETSYNC_OUTPUT",
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

    /// Skip TLS certificate verification
    #[arg(long, short = 'k', env = "FLEETSYNC_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "FLEETSYNC_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
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
    /// Log in and report the session state
    Login,

    /// List the account's devices
    #[command(alias = "dev", alias = "d")]
    Devices,

    /// Fetch the latest positions
    #[command(alias = "pos")]
    Positions(PositionsArgs),

    /// Run one polling cycle and print its report
    Sync,

    /// Poll continuously until interrupted
    Watch(WatchArgs),

    /// Send a command to a device
    Send(SendArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command Arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PositionsArgs {
    /// Device to query (repeatable; default: every device)
    #[arg(long = "device", short = 'd')]
    pub devices: Vec<String>,

    /// Only positions newer than this: epoch millis, RFC 3339, or an age
    /// such as "15m"
    #[arg(long)]
    pub since: Option<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Base polling interval (e.g. "30s", "2m")
    #[arg(long, short = 'i')]
    pub interval: Option<String>,

    /// Schedule cycles from vehicle activity instead of a fixed interval
    #[arg(long)]
    pub adaptive: bool,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Target device ID
    pub device: String,

    /// Provider command name
    pub command: String,

    /// Command parameter (repeatable, sent in order)
    #[arg(long = "param", short = 'P')]
    pub params: Vec<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create a profile with guided setup
    Init,

    /// Display the configuration with secrets masked
    Show,

    /// Store the password hash for a profile in the system keyring
    SetPassword {
        /// Profile name (default: active profile)
        #[arg(long)]
        profile: Option<String>,
    },

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Delete a profile and its keyring entry
    Remove {
        /// Profile name to remove
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
