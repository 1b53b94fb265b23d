//! Clap derive structures for the `relayctl` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// relayctl -- drive a dual-relay ESP32 board from the command line
#[derive(Debug, Parser)]
#[command(
    name = "relayctl",
    version,
    about = "Control and monitor a dual-relay ESP32 board",
    long_about = "Finds the board on the local network, switches its two relays, and\n\
        checks that each relay's feedback contact agrees with its output.\n\n\
        Commands go over WebSocket, then MQTT, then HTTP, whichever is up first.",
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
    /// Device address (host or IP, optional :port); skips discovery
    #[arg(long, short = 'a', env = "RELAYCTL_ADDRESS", global = true)]
    pub address: Option<String>,

    /// Config file path
    #[arg(long, env = "RELAYCTL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "RELAYCTL_OUTPUT",
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

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// HTTP request timeout in milliseconds
    #[arg(long, env = "RELAYCTL_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Never open the WebSocket channel
    #[arg(long, global = true)]
    pub no_websocket: bool,

    /// Never open the MQTT channel
    #[arg(long, global = true)]
    pub no_mqtt: bool,

    /// Talk to legacy firmware (`/status`, `/control`, bearer token)
    #[arg(long, global = true)]
    pub legacy: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
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

#[derive(Debug, Clone, ValueEnum)]
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
    /// Scan the network for the board and remember its address
    #[command(alias = "scan")]
    Discover,

    /// Connect to a board at a known address and remember it
    Connect(ConnectArgs),

    /// Forget the remembered address and all learned state
    Forget,

    /// Show relay, feedback and link state
    #[command(alias = "st")]
    Status,

    /// Switch a relay on or off
    #[command(alias = "r")]
    Relay(RelayArgs),

    /// Compare each relay's output with its feedback contact
    #[command(alias = "diag")]
    Diagnostic,

    /// Stream live state changes until interrupted
    Watch(WatchArgs),

    /// Show the error log (feedback mismatches, device errors)
    Log(LogArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Manage the legacy firmware's bearer token
    Auth(AuthArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Device commands ──────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Device address, e.g. 192.168.1.100 or esp32s3.local
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

#[derive(Debug, Args)]
pub struct RelayArgs {
    /// Relay number
    #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
    pub relay: u8,

    /// Target state
    pub state: Switch,

    /// Wait for a WebSocket or MQTT link before sending
    #[arg(long)]
    pub realtime: bool,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,

    /// Poll over HTTP only, no push channels
    #[arg(long)]
    pub poll_only: bool,
}

#[derive(Debug, Args)]
pub struct LogArgs {
    /// Run a diagnostic first so current mismatches are included
    #[arg(long)]
    pub diagnose: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Interactive configuration wizard
    Init,

    /// Show the effective configuration (token redacted)
    Show,

    /// Print the config file path
    Path,
}

// ── Auth ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Store a bearer token in the system keyring
    Login {
        /// Read the token from stdin instead of prompting
        #[arg(long)]
        stdin: bool,
    },

    /// Remove the stored bearer token
    Logout,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
