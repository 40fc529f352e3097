use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Command-line parameters.
#[derive(Parser, Debug)]
#[command(name = "condor-daemon")]
#[command(author, version, about = "Watches a list of streams and launches them in a player")]
pub struct Cli {
    /// Config file (default: config.json in the platform config directory).
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level for this crate. RUST_LOG, when set, takes precedence.
    #[arg(short, long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Only log warnings and errors from third-party crates.
    #[arg(long, global = true)]
    pub denoise_logging: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the monitor until Ctrl+C (the default).
    Run,

    /// Check once whether a URL is live.
    Check { url: String },

    /// Print the launch command for a URL.
    Command {
        url: String,
        /// Use the alternate player.
        #[arg(short, long)]
        alternate: bool,
        /// One argument per line.
        #[arg(short, long)]
        preview: bool,
    },

    /// Open a URL in the player. Unconfigured URLs are checked first.
    Launch {
        url: String,
        /// Use the alternate player.
        #[arg(short, long)]
        alternate: bool,
    },

    /// Add a stream to the configuration.
    Add {
        url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        quality: Option<String>,
        #[arg(long)]
        player: Option<String>,
        /// Extra streamlink arguments for this stream.
        #[arg(long, allow_hyphen_values = true)]
        sl_args: Option<String>,
        /// Player arguments for this stream.
        #[arg(long, allow_hyphen_values = true)]
        mp_args: Option<String>,
        /// Override the global notification setting.
        #[arg(long)]
        notify: Option<bool>,
        /// Exclude from polling and list it as always on.
        #[arg(long)]
        always_on: bool,
    },

    /// Remove a stream from the configuration.
    Remove { url: String },

    /// List configured streams.
    List,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}
