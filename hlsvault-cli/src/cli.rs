use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "hlsvault",
    author,
    version,
    about = "Resumable HLS downloader with a success ledger and failure replay"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Root directory for downloads, the ledger and the error journal
    #[arg(long, global = true, env = "HLSVAULT_ROOT")]
    pub root: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Concurrent segment downloads per job
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Failed segments that abort a job (0 disables the limit)
    #[arg(long = "max-errors", global = true)]
    pub max_errors: Option<usize>,

    /// Download only the first N segments of every playlist
    #[arg(long, global = true)]
    pub segment_limit: Option<usize>,

    /// Directory for the daily rolling log file
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download every record of a crawler list
    Download {
        /// Crawler list: a header line followed by comma-separated records
        input: PathBuf,

        /// Bearer credential sent with every request
        #[arg(long, env = "HLSVAULT_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Replay the failures recorded in the error journal
    Retry {
        /// Bearer credential sent with every request
        #[arg(long, env = "HLSVAULT_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}
