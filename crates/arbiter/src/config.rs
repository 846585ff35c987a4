use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(about = "Media resource arbitration daemon", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the arbiter daemon
    Daemon(Box<DaemonArgs>),
    /// Print the scheduling priority the oracle reports for a pid
    #[command(name = "check-priority")]
    CheckPriority(CheckPriorityArgs),
}

#[derive(Parser, Clone)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "ARBITER_SOCKET_DIR",
        value_hint = clap::ValueHint::DirPath,
        default_value = "/run/arbiter",
        help = "Directory watched for client connection address files"
    )]
    pub socket_dir: PathBuf,

    #[arg(
        long,
        env = "ARBITER_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Log to this file with daily rotation instead of stdout"
    )]
    pub log_file: Option<PathBuf>,

    #[arg(
        long,
        default_value = "1",
        help = "Seconds between scans for new client connections"
    )]
    pub accept_interval_secs: u64,

    #[arg(
        long,
        default_value = "30",
        help = "Seconds between registry prune passes, 0 disables pruning"
    )]
    pub prune_interval_secs: u64,

    #[arg(
        long,
        help = "Allow multiple secure codecs to coexist",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub supports_multiple_secure_codecs: bool,

    #[arg(
        long,
        help = "Allow a secure codec to coexist with a non-secure codec",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub supports_secure_with_non_secure_codec: bool,
}

#[derive(Parser, Clone)]
pub struct CheckPriorityArgs {
    #[arg(help = "Process id to query")]
    pub pid: u32,
}
