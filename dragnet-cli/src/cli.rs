use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

/// Run a multi-stage asset-discovery scan task
#[derive(Parser)]
#[command(name = "dragnet", version)]
pub struct Cli {
    /// Path to a task YAML file
    #[arg(short, long)]
    pub task: PathBuf,

    /// Directory where external scanner tools are provisioned
    #[arg(long, default_value = "tools", env = "DRAGNET_TOOL_DIR")]
    pub tool_dir: PathBuf,

    /// Redis URL for cross-worker dedup; local-only when omitted
    #[arg(long, env = "DRAGNET_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Skip provisioning external scanner tools before the run
    #[arg(long)]
    pub no_install: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}
