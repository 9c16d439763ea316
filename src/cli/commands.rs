//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Queue and run a build
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to the project document (YAML or JSON)
    #[arg(short, long)]
    pub file: PathBuf,

    /// Target to build; every target is built when omitted
    #[arg(short, long)]
    pub target: Option<String>,

    /// Directory of plugin binaries
    #[arg(short, long)]
    pub plugins: Option<PathBuf>,

    /// Base directory for agent data (defaults to the platform data directory)
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Timeout for one plugin step, in seconds
    #[arg(long, default_value_t = 3600)]
    pub step_timeout: u64,

    /// Print the captured build log after the build finishes
    #[arg(long)]
    pub show_log: bool,
}

/// Validate a project document
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the project document (YAML or JSON)
    #[arg(short, long)]
    pub file: PathBuf,

    /// Directory of plugin binaries
    #[arg(short, long)]
    pub plugins: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List installed modules
#[derive(Debug, Args, Clone)]
pub struct ModulesCommand {
    /// Directory of plugin binaries
    #[arg(short, long)]
    pub plugins: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
