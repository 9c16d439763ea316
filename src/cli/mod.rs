//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{ModulesCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Build agent that runs staged release pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "forgeline")]
#[command(version)]
#[command(about = "Runs Source, Build, Archive, Distribute and Notify pipelines through pluggable modules", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Queue and run a build of a project
    Run(RunCommand),

    /// Validate a project document against the installed modules
    Validate(ValidateCommand),

    /// List installed modules
    Modules(ModulesCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "forgeline",
            "run",
            "-f",
            "demo.yaml",
            "--target",
            "Release",
            "--step-timeout",
            "60",
        ])
        .unwrap();

        match cli.command {
            Command::Run(cmd) => {
                assert_eq!(cmd.file.to_str(), Some("demo.yaml"));
                assert_eq!(cmd.target.as_deref(), Some("Release"));
                assert_eq!(cmd.step_timeout, 60);
                assert!(cmd.plugins.is_none());
            }
            other => panic!("Expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::try_parse_from(["forgeline", "modules", "--json", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Modules(ModulesCommand { json: true, .. })));
    }

    #[test]
    fn test_run_requires_file() {
        assert!(Cli::try_parse_from(["forgeline", "run"]).is_err());
    }
}
