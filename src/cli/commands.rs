//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: one reaper pass
//! - plan: decide a pass without releasing anything
//! - watch: keep running passes on an interval

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// reapr - Release CI containers that no longer serve a caching purpose
#[derive(Parser, Debug)]
#[command(name = "reapr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single reaper pass
    Run {
        /// Also release orphan containers
        #[arg(long)]
        orphans: bool,
    },

    /// Show what a pass would release without changing anything
    Plan {
        /// Also consider orphan containers
        #[arg(long)]
        orphans: bool,

        /// List retained containers too
        #[arg(short, long)]
        all: bool,
    },

    /// Run passes periodically until interrupted
    Watch {
        /// Seconds between passes (overrides config)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["reapr"]).is_err());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["reapr", "-v", "run"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["reapr", "-c", "/etc/reapr.yml", "run"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/etc/reapr.yml")));
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::try_parse_from(["reapr", "run"]).unwrap();
        match cli.command {
            Commands::Run { orphans } => assert!(!orphans),
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_run_with_orphans() {
        let cli = Cli::try_parse_from(["reapr", "run", "--orphans"]).unwrap();
        match cli.command {
            Commands::Run { orphans } => assert!(orphans),
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_plan_command() {
        let cli = Cli::try_parse_from(["reapr", "plan", "-a"]).unwrap();
        match cli.command {
            Commands::Plan { orphans, all } => {
                assert!(!orphans);
                assert!(all);
            }
            _ => panic!("Expected plan command"),
        }
    }

    #[test]
    fn test_watch_command() {
        let cli = Cli::try_parse_from(["reapr", "watch"]).unwrap();
        match cli.command {
            Commands::Watch { interval } => assert!(interval.is_none()),
            _ => panic!("Expected watch command"),
        }
    }

    #[test]
    fn test_watch_with_interval() {
        let cli = Cli::try_parse_from(["reapr", "watch", "-i", "15"]).unwrap();
        match cli.command {
            Commands::Watch { interval } => assert_eq!(interval, Some(15)),
            _ => panic!("Expected watch command"),
        }
    }

    #[test]
    fn test_help_works() {
        // Verify help doesn't panic
        Cli::command().debug_assert();
    }
}
