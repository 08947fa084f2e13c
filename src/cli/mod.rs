//! CLI module for Jnana
//!
//! Provides command-line interface parsing and handling for the jnana binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod init;
pub mod output;
pub mod run;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Jnana - multi-agent research orchestration
///
/// Generates, reviews, ranks and evolves research hypotheses with a pool of
/// worker agents and an Elo tournament.
#[derive(Parser, Debug)]
#[command(
    name = "jnana",
    version,
    about = "Jnana - multi-agent research hypothesis orchestration",
    long_about = "Coordinates generation, review, tournament ranking and evolution of\n\
                  research hypotheses, with durable sessions.\n\n\
                  Use 'init' to write a default jnana.toml.",
    after_help = "EXAMPLES:\n    \
                  jnana init                                  # Write jnana.toml\n    \
                  jnana run --goal \"Why do cells age?\"        # Run a full research cycle\n    \
                  jnana inspect sessions/jnana_session_x.json # Show the top hypotheses\n    \
                  jnana --config my.toml config               # Validate a config file"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "jnana.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default jnana.toml and the sessions directory
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,
    },

    /// Run a full research cycle with the built-in offline capability
    Run {
        /// Research goal
        #[arg(short, long)]
        goal: String,

        /// Number of initial hypotheses
        #[arg(long, default_value_t = 5)]
        hypotheses: usize,

        /// Review/tournament/evolution iterations
        #[arg(short, long, default_value_t = 2)]
        iterations: usize,

        /// Tournament matches per iteration (defaults to the configured count)
        #[arg(short, long)]
        matches: Option<usize>,

        /// Where to save the session (defaults to the sessions directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Detect a session file's format and list its top hypotheses
    Inspect {
        /// Session file
        file: PathBuf,

        /// Number of hypotheses to show
        #[arg(short, default_value_t = 10)]
        k: usize,
    },

    /// Validate and print the effective configuration
    Config,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "jnana", "--no-color", "run", "--goal", "Why?", "-i", "3", "--matches", "4",
        ])
        .unwrap();

        assert!(cli.no_color);
        assert_eq!(cli.config, PathBuf::from("jnana.toml"));
        match cli.command {
            Commands::Run {
                goal,
                hypotheses,
                iterations,
                matches,
                output,
            } => {
                assert_eq!(goal, "Why?");
                assert_eq!(hypotheses, 5);
                assert_eq!(iterations, 3);
                assert_eq!(matches, Some(4));
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_inspect_with_global_config() {
        let cli = Cli::try_parse_from(["jnana", "inspect", "s.json", "-k", "3", "-c", "x.toml"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(cli.command, Commands::Inspect { k: 3, .. }));
    }

    #[test]
    fn test_run_requires_goal() {
        assert!(Cli::try_parse_from(["jnana", "run"]).is_err());
    }
}
