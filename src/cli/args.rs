//! CLI argument definitions and parsing structures

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};

use forgeflow_utils::types::ResponseType;

/// forgeflow - durable orchestration for code-generation runs
#[derive(Parser, Debug)]
#[command(name = "forgeflow")]
#[command(about = "Inspect, steer and health-check durable forgeflow runs")]
#[command(long_about = r#"
forgeflow records every run in an append-only journal under the state
directory. These commands read that journal and write signals into it, so
they work whether or not the process driving the run is alive.

EXAMPLES:
  # Check that the environment can run validations
  forgeflow doctor

  # Show where a run is and what it is waiting for
  forgeflow status run-42 --json

  # Answer the pending approval question
  forgeflow respond run-42 approval-7a1c9e02d4f3b611 --type approve --by erin

  # Stop a run at its next step boundary
  forgeflow cancel run-42 --reason "superseded"

CONFIGURATION:
  Configuration is loaded with precedence: CLI flags > config file > defaults
  Config file is discovered by searching upward from CWD for .forgeflow/config.toml
  Use --config to specify an explicit config file path
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Root directory for run journals, progress and sandboxes
    #[arg(long, global = true)]
    pub state_dir: Option<Utf8PathBuf>,

    /// Maximum regeneration attempts after a failed validation
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Hours a question may stay unanswered
    #[arg(long, global = true)]
    pub timeout_hours: Option<u64>,

    /// Take the recommended option when a question times out
    #[arg(long, global = true)]
    pub auto_proceed_on_timeout: bool,

    /// Maximum concurrent sandboxes
    #[arg(long, global = true)]
    pub max_concurrent: Option<usize>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured preflight checks
    Doctor {
        /// Output canonical JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a run's status, step records and pending question
    Status {
        run_id: String,

        /// Output canonical JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the run's journal, one canonical JSON entry per line
    History { run_id: String },

    /// Answer a run's pending question
    ///
    /// EXAMPLES:
    ///   forgeflow respond run-42 clarification-3b04d1aa90c2e57f --type answer --option opt-2
    ///   forgeflow respond run-42 approval-7a1c9e02d4f3b611 --type reject --text "wrong module"
    Respond {
        run_id: String,

        question_id: String,

        #[arg(long = "type", value_enum)]
        response_type: ResponseKind,

        /// Id of the chosen option (for `answer`)
        #[arg(long)]
        option: Option<String>,

        /// Free text (required for `custom`, optional reason otherwise)
        #[arg(long)]
        text: Option<String>,

        /// Who is responding; defaults to $USER
        #[arg(long)]
        by: Option<String>,
    },

    /// Request cancellation of a run
    Cancel {
        run_id: String,

        #[arg(long, default_value = "cancelled from the command line")]
        reason: String,
    },

    /// Print the effective configuration and where each value came from
    Config {
        /// Output canonical JSON
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    /// Operation name used in error reports.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Doctor { .. } => "doctor",
            Self::Status { .. } => "status",
            Self::History { .. } => "history",
            Self::Respond { .. } => "respond",
            Self::Cancel { .. } => "cancel",
            Self::Config { .. } => "config",
        }
    }
}

/// Response types a human may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResponseKind {
    Answer,
    Approve,
    Reject,
    Custom,
}

impl From<ResponseKind> for ResponseType {
    fn from(kind: ResponseKind) -> Self {
        match kind {
            ResponseKind::Answer => ResponseType::Answer,
            ResponseKind::Approve => ResponseType::Approve,
            ResponseKind::Reject => ResponseType::Reject,
            ResponseKind::Custom => ResponseType::Custom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "forgeflow",
            "status",
            "run-1",
            "--json",
            "--state-dir",
            "/tmp/ff",
            "--verbose",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.state_dir.as_deref().map(|p| p.as_str()), Some("/tmp/ff"));
        assert!(matches!(cli.command, Commands::Status { json: true, .. }));
    }

    #[test]
    fn test_respond_parses_type() {
        let cli = Cli::try_parse_from([
            "forgeflow",
            "respond",
            "run-1",
            "q-1",
            "--type",
            "answer",
            "--option",
            "opt-2",
        ])
        .unwrap();
        match cli.command {
            Commands::Respond {
                response_type,
                option,
                ..
            } => {
                assert_eq!(ResponseType::from(response_type), ResponseType::Answer);
                assert_eq!(option.as_deref(), Some("opt-2"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_auto_proceed_is_not_a_response_type() {
        assert!(
            Cli::try_parse_from(["forgeflow", "respond", "r", "q", "--type", "auto-proceed"])
                .is_err()
        );
    }
}
