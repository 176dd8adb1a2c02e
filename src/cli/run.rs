//! CLI entry point and dispatch logic

use clap::Parser;
use tracing::debug;

use forgeflow_config::{CliArgs, Config};
use forgeflow_utils::error::UserFriendlyError;
use forgeflow_utils::exit_codes::ExitCode;
use forgeflow_utils::logging::{LogFormat, init_tracing};

use super::args::{Cli, Commands};
use super::commands;
use crate::ForgeflowError;

/// Main CLI execution function.
///
/// Handles ALL output including errors. On failure the returned code is the
/// process exit code; main.rs does not print.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    if let Err(e) = init_tracing(cli.verbose, format) {
        eprintln!("warning: logging unavailable: {e}");
    }

    let cli_args = CliArgs {
        config_path: cli.config.clone(),
        state_dir: cli.state_dir.clone(),
        max_retries: cli.max_retries,
        timeout_hours: cli.timeout_hours,
        auto_proceed_on_timeout: cli.auto_proceed_on_timeout.then_some(true),
        max_concurrent: cli.max_concurrent,
    };

    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => return Err(report(&ForgeflowError::from(err).into())),
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let operation = cli.command.name();
    debug!(operation, state_dir = %config.state_dir(), "Dispatching command");
    let result = rt.block_on(dispatch(cli.command, &config));

    match result {
        Ok(code) if code == ExitCode::SUCCESS => Ok(()),
        Ok(code) => Err(code),
        Err(err) => Err(report(&err)),
    }
}

async fn dispatch(command: Commands, config: &Config) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Doctor { json } => commands::execute_doctor_command(json, config).await,
        Commands::Status { run_id, json } => commands::execute_status_command(&run_id, json, config),
        Commands::History { run_id } => commands::execute_history_command(&run_id, config),
        Commands::Respond {
            run_id,
            question_id,
            response_type,
            option,
            text,
            by,
        } => commands::execute_respond_command(
            &run_id,
            &question_id,
            response_type.into(),
            option,
            text,
            by,
            config,
        ),
        Commands::Cancel { run_id, reason } => {
            commands::execute_cancel_command(&run_id, &reason, config)
        }
        Commands::Config { json } => commands::execute_config_command(json, config),
    }
}

/// Print `err` for a human and choose the exit code.
fn report(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<ForgeflowError>() {
        Some(known) => {
            eprintln!("{}", known.display_for_user());
            known.to_exit_code()
        }
        None => {
            eprintln!(
                "Error: {}",
                forgeflow_redaction::redact_user_string(&format!("{err:#}"))
            );
            ExitCode::INTERNAL
        }
    }
}
