mod cli;
mod commands;
mod config;
mod error;
mod output;

use std::path::Path;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    human_panic::setup_panic!();

    let cli = Cli::parse();

    let log_file = match &cli.command {
        Command::Watch(args) => args.log_file.clone(),
        _ => None,
    };
    let _guard = match init_tracing(cli.global.verbose, log_file.as_deref()) {
        Ok(guard) => guard,
        Err(err) => exit_with(err),
    };

    if let Err(err) = run(cli).await {
        exit_with(err);
    }
}

fn exit_with(err: CliError) -> ! {
    let code = err.exit_code();
    eprintln!("{:?}", miette::Report::new(err));
    std::process::exit(code);
}

/// Stderr logging at a level chosen by `-v`, plus an optional plain-text
/// file layer. `RUST_LOG` overrides the level for both.
fn init_tracing(verbosity: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>, CliError> {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(stderr).init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().ok_or_else(|| CliError::Validation {
        field: "log-file".into(),
        reason: format!("'{}' is not a file path", path.display()),
    })?;
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(filter());

    tracing_subscriber::registry().with(stderr).with(file).init();
    Ok(Some(guard))
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need a provider connection
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "fleetsync", &mut std::io::stdout());
            Ok(())
        }

        cmd => {
            let (profile, sync_config) = config::resolve_sync_config(&cli.global)?;
            tracing::debug!(command = ?cmd, profile = %profile, "dispatching command");
            commands::dispatch(cmd, sync_config, &cli.global)
                .await
                .map_err(|e| e.for_profile(&profile))
        }
    }
}
