//! hooksync CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load `hooksync.toml` and validate it.
//! 2. **Wire observability**: configure `tracing-subscriber` with a JSON or
//!    text layer and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an
//!    OpenTelemetry OTLP exporter. Spans and events from every crate in the
//!    workspace flow through it.
//! 3. **Construct infrastructure**: create the GitHub clients, the ignore-list
//!    store and the environment secret source, and inject them into the
//!    manager and the delivery endpoint.
//! 4. **Run a subcommand**: `serve` runs the endpoint and keeps hooks in line
//!    with the configuration; the others are one-shot operator commands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod config;
mod sources;
mod telemetry;
mod triggers;

use telemetry::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "hooksync", version, about = "Keeps GitHub webhooks registered and routes their deliveries")]
struct Cli {
    /// Configuration file.
    #[arg(long, short, env = "HOOKSYNC_CONFIG", default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log line format.
    #[arg(long, env = "HOOKSYNC_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the delivery endpoint and the periodic hook sweep.
    Serve,
    /// Re-register hooks for every configured target, then exit.
    Reregister,
    /// Stop managing hooks for a repository.
    Ignore {
        /// Repository URL, e.g. https://github.com/acme/widgets
        repository: String,
    },
    /// Resume managing hooks for a repository.
    Unignore {
        /// Repository URL.
        repository: String,
    },
    /// List ignored repositories.
    Ignored,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let telemetry = telemetry::init(cli.log_format)?;

    let result = match cli.command {
        Command::Serve => commands::serve(&cli.config).await,
        Command::Reregister => commands::reregister(&cli.config).await,
        Command::Ignore { repository } => commands::ignore(&cli.config, &repository),
        Command::Unignore { repository } => commands::unignore(&cli.config, &repository),
        Command::Ignored => commands::ignored(&cli.config),
    };

    if let Err(err) = &result {
        tracing::error!(error = ?err, "Command failed");
    }
    telemetry.shutdown();
    result
}
