//! tap-github entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: load the YAML run config and validate it.
//! 2. **Wire observability**: configure `tracing-subscriber` (text or JSON on
//!    stderr) and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an OTLP exporter.
//! 3. **Construct infrastructure**: the GitHub transport, the bookmark store,
//!    and the stdout record sink, injected into the engine's `Orchestrator`.
//! 4. **Drive the run**: Ctrl-C and `--timeout` cancel it cooperatively.

mod commands;
mod config;
mod logging;
mod sink;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use logging::LogFormat;

#[derive(Parser)]
#[command(name = "tap-github", version, about = "Incremental extraction of GitHub REST resources")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract records and write them to stdout as JSON lines
    Run {
        /// Path to the YAML config file
        #[arg(long, short)]
        config: PathBuf,
        /// Bookmark file, overriding `state_path` from the config
        #[arg(long)]
        state: Option<PathBuf>,
        /// Stop the run cooperatively after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List the stream catalog
    Streams,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = logging::init(&cli.log_level, cli.log_format)?;

    let result = match cli.command {
        Commands::Run { config, state, timeout } => commands::run::execute(&config, state, timeout).await,
        Commands::Streams => commands::streams::execute(),
    };

    telemetry.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_arguments_are_parsed() {
        let cli = Cli::try_parse_from([
            "tap-github",
            "run",
            "--config",
            "tap.yaml",
            "--state",
            "state.json",
            "--timeout",
            "60",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Run { config, state, timeout } => {
                assert_eq!(config, PathBuf::from("tap.yaml"));
                assert_eq!(state, Some(PathBuf::from("state.json")));
                assert_eq!(timeout, Some(60));
            }
            Commands::Streams => panic!("expected run"),
        }
    }
}
