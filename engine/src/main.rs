// Lorekeeper plugin host
// Main entry point for the lorekeeper binary

use clap::Parser;
use lorekeeper_engine::cli::{Cli, Command};
use lorekeeper_engine::config::Config;
use lorekeeper_engine::handlers::{handle_check, handle_load, handle_run, OutputFormat};
use lorekeeper_engine::telemetry::{init_telemetry, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log beats the config file; RUST_LOG beats both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry(log_level, LogFormat::for_build());

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Lorekeeper v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Check { manifest } => {
            tracing::info!("Checking manifest {}", manifest.display());
            handle_check(&manifest, format).await
        }

        Command::Load {
            source,
            manifest,
            hook,
            args,
        } => {
            tracing::info!("Loading plugin {}", source.display());
            handle_load(
                &source,
                &manifest,
                hook.as_deref(),
                args.as_deref(),
                &config,
                format,
            )
            .await
        }

        Command::Run { dir, world } => {
            tracing::info!("Running plugins for world {}", world);
            handle_run(dir, &world, &config, format).await
        }
    }
}
