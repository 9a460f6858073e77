use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wyoming_whisper_bridge::cli::{Cli, LogFormat};
use wyoming_whisper_bridge::config::Config;
use wyoming_whisper_bridge::daemon::run_daemon;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = load_config(cli.config.as_deref())?;
    let config = cli.apply(config);
    config.validate().context("Invalid configuration")?;

    tracing::info!(version = %wyoming_whisper_bridge::version_string(), "Starting");
    run_daemon(config).await?;
    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins over `--debug`.
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match cli.log_format {
        LogFormat::Full => builder.init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

/// Load the configuration file, then apply environment overrides.
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = match custom_path {
        // An explicit path must exist
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::default(),
        },
    };

    Ok(config.with_env_overrides())
}
