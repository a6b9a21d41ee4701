use std::process::ExitCode;

use clap::Parser;
use tabletalk_cli::Cli;
use tabletalk_core::config::{AppConfig, LogFormat};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // An invalid config is reported by the command itself; logging just stays off.
    if let Ok(config) = AppConfig::load(cli.load_options()) {
        init_logging(&config);
    }

    tabletalk_cli::run(cli)
}
