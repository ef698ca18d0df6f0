//! herakles-fpm-exporter - version 0.1.0
//!
//! PHP-FPM discovery and collection agent with tracing logging.
//! This is the main entry point that sets up logging and dispatches subcommands.

mod commands;

use clap::Parser;
use herakles_fpm_exporter::cli::{Args, Commands, LogFormat, LogLevel};
use herakles_fpm_exporter::config::{
    resolve_config, show_config, validate_effective_config, Config,
};
use tracing::{info, warn, Level};

use commands::{command_collect, command_discover, command_run};

/// Maps the effective log level. `--log-level`, when given, wins over
/// `logging.level` from the config file.
fn effective_level(config: &Config, args: &Args) -> Option<Level> {
    let level = args.log_level.unwrap_or_else(|| {
        match config.logging.level.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("off") => LogLevel::Off,
            Some("error") => LogLevel::Error,
            Some("warn") | Some("warning") => LogLevel::Warn,
            Some("debug") => LogLevel::Debug,
            Some("trace") => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    match level {
        LogLevel::Off => None,
        LogLevel::Error => Some(Level::ERROR),
        LogLevel::Warn => Some(Level::WARN),
        LogLevel::Info => Some(Level::INFO),
        LogLevel::Debug => Some(Level::DEBUG),
        LogLevel::Trace => Some(Level::TRACE),
    }
}

/// Initializes tracing logging subsystem with configured level and format.
/// Logs go to stderr so JSON output of `discover`/`collect` stays clean.
fn setup_logging(config: &Config, args: &Args) {
    let Some(log_level) = effective_level(config, args) else {
        return;
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    let result = match config.logging.format.unwrap_or(LogFormat::Text) {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(builder.json().finish())
        }
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish()),
    };
    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {:?}", log_level);
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = resolve_config(&args)?;

    if args.check_config {
        if let Err(e) = validate_effective_config(&config) {
            eprintln!("❌ Configuration invalid: {}", e);
            std::process::exit(1);
        }
        println!("✅ Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        return show_config(&config, args.config_format);
    }

    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }

    setup_logging(&config, &args);

    match args.command.clone().unwrap_or(Commands::Run) {
        Commands::Discover => command_discover(&config).await?,
        Commands::Collect { configured_only } => command_collect(config, configured_only).await?,
        Commands::Run => {
            info!("Starting herakles-fpm-exporter");
            if args.no_autodiscover && config.phpfpm.pools.is_empty() {
                warn!("Autodiscovery disabled and no pools configured");
            }
            command_run(config).await?
        }
    }

    Ok(())
}
