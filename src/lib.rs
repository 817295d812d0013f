pub mod abort;
pub mod ai;
pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod logging;
pub mod metadata;
pub mod naming;
pub mod pipeline;
pub mod retry;
pub mod services;

use cli::Cli;
use config::AppConfig;
use error::{AppError, EXIT_FAILURE};

/// Entry point shared by the binary: load configuration, set up logging,
/// run the requested command and return the process exit code.
pub async fn run(cli: Cli) -> i32 {
    let (config, config_warnings) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_FAILURE;
        }
    };

    let _log_guard = match logging::init_logging(&config.logging, cli.verbose, cli.quiet) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_FAILURE;
        }
    };

    for warning in &config_warnings {
        tracing::warn!("{}", warning);
    }
    tracing::debug!(
        "Using model {} at {}",
        config.ollama.model,
        config.ollama.endpoint
    );

    match commands::dispatch(&cli, &config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            if e.is_connection() {
                eprintln!("Check that Ollama is running and ollama.endpoint is correct.");
            }
            EXIT_FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<(AppConfig, Vec<String>), AppError> {
    let (mut config, warnings) = AppConfig::load(cli.config.as_deref())?;
    cli.apply_to(&mut config);
    config.validate()?;
    Ok((config, warnings))
}
