//! Command handlers behind the CLI
//!
//! Each handler returns the process exit code; errors that abort a whole
//! command are returned as `Err` and mapped to an exit code by the caller.
//! Ctrl-C raises an [`AbortFlag`]; runs that touch files stop between files,
//! read-only steps are cancelled outright.

pub mod connection;
pub mod describe;
pub mod init_config;
pub mod rename;

use std::future::Future;
use std::sync::Arc;

use crate::abort::AbortFlag;
use crate::ai::{DescriptionProvider, OllamaClient};
use crate::cli::{Cli, Command};
use crate::config::AppConfig;
use crate::error::{AppError, Result, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_OK};
use crate::pipeline::DirectoryStats;

pub async fn dispatch(cli: &Cli, config: &AppConfig) -> Result<i32> {
    if cli.test_connection {
        let provider = OllamaClient::new(&config.ollama, &config.filename.prompt)?;
        return Ok(connection::test_connection(&provider, &config.ollama.endpoint).await);
    }
    if cli.list_models {
        let provider = OllamaClient::new(&config.ollama, &config.filename.prompt)?;
        return connection::list_models(&provider).await;
    }

    match &cli.command {
        Some(Command::Rename(args)) => {
            let provider: Arc<dyn DescriptionProvider> =
                Arc::new(OllamaClient::new(&config.ollama, &config.filename.prompt)?);
            rename::run(args, config, provider, &AbortFlag::on_ctrl_c()).await
        }
        Some(Command::Describe(args)) => {
            let provider: Arc<dyn DescriptionProvider> =
                Arc::new(OllamaClient::new(&config.ollama, &config.metadata.prompt)?);
            describe::run(args, config, provider, &AbortFlag::on_ctrl_c()).await
        }
        Some(Command::InitConfig { path }) => init_config::run(path),
        None => {
            use clap::CommandFactory;
            let _ = Cli::command().print_help();
            println!();
            Ok(EXIT_FAILURE)
        }
    }
}

/// Run a step that changes nothing on disk; `None` when aborted first.
pub(crate) async fn unless_aborted<F: Future>(abort: &AbortFlag, fut: F) -> Option<F::Output> {
    tokio::select! {
        output = fut => Some(output),
        _ = abort.raised() => None,
    }
}

/// Abort a bulk run early when the model service is not there.
pub(crate) async fn require_connection(provider: &dyn DescriptionProvider, endpoint: &str) -> Result<()> {
    if provider.probe().await {
        Ok(())
    } else {
        Err(AppError::Connection(format!(
            "Cannot reach the model service at {}. Is Ollama running?",
            endpoint
        )))
    }
}

pub(crate) fn print_summary(stats: &DirectoryStats) {
    println!();
    println!("Summary");
    println!("  total:     {}", stats.total);
    println!("  succeeded: {}", stats.succeeded);
    println!("  failed:    {}", stats.failed);
    println!("  renamed:   {}", stats.renamed);
    println!("  skipped:   {}", stats.skipped);
    println!("  elapsed:   {:.1}s", stats.elapsed.as_secs_f64());
    if stats.interrupted {
        println!("  interrupted, {} not processed", stats.unprocessed());
    }
}

pub(crate) fn exit_code_for(stats: &DirectoryStats) -> i32 {
    if stats.interrupted {
        EXIT_INTERRUPTED
    } else if stats.has_failures() {
        EXIT_FAILURE
    } else {
        EXIT_OK
    }
}
