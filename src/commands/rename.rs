use std::path::Path;
use std::sync::Arc;

use super::{exit_code_for, print_summary, require_connection, unless_aborted};
use crate::abort::AbortFlag;
use crate::ai::DescriptionProvider;
use crate::cli::RenameArgs;
use crate::config::AppConfig;
use crate::error::{AppError, Result, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_OK};
use crate::files::{ImageValidator, MoveOptions, SafeMover};
use crate::pipeline::{Action, RenameOrchestrator};
use crate::services::watch_and_rename;

/// The same `abort` covers the initial pass and the watch loop.
pub async fn run(
    args: &RenameArgs,
    config: &AppConfig,
    provider: Arc<dyn DescriptionProvider>,
    abort: &AbortFlag,
) -> Result<i32> {
    if !args.path.exists() {
        return Err(if args.watch || args.path.extension().is_none() {
            AppError::DirectoryNotFound(args.path.clone())
        } else {
            AppError::FileNotFound(args.path.clone())
        });
    }
    if args.watch && !args.path.is_dir() {
        return Err(AppError::NotADirectory(args.path.clone()));
    }

    // a dry run never mutates anything, so a missing model is reported per file
    if !args.dry_run {
        match unless_aborted(abort, require_connection(provider.as_ref(), &config.ollama.endpoint)).await {
            Some(reachable) => reachable?,
            None => return Ok(EXIT_INTERRUPTED),
        }
    }

    let mut orchestrator = RenameOrchestrator::new(
        provider,
        ImageValidator::from_config(&config.images),
        config.filename.naming_policy(),
        SafeMover::new(MoveOptions::from(&config.file_operations)),
    )
    .with_prompt(args.prompt.clone())
    .with_dry_run(args.dry_run);

    // Watch events carry absolute paths; match them against ours
    let path = std::fs::canonicalize(&args.path)
        .map_err(|e| AppError::from_io(format!("resolve {}", args.path.display()), e))?;

    if path.is_file() {
        let code = rename_single(&mut orchestrator, &path).await;
        return Ok(if abort.is_raised() { EXIT_INTERRUPTED } else { code });
    }

    let mut stats = orchestrator
        .process_directory(&path, config.processing.recursive, config.processing.progress_bar, abort)
        .await?;
    print_summary(&stats);

    if args.watch && !stats.interrupted {
        println!("\nWatching {} for new images (Ctrl-C to stop)", path.display());
        let watched = watch_and_rename(&path, &mut orchestrator, &config.watch, abort).await?;
        // Ctrl-C is the normal way out of watch mode, so it is not an interruption
        stats.total += watched.total;
        stats.succeeded += watched.succeeded;
        stats.failed += watched.failed;
        stats.renamed += watched.renamed;
        stats.skipped += watched.skipped;
        stats.elapsed += watched.elapsed;
        print_summary(&stats);
    }

    Ok(exit_code_for(&stats))
}

async fn rename_single(orchestrator: &mut RenameOrchestrator, path: &Path) -> i32 {
    let result = orchestrator.process_file(path).await;
    match (result.success, result.action, &result.new_path) {
        (true, Some(Action::Renamed), Some(new_path)) => {
            println!("{} -> {}", path.display(), new_path.display());
            EXIT_OK
        }
        (true, Some(Action::WouldRename), Some(new_path)) => {
            println!("{} would become {}", path.display(), new_path.display());
            EXIT_OK
        }
        (true, _, _) => {
            println!("{} already has a matching name", path.display());
            EXIT_OK
        }
        (false, _, _) => {
            eprintln!(
                "Failed to rename {}: {}",
                path.display(),
                result.error.as_deref().unwrap_or("unknown error")
            );
            EXIT_FAILURE
        }
    }
}
