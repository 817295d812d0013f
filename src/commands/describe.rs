use std::sync::Arc;

use super::{connection, exit_code_for, print_summary, require_connection, unless_aborted};
use crate::abort::AbortFlag;
use crate::ai::DescriptionProvider;
use crate::cli::DescribeArgs;
use crate::config::AppConfig;
use crate::db::DescriptionStore;
use crate::error::{Result, EXIT_INTERRUPTED, EXIT_OK};
use crate::files::{ensure_directory, ImageValidator, MoveOptions, SafeMover};
use crate::metadata::XmpWriter;
use crate::pipeline::MetadataOrchestrator;

/// Number of recent rows shown by `--db-stats`
const RECENT_ROWS: usize = 5;

pub async fn run(
    args: &DescribeArgs,
    config: &AppConfig,
    provider: Arc<dyn DescriptionProvider>,
    abort: &AbortFlag,
) -> Result<i32> {
    if args.check_connection {
        let check = connection::test_connection(provider.as_ref(), &config.ollama.endpoint);
        return Ok(unless_aborted(abort, check).await.unwrap_or(EXIT_INTERRUPTED));
    }
    if args.list_models {
        let listing = connection::list_models(provider.as_ref());
        return unless_aborted(abort, listing).await.unwrap_or(Ok(EXIT_INTERRUPTED));
    }
    if args.db_stats {
        return db_stats(config);
    }

    let dir = args.target_directory(config);
    ensure_directory(&dir)?;
    match unless_aborted(abort, require_connection(provider.as_ref(), &config.ollama.endpoint)).await {
        Some(reachable) => reachable?,
        None => return Ok(EXIT_INTERRUPTED),
    }

    let store = DescriptionStore::open(&config.database.path)?;
    let mut orchestrator = MetadataOrchestrator::new(
        provider,
        ImageValidator::from_config(&config.images),
        store,
        Box::new(XmpWriter::new(config.metadata.creator_tool.clone())),
        SafeMover::new(MoveOptions::from(&config.file_operations)),
    )
    .with_write_retry(config.metadata.write_retry())
    .with_prompt(args.prompt.clone());

    let stats = orchestrator
        .process_directory(
            &dir,
            config.processing.recursive,
            !args.no_sanitize,
            config.processing.progress_bar,
            abort,
        )
        .await?;
    print_summary(&stats);

    Ok(exit_code_for(&stats))
}

fn db_stats(config: &AppConfig) -> Result<i32> {
    let store = DescriptionStore::open(&config.database.path)?;
    println!("Database: {}", store.path().display());
    println!("Described images: {}", store.count()?);

    let recent = store.list(Some(RECENT_ROWS))?;
    if !recent.is_empty() {
        println!("\nMost recent:");
        for record in recent {
            let preview: String = record.description.chars().take(60).collect();
            println!("  {}  {}\n    {}", record.updated_at, record.file_path, preview);
        }
    }
    Ok(EXIT_OK)
}
