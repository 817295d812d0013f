//! Describe images into the store and their own XMP metadata

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::stats::{progress_bar, Action, DirectoryStats, ProcessingResult};
use crate::abort::AbortFlag;
use crate::ai::DescriptionProvider;
use crate::db::DescriptionStore;
use crate::error::{AppError, Result};
use crate::files::{collect_images, normalize_directory, ImageValidator, SafeMover};
use crate::metadata::MetadataWriter;
use crate::naming::CollisionResolver;
use crate::retry::RetryPolicy;

pub struct MetadataOrchestrator {
    provider: Arc<dyn DescriptionProvider>,
    validator: ImageValidator,
    store: DescriptionStore,
    writer: Box<dyn MetadataWriter>,
    write_retry: RetryPolicy,
    mover: SafeMover,
    resolver: CollisionResolver,
    prompt: Option<String>,
}

impl MetadataOrchestrator {
    pub fn new(
        provider: Arc<dyn DescriptionProvider>,
        validator: ImageValidator,
        store: DescriptionStore,
        writer: Box<dyn MetadataWriter>,
        mover: SafeMover,
    ) -> Self {
        Self {
            provider,
            validator,
            store,
            writer,
            write_retry: RetryPolicy::default(),
            mover,
            resolver: CollisionResolver::new(),
            prompt: None,
        }
    }

    pub fn with_write_retry(mut self, policy: RetryPolicy) -> Self {
        self.write_retry = policy;
        self
    }

    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn store(&self) -> &DescriptionStore {
        &self.store
    }

    pub async fn process_file(&self, path: &Path) -> ProcessingResult {
        let started = Instant::now();
        match self.describe(path).await {
            Ok(action) => {
                match action {
                    Action::AlreadyDescribed => {
                        tracing::info!("Skipping {} (already described)", path.display())
                    }
                    _ => tracing::info!("Described {}", path.display()),
                }
                ProcessingResult::succeeded(path.to_path_buf(), action, None, started.elapsed())
            }
            Err(e) => {
                tracing::error!("Failed to describe {}: {}", path.display(), e);
                ProcessingResult::failed(path.to_path_buf(), e, started.elapsed())
            }
        }
    }

    async fn describe(&self, path: &Path) -> Result<Action> {
        self.validator.validate(path)?;

        if self.store.get(path)?.is_some() {
            return Ok(Action::AlreadyDescribed);
        }

        let description = self
            .provider
            .describe(path, self.prompt.as_deref())
            .await?;

        self.store.save(path, &description)?;

        let label = format!("Write XMP to {}", path.display());
        let writer = self.writer.as_ref();
        let text = description.as_str();
        self.write_retry
            .run(
                &label,
                |e: &AppError| matches!(e, AppError::MetadataWrite(_)),
                move |_| async move { writer.write_description(path, text) },
            )
            .await?;

        Ok(Action::Described)
    }

    /// Describe every supported image in `dir`, optionally cleaning up file
    /// names first. Stops between files once `abort` is raised.
    pub async fn process_directory(
        &mut self,
        dir: &Path,
        recursive: bool,
        normalize_names: bool,
        show_progress: bool,
        abort: &AbortFlag,
    ) -> Result<DirectoryStats> {
        let started = Instant::now();

        if normalize_names {
            let summary = normalize_directory(
                dir,
                recursive,
                &self.validator,
                &self.mover,
                &mut self.resolver,
                abort,
            )
            .await?;
            tracing::info!(
                "Normalized {} of {} file name(s) ({} failed)",
                summary.renamed,
                summary.examined,
                summary.failed
            );
        }

        let files = collect_images(dir, recursive, &self.validator)?;
        tracing::info!("Describing {} image(s) in {}", files.len(), dir.display());

        let mut stats = DirectoryStats::new(files.len());
        let bar = progress_bar(files.len(), show_progress);

        for path in &files {
            if abort.is_raised() {
                stats.interrupted = true;
                break;
            }
            if let Some(name) = path.file_name() {
                bar.set_message(name.to_string_lossy().to_string());
            }
            let result = self.process_file(path).await;
            stats.record(&result);
            bar.inc(1);
        }

        bar.finish_and_clear();
        stats.elapsed = started.elapsed();
        if stats.interrupted {
            tracing::warn!("Stopped early: {} image(s) not described", stats.unprocessed());
        }
        Ok(stats)
    }
}
