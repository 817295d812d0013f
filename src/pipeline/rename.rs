//! Rename images after what the model sees in them

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use super::stats::{progress_bar, Action, DirectoryStats, ProcessingResult};
use crate::abort::AbortFlag;
use crate::ai::DescriptionProvider;
use crate::error::{AppError, Result};
use crate::files::{collect_images, ImageValidator, SafeMover};
use crate::naming::{candidate_filename, CollisionResolver, NamingPolicy};

pub struct RenameOrchestrator {
    provider: Arc<dyn DescriptionProvider>,
    validator: ImageValidator,
    policy: NamingPolicy,
    mover: SafeMover,
    resolver: CollisionResolver,
    prompt: Option<String>,
    dry_run: bool,
    /// Rename targets whose watch event has not come back yet
    produced: HashSet<PathBuf>,
}

impl RenameOrchestrator {
    pub fn new(
        provider: Arc<dyn DescriptionProvider>,
        validator: ImageValidator,
        policy: NamingPolicy,
        mover: SafeMover,
    ) -> Self {
        Self {
            provider,
            validator,
            policy,
            mover,
            resolver: CollisionResolver::new(),
            prompt: None,
            dry_run: false,
            produced: HashSet::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn validator(&self) -> &ImageValidator {
        &self.validator
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Whether `path` is a rename target written by this orchestrator. The
    /// entry is consumed, so a later arrival under the same name is new.
    pub fn take_produced(&mut self, path: &Path) -> bool {
        self.produced.remove(path)
    }

    /// Forget earlier rename targets; their events can no longer arrive.
    pub fn clear_produced(&mut self) {
        self.produced.clear();
    }

    /// Rename one file. Never fails: errors end up in the result.
    pub async fn process_file(&mut self, path: &Path) -> ProcessingResult {
        let started = Instant::now();
        match self.rename(path).await {
            Ok((action, new_path)) => {
                match (&action, &new_path) {
                    (Action::Renamed | Action::WouldRename, Some(new_path)) => tracing::info!(
                        "{} {} -> {}",
                        if self.dry_run { "Would rename" } else { "Renamed" },
                        path.display(),
                        display_name(new_path)
                    ),
                    _ => tracing::info!("Kept {} (name already matches)", path.display()),
                }
                ProcessingResult::succeeded(path.to_path_buf(), action, new_path, started.elapsed())
            }
            Err(e) => {
                tracing::error!("Failed to rename {}: {}", path.display(), e);
                ProcessingResult::failed(path.to_path_buf(), e, started.elapsed())
            }
        }
    }

    async fn rename(&mut self, path: &Path) -> Result<(Action, Option<PathBuf>)> {
        self.validator.validate(path)?;

        let description = self
            .provider
            .describe(path, self.prompt.as_deref())
            .await?;

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let new_name = candidate_filename(&description, &extension, &self.policy);

        let current_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| AppError::NotAFile(path.to_path_buf()))?;
        if new_name == current_name {
            return Ok((Action::Unchanged, None));
        }

        let target = self.resolver.resolve(&path.with_file_name(&new_name));

        if self.dry_run {
            // keep the reservation so later files in this run pick other names
            return Ok((Action::WouldRename, Some(target)));
        }

        let moved = self.mover.move_file(path, &target).await;
        self.resolver.release(&target);
        moved?;

        self.produced.insert(target.clone());
        Ok((Action::Renamed, Some(target)))
    }

    /// Rename every supported image in `dir`, stopping between files once
    /// `abort` is raised.
    ///
    /// Fails only when `dir` itself is unusable.
    pub async fn process_directory(
        &mut self,
        dir: &Path,
        recursive: bool,
        show_progress: bool,
        abort: &AbortFlag,
    ) -> Result<DirectoryStats> {
        let started = Instant::now();
        let files = collect_images(dir, recursive, &self.validator)?;
        tracing::info!(
            "Processing {} image(s) in {}{}",
            files.len(),
            dir.display(),
            if self.dry_run { " (dry run)" } else { "" }
        );

        let mut stats = DirectoryStats::new(files.len());
        let bar = progress_bar(files.len(), show_progress);

        for path in &files {
            if abort.is_raised() {
                stats.interrupted = true;
                break;
            }
            bar.set_message(display_name(path));
            let result = self.process_file(path).await;
            stats.record(&result);
            bar.inc(1);
        }

        bar.finish_and_clear();
        stats.elapsed = started.elapsed();
        if stats.interrupted {
            tracing::warn!("Stopped early: {} image(s) left untouched", stats.unprocessed());
        }
        Ok(stats)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImagesConfig;
    use crate::files::MoveOptions;
    use crate::pipeline::testing::{write_image, FakeProvider};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn orchestrator(provider: Arc<FakeProvider>) -> RenameOrchestrator {
        let mover = SafeMover::new(MoveOptions {
            settle_delay: Duration::ZERO,
            retry_delay: Duration::from_millis(1),
            ..MoveOptions::default()
        });
        RenameOrchestrator::new(
            provider,
            ImageValidator::from_config(&ImagesConfig::default()),
            NamingPolicy::default(),
            mover,
        )
    }

    #[tokio::test]
    async fn renames_after_description() {
        let dir = TempDir::new().unwrap();
        let path = write_image(dir.path(), "IMG_0001.jpg");
        let provider = Arc::new(FakeProvider::answering(&[("IMG_0001.jpg", "A red sunset over the ocean!!")]));

        let mut orch = orchestrator(provider);
        let result = orch.process_file(&path).await;

        let expected = dir.path().join("a-red-sunset-over-the-ocean.jpg");
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.action, Some(Action::Renamed));
        assert_eq!(result.new_path.as_deref(), Some(expected.as_path()));
        assert!(expected.exists());
        assert!(!path.exists());
        assert!(orch.take_produced(&expected));
        assert!(!orch.take_produced(&expected));
    }

    #[tokio::test]
    async fn matching_name_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let path = write_image(dir.path(), "green-field.png");
        let provider = Arc::new(FakeProvider::answering(&[("green-field.png", "Green field.")]));

        let result = orchestrator(provider).process_file(&path).await;

        assert!(result.success);
        assert_eq!(result.action, Some(Action::Unchanged));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn dry_run_reserves_distinct_names_without_touching_files() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "one.jpg");
        write_image(dir.path(), "two.jpg");
        let provider = Arc::new(FakeProvider {
            fallback: Some("A cat".into()),
            ..Default::default()
        });

        let mut orch = orchestrator(provider).with_dry_run(true);
        let stats = orch.process_directory(dir.path(), false, false, &AbortFlag::new()).await.unwrap();

        assert_eq!(stats.total, 2);
        assert_eq!(stats.renamed, 2);
        assert!(dir.path().join("one.jpg").exists());
        assert!(dir.path().join("two.jpg").exists());
        assert!(!dir.path().join("a-cat.jpg").exists());
    }

    #[tokio::test]
    async fn same_description_gets_suffixes() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "one.jpg");
        write_image(dir.path(), "two.jpg");
        let provider = Arc::new(FakeProvider {
            fallback: Some("A cat".into()),
            ..Default::default()
        });

        let stats = orchestrator(provider)
            .process_directory(dir.path(), false, false, &AbortFlag::new())
            .await
            .unwrap();

        assert_eq!(stats.renamed, 2);
        assert!(dir.path().join("a-cat.jpg").exists());
        assert!(dir.path().join("a-cat_1.jpg").exists());
    }

    #[tokio::test]
    async fn one_bad_file_does_not_stop_the_run() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "a.jpg");
        fs::write(dir.path().join("b.jpg"), b"garbage").unwrap();
        write_image(dir.path(), "c.jpg");
        let provider = Arc::new(FakeProvider::answering(&[("a.jpg", "apple"), ("c.jpg", "cherry")]));

        let stats = orchestrator(provider.clone())
            .process_directory(dir.path(), false, false, &AbortFlag::new())
            .await
            .unwrap();

        assert_eq!(stats.total, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        // the corrupt file never reaches the model
        assert_eq!(provider.calls(), 2);
        assert!(dir.path().join("apple.jpg").exists());
        assert!(dir.path().join("cherry.jpg").exists());
    }

    #[tokio::test]
    async fn interrupt_finishes_the_current_file_then_stops() {
        let dir = TempDir::new().unwrap();
        let first = write_image(dir.path(), "one.jpg");
        let second = write_image(dir.path(), "two.jpg");
        let abort = AbortFlag::new();
        // Ctrl-C lands while the first file is with the model
        let provider = Arc::new(FakeProvider {
            fallback: Some("A cat".into()),
            raise_on_describe: Some(abort.clone()),
            ..Default::default()
        });
        let mover = SafeMover::new(MoveOptions {
            settle_delay: Duration::from_millis(50),
            retry_delay: Duration::from_millis(1),
            ..MoveOptions::default()
        });
        let mut orch = RenameOrchestrator::new(
            provider.clone(),
            ImageValidator::from_config(&ImagesConfig::default()),
            NamingPolicy::default(),
            mover,
        );

        let stats = orch.process_directory(dir.path(), false, false, &abort).await.unwrap();

        assert!(stats.interrupted);
        assert_eq!(stats.renamed, 1);
        assert_eq!(stats.unprocessed(), 1);
        assert_eq!(provider.calls(), 1);
        // the file in flight was moved completely: one copy, not two
        assert!(!first.exists());
        assert!(dir.path().join("a-cat.jpg").exists());
        assert!(second.exists());
    }

    #[tokio::test]
    async fn provider_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = write_image(dir.path(), "x.png");

        let result = orchestrator(Arc::new(FakeProvider::default())).process_file(&path).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("model offline"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn missing_directory_aborts() {
        let dir = TempDir::new().unwrap();
        let err = orchestrator(Arc::new(FakeProvider::default()))
            .process_directory(&dir.path().join("nope"), false, false, &AbortFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DirectoryNotFound(_)));
    }

    #[tokio::test]
    async fn custom_prompt_is_forwarded() {
        let dir = TempDir::new().unwrap();
        let path = write_image(dir.path(), "x.png");
        let provider = Arc::new(FakeProvider {
            fallback: Some("bird".into()),
            ..Default::default()
        });

        orchestrator(provider.clone())
            .with_prompt(Some("Name the animal".into()))
            .process_file(&path)
            .await;

        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.as_slice(), &[Some("Name the animal".to_string())]);
    }
}
