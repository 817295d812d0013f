//! Watch a folder and rename images as they arrive
//!
//! A debounced `notify` watcher forwards creation events into a channel; the
//! async loop pulls them one at a time and runs the normal per-file rename.

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::abort::AbortFlag;
use crate::config::{secs, WatchConfig};
use crate::error::{AppError, Result};
use crate::files::{ensure_directory, is_hidden};
use crate::pipeline::{DirectoryStats, RenameOrchestrator};

/// Suffixes of files that are still being written by someone else
const PARTIAL_SUFFIXES: &[&str] = &[".tmp", ".part", ".crdownload", ".download", ".backup"];

/// Keeps the OS watcher alive; dropping it stops event delivery.
pub struct FolderWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    path: PathBuf,
}

impl FolderWatcher {
    /// Start watching `path` (non-recursive); new file paths go to `tx`.
    pub fn start(path: &Path, debounce: Duration, tx: UnboundedSender<PathBuf>) -> Result<Self> {
        ensure_directory(path)?;

        let mut debouncer = new_debouncer(
            debounce,
            None,
            move |result: std::result::Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(events) => {
                    for event in events {
                        forward_event(&event, &tx);
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::warn!("Watcher error: {:?}", error);
                    }
                }
            },
        )
        .map_err(|e| AppError::Watcher(format!("Failed to create watcher: {}", e)))?;

        debouncer
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| AppError::Watcher(format!("Failed to watch {}: {}", path.display(), e)))?;

        tracing::info!("Watching {} for new images", path.display());
        Ok(Self {
            _debouncer: debouncer,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Only arrivals matter: created files and files moved in
fn forward_event(event: &DebouncedEvent, tx: &UnboundedSender<PathBuf>) {
    let path = match event.kind {
        EventKind::Create(_) => event.paths.first(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.first(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.last(),
        _ => None,
    };
    if let Some(path) = path {
        // receiver gone means the loop is shutting down
        let _ = tx.send(path.clone());
    }
}

/// Whether an arrival should be renamed
pub fn should_process(path: &Path, orchestrator: &RenameOrchestrator) -> bool {
    if path.is_dir() || is_hidden(path) {
        return false;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        return false;
    }
    orchestrator.validator().is_supported(path)
}

/// Drain `rx` until it closes or `abort` is raised. Each accepted path
/// waits `settle` before being renamed; a rename in progress is finished.
pub async fn process_events(
    rx: &mut UnboundedReceiver<PathBuf>,
    orchestrator: &mut RenameOrchestrator,
    settle: Duration,
    abort: &AbortFlag,
) -> DirectoryStats {
    let started = std::time::Instant::now();
    let mut stats = DirectoryStats::default();

    loop {
        let path = tokio::select! {
            _ = abort.raised() => {
                tracing::info!("Stopping watch loop");
                break;
            }
            next = rx.recv() => match next {
                Some(path) => path,
                None => break,
            },
        };

        if orchestrator.take_produced(&path) {
            tracing::debug!("Ignoring our own rename {}", path.display());
            continue;
        }
        if !should_process(&path, orchestrator) {
            tracing::debug!("Ignoring {}", path.display());
            continue;
        }

        if !settle.is_zero() {
            tokio::select! {
                _ = abort.raised() => {
                    tracing::info!("Stopping watch loop");
                    break;
                }
                _ = tokio::time::sleep(settle) => {}
            }
        }
        if !path.exists() {
            tracing::debug!("{} disappeared before processing", path.display());
            continue;
        }

        stats.total += 1;
        let result = orchestrator.process_file(&path).await;
        stats.record(&result);
    }

    stats.elapsed = started.elapsed();
    stats
}

/// Watch `dir` until `abort` is raised, renaming every new image.
pub async fn watch_and_rename(
    dir: &Path,
    orchestrator: &mut RenameOrchestrator,
    config: &WatchConfig,
    abort: &AbortFlag,
) -> Result<DirectoryStats> {
    // renames from before the watcher started never produce events
    orchestrator.clear_produced();

    let (tx, mut rx) = unbounded_channel();
    let watcher = FolderWatcher::start(dir, Duration::from_millis(config.debounce_ms), tx)?;

    let stats = process_events(&mut rx, orchestrator, secs(config.settle_delay), abort).await;
    tracing::info!("Stopped watching {}", watcher.path().display());
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImagesConfig;
    use crate::files::{ImageValidator, MoveOptions, SafeMover};
    use crate::naming::NamingPolicy;
    use crate::pipeline::testing::{write_image, FakeProvider};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn orchestrator(provider: Arc<FakeProvider>) -> RenameOrchestrator {
        RenameOrchestrator::new(
            provider,
            ImageValidator::from_config(&ImagesConfig::default()),
            NamingPolicy::default(),
            SafeMover::new(MoveOptions {
                settle_delay: Duration::ZERO,
                retry_delay: Duration::from_millis(1),
                ..MoveOptions::default()
            }),
        )
    }

    #[test]
    fn filters_partial_hidden_and_unsupported() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(Arc::new(FakeProvider::default()));

        assert!(should_process(&dir.path().join("new.jpg"), &orch));
        assert!(!should_process(&dir.path().join(".new.jpg"), &orch));
        assert!(!should_process(&dir.path().join("new.jpg.part"), &orch));
        assert!(!should_process(&dir.path().join("new.JPG.TMP"), &orch));
        assert!(!should_process(&dir.path().join("notes.txt"), &orch));
        assert!(!should_process(dir.path(), &orch));
    }

    #[tokio::test]
    async fn events_are_renamed_and_own_output_ignored() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(FakeProvider {
            fallback: Some("A snowy owl".into()),
            ..Default::default()
        });
        let mut orch = orchestrator(provider.clone());
        let arrived = write_image(dir.path(), "DSC_1234.jpg");
        let produced = dir.path().join("a-snowy-owl.jpg");

        let (tx, mut rx) = unbounded_channel();
        tx.send(arrived.clone()).unwrap();
        // the watcher reports our own rename as a new arrival
        tx.send(produced.clone()).unwrap();
        tx.send(dir.path().join("partial.jpg.crdownload")).unwrap();
        drop(tx);

        let stats = process_events(&mut rx, &mut orch, Duration::ZERO, &AbortFlag::new()).await;

        assert_eq!(stats.total, 1);
        assert_eq!(stats.renamed, 1);
        assert!(produced.exists());
        assert!(!arrived.exists());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn own_output_is_ignored_only_once() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(FakeProvider {
            fallback: Some("A snowy owl".into()),
            ..Default::default()
        });
        let mut orch = orchestrator(provider.clone());
        let arrived = write_image(dir.path(), "DSC_1234.jpg");
        let produced = dir.path().join("a-snowy-owl.jpg");

        let (tx, mut rx) = unbounded_channel();
        tx.send(arrived).unwrap();
        tx.send(produced.clone()).unwrap();
        // a user later drops a file under the same name
        tx.send(produced.clone()).unwrap();
        drop(tx);

        let stats = process_events(&mut rx, &mut orch, Duration::ZERO, &AbortFlag::new()).await;

        assert_eq!(stats.total, 2);
        assert_eq!(stats.renamed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(provider.calls(), 2);
        assert!(!orch.take_produced(&produced));
    }

    #[tokio::test]
    async fn raised_abort_ends_the_loop() {
        let mut orch = orchestrator(Arc::new(FakeProvider::default()));
        let (_tx, mut rx) = unbounded_channel::<PathBuf>();
        let abort = AbortFlag::new();
        abort.raise();

        let stats = process_events(&mut rx, &mut orch, Duration::ZERO, &abort).await;

        assert_eq!(stats.total, 0);
    }

    #[tokio::test]
    async fn abort_during_settle_leaves_the_file_alone() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(FakeProvider {
            fallback: Some("Late arrival".into()),
            ..Default::default()
        });
        let mut orch = orchestrator(provider.clone());
        let arrived = write_image(dir.path(), "new.png");
        let (tx, mut rx) = unbounded_channel();
        tx.send(arrived.clone()).unwrap();

        let abort = AbortFlag::new();
        let raiser = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            raiser.raise();
        });

        let stats = process_events(&mut rx, &mut orch, Duration::from_secs(10), &abort).await;

        assert_eq!(stats.total, 0);
        assert_eq!(provider.calls(), 0);
        assert!(arrived.exists());
        drop(tx);
    }

    #[tokio::test]
    async fn watcher_delivers_new_files() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let _watcher = FolderWatcher::start(dir.path(), Duration::from_millis(50), tx).unwrap();

        let created = write_image(dir.path(), "fresh.png");

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within 5s")
            .unwrap();
        assert_eq!(received.file_name(), created.file_name());
    }

    #[test]
    fn missing_directory_cannot_be_watched() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = unbounded_channel();
        assert!(matches!(
            FolderWatcher::start(&dir.path().join("gone"), Duration::from_millis(50), tx),
            Err(AppError::DirectoryNotFound(_))
        ));
    }
}
