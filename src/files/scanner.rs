//! Directory traversal
//!
//! Listings are collected up front and sorted, so files renamed during a run
//! are never picked up a second time.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::mover::{FileSystem, SafeMover};
use super::validator::ImageValidator;
use crate::abort::AbortFlag;
use crate::error::{AppError, Result};
use crate::naming::{normalize_existing_name, CollisionResolver};

/// Counts from a normalization pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeSummary {
    pub examined: usize,
    pub renamed: usize,
    pub failed: usize,
}

/// Fail fast when the target is missing or not a directory.
pub fn ensure_directory(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Err(AppError::DirectoryNotFound(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(AppError::NotADirectory(dir.to_path_buf()));
    }
    Ok(())
}

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Sorted snapshot of supported, non-hidden image files under `dir`.
pub fn collect_images(dir: &Path, recursive: bool, validator: &ImageValidator) -> Result<Vec<PathBuf>> {
    ensure_directory(dir)?;

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                tracing::warn!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| validator.is_supported(p))
        .collect();

    files.sort();
    tracing::debug!("Found {} image(s) in {}", files.len(), dir.display());
    Ok(files)
}

/// Rename every supported file whose name is not already clean (see
/// [`normalize_existing_name`]). Failures are logged and counted, not raised.
pub async fn normalize_directory<F: FileSystem>(
    dir: &Path,
    recursive: bool,
    validator: &ImageValidator,
    mover: &SafeMover<F>,
    resolver: &mut CollisionResolver,
    abort: &AbortFlag,
) -> Result<NormalizeSummary> {
    let files = collect_images(dir, recursive, validator)?;
    let mut summary = NormalizeSummary {
        examined: files.len(),
        ..Default::default()
    };

    for path in files {
        if abort.is_raised() {
            tracing::warn!("Name clean-up interrupted");
            break;
        }
        let Some(current) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        let cleaned = normalize_existing_name(&current);
        if cleaned == current {
            continue;
        }

        let target = resolver.resolve(&path.with_file_name(&cleaned));
        match mover.move_file(&path, &target).await {
            Ok(()) => {
                tracing::info!("Normalized {} -> {}", current, target.display());
                summary.renamed += 1;
            }
            Err(e) => {
                tracing::warn!("Could not normalize {}: {}", path.display(), e);
                summary.failed += 1;
            }
        }
        resolver.release(&target);
    }

    Ok(summary)
}
