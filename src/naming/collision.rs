//! Candidate path → path nobody else has
//!
//! Resolution checks the disk and an in-process reservation set. Nothing is
//! locked, so the caller should create the destination right away.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct CollisionResolver {
    reserved: HashSet<PathBuf>,
}

impl CollisionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `candidate` if it is free, otherwise the first free
    /// `stem_N.ext` with N = 1, 2, … The returned path is reserved until
    /// [`release`](Self::release) is called.
    pub fn resolve(&mut self, candidate: &Path) -> PathBuf {
        if self.is_free(candidate) {
            self.reserved.insert(candidate.to_path_buf());
            return candidate.to_path_buf();
        }

        let parent = candidate.parent().unwrap_or(Path::new("."));
        let stem = candidate
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| super::PLACEHOLDER_STEM.to_string());
        let ext = candidate
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut counter: u64 = 1;
        loop {
            let path = parent.join(format!("{}_{}{}", stem, counter, ext));
            if self.is_free(&path) {
                tracing::debug!("Resolved collision {} -> {}", candidate.display(), path.display());
                self.reserved.insert(path.clone());
                return path;
            }
            counter += 1;
        }
    }

    /// Drop a reservation once the file exists on disk (or was abandoned).
    pub fn release(&mut self, path: &Path) {
        self.reserved.remove(path);
    }

    fn is_free(&self, path: &Path) -> bool {
        !self.reserved.contains(path) && fs::symlink_metadata(path).is_err()
    }
}
