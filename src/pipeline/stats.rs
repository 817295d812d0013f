//! Per-file results and per-run totals

use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Renamed,
    /// Dry run: the rename that would have happened
    WouldRename,
    /// The generated name equals the current one
    Unchanged,
    Described,
    /// The store already had a description for this path
    AlreadyDescribed,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::Renamed => "renamed",
            Action::WouldRename => "would rename",
            Action::Unchanged => "unchanged",
            Action::Described => "described",
            Action::AlreadyDescribed => "already described",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub path: PathBuf,
    pub success: bool,
    pub error: Option<String>,
    /// `None` when the file failed before anything was done
    pub action: Option<Action>,
    pub new_path: Option<PathBuf>,
    pub elapsed: Duration,
}

impl ProcessingResult {
    pub fn succeeded(path: PathBuf, action: Action, new_path: Option<PathBuf>, elapsed: Duration) -> Self {
        Self {
            path,
            success: true,
            error: None,
            action: Some(action),
            new_path,
            elapsed,
        }
    }

    pub fn failed(path: PathBuf, error: impl ToString, elapsed: Duration) -> Self {
        Self {
            path,
            success: false,
            error: Some(error.to_string()),
            action: None,
            new_path: None,
            elapsed,
        }
    }
}

/// Totals for one directory run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Includes dry-run renames
    pub renamed: usize,
    /// Unchanged names and already-described files
    pub skipped: usize,
    pub elapsed: Duration,
    /// Ctrl-C stopped the run before every file was processed
    pub interrupted: bool,
}

impl DirectoryStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record(&mut self, result: &ProcessingResult) {
        if !result.success {
            self.failed += 1;
            return;
        }
        self.succeeded += 1;
        match result.action {
            Some(Action::Renamed | Action::WouldRename) => self.renamed += 1,
            Some(Action::Unchanged | Action::AlreadyDescribed) => self.skipped += 1,
            Some(Action::Described) | None => {}
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Files of the snapshot that were never started
    pub fn unprocessed(&self) -> usize {
        self.total.saturating_sub(self.succeeded + self.failed)
    }
}

impl fmt::Display for DirectoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} file(s): {} succeeded, {} failed, {} renamed, {} skipped in {:.1}s",
            self.total,
            self.succeeded,
            self.failed,
            self.renamed,
            self.skipped,
            self.elapsed.as_secs_f64()
        )?;
        if self.interrupted {
            write!(f, " (interrupted, {} not processed)", self.unprocessed())?;
        }
        Ok(())
    }
}

/// Bar for a directory run; hidden when disabled or there is nothing to do.
pub fn progress_bar(len: usize, enabled: bool) -> ProgressBar {
    if !enabled || len == 0 {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:30} {pos}/{len} {msg}")
    {
        bar.set_style(style);
    }
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(action: Action) -> ProcessingResult {
        ProcessingResult::succeeded(PathBuf::from("a.jpg"), action, None, Duration::ZERO)
    }

    #[test]
    fn totals_follow_actions() {
        let mut stats = DirectoryStats::new(5);
        stats.record(&ok(Action::Renamed));
        stats.record(&ok(Action::Unchanged));
        stats.record(&ok(Action::AlreadyDescribed));
        stats.record(&ok(Action::Described));
        stats.record(&ProcessingResult::failed(PathBuf::from("b.jpg"), "boom", Duration::ZERO));

        assert_eq!(stats.succeeded, 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.renamed, 1);
        assert_eq!(stats.skipped, 2);
        assert!(stats.has_failures());
        assert!(stats.to_string().starts_with("5 file(s): 4 succeeded, 1 failed"));
    }
}
