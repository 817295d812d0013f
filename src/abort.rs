//! Ctrl-C handling for long runs
//!
//! The first Ctrl-C raises the flag. Directory runs and the watch loop check
//! it between files, so the file in flight is always finished. A second
//! Ctrl-C exits at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::EXIT_INTERRUPTED;

#[derive(Debug, Clone, Default)]
pub struct AbortFlag {
    raised: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag raised by the first Ctrl-C. Must be called inside the runtime.
    pub fn on_ctrl_c() -> Self {
        let flag = Self::new();
        let handle = flag.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Could not listen for Ctrl-C: {}", e);
                return;
            }
            tracing::warn!("Interrupted");
            eprintln!("\nInterrupted: finishing the current file (Ctrl-C again to quit now)");
            handle.raise();

            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(EXIT_INTERRUPTED);
            }
        });
        flag
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is raised
    pub async fn raised(&self) {
        loop {
            // registered before the check so a raise in between is not missed
            let notified = self.notify.notified();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}
