//! Per-file and per-directory workflows
//!
//! - `rename`: describe → sanitize → resolve → move
//! - `metadata`: describe → store → embed XMP
//!
//! Files are processed one at a time. A failing file is recorded in the
//! run's statistics and the run continues; only directory-level problems
//! abort.

pub mod metadata;
pub mod rename;
pub mod stats;

pub use metadata::MetadataOrchestrator;
pub use rename::RenameOrchestrator;
pub use stats::{progress_bar, Action, DirectoryStats, ProcessingResult};
