//! Filesystem side of the pipeline
//!
//! - `validator`: is this a usable image
//! - `scanner`: directory snapshots and name normalization
//! - `mover`: copy-then-delete moves with rollback

pub mod mover;
pub mod scanner;
pub mod validator;

pub use mover::{FileSystem, MoveOptions, SafeMover, StdFileSystem};
pub use scanner::{collect_images, ensure_directory, is_hidden, normalize_directory, NormalizeSummary};
pub use validator::{ImageInfo, ImageValidator};
