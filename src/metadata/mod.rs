//! Embedding descriptions into image files

pub mod xmp;

pub use xmp::XmpWriter;

use std::path::Path;

use crate::error::Result;

/// Writes a description into (or next to) an image.
pub trait MetadataWriter: Send + Sync {
    fn write_description(&self, image: &Path, description: &str) -> Result<()>;

    /// Description previously written by this writer, if any
    fn read_description(&self, image: &Path) -> Result<Option<String>>;
}
