//! Turning model output into file names
//!
//! - `sanitizer`: description text → filesystem-safe stem
//! - `collision`: candidate path → unique path within a run

pub mod collision;
pub mod sanitizer;

pub use collision::CollisionResolver;
pub use sanitizer::{candidate_filename, normalize_existing_name, sanitize};

use serde::{Deserialize, Serialize};

/// Stem used when nothing usable survives sanitization
pub const PLACEHOLDER_STEM: &str = "unnamed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaseConversion {
    #[default]
    Lower,
    Upper,
    Title,
    None,
}

/// Rules applied when building a file name from a description.
#[derive(Debug, Clone, PartialEq)]
pub struct NamingPolicy {
    pub case: CaseConversion,
    pub separator: char,
    /// Strip trailing `.,!?;:` from the description
    pub strip_punctuation: bool,
    /// Keep only ASCII alphanumerics, joined by `separator`
    pub collapse_pattern: bool,
    /// Maximum stem length in characters
    pub max_length: usize,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self {
            case: CaseConversion::Lower,
            separator: '-',
            strip_punctuation: true,
            collapse_pattern: true,
            max_length: 100,
        }
    }
}
