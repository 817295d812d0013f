//! Pre-flight checks before an image is sent to the model

use std::fs;
use std::path::{Path, PathBuf};

use image::ImageReader;

use crate::config::ImagesConfig;
use crate::error::{AppError, Result};

/// What the validator learned about a usable image
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub path: PathBuf,
    /// Lowercase, without the dot
    pub extension: String,
    pub size_bytes: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct ImageValidator {
    extensions: Vec<String>,
    max_size_bytes: u64,
    verify_decode: bool,
}

impl ImageValidator {
    /// `extensions` may be given with or without the leading dot, any case.
    pub fn new(extensions: &[String], max_size_bytes: u64) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            max_size_bytes,
            verify_decode: true,
        }
    }

    pub fn from_config(config: &ImagesConfig) -> Self {
        let mut validator = Self::new(&config.supported_extensions, config.max_file_size_bytes());
        validator.verify_decode = config.verify_before_processing;
        validator
    }

    /// Extension check only; used for traversal and watch filtering.
    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|e| self.extensions.contains(&e))
    }

    pub fn supported_list(&self) -> String {
        self.extensions
            .iter()
            .map(|e| format!(".{}", e))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Checks run in order: exists, regular file, extension, size, decodable.
    pub fn validate(&self, path: &Path) -> Result<ImageInfo> {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(AppError::from_io(format!("stat {}", path.display()), e)),
        };

        if !metadata.is_file() {
            return Err(AppError::NotAFile(path.to_path_buf()));
        }

        if !self.is_supported(path) {
            return Err(AppError::UnsupportedFormat {
                path: path.to_path_buf(),
                supported: self.supported_list(),
            });
        }

        let size_bytes = metadata.len();
        if size_bytes > self.max_size_bytes {
            return Err(AppError::TooLarge {
                path: path.to_path_buf(),
                size_mb: to_mb(size_bytes),
                max_mb: to_mb(self.max_size_bytes),
            });
        }

        let (width, height) = if self.verify_decode {
            decode_dimensions(path)?
        } else {
            (0, 0)
        };

        Ok(ImageInfo {
            path: path.to_path_buf(),
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
            size_bytes,
            width,
            height,
        })
    }
}

/// Full decode so truncated files are caught, not just a bad header.
/// The decoder and pixel buffer are dropped before returning.
fn decode_dimensions(path: &Path) -> Result<(u32, u32)> {
    let corrupted = |reason: String| AppError::CorruptedImage {
        path: path.to_path_buf(),
        reason,
    };

    let reader = ImageReader::open(path)
        .map_err(|e| corrupted(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| corrupted(e.to_string()))?;
    let image = reader.decode().map_err(|e| corrupted(e.to_string()))?;
    Ok((image.width(), image.height()))
}

fn to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
