//! Application configuration
//!
//! Built once at startup (defaults → YAML file → environment → command line)
//! and handed to each component by reference.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ai::prompts;
use crate::error::{AppError, Result};
use crate::naming::{CaseConversion, NamingPolicy};
use crate::retry::RetryPolicy;

/// Config files probed when no explicit path is given
const DEFAULT_CONFIG_LOCATIONS: &[&str] = &["config/app_config.yaml", "app_config.yaml"];

/// Upper bound for every duration setting (one day)
const MAX_SECONDS: f64 = 86_400.0;

/// Upper bound for retry backoff multipliers
const MAX_BACKOFF: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiStyle {
    /// `/api/generate`: `{model, prompt, images, stream}` → `response`
    #[default]
    Generate,
    /// `/api/chat`: `{model, messages: [...]}` → `message.content`
    Chat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub endpoint: String,
    pub model: String,
    pub api: ApiStyle,
    pub stream: bool,
    /// Seconds
    pub timeout: f64,
    pub retry_attempts: u32,
    /// Seconds
    pub retry_delay: f64,
    /// Multiplier applied to `retry_delay` after each failed attempt
    pub retry_backoff: f64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/generate".to_string(),
            model: "llava-llama3:latest".to_string(),
            api: ApiStyle::Generate,
            stream: false,
            timeout: 30.0,
            retry_attempts: 3,
            retry_delay: 1.0,
            retry_backoff: 1.0,
        }
    }
}

impl OllamaConfig {
    pub fn timeout(&self) -> Duration {
        secs(self.timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, secs(self.retry_delay)).with_multiplier(self.retry_backoff)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilenameConfig {
    pub prompt: String,
    pub pattern_cleanup: bool,
    pub max_length: usize,
    pub remove_punctuation: bool,
    pub replace_spaces_with: char,
    pub case_conversion: CaseConversion,
}

impl Default for FilenameConfig {
    fn default() -> Self {
        Self {
            prompt: prompts::RENAME_PROMPT.to_string(),
            pattern_cleanup: true,
            max_length: 100,
            remove_punctuation: true,
            replace_spaces_with: '-',
            case_conversion: CaseConversion::Lower,
        }
    }
}

impl FilenameConfig {
    pub fn naming_policy(&self) -> NamingPolicy {
        NamingPolicy {
            case: self.case_conversion,
            separator: self.replace_spaces_with,
            strip_punctuation: self.remove_punctuation,
            collapse_pattern: self.pattern_cleanup,
            max_length: self.max_length,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub supported_extensions: Vec<String>,
    pub max_file_size_mb: f64,
    pub default_directory: PathBuf,
    pub verify_before_processing: bool,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            supported_extensions: [".png", ".jpg", ".jpeg", ".gif", ".bmp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size_mb: 50.0,
            default_directory: PathBuf::from("./images"),
            verify_before_processing: true,
        }
    }
}

impl ImagesConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        (self.max_file_size_mb * 1024.0 * 1024.0) as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOperationsConfig {
    pub safe_move_retries: u32,
    /// Seconds to wait after copying, before deleting the original
    pub move_delay_seconds: f64,
    /// Seconds between move attempts
    pub retry_delay_seconds: f64,
    /// Multiplier applied to `retry_delay_seconds` after each failed attempt
    pub retry_backoff: f64,
    pub backup_originals: bool,
    pub confirm_overwrites: bool,
}

impl Default for FileOperationsConfig {
    fn default() -> Self {
        Self {
            safe_move_retries: 3,
            move_delay_seconds: 0.5,
            retry_delay_seconds: 1.0,
            retry_backoff: 1.0,
            backup_originals: false,
            confirm_overwrites: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub prompt: String,
    pub retry_attempts: u32,
    /// Seconds
    pub retry_delay: f64,
    pub retry_backoff: f64,
    pub creator_tool: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            prompt: prompts::METADATA_PROMPT.to_string(),
            retry_attempts: 3,
            retry_delay: 1.0,
            retry_backoff: 1.0,
            creator_tool: concat!("image-describer v", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl MetadataConfig {
    pub fn write_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, secs(self.retry_delay)).with_multiplier(self.retry_backoff)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("image_descriptions.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub recursive: bool,
    pub progress_bar: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            recursive: false,
            progress_bar: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Seconds to wait after a creation event before reading the file
    pub settle_delay: f64,
    /// Milliseconds the watcher coalesces raw events for
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            settle_delay: 1.0,
            debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ollama: OllamaConfig,
    pub filename: FilenameConfig,
    pub images: ImagesConfig,
    pub file_operations: FileOperationsConfig,
    pub metadata: MetadataConfig,
    pub database: DatabaseConfig,
    pub processing: ProcessingConfig,
    pub watch: WatchConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration (defaults < YAML file < environment)
    ///
    /// An explicit path must exist; otherwise the default locations are
    /// probed and plain defaults are used when none is present. Ignored
    /// environment values are returned as warnings, since logging is not
    /// set up yet at this point.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Vec<String>)> {
        // .env is optional
        let _ = dotenvy::dotenv();

        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(AppError::Config(format!(
                        "Configuration file not found: {}",
                        path.display()
                    )));
                }
                Self::from_yaml_file(path)?
            }
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(Path::new)
                .find(|p| p.exists())
            {
                Some(path) => Self::from_yaml_file(path)?,
                None => Self::default(),
            },
        };

        let warnings = config.merge_from_env();
        Ok((config, warnings))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| AppError::Config(format!("Invalid YAML in config file: {}", e)))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Environment variables take precedence over the file.
    ///
    /// Names are the dotted key upper-cased with underscores, e.g.
    /// `ollama.endpoint` → `OLLAMA_ENDPOINT`. Returns one message per value
    /// that could not be applied.
    pub fn merge_from_env(&mut self) -> Vec<String> {
        self.merge_from(|key| env::var(key).ok())
    }

    fn merge_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(v) = lookup("OLLAMA_ENDPOINT") {
            self.ollama.endpoint = v;
        }
        if let Some(v) = lookup("OLLAMA_MODEL") {
            self.ollama.model = v;
        }
        if let Some(v) = lookup("OLLAMA_API") {
            match v.to_lowercase().as_str() {
                "chat" => self.ollama.api = ApiStyle::Chat,
                "generate" => self.ollama.api = ApiStyle::Generate,
                other => warnings.push(format!("Ignoring unknown OLLAMA_API value: {}", other)),
            }
        }
        parse_into(&lookup, &mut warnings, "OLLAMA_STREAM", &mut self.ollama.stream);
        parse_into(&lookup, &mut warnings, "OLLAMA_TIMEOUT", &mut self.ollama.timeout);
        parse_into(&lookup, &mut warnings, "OLLAMA_RETRY_ATTEMPTS", &mut self.ollama.retry_attempts);
        parse_into(&lookup, &mut warnings, "OLLAMA_RETRY_DELAY", &mut self.ollama.retry_delay);
        parse_into(&lookup, &mut warnings, "OLLAMA_RETRY_BACKOFF", &mut self.ollama.retry_backoff);

        if let Some(v) = lookup("FILENAME_PROMPT") {
            self.filename.prompt = v;
        }
        parse_into(&lookup, &mut warnings, "FILENAME_MAX_LENGTH", &mut self.filename.max_length);

        parse_into(&lookup, &mut warnings, "IMAGES_MAX_FILE_SIZE_MB", &mut self.images.max_file_size_mb);
        if let Some(v) = lookup("IMAGES_DEFAULT_DIRECTORY") {
            self.images.default_directory = PathBuf::from(v);
        }

        parse_into(
            &lookup,
            &mut warnings,
            "FILE_OPERATIONS_SAFE_MOVE_RETRIES",
            &mut self.file_operations.safe_move_retries,
        );
        parse_into(
            &lookup,
            &mut warnings,
            "FILE_OPERATIONS_BACKUP_ORIGINALS",
            &mut self.file_operations.backup_originals,
        );

        if let Some(v) = lookup("METADATA_PROMPT") {
            self.metadata.prompt = v;
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOGGING_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("LOGGING_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }
        warnings
    }

    /// Reject settings no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.ollama.model.trim().is_empty() {
            return Err(AppError::Config("ollama.model must not be empty".into()));
        }
        reqwest::Url::parse(&self.ollama.endpoint).map_err(|e| {
            AppError::Config(format!(
                "ollama.endpoint is not a valid URL ({}): {}",
                self.ollama.endpoint, e
            ))
        })?;
        if self.ollama.retry_attempts == 0 {
            return Err(AppError::Config("ollama.retry_attempts must be at least 1".into()));
        }
        check_seconds("ollama.timeout", self.ollama.timeout, false)?;
        check_seconds("ollama.retry_delay", self.ollama.retry_delay, true)?;
        check_seconds(
            "file_operations.move_delay_seconds",
            self.file_operations.move_delay_seconds,
            true,
        )?;
        check_seconds(
            "file_operations.retry_delay_seconds",
            self.file_operations.retry_delay_seconds,
            true,
        )?;
        check_seconds("metadata.retry_delay", self.metadata.retry_delay, true)?;
        check_seconds("watch.settle_delay", self.watch.settle_delay, true)?;
        check_backoff("ollama.retry_backoff", self.ollama.retry_backoff)?;
        check_backoff("file_operations.retry_backoff", self.file_operations.retry_backoff)?;
        check_backoff("metadata.retry_backoff", self.metadata.retry_backoff)?;
        if !self.images.max_file_size_mb.is_finite() || self.images.max_file_size_mb <= 0.0 {
            return Err(AppError::Config(format!(
                "images.max_file_size_mb must be positive (got {})",
                self.images.max_file_size_mb
            )));
        }
        if self.filename.max_length == 0 {
            return Err(AppError::Config("filename.max_length must be at least 1".into()));
        }
        if self.filename.replace_spaces_with.is_ascii_alphanumeric()
            || matches!(self.filename.replace_spaces_with, '/' | '\\')
        {
            return Err(AppError::Config(format!(
                "filename.replace_spaces_with cannot be '{}'",
                self.filename.replace_spaces_with
            )));
        }
        if self.images.supported_extensions.is_empty() {
            return Err(AppError::Config(
                "images.supported_extensions must list at least one extension".into(),
            ));
        }
        if self.file_operations.safe_move_retries == 0 || self.metadata.retry_attempts == 0 {
            return Err(AppError::Config("retry counts must be at least 1".into()));
        }
        Ok(())
    }

    /// Supported extensions normalised to lowercase without the leading dot
    pub fn extensions(&self) -> Vec<String> {
        self.images
            .supported_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    warnings: &mut Vec<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *target = v,
            Err(_) => warnings.push(format!("Ignoring unparsable {}={}", key, raw)),
        }
    }
}

fn check_seconds(key: &str, value: f64, allow_zero: bool) -> Result<()> {
    let in_range = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if !value.is_finite() || !in_range || value > MAX_SECONDS {
        return Err(AppError::Config(format!(
            "{} must be a number of seconds between {} and {} (got {})",
            key,
            if allow_zero { "0" } else { "0 (exclusive)" },
            MAX_SECONDS,
            value
        )));
    }
    Ok(())
}

fn check_backoff(key: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(1.0..=MAX_BACKOFF).contains(&value) {
        return Err(AppError::Config(format!(
            "{} must be between 1 and {} (got {})",
            key, MAX_BACKOFF, value
        )));
    }
    Ok(())
}

/// Seconds from configuration as a `Duration`; out-of-range values saturate.
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}
