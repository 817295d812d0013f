use std::fs;
use std::path::Path;

use crate::config::AppConfig;
use crate::error::{AppError, Result, EXIT_OK};

/// Write the default configuration to `path`; never overwrites.
pub fn run(path: &Path) -> Result<i32> {
    write_default_config(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(EXIT_OK)
}

pub fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(AppError::DestinationExists(path.to_path_buf()));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, AppConfig::default().to_yaml()?)?;
    Ok(())
}
