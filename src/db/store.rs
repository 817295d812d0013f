//! SQLite-backed description store
//!
//! One row per image, keyed by absolute path. A connection is opened for each
//! call and dropped when it returns, so nothing stays locked between files.

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_path TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_images_file_path
        ON images(file_path);
"#;

/// A stored description
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptionRecord {
    pub file_path: String,
    pub description: String,
    /// RFC 3339
    pub created_at: String,
    /// RFC 3339
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct DescriptionStore {
    path: PathBuf,
}

impl DescriptionStore {
    /// Create the database file and schema if needed
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { path };
        store.connect()?.execute_batch(SCHEMA)?;
        tracing::debug!("Description store ready at {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    /// Insert or replace the description for `image`. `created_at` survives
    /// replacement; `updated_at` is bumped.
    pub fn save(&self, image: &Path, description: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        self.connect()?.execute(
            r#"
            INSERT INTO images (file_path, description, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(file_path) DO UPDATE SET
                description = excluded.description,
                updated_at = excluded.updated_at
            "#,
            params![key(image), description, now],
        )?;
        Ok(())
    }

    pub fn get(&self, image: &Path) -> Result<Option<String>> {
        Ok(self.get_record(image)?.map(|r| r.description))
    }

    pub fn get_record(&self, image: &Path) -> Result<Option<DescriptionRecord>> {
        let record = self
            .connect()?
            .query_row(
                "SELECT file_path, description, created_at, updated_at FROM images WHERE file_path = ?1",
                params![key(image)],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Returns whether a row was removed
    pub fn delete(&self, image: &Path) -> Result<bool> {
        let removed = self
            .connect()?
            .execute("DELETE FROM images WHERE file_path = ?1", params![key(image)])?;
        Ok(removed > 0)
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .connect()?
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Most recently updated first
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<DescriptionRecord>> {
        let conn = self.connect()?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(
            "SELECT file_path, description, created_at, updated_at FROM images
             ORDER BY updated_at DESC, id DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Write a consistent copy of the database to `destination`
    pub fn backup(&self, destination: &Path) -> Result<()> {
        if destination.exists() {
            return Err(AppError::DestinationExists(destination.to_path_buf()));
        }
        let target = destination.to_string_lossy().to_string();
        self.connect()?.execute("VACUUM INTO ?1", params![target])?;
        tracing::info!("Backed up description store to {}", destination.display());
        Ok(())
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DescriptionRecord> {
    Ok(DescriptionRecord {
        file_path: row.get(0)?,
        description: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

/// Absolute form of `path` used as the row key
fn key(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, DescriptionStore) {
        let dir = TempDir::new().unwrap();
        let store = DescriptionStore::open(dir.path().join("db/descriptions.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn save_and_get() {
        let (dir, store) = store();
        let image = dir.path().join("cat.jpg");

        assert_eq!(store.get(&image).unwrap(), None);
        store.save(&image, "A grey cat asleep").unwrap();
        assert_eq!(store.get(&image).unwrap().as_deref(), Some("A grey cat asleep"));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn upsert_keeps_created_at() {
        let (dir, store) = store();
        let image = dir.path().join("cat.jpg");

        store.save(&image, "first").unwrap();
        let before = store.get_record(&image).unwrap().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.save(&image, "second").unwrap();
        let after = store.get_record(&image).unwrap().unwrap();

        assert_eq!(after.description, "second");
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn delete_and_list_order() {
        let (dir, store) = store();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        store.save(&a, "alpha").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.save(&b, "beta").unwrap();

        let listed = store.list(None).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].description, "beta");
        assert_eq!(store.list(Some(1)).unwrap().len(), 1);

        assert!(store.delete(&a).unwrap());
        assert!(!store.delete(&a).unwrap());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn relative_and_absolute_paths_share_a_key() {
        let (_dir, store) = store();
        let relative = Path::new("some/relative.jpg");
        store.save(relative, "desc").unwrap();
        let absolute = std::env::current_dir().unwrap().join(relative);
        assert_eq!(store.get(&absolute).unwrap().as_deref(), Some("desc"));
    }

    #[test]
    fn backup_copies_rows() {
        let (dir, store) = store();
        store.save(&dir.path().join("x.gif"), "x").unwrap();

        let copy = dir.path().join("backup.db");
        store.backup(&copy).unwrap();
        let restored = DescriptionStore::open(&copy).unwrap();
        assert_eq!(restored.count().unwrap(), 1);

        assert!(matches!(store.backup(&copy).unwrap_err(), AppError::DestinationExists(_)));
    }
}
