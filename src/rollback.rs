//! Rollback files for remote catalog writes.
//!
//! Before any patch is sent, the previous values of every touched row are
//! written to `rollback_<table>_<utc timestamp>.json`:
//!
//! ```json
//! {
//!   "table": "products",
//!   "created_at": "2026-03-01T12:00:00Z",
//!   "entries": [
//!     { "id": "17", "before": { "brand": "Royal" }, "after": { "brand": "Royal Canin" } }
//!   ]
//! }
//! ```

use crate::models::RowPatch;
use crate::utils::utc_stamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

/// Previous and new values of one patched row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub id: String,
    pub before: RowPatch,
    pub after: RowPatch,
}

impl RollbackEntry {
    /// The entry with `before` and `after` swapped.
    pub fn inverted(&self) -> RollbackEntry {
        RollbackEntry {
            id: self.id.clone(),
            before: self.after.clone(),
            after: self.before.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackFile {
    pub table: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<RollbackEntry>,
}

impl RollbackFile {
    pub fn new(table: &str, entries: Vec<RollbackEntry>) -> Self {
        Self {
            table: table.to_string(),
            created_at: Utc::now(),
            entries,
        }
    }

    /// File name for this rollback, e.g. `rollback_products_20260301T120000Z.json`.
    pub fn file_name(&self) -> String {
        format!("rollback_{}_{}.json", self.table, utc_stamp(self.created_at))
    }

    /// Patches that put every row back to its `before` values.
    pub fn restore_patches(&self) -> Vec<RollbackEntry> {
        self.entries
            .iter()
            .filter(|e| !e.before.is_empty())
            .map(RollbackEntry::inverted)
            .collect()
    }
}

/// Write `file` into `dir` and return the full path.
#[instrument(level = "info", skip_all, fields(dir = %dir.display(), entries = file.entries.len()))]
pub async fn write_rollback(dir: &Path, file: &RollbackFile) -> Result<PathBuf, Box<dyn Error>> {
    crate::utils::ensure_writable_dir(dir).await?;
    let path = dir.join(file.file_name());
    let json = serde_json::to_string_pretty(file)?;
    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote rollback file");
    Ok(path)
}

#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn read_rollback(path: &Path) -> Result<RollbackFile, Box<dyn Error>> {
    let raw = fs::read_to_string(path).await?;
    let file: RollbackFile = serde_json::from_str(&raw)?;
    info!(table = %file.table, entries = file.entries.len(), "Read rollback file");
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: &str, before: &str, after: &str) -> RollbackEntry {
        RollbackEntry {
            id: id.to_string(),
            before: RowPatch {
                brand: Some(before.to_string()),
                ..Default::default()
            },
            after: RowPatch {
                brand: Some(after.to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_file_name_uses_table_and_stamp() {
        let mut file = RollbackFile::new("products", vec![]);
        file.created_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 5).unwrap();
        assert_eq!(file.file_name(), "rollback_products_20260301T120005Z.json");
    }

    #[test]
    fn test_restore_patches_swap_before_and_after() {
        let file = RollbackFile::new(
            "products",
            vec![
                entry("1", "Royal", "Royal Canin"),
                RollbackEntry {
                    id: "2".to_string(),
                    before: RowPatch::default(),
                    after: RowPatch::default(),
                },
            ],
        );
        let restore = file.restore_patches();
        assert_eq!(restore.len(), 1);
        assert_eq!(restore[0].id, "1");
        assert_eq!(restore[0].after.brand.as_deref(), Some("Royal"));
        assert_eq!(restore[0].before.brand.as_deref(), Some("Royal Canin"));
    }

    #[test]
    fn test_created_at_is_rfc3339() {
        let mut file = RollbackFile::new("products", vec![entry("1", "a", "b")]);
        file.created_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["created_at"], "2026-03-01T12:00:00Z");
        assert_eq!(json["entries"][0]["before"], serde_json::json!({"brand": "a"}));
    }

    #[tokio::test]
    async fn test_write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("rollbacks");
        let file = RollbackFile::new("products", vec![entry("7", "Lily's", "Lily's Kitchen")]);

        let path = write_rollback(&nested, &file).await.unwrap();
        assert!(path.starts_with(&nested));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("rollback_products_"));

        let back = read_rollback(&path).await.unwrap();
        assert_eq!(back, file);
    }

    #[tokio::test]
    async fn test_read_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, r#"{"table": "products"}"#).unwrap();
        assert!(read_rollback(&path).await.is_err());
    }
}
