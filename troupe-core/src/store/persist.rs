//! JSON snapshots of the in-memory store.
//!
//! Lets a single-node deployment or a simulation survive restarts without a
//! remote database.

use super::in_memory::InMemoryStore;
use super::{Row, Table};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

/// Current snapshot file version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Every table of a store at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Snapshot format version for compatibility checking.
    pub version: u32,

    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,

    /// Rows by table.
    pub tables: BTreeMap<Table, Vec<Row>>,
}

impl StoreSnapshot {
    /// Number of rows across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

impl InMemoryStore {
    /// Capture every table.
    pub async fn snapshot(&self, saved_at: DateTime<Utc>) -> StoreSnapshot {
        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at,
            tables: self.dump().await.into_iter().collect(),
        }
    }

    /// Write a snapshot to a JSON file.
    pub async fn save_json(
        &self,
        path: impl AsRef<Path>,
        saved_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let snapshot = self.snapshot(saved_at).await;
        let content = serde_json::to_string_pretty(&snapshot)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Restore a store from a JSON snapshot file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path).await?;
        let snapshot: StoreSnapshot = serde_json::from_str(&content)?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: snapshot.version,
            });
        }

        tracing::info!(
            rows = snapshot.row_count(),
            saved_at = %snapshot.saved_at,
            "Restored store snapshot"
        );
        Ok(Self::with_tables(snapshot.tables.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Filter, Query, Store};
    use serde_json::json;

    #[tokio::test]
    async fn test_snapshot_restores_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("troupe.json");

        let store = InMemoryStore::new();
        let mut row = Row::new();
        row.insert("name".to_string(), json!("ada"));
        row.insert("energy".to_string(), json!(42));
        store.insert(Table::Characters, row).await.unwrap();
        store.save_json(&path, Utc::now()).await.unwrap();

        let restored = InMemoryStore::load_json(&path).await.unwrap();
        let rows = restored
            .read(
                Table::Characters,
                &Query::filtered(Filter::new().eq("name", "ada")),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["energy"], json!(42));
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");
        let content = json!({
            "version": 0,
            "saved_at": "2026-03-02T09:00:00Z",
            "tables": {}
        });
        tokio::fs::write(&path, content.to_string()).await.unwrap();

        let err = InMemoryStore::load_json(&path).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: 0
            }
        ));
    }
}
