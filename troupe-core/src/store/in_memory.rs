//! In-process row store.
//!
//! Serves as the reference [`Store`] for tests, simulations and single-node
//! deployments. Every call takes the table lock once, so a single patch is
//! atomic here even though the engine never relies on that.

use super::{Filter, Query, Row, Store, Table};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A row store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<Table, Vec<Row>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with rows.
    pub fn with_tables(tables: HashMap<Table, Vec<Row>>) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Copy every table out.
    pub async fn dump(&self) -> HashMap<Table, Vec<Row>> {
        self.tables.read().await.clone()
    }

    /// Count rows in a table.
    pub async fn row_count(&self, table: Table) -> usize {
        self.tables
            .read()
            .await
            .get(&table)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn read(&self, table: Table, query: &Query) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(&table) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<Row> = rows
            .iter()
            .filter(|row| query.filter.matches(row))
            .cloned()
            .collect();

        if !query.order.is_empty() {
            matched.sort_by(|a, b| query.compare_rows(a, b));
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        Ok(matched.into_iter().map(|row| query.project(row)).collect())
    }

    async fn patch(&self, table: Table, filter: &Filter, fields: Row) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(&table) else {
            return Ok(0);
        };

        let mut affected = 0;
        for row in rows.iter_mut().filter(|row| filter.matches(row)) {
            for (key, value) in &fields {
                row.insert(key.clone(), value.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn insert(&self, table: Table, row: Row) -> Result<(), StoreError> {
        self.tables.write().await.entry(table).or_default().push(row);
        Ok(())
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(&table) else {
            return Ok(0);
        };

        let before = rows.len();
        rows.retain(|row| !filter.matches(row));
        Ok(before - rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_patch_miss_reports_zero() {
        let store = InMemoryStore::new();
        let affected = store
            .patch(
                Table::Characters,
                &Filter::new().eq("name", "ada"),
                row(json!({"mood": "calm"})),
            )
            .await
            .unwrap();
        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn test_read_orders_limits_and_projects() {
        let store = InMemoryStore::new();
        for (name, energy) in [("ada", 10), ("bo", 90), ("cy", 50)] {
            store
                .insert(
                    Table::Characters,
                    row(json!({"name": name, "energy": energy})),
                )
                .await
                .unwrap();
        }

        let rows = store
            .read(
                Table::Characters,
                &Query::new().order_desc("energy").limit(2).select(&["name"]),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], json!("bo"));
        assert_eq!(rows[1]["name"], json!("cy"));
        assert!(!rows[0].contains_key("energy"));
    }

    #[tokio::test]
    async fn test_patch_updates_all_matches() {
        let store = InMemoryStore::new();
        for name in ["ada", "bo"] {
            store
                .insert(
                    Table::Characters,
                    row(json!({"name": name, "interactions_today": 4})),
                )
                .await
                .unwrap();
        }

        let affected = store
            .patch(
                Table::Characters,
                &Filter::new(),
                row(json!({"interactions_today": 0})),
            )
            .await
            .unwrap();
        assert_eq!(affected, 2);
        assert_eq!(store.row_count(Table::Characters).await, 2);
    }

    #[tokio::test]
    async fn test_delete_removes_only_matches() {
        let store = InMemoryStore::new();
        for (key, status) in [("a", "delivered"), ("b", "pending"), ("c", "delivered")] {
            store
                .insert(Table::Outbox, row(json!({"key": key, "status": status})))
                .await
                .unwrap();
        }

        let removed = store
            .delete(Table::Outbox, &Filter::new().eq("status", "delivered"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.row_count(Table::Outbox).await, 1);
        assert_eq!(
            store
                .delete(Table::Memories, &Filter::new())
                .await
                .unwrap(),
            0
        );
    }
}
