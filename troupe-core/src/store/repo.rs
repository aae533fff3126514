//! Typed adapter over a [`Store`].
//!
//! Every method takes an explicit identity and performs a single read, patch
//! or insert. Upserts are a patch followed by an insert when the patch missed.

use super::records::{
    ActionRecord, CharacterState, DecayLedgerEntry, InteractionRecord, MemoryId, MemoryRecord,
    RelationshipRecord, WantId, WantRecord,
};
use super::{timestamp, Condition, Filter, Query, Row, Store, Table};
use crate::error::StoreError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Typed access to the engine's tables.
#[derive(Clone)]
pub struct Records {
    store: Arc<dyn Store>,
}

impl Records {
    /// Wrap a store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // =========================================================================
    // Characters
    // =========================================================================

    /// Read an entity's state as stored.
    pub async fn character(&self, name: &str) -> Result<Option<CharacterState>, StoreError> {
        self.read_one(Table::Characters, Filter::new().eq("name", name))
            .await
    }

    /// Read every entity.
    pub async fn characters(&self) -> Result<Vec<CharacterState>, StoreError> {
        self.read_all(Table::Characters, &Query::new().order_asc("name"))
            .await
    }

    /// Write an entity's full state, creating the row if the patch missed.
    pub async fn save_character(&self, state: &CharacterState) -> Result<(), StoreError> {
        let row = to_row(Table::Characters, state)?;
        self.upsert(Table::Characters, Filter::new().eq("name", state.name.as_str()), row)
            .await
    }

    /// Patch selected columns of matching entity rows.
    pub async fn patch_characters(&self, filter: &Filter, fields: Row) -> Result<usize, StoreError> {
        self.store.patch(Table::Characters, filter, fields).await
    }

    /// Insert a new entity row.
    pub async fn insert_character(&self, state: &CharacterState) -> Result<(), StoreError> {
        self.store
            .insert(Table::Characters, to_row(Table::Characters, state)?)
            .await
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// The most recent actions across all entities, newest first.
    pub async fn recent_actions(&self, limit: usize) -> Result<Vec<ActionRecord>, StoreError> {
        self.read_all(
            Table::Actions,
            &Query::new().order_desc("occurred_at").limit(limit),
        )
        .await
    }

    /// Append to the action log.
    pub async fn insert_action(&self, action: &ActionRecord) -> Result<(), StoreError> {
        self.store
            .insert(Table::Actions, to_row(Table::Actions, action)?)
            .await
    }

    // =========================================================================
    // Memories
    // =========================================================================

    /// Read memories matching a query.
    pub async fn memories(&self, query: &Query) -> Result<Vec<MemoryRecord>, StoreError> {
        self.read_all(Table::Memories, query).await
    }

    /// Read a single memory.
    pub async fn memory(&self, id: MemoryId) -> Result<Option<MemoryRecord>, StoreError> {
        self.read_one(Table::Memories, Filter::new().eq("id", id.to_string()))
            .await
    }

    /// Append a memory.
    pub async fn insert_memory(&self, memory: &MemoryRecord) -> Result<(), StoreError> {
        self.store
            .insert(Table::Memories, to_row(Table::Memories, memory)?)
            .await
    }

    /// Patch columns of one memory.
    pub async fn patch_memory(&self, id: MemoryId, fields: Row) -> Result<usize, StoreError> {
        self.store
            .patch(
                Table::Memories,
                &Filter::new().eq("id", id.to_string()),
                fields,
            )
            .await
    }

    // =========================================================================
    // Relationships
    // =========================================================================

    /// Read how `character` feels about `target`.
    pub async fn relationship(
        &self,
        character: &str,
        target: &str,
    ) -> Result<Option<RelationshipRecord>, StoreError> {
        self.read_one(Table::Relationships, pair_filter(character, target))
            .await
    }

    /// Read every relationship held by `character`.
    pub async fn relationships_of(
        &self,
        character: &str,
    ) -> Result<Vec<RelationshipRecord>, StoreError> {
        self.read_all(
            Table::Relationships,
            &Query::filtered(Filter::new().eq("character", character)).order_asc("target"),
        )
        .await
    }

    /// Read relationships toward `target` at or above an affinity.
    pub async fn relationships_toward(
        &self,
        target: &str,
        min_affinity: i32,
    ) -> Result<Vec<RelationshipRecord>, StoreError> {
        self.read_all(
            Table::Relationships,
            &Query::filtered(
                Filter::new()
                    .eq("target", target)
                    .gte("affinity", min_affinity),
            )
            .order_desc("affinity"),
        )
        .await
    }

    /// Read every relationship row.
    pub async fn all_relationships(&self) -> Result<Vec<RelationshipRecord>, StoreError> {
        self.read_all(
            Table::Relationships,
            &Query::new().order_asc("character").order_asc("target"),
        )
        .await
    }

    /// Write a relationship, creating it if the patch missed.
    pub async fn save_relationship(&self, rel: &RelationshipRecord) -> Result<(), StoreError> {
        let row = to_row(Table::Relationships, rel)?;
        self.upsert(Table::Relationships, pair_filter(&rel.character, &rel.target), row)
            .await
    }

    /// Patch columns of relationship rows.
    pub async fn patch_relationships(
        &self,
        filter: &Filter,
        fields: Row,
    ) -> Result<usize, StoreError> {
        self.store.patch(Table::Relationships, filter, fields).await
    }

    /// Patch columns of one relationship.
    pub async fn patch_relationship(
        &self,
        character: &str,
        target: &str,
        fields: Row,
    ) -> Result<usize, StoreError> {
        self.patch_relationships(&pair_filter(character, target), fields)
            .await
    }

    // =========================================================================
    // Interactions
    // =========================================================================

    /// Append an interaction.
    pub async fn insert_interaction(&self, interaction: &InteractionRecord) -> Result<(), StoreError> {
        self.store
            .insert(Table::Interactions, to_row(Table::Interactions, interaction)?)
            .await
    }

    /// Interactions in either direction involving `name` since a time.
    pub async fn interactions_involving(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<InteractionRecord>, StoreError> {
        let query = Query::filtered(
            Filter::new()
                .and(Condition::Or(vec![
                    Condition::Eq("character".to_string(), Value::from(name)),
                    Condition::Eq("target".to_string(), Value::from(name)),
                ]))
                .gte("occurred_at", timestamp(since)),
        )
        .order_asc("occurred_at");
        self.read_all(Table::Interactions, &query).await
    }

    // =========================================================================
    // Wants
    // =========================================================================

    /// Append a want.
    pub async fn insert_want(&self, want: &WantRecord) -> Result<(), StoreError> {
        self.store
            .insert(Table::Wants, to_row(Table::Wants, want)?)
            .await
    }

    /// Unfulfilled wants `character` holds toward `target`.
    pub async fn open_wants(
        &self,
        character: &str,
        target: &str,
    ) -> Result<Vec<WantRecord>, StoreError> {
        self.read_all(
            Table::Wants,
            &Query::filtered(
                pair_filter(character, target).is_null("fulfilled_at"),
            )
            .order_asc("created_at"),
        )
        .await
    }

    /// Mark a want fulfilled if it is still open.
    pub async fn fulfill_want(&self, id: WantId, at: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut fields = Row::new();
        fields.insert("fulfilled_at".to_string(), timestamp(at));
        self.store
            .patch(
                Table::Wants,
                &Filter::new()
                    .eq("id", id.to_string())
                    .is_null("fulfilled_at"),
                fields,
            )
            .await
    }

    // =========================================================================
    // Decay ledger
    // =========================================================================

    /// Decay already applied to `character` on `day`.
    pub async fn decay_applied(&self, character: &str, day: NaiveDate) -> Result<i32, StoreError> {
        let entry: Option<DecayLedgerEntry> = self
            .read_one(Table::DecayLedger, ledger_filter(character, day))
            .await?;
        Ok(entry.map(|e| e.applied).unwrap_or(0))
    }

    /// Record the running decay total for a day.
    pub async fn save_decay_applied(&self, entry: &DecayLedgerEntry) -> Result<(), StoreError> {
        let row = to_row(Table::DecayLedger, entry)?;
        self.upsert(Table::DecayLedger, ledger_filter(&entry.character, entry.day), row)
            .await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn read_one<T: DeserializeOwned>(
        &self,
        table: Table,
        filter: Filter,
    ) -> Result<Option<T>, StoreError> {
        let rows = self
            .store
            .read(table, &Query::filtered(filter).limit(1))
            .await?;
        rows.into_iter().next().map(from_row).transpose()
    }

    async fn read_all<T: DeserializeOwned>(
        &self,
        table: Table,
        query: &Query,
    ) -> Result<Vec<T>, StoreError> {
        self.store
            .read(table, query)
            .await?
            .into_iter()
            .map(from_row)
            .collect()
    }

    async fn upsert(&self, table: Table, filter: Filter, row: Row) -> Result<(), StoreError> {
        let affected = self.store.patch(table, &filter, row.clone()).await?;
        if affected == 0 {
            tracing::debug!(%table, "Patch missed, inserting new row");
            self.store.insert(table, row).await?;
        }
        Ok(())
    }
}

fn pair_filter(character: &str, target: &str) -> Filter {
    Filter::new()
        .eq("character", character)
        .eq("target", target)
}

fn ledger_filter(character: &str, day: NaiveDate) -> Filter {
    Filter::new()
        .eq("character", character)
        .eq("day", day.to_string())
}

/// Serialize a record into a row.
pub fn to_row<T: Serialize>(table: Table, value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject {
            table: table.name(),
        }),
    }
}

/// Deserialize a row into a record.
pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone};

    fn records() -> Records {
        Records::new(Arc::new(InMemoryStore::new()))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_save_character_upserts() {
        let records = records();
        let mut state = CharacterState::new("ada", t0());
        records.save_character(&state).await.unwrap();

        state.energy = 12;
        records.save_character(&state).await.unwrap();

        assert_eq!(records.characters().await.unwrap().len(), 1);
        assert_eq!(records.character("ada").await.unwrap().unwrap().energy, 12);
    }

    #[tokio::test]
    async fn test_relationships_toward_filters_affinity() {
        let records = records();
        for (from, affinity) in [("bo", 70), ("cy", 20), ("di", 50)] {
            records
                .save_relationship(&RelationshipRecord::new(from, "ada").with_affinity(affinity))
                .await
                .unwrap();
        }

        let strong = records.relationships_toward("ada", 50).await.unwrap();
        let names: Vec<_> = strong.iter().map(|r| r.character.as_str()).collect();
        assert_eq!(names, vec!["bo", "di"]);
    }

    #[tokio::test]
    async fn test_interactions_involving_both_directions() {
        let records = records();
        let at = t0();
        for (from, to) in [("ada", "bo"), ("bo", "cy"), ("cy", "di")] {
            records
                .insert_interaction(&InteractionRecord {
                    character: from.to_string(),
                    target: to.to_string(),
                    delta: 1,
                    reason: "chat".to_string(),
                    occurred_at: at,
                })
                .await
                .unwrap();
        }

        let involving = records
            .interactions_involving("bo", at - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(involving.len(), 2);
    }

    #[tokio::test]
    async fn test_decay_ledger_round_trip() {
        let records = records();
        let day = t0().date_naive();
        assert_eq!(records.decay_applied("ada", day).await.unwrap(), 0);

        records
            .save_decay_applied(&DecayLedgerEntry {
                character: "ada".to_string(),
                day,
                applied: 6,
            })
            .await
            .unwrap();
        assert_eq!(records.decay_applied("ada", day).await.unwrap(), 6);
        assert_eq!(
            records
                .decay_applied("ada", day.succ_opt().unwrap())
                .await
                .unwrap(),
            0
        );
    }
}
