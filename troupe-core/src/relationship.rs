//! Affinity between entities.
//!
//! Affinity is directional: how `character` feels about `target`. Direct events
//! move it by at most a few points at a time; the [decay
//! scheduler](crate::decay::DecayScheduler) wears it down over time.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::StoreError;
use crate::notify::{Notification, Outbox, ShiftCause};
use crate::store::{Filter, InteractionRecord, Records, RelationshipRecord, Row, WantId, WantRecord};
use serde_json::Value;
use std::sync::Arc;

/// Lowest possible affinity.
pub const AFFINITY_MIN: i32 = -100;

/// Highest possible affinity.
pub const AFFINITY_MAX: i32 = 100;

/// Clamp an affinity to its valid range.
pub fn clamp_affinity(affinity: i32) -> i32 {
    affinity.clamp(AFFINITY_MIN, AFFINITY_MAX)
}

/// Result of one direct event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaOutcome {
    /// The change asked for.
    pub requested: i32,
    /// The change that actually landed after both clamps.
    pub applied: i32,
    /// Affinity afterwards.
    pub affinity: i32,
}

/// Reads and writes relationships, bonds and wants.
#[derive(Clone)]
pub struct RelationshipLedger {
    records: Records,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
    outbox: Outbox,
}

impl RelationshipLedger {
    pub fn new(
        records: Records,
        config: Arc<EngineConfig>,
        clock: Arc<dyn Clock>,
        outbox: Outbox,
    ) -> Self {
        Self {
            records,
            config,
            clock,
            outbox,
        }
    }

    /// Apply a direct event from `name` toward `target`.
    ///
    /// The relationship is created on first use. The interaction log entry is
    /// a side effect; failing to write it does not fail the event.
    pub async fn apply_delta(
        &self,
        name: &str,
        target: &str,
        delta: i32,
        reason: &str,
    ) -> Result<DeltaOutcome, StoreError> {
        let now = self.clock.now();
        let cap = self.config.max_event_delta.saturating_abs();
        let bounded = delta.clamp(-cap, cap);

        let mut rel = self
            .records
            .relationship(name, target)
            .await?
            .unwrap_or_else(|| RelationshipRecord::new(name, target));
        let before = rel.affinity;
        rel.affinity = clamp_affinity(before.saturating_add(bounded));
        rel.last_interaction_at = Some(now);
        self.records.save_relationship(&rel).await?;

        let applied = rel.affinity - before;
        if applied != delta {
            tracing::debug!(name, target, requested = delta, applied, "Clamped affinity change");
        }

        let interaction = InteractionRecord {
            character: name.to_string(),
            target: target.to_string(),
            delta: applied,
            reason: reason.to_string(),
            occurred_at: now,
        };
        if let Err(e) = self.records.insert_interaction(&interaction).await {
            tracing::warn!(name, target, error = %e, "Failed to log interaction");
        }

        if applied.abs() >= self.config.shift_threshold {
            self.outbox.emit(Notification::RelationshipShifted {
                character: name.to_string(),
                target: target.to_string(),
                delta: applied,
                affinity: rel.affinity,
                cause: ShiftCause::Event,
            });
        }

        Ok(DeltaOutcome {
            requested: delta,
            applied,
            affinity: rel.affinity,
        })
    }

    pub async fn relationship(
        &self,
        name: &str,
        target: &str,
    ) -> Result<Option<RelationshipRecord>, StoreError> {
        self.records.relationship(name, target).await
    }

    pub async fn relationships_of(&self, name: &str) -> Result<Vec<RelationshipRecord>, StoreError> {
        self.records.relationships_of(name).await
    }

    /// Everyone who holds a strong affinity toward `target`.
    pub async fn strong_relationships_toward(
        &self,
        target: &str,
    ) -> Result<Vec<RelationshipRecord>, StoreError> {
        self.records
            .relationships_toward(target, self.config.strong_affinity)
            .await
    }

    /// Tag a relationship with a bond. An exclusive bond replaces any other
    /// exclusive bond `name` holds.
    pub async fn set_bond(
        &self,
        name: &str,
        target: &str,
        bond_type: &str,
        exclusive: bool,
    ) -> Result<RelationshipRecord, StoreError> {
        if exclusive {
            let others = Filter::new()
                .eq("character", name)
                .ne("target", target)
                .eq("bond_exclusive", true);
            let cleared = self.records.patch_relationships(&others, unbonded()).await?;
            if cleared > 0 {
                tracing::info!(name, target, cleared, "Replaced exclusive bond");
            }
        }

        let mut rel = self
            .records
            .relationship(name, target)
            .await?
            .unwrap_or_else(|| RelationshipRecord::new(name, target));
        rel.bond_type = Some(bond_type.to_string());
        rel.bond_exclusive = exclusive;
        self.records.save_relationship(&rel).await?;
        Ok(rel)
    }

    /// Remove a bond. Returns false if there was no relationship.
    pub async fn clear_bond(&self, name: &str, target: &str) -> Result<bool, StoreError> {
        Ok(self
            .records
            .patch_relationship(name, target, unbonded())
            .await?
            > 0)
    }

    /// Record something `name` wants, optionally from `target`.
    pub async fn record_want(
        &self,
        name: &str,
        target: Option<&str>,
        description: &str,
    ) -> Result<WantRecord, StoreError> {
        let want = WantRecord {
            id: WantId::new(),
            character: name.to_string(),
            target: target.map(str::to_string),
            description: description.to_string(),
            created_at: self.clock.now(),
            fulfilled_at: None,
        };
        self.records.insert_want(&want).await?;
        Ok(want)
    }

    /// Mark a want fulfilled. Returns false if it was already fulfilled or unknown.
    pub async fn fulfill_want(&self, id: WantId) -> Result<bool, StoreError> {
        Ok(self.records.fulfill_want(id, self.clock.now()).await? > 0)
    }
}

fn unbonded() -> Row {
    let mut fields = Row::new();
    fields.insert("bond_type".to_string(), Value::Null);
    fields.insert("bond_exclusive".to_string(), Value::Bool(false));
    fields
}
