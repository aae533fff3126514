//! Testing utilities for the coordination engine.
//!
//! This module provides tools for integration testing:
//! - `ScriptedGenerator` for deterministic generation without API calls
//! - `RecordingSink` to capture notifications
//! - `FlakyStore` to inject store failures
//! - `TestHarness` bundling an engine over an in-memory store and a manual clock
//! - Assertion helpers for verifying entity state

use crate::clock::{Clock, ManualClock};
use crate::config::EngineConfig;
use crate::engine::{Engine, TurnOutcome, TurnReport, TurnRequest};
use crate::error::{GenerationError, NotifyError, StoreError};
use crate::generation::{Constraints, GenerationContext, Generator};
use crate::notify::{Notification, NotificationSink};
use crate::registry::Registry;
use crate::store::{
    CharacterState, Condition, Filter, InMemoryStore, Location, Query, Records,
    RelationshipRecord, Row, Store, Table,
};
use crate::turn::TurnReason;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A scripted reply from the generator.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this text.
    Text(String),
    /// Fail with an API error carrying this message.
    Fail(String),
    /// Never answer.
    Hang,
    /// Answer after a delay.
    Delay(std::time::Duration, String),
}

/// One call the generator received.
#[derive(Debug, Clone)]
pub struct GenerationCall {
    pub identity: String,
    pub context: GenerationContext,
    pub constraints: Constraints,
}

/// A generator that returns scripted replies in order.
///
/// Once the script runs out every call answers `"<identity> nods."`.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<GenerationCall>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply.
    pub fn queue(&self, reply: ScriptedReply) {
        lock(&self.replies).push_back(reply);
    }

    /// Queue a text reply.
    pub fn queue_text(&self, text: impl Into<String>) {
        self.queue(ScriptedReply::Text(text.into()));
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<GenerationCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        identity: &str,
        context: &GenerationContext,
        constraints: &Constraints,
    ) -> Result<String, GenerationError> {
        lock(&self.calls).push(GenerationCall {
            identity: identity.to_string(),
            context: context.clone(),
            constraints: *constraints,
        });
        let reply = lock(&self.replies).pop_front();

        match reply {
            None => Ok(format!("{identity} nods.")),
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(message)) => Err(GenerationError::Api {
                status: 500,
                message,
            }),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            Some(ScriptedReply::Delay(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A sink that keeps every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    received: Mutex<Vec<Notification>>,
    offline: Mutex<bool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far.
    pub fn received(&self) -> Vec<Notification> {
        lock(&self.received).clone()
    }

    /// Count delivered notifications of one kind.
    pub fn count_of(&self, kind: &str) -> usize {
        lock(&self.received)
            .iter()
            .filter(|n| n.kind() == kind)
            .count()
    }

    /// Make deliveries fail until set back.
    pub fn set_offline(&self, offline: bool) {
        *lock(&self.offline) = offline;
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        if *lock(&self.offline) {
            return Err(NotifyError::Delivery("sink offline".to_string()));
        }
        lock(&self.received).push(notification.clone());
        Ok(())
    }
}

/// An in-memory store whose reads or writes can be made to fail per table.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failing_reads: Mutex<HashSet<Table>>,
    failing_writes: Mutex<HashSet<Table>>,
    /// Reads that fail only when filtered on one column value.
    failing_lookups: Mutex<Vec<(Table, String, Value)>>,
    /// Writes still to fail per table before the table works again.
    failing_next_writes: Mutex<HashMap<Table, usize>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, table: Table) {
        lock(&self.failing_reads).insert(table);
    }

    pub fn fail_writes(&self, table: Table) {
        lock(&self.failing_writes).insert(table);
    }

    /// Fail only the next `count` writes to `table`.
    pub fn fail_next_writes(&self, table: Table, count: usize) {
        lock(&self.failing_next_writes).insert(table, count);
    }

    /// Fail reads of `table` whose filter requires `column == value`.
    pub fn fail_reads_where(&self, table: Table, column: &str, value: impl Into<Value>) {
        lock(&self.failing_lookups).push((table, column.to_string(), value.into()));
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        lock(&self.failing_reads).clear();
        lock(&self.failing_writes).clear();
        lock(&self.failing_lookups).clear();
        lock(&self.failing_next_writes).clear();
    }

    /// The wrapped store.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn check(&self, failing: &Mutex<HashSet<Table>>, table: Table) -> Result<(), StoreError> {
        if lock(failing).contains(&table) {
            return Err(StoreError::Backend(format!("injected failure on {table}")));
        }
        Ok(())
    }

    fn check_write(&self, table: Table) -> Result<(), StoreError> {
        self.check(&self.failing_writes, table)?;
        let mut next = lock(&self.failing_next_writes);
        if let Some(remaining) = next.get_mut(&table).filter(|n| **n > 0) {
            *remaining -= 1;
            return Err(StoreError::Backend(format!("injected failure on {table}")));
        }
        Ok(())
    }

    fn check_lookup(&self, table: Table, filter: &Filter) -> Result<(), StoreError> {
        let failing = lock(&self.failing_lookups).iter().any(|(t, column, value)| {
            *t == table
                && filter
                    .conditions()
                    .iter()
                    .any(|c| matches!(c, Condition::Eq(col, v) if col == column && v == value))
        });
        if failing {
            return Err(StoreError::Backend(format!("injected lookup failure on {table}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn read(&self, table: Table, query: &Query) -> Result<Vec<Row>, StoreError> {
        self.check(&self.failing_reads, table)?;
        self.check_lookup(table, &query.filter)?;
        self.inner.read(table, query).await
    }

    async fn patch(&self, table: Table, filter: &Filter, fields: Row) -> Result<usize, StoreError> {
        self.check_write(table)?;
        self.inner.patch(table, filter, fields).await
    }

    async fn insert(&self, table: Table, row: Row) -> Result<(), StoreError> {
        self.check_write(table)?;
        self.inner.insert(table, row).await
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<usize, StoreError> {
        self.check_write(table)?;
        self.inner.delete(table, filter).await
    }
}

/// The time every harness starts at: a Monday morning.
pub fn harness_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// An engine over a flaky in-memory store, a manual clock, a recording sink
/// and a scripted generator.
///
/// Must be created inside a tokio runtime.
pub struct TestHarness {
    pub store: Arc<FlakyStore>,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<RecordingSink>,
    pub generator: Arc<ScriptedGenerator>,
    pub engine: Engine,
}

impl TestHarness {
    /// Create a harness with default config and registry.
    pub fn new() -> Self {
        Self::with_setup(EngineConfig::default(), Registry::default())
    }

    /// Create a harness with a custom config and registry.
    pub fn with_setup(config: EngineConfig, registry: Registry) -> Self {
        let store = Arc::new(FlakyStore::new());
        let clock = Arc::new(ManualClock::new(harness_start()));
        let sink = Arc::new(RecordingSink::new());
        let generator = Arc::new(ScriptedGenerator::default());

        let engine = Engine::builder(store.clone(), generator.clone())
            .with_config(config)
            .with_registry(registry)
            .with_clock(clock.clone())
            .with_sink(sink.clone())
            .build();

        Self {
            store,
            clock,
            sink,
            generator,
            engine,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) -> &Self {
        self.clock.advance(by);
        self
    }

    pub fn records(&self) -> &Records {
        self.engine.records()
    }

    /// Write an entity row directly.
    pub async fn seed_character(&self, state: CharacterState) -> Result<(), StoreError> {
        self.records().save_character(&state).await
    }

    /// Write a relationship row directly.
    pub async fn seed_relationship(&self, rel: RelationshipRecord) -> Result<(), StoreError> {
        self.records().save_relationship(&rel).await
    }

    /// Read an entity row exactly as stored, without recovery.
    pub async fn stored_state(&self, name: &str) -> Option<CharacterState> {
        self.records().character(name).await.ok().flatten()
    }

    /// Read an affinity as stored.
    pub async fn affinity(&self, name: &str, target: &str) -> Option<i32> {
        self.records()
            .relationship(name, target)
            .await
            .ok()
            .flatten()
            .map(|rel| rel.affinity)
    }

    /// Run a turn.
    pub async fn turn(&self, request: TurnRequest) -> TurnOutcome {
        self.engine.take_turn(request).await
    }

    /// Flush the outbox and return everything the sink received.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.engine.flush_notifications().await;
        self.sink.received()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that a turn produced speech and return its report.
#[track_caller]
pub fn assert_spoke(outcome: &TurnOutcome) -> &TurnReport {
    match outcome {
        TurnOutcome::Spoke(report) => report,
        other => panic!("Expected the entity to speak, got {other:?}"),
    }
}

/// Assert that a turn was denied for the given reason.
#[track_caller]
pub fn assert_denied(outcome: &TurnOutcome, expected: fn(&TurnReason) -> bool) {
    match outcome {
        TurnOutcome::Denied(reason) => assert!(
            expected(reason),
            "Turn denied for an unexpected reason: {reason:?}"
        ),
        other => panic!("Expected the turn to be denied, got {other:?}"),
    }
}

/// Assert energy and patience.
#[track_caller]
pub fn assert_resources(state: &CharacterState, energy: i32, patience: i32) {
    assert_eq!(
        (state.energy, state.patience),
        (energy, patience),
        "Expected energy/patience {energy}/{patience}, got {}/{}",
        state.energy,
        state.patience
    );
}

/// Assert where an entity is.
#[track_caller]
pub fn assert_location(state: &CharacterState, location: Location) {
    assert_eq!(
        state.location,
        Some(location),
        "Expected {} to be at {location}",
        state.name
    );
}

/// Assert that resource stats are within bounds.
#[track_caller]
pub fn assert_within_bounds(state: &CharacterState) {
    assert!(
        (0..=100).contains(&state.energy) && (0..=100).contains(&state.patience),
        "Resources out of bounds: energy {}, patience {}",
        state.energy,
        state.patience
    );
}
