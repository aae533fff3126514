//! Outbound notifications.
//!
//! Components never call the sink directly. They hand a [`Notification`] to the
//! [`Outbox`], which returns immediately; a dispatcher task records each event
//! under an idempotency key in the `outbox` table and then delivers it.
//!
//! Delivery is at-least-once: an entry stays `pending` until the sink accepts
//! it, and [`Outbox::redeliver_pending`] retries whatever is left. Keys carry
//! the moment the event happened, so only a repeat of the same occurrence is
//! dropped. Delivered entries from earlier days are pruned as the day turns.

use crate::clock::Clock;
use crate::error::{NotifyError, StoreError};
use crate::store::{
    from_row, timestamp, to_row, Filter, Location, Query, Records, Row, Table,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Why an entity changed location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelocationReason {
    /// Ran out of energy on the main floor.
    Exhaustion,
    /// Moved by an administrative override.
    Directed,
}

/// What moved an affinity value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftCause {
    Event,
    Decay,
}

impl ShiftCause {
    fn as_str(&self) -> &'static str {
        match self {
            ShiftCause::Event => "event",
            ShiftCause::Decay => "decay",
        }
    }
}

/// An event published to the notification sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Relocated {
        character: String,
        from: Option<Location>,
        to: Location,
        reason: RelocationReason,
    },
    ReturnedFromAbsence {
        character: String,
        /// The entity being told about the return.
        recipient: String,
        away_hours: i64,
    },
    RelationshipShifted {
        character: String,
        target: String,
        delta: i32,
        affinity: i32,
        cause: ShiftCause,
    },
}

impl Notification {
    /// The entity the event is about.
    pub fn character(&self) -> &str {
        match self {
            Notification::Relocated { character, .. }
            | Notification::ReturnedFromAbsence { character, .. }
            | Notification::RelationshipShifted { character, .. } => character,
        }
    }

    /// Event type name.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Relocated { .. } => "relocated",
            Notification::ReturnedFromAbsence { .. } => "returned_from_absence",
            Notification::RelationshipShifted { .. } => "relationship_shifted",
        }
    }

    /// Key identifying one occurrence of this event: entity, type, calendar
    /// day, subject, then the time of day it happened.
    pub fn idempotency_key(&self, occurred_at: DateTime<Utc>) -> String {
        let base = format!(
            "{}:{}:{}",
            self.kind(),
            self.character(),
            occurred_at.date_naive()
        );
        let subject = match self {
            Notification::Relocated { to, .. } => {
                format!("{base}:{}", to.name().replace(' ', "_"))
            }
            Notification::ReturnedFromAbsence { recipient, .. } => format!("{base}:{recipient}"),
            Notification::RelationshipShifted { target, cause, .. } => {
                format!("{base}:{target}:{}", cause.as_str())
            }
        };
        format!("{subject}@{}", occurred_at.format("%H%M%S%.6f"))
    }
}

/// Receives notifications. Implementations format and route them.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// A sink that writes every notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            kind = notification.kind(),
            character = notification.character(),
            ?notification,
            "Notification"
        );
        Ok(())
    }
}

/// Delivery state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
}

/// One row of the `outbox` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub key: String,
    pub notification: Notification,
    pub status: DeliveryStatus,
    /// When the event happened. Part of the key.
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
}

enum Command {
    Deliver { entry: OutboxEntry, retry: bool },
    Flush(oneshot::Sender<()>),
}

/// Handle to the notification queue. Cheap to clone.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Command>,
    records: Records,
    clock: Arc<dyn Clock>,
}

impl Outbox {
    /// Start a dispatcher task and return a handle to it.
    ///
    /// Must be called from within a tokio runtime. The task stops once every
    /// handle has been dropped.
    pub fn spawn(
        records: Records,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        delivery_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            records: records.clone(),
            sink,
            clock: clock.clone(),
            delivery_timeout,
            pruned_through: None,
        };
        let handle = tokio::spawn(dispatcher.run(rx));
        (Self { tx, records, clock }, handle)
    }

    /// Queue a notification. Never blocks and never fails the caller.
    pub fn emit(&self, notification: Notification) {
        let now = self.clock.now();
        let entry = OutboxEntry {
            key: notification.idempotency_key(now),
            notification,
            status: DeliveryStatus::Pending,
            queued_at: now,
            delivered_at: None,
        };
        tracing::debug!(key = %entry.key, "Queued notification");
        if self
            .tx
            .send(Command::Deliver {
                entry,
                retry: false,
            })
            .is_err()
        {
            tracing::warn!("Notification dispatcher has stopped, dropping event");
        }
    }

    /// Wait until everything queued so far has been handled.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Re-queue every entry the sink has not yet accepted.
    pub async fn redeliver_pending(&self) -> Result<usize, StoreError> {
        let rows = self
            .records
            .store()
            .read(
                Table::Outbox,
                &Query::filtered(Filter::new().eq("status", "pending")).order_asc("queued_at"),
            )
            .await?;

        let mut queued = 0;
        for row in rows {
            let entry: OutboxEntry = from_row(row)?;
            if self
                .tx
                .send(Command::Deliver { entry, retry: true })
                .is_ok()
            {
                queued += 1;
            }
        }
        if queued > 0 {
            tracing::info!(queued, "Redelivering pending notifications");
        }
        Ok(queued)
    }

    /// Delete delivered entries queued before `before`. Pending entries stay.
    pub async fn prune_delivered(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        prune_delivered(&self.records, before).await
    }
}

async fn prune_delivered(records: &Records, before: DateTime<Utc>) -> Result<usize, StoreError> {
    let removed = records
        .store()
        .delete(
            Table::Outbox,
            &Filter::new()
                .eq("status", "delivered")
                .lt("queued_at", timestamp(before)),
        )
        .await?;
    if removed > 0 {
        tracing::debug!(removed, "Pruned delivered notifications");
    }
    Ok(removed)
}

struct Dispatcher {
    records: Records,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    delivery_timeout: Duration,
    /// Day whose predecessors have already been pruned.
    pruned_through: Option<NaiveDate>,
}

impl Dispatcher {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Deliver { entry, retry } => {
                    self.handle(entry, retry).await;
                    self.prune_on_new_day().await;
                }
                Command::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("Notification dispatcher stopped");
    }

    async fn handle(&self, entry: OutboxEntry, retry: bool) {
        if !retry {
            match self.existing(&entry.key).await {
                Ok(Some(status)) => {
                    tracing::debug!(key = %entry.key, ?status, "Duplicate notification dropped");
                    return;
                }
                Ok(None) => {}
                // Without the dedupe read the event is still worth sending.
                Err(e) => tracing::warn!(key = %entry.key, error = %e, "Outbox lookup failed"),
            }

            let recorded = to_row(Table::Outbox, &entry);
            let inserted = match recorded {
                Ok(row) => self.records.store().insert(Table::Outbox, row).await,
                Err(e) => Err(e),
            };
            if let Err(e) = inserted {
                tracing::warn!(key = %entry.key, error = %e, "Failed to record outbox entry");
            }
        }

        let delivery = tokio::time::timeout(
            self.delivery_timeout,
            self.sink.deliver(&entry.notification),
        )
        .await
        .unwrap_or(Err(NotifyError::Timeout(self.delivery_timeout)));

        match delivery {
            Ok(()) => self.mark_delivered(&entry.key).await,
            Err(e) => {
                tracing::warn!(key = %entry.key, error = %e, "Notification delivery failed");
            }
        }
    }

    async fn prune_on_new_day(&mut self) {
        let now = self.clock.now();
        let today = now.date_naive();
        if self.pruned_through == Some(today) {
            return;
        }
        let midnight = today.and_time(NaiveTime::MIN).and_utc();
        match prune_delivered(&self.records, midnight).await {
            Ok(_) => self.pruned_through = Some(today),
            Err(e) => tracing::warn!(error = %e, "Failed to prune outbox"),
        }
    }

    async fn existing(&self, key: &str) -> Result<Option<DeliveryStatus>, StoreError> {
        let rows = self
            .records
            .store()
            .read(
                Table::Outbox,
                &Query::filtered(Filter::new().eq("key", key))
                    .select(&["status"])
                    .limit(1),
            )
            .await?;

        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.get("status").cloned())
            .and_then(|status| serde_json::from_value(status).ok()))
    }

    async fn mark_delivered(&self, key: &str) {
        let mut fields = Row::new();
        fields.insert("status".to_string(), Value::from("delivered"));
        fields.insert("delivered_at".to_string(), timestamp(self.clock.now()));

        if let Err(e) = self
            .records
            .store()
            .patch(Table::Outbox, &Filter::new().eq("key", key), fields)
            .await
        {
            tracing::warn!(key, error = %e, "Failed to mark notification delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        seen: Mutex<Vec<Notification>>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl NotificationSink for CollectingSink {
        async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
            if *self.fail.lock().unwrap() {
                return Err(NotifyError::Delivery("sink offline".to_string()));
            }
            self.seen.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn exhausted(name: &str) -> Notification {
        Notification::Relocated {
            character: name.to_string(),
            from: Some(Location::MainFloor),
            to: Location::RestArea,
            reason: RelocationReason::Exhaustion,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    struct Setup {
        outbox: Outbox,
        sink: Arc<CollectingSink>,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn setup() -> Setup {
        let store = Arc::new(InMemoryStore::new());
        let sink = Arc::new(CollectingSink::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let (outbox, _handle) = Outbox::spawn(
            Records::new(store.clone()),
            sink.clone(),
            clock.clone(),
            Duration::from_secs(5),
        );
        Setup {
            outbox,
            sink,
            store,
            clock,
        }
    }

    #[test]
    fn test_idempotency_key() {
        assert_eq!(
            exhausted("ada").idempotency_key(t0()),
            "relocated:ada:2026-03-02:rest_area@090000.000000"
        );
        let later = t0() + chrono::Duration::milliseconds(1500);
        assert_ne!(
            exhausted("ada").idempotency_key(t0()),
            exhausted("ada").idempotency_key(later)
        );
    }

    #[test]
    fn test_notification_serializes_with_kind_tag() {
        let value = serde_json::to_value(exhausted("ada")).unwrap();
        assert_eq!(value["kind"], "relocated");
        assert_eq!(value["to"], "rest_area");
    }

    #[tokio::test]
    async fn test_duplicate_dropped() {
        let Setup {
            outbox,
            sink,
            store,
            ..
        } = setup();
        outbox.emit(exhausted("ada"));
        outbox.emit(exhausted("ada"));
        outbox.emit(exhausted("bo"));
        outbox.flush().await;

        assert_eq!(sink.seen.lock().unwrap().len(), 2);
        assert_eq!(store.row_count(Table::Outbox).await, 2);
    }

    #[tokio::test]
    async fn test_repeat_occurrence_is_delivered() {
        let Setup {
            outbox,
            sink,
            clock,
            ..
        } = setup();
        outbox.emit(exhausted("ada"));
        clock.advance(chrono::Duration::hours(3));
        outbox.emit(exhausted("ada"));
        outbox.flush().await;

        assert_eq!(sink.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_delivery_stays_pending_until_redelivered() {
        let Setup { outbox, sink, .. } = setup();
        *sink.fail.lock().unwrap() = true;
        outbox.emit(exhausted("ada"));
        outbox.flush().await;
        assert!(sink.seen.lock().unwrap().is_empty());

        *sink.fail.lock().unwrap() = false;
        assert_eq!(outbox.redeliver_pending().await.unwrap(), 1);
        outbox.flush().await;
        assert_eq!(sink.seen.lock().unwrap().len(), 1);

        // Nothing left once delivered.
        assert_eq!(outbox.redeliver_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delivered_entries_pruned_on_new_day() {
        let Setup {
            outbox,
            sink,
            store,
            clock,
        } = setup();
        outbox.emit(exhausted("ada"));
        outbox.flush().await;
        *sink.fail.lock().unwrap() = true;
        outbox.emit(exhausted("bo"));
        outbox.flush().await;
        assert_eq!(store.row_count(Table::Outbox).await, 2);

        *sink.fail.lock().unwrap() = false;
        clock.advance(chrono::Duration::days(1));
        outbox.emit(exhausted("cy"));
        outbox.flush().await;

        // ada's entry is gone, bo's is still pending, cy's is today's.
        assert_eq!(store.row_count(Table::Outbox).await, 2);
        assert_eq!(outbox.redeliver_pending().await.unwrap(), 1);
        outbox.flush().await;

        // bo's entry from yesterday is now delivered; cy's was queued just now.
        assert_eq!(outbox.prune_delivered(clock.now()).await.unwrap(), 1);
        assert_eq!(store.row_count(Table::Outbox).await, 1);
    }
}
