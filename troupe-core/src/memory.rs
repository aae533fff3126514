//! Tiered memory.
//!
//! Each entity keeps two tiers of textual memories:
//! - **Core** memories are pinned. They never expire and are part of every
//!   context read.
//! - **Working** memories expire after a retention that grows with importance.
//!   Expired rows are never deleted, reads simply stop returning them.
//!
//! [`MemoryStore::retrieve`] assembles a bounded working set from important,
//! recent and keyword-matching memories.

use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::{timestamp, Filter, MemoryId, MemoryRecord, Query, Records, Row};
use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Most working memories a retrieval returns.
pub const MAX_WORKING: usize = 8;

/// Importance at which a memory counts as important.
const IMPORTANT: u8 = 5;
const MAX_IMPORTANT: usize = 5;
const MAX_RECENT: usize = 4;
const RECENT_WINDOW_HOURS: i64 = 24;
const FRESH_BONUS: i32 = 3;
const MIN_KEYWORD_LEN: usize = 4;

lazy_static! {
    /// Words too common to say anything about relevance.
    static ref STOP_WORDS: HashSet<&'static str> = [
        "about", "after", "again", "also", "been", "before", "being", "could", "does", "doing",
        "down", "each", "even", "from", "have", "having", "here", "into", "just", "like", "made",
        "make", "more", "most", "much", "only", "other", "over", "really", "said", "same",
        "should", "some", "such", "than", "that", "their", "them", "then", "there", "these",
        "they", "this", "those", "through", "very", "want", "were", "what", "when", "where",
        "which", "while", "will", "with", "would", "your",
    ]
    .into_iter()
    .collect();
}

/// How long a working memory of the given importance is kept.
pub fn retention_for(importance: u8) -> Duration {
    match importance {
        0..=4 => Duration::hours(1),
        5..=6 => Duration::hours(24),
        7..=8 => Duration::days(7),
        _ => Duration::days(30),
    }
}

/// Clamp an importance to 1..=10.
pub fn clamp_importance(importance: u8) -> u8 {
    importance.clamp(1, 10)
}

/// Lower-cased words of a hint worth matching on.
pub fn keywords(hint: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    hint.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|word| word.chars().count() >= MIN_KEYWORD_LEN)
        .filter(|word| !STOP_WORDS.contains(word.as_str()))
        .filter(|word| seen.insert(word.clone()))
        .collect()
}

/// Memories assembled for one context read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedMemories {
    /// Every pinned memory, newest first.
    pub pinned: Vec<MemoryRecord>,
    /// At most [`MAX_WORKING`] working memories, most relevant first.
    pub working: Vec<MemoryRecord>,
}

impl RetrievedMemories {
    pub fn len(&self) -> usize {
        self.pinned.len() + self.working.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pinned then working.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryRecord> {
        self.pinned.iter().chain(self.working.iter())
    }
}

/// Writes and ranks memories.
#[derive(Clone)]
pub struct MemoryStore {
    records: Records,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(records: Records, clock: Arc<dyn Clock>) -> Self {
        Self { records, clock }
    }

    /// Store a working memory.
    pub async fn record(
        &self,
        name: &str,
        content: &str,
        importance: u8,
    ) -> Result<MemoryRecord, StoreError> {
        let now = self.clock.now();
        let importance = clamp_importance(importance);
        let memory = MemoryRecord {
            id: MemoryId::new(),
            character: name.to_string(),
            content: content.to_string(),
            importance,
            is_pinned: false,
            created_at: now,
            expires_at: Some(now + retention_for(importance)),
        };
        self.records.insert_memory(&memory).await?;
        tracing::debug!(name, importance, id = %memory.id, "Recorded memory");
        Ok(memory)
    }

    /// Store a pinned core memory.
    pub async fn record_core(
        &self,
        name: &str,
        content: &str,
        importance: u8,
    ) -> Result<MemoryRecord, StoreError> {
        let memory = MemoryRecord {
            id: MemoryId::new(),
            character: name.to_string(),
            content: content.to_string(),
            importance: clamp_importance(importance),
            is_pinned: true,
            created_at: self.clock.now(),
            expires_at: None,
        };
        self.records.insert_memory(&memory).await?;
        tracing::debug!(name, id = %memory.id, "Recorded core memory");
        Ok(memory)
    }

    /// Promote a live memory to core. Returns false if it is gone.
    pub async fn pin(&self, id: MemoryId) -> Result<bool, StoreError> {
        let Some(memory) = self.records.memory(id).await? else {
            return Ok(false);
        };
        if !memory.is_live(self.clock.now()) {
            return Ok(false);
        }

        let mut fields = Row::new();
        fields.insert("is_pinned".to_string(), Value::Bool(true));
        fields.insert("expires_at".to_string(), Value::Null);
        Ok(self.records.patch_memory(id, fields).await? > 0)
    }

    /// Demote a core memory back to working, starting a fresh retention.
    pub async fn unpin(&self, id: MemoryId) -> Result<bool, StoreError> {
        let Some(memory) = self.records.memory(id).await? else {
            return Ok(false);
        };
        if !memory.is_pinned {
            return Ok(false);
        }

        let mut fields = Row::new();
        fields.insert("is_pinned".to_string(), Value::Bool(false));
        if memory.expires_at.is_none() {
            let expires_at = self.clock.now() + retention_for(memory.importance);
            fields.insert("expires_at".to_string(), timestamp(expires_at));
        }
        Ok(self.records.patch_memory(id, fields).await? > 0)
    }

    /// Assemble the memories relevant to a new turn.
    pub async fn retrieve(
        &self,
        name: &str,
        hint: Option<&str>,
    ) -> Result<RetrievedMemories, StoreError> {
        let now = self.clock.now();

        let pinned = self
            .records
            .memories(
                &Query::filtered(
                    Filter::new()
                        .eq("character", name)
                        .eq("is_pinned", true),
                )
                .order_desc("created_at"),
            )
            .await?;

        let live = self
            .records
            .memories(
                &Query::filtered(
                    Filter::new()
                        .eq("character", name)
                        .eq("is_pinned", false)
                        .gt("expires_at", timestamp(now)),
                )
                .order_desc("importance")
                .order_desc("created_at"),
            )
            .await?;

        let working = select_working(live, hint, now);
        Ok(RetrievedMemories { pinned, working })
    }
}

/// Pick and rank working memories from the live, non-pinned set.
///
/// `live` must be ordered by importance then recency, both descending.
fn select_working(
    live: Vec<MemoryRecord>,
    hint: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<MemoryRecord> {
    let mut chosen: Vec<MemoryRecord> = Vec::with_capacity(MAX_WORKING);
    let mut taken: HashSet<MemoryId> = HashSet::new();

    for memory in live.iter().filter(|m| m.importance >= IMPORTANT).take(MAX_IMPORTANT) {
        taken.insert(memory.id);
        chosen.push(memory.clone());
    }

    let since = now - Duration::hours(RECENT_WINDOW_HOURS);
    let mut recent: Vec<&MemoryRecord> = live
        .iter()
        .filter(|m| m.created_at >= since && !taken.contains(&m.id))
        .collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    for memory in recent.into_iter().take(MAX_RECENT) {
        taken.insert(memory.id);
        chosen.push(memory.clone());
    }

    let words = hint.map(keywords).unwrap_or_default();
    if !words.is_empty() {
        for memory in &live {
            if chosen.len() >= MAX_WORKING {
                break;
            }
            if taken.contains(&memory.id) {
                continue;
            }
            let content = memory.content.to_lowercase();
            if words.iter().any(|word| content.contains(word.as_str())) {
                taken.insert(memory.id);
                chosen.push(memory.clone());
            }
        }
    }

    let fresh_since = now - Duration::hours(1);
    let score = |m: &MemoryRecord| {
        i32::from(m.importance) + if m.created_at >= fresh_since { FRESH_BONUS } else { 0 }
    };
    chosen.sort_by(|a, b| {
        score(b)
            .cmp(&score(a))
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    chosen.truncate(MAX_WORKING);
    chosen
}
