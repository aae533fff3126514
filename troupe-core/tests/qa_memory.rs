//! QA tests for tiered memory.
//!
//! These tests verify importance-based retention, the bounded working set and
//! pinning.
//! Run with: `cargo test -p troupe-core --test qa_memory`

use chrono::Duration;
use troupe_core::testing::TestHarness;

fn contents(memories: &troupe_core::RetrievedMemories) -> Vec<String> {
    memories.iter().map(|m| m.content.clone()).collect()
}

// =============================================================================
// Retention
// =============================================================================

#[tokio::test]
async fn test_low_importance_expires_within_hours() {
    let harness = TestHarness::new();
    let memory = harness.engine.memory();
    memory.record("ada", "bo spilled coffee", 3).await.unwrap();

    harness.advance(Duration::minutes(30));
    let half_hour = memory.retrieve("ada", None).await.unwrap();
    assert_eq!(contents(&half_hour), vec!["bo spilled coffee"]);

    harness.advance(Duration::minutes(90));
    let two_hours = memory.retrieve("ada", None).await.unwrap();
    assert!(two_hours.is_empty());
}

#[tokio::test]
async fn test_high_importance_lasts_weeks() {
    let harness = TestHarness::new();
    let memory = harness.engine.memory();
    memory
        .record("ada", "got promoted to team lead", 9)
        .await
        .unwrap();

    harness.advance(Duration::days(20));
    let later = memory.retrieve("ada", None).await.unwrap();
    assert_eq!(contents(&later), vec!["got promoted to team lead"]);

    harness.advance(Duration::days(11));
    assert!(memory.retrieve("ada", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_rows_are_kept() {
    let harness = TestHarness::new();
    let memory = harness.engine.memory();
    memory.record("ada", "small talk", 1).await.unwrap();

    harness.advance(Duration::days(1));
    assert!(memory.retrieve("ada", None).await.unwrap().is_empty());
    assert_eq!(
        harness
            .store
            .inner()
            .row_count(troupe_core::Table::Memories)
            .await,
        1
    );
}

#[tokio::test]
async fn test_importance_is_clamped() {
    let harness = TestHarness::new();
    let memory = harness.engine.memory();
    let low = memory.record("ada", "nothing much", 0).await.unwrap();
    let high = memory.record("ada", "everything", 42).await.unwrap();
    assert_eq!(low.importance, 1);
    assert_eq!(high.importance, 10);
}

// =============================================================================
// Working set
// =============================================================================

#[tokio::test]
async fn test_working_set_is_bounded_and_core_is_complete() {
    let harness = TestHarness::new();
    let memory = harness.engine.memory();

    for i in 0..15u8 {
        memory
            .record("ada", &format!("working memory {i}"), 1 + i % 10)
            .await
            .unwrap();
        harness.advance(Duration::minutes(1));
    }
    for content in ["grew up by the sea", "afraid of heights", "loves jazz"] {
        memory.record_core("ada", content, 8).await.unwrap();
    }
    memory.record("bo", "not ada's memory", 10).await.unwrap();

    let retrieved = memory.retrieve("ada", None).await.unwrap();
    assert_eq!(retrieved.pinned.len(), 3);
    assert_eq!(retrieved.working.len(), troupe_core::memory::MAX_WORKING);
    assert!(retrieved.iter().all(|m| m.character == "ada"));
    assert!(retrieved.working.iter().all(|m| !m.is_pinned));
}

#[tokio::test]
async fn test_core_memories_never_expire() {
    let harness = TestHarness::new();
    let memory = harness.engine.memory();
    memory.record_core("ada", "has a twin sister", 2).await.unwrap();

    harness.advance(Duration::days(400));
    let retrieved = memory.retrieve("ada", None).await.unwrap();
    assert_eq!(retrieved.pinned.len(), 1);
    assert_eq!(retrieved.pinned[0].content, "has a twin sister");
}

#[tokio::test]
async fn test_keyword_hint_reaches_older_memories() {
    let harness = TestHarness::new();
    let memory = harness.engine.memory();
    memory
        .record("ada", "bo keeps a bonsai on the windowsill", 7)
        .await
        .unwrap();
    harness.advance(Duration::days(2));
    memory.record("ada", "lunch was fine", 3).await.unwrap();

    let plain = memory.retrieve("ada", None).await.unwrap();
    assert_eq!(contents(&plain), vec!["bo keeps a bonsai on the windowsill", "lunch was fine"]);

    let hinted = memory
        .retrieve("ada", Some("How is the bonsai doing?"))
        .await
        .unwrap();
    assert!(contents(&hinted).contains(&"bo keeps a bonsai on the windowsill".to_string()));
}

// =============================================================================
// Pinning
// =============================================================================

#[tokio::test]
async fn test_pin_keeps_memory_past_retention() {
    let harness = TestHarness::new();
    let memory = harness.engine.memory();
    let record = memory.record("ada", "bo covered my shift", 4).await.unwrap();

    assert!(memory.pin(record.id).await.unwrap());
    harness.advance(Duration::hours(6));
    let retrieved = memory.retrieve("ada", None).await.unwrap();
    assert_eq!(retrieved.pinned.len(), 1);
    assert!(retrieved.working.is_empty());

    assert!(memory.unpin(record.id).await.unwrap());
    let unpinned = memory.retrieve("ada", None).await.unwrap();
    assert!(unpinned.pinned.is_empty());
    assert_eq!(unpinned.working.len(), 1);

    harness.advance(Duration::hours(2));
    assert!(memory.retrieve("ada", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pin_refuses_expired_memory() {
    let harness = TestHarness::new();
    let memory = harness.engine.memory();
    let record = memory.record("ada", "forgettable", 2).await.unwrap();

    harness.advance(Duration::hours(2));
    assert!(!memory.pin(record.id).await.unwrap());
    assert!(!memory.unpin(record.id).await.unwrap());
    assert!(memory.retrieve("ada", None).await.unwrap().is_empty());
}
