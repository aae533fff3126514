//! QA tests for the full turn pipeline.
//!
//! These tests drive `Engine::take_turn` end to end over an in-memory store,
//! including fallback generation and partial commits.
//! Run with: `cargo test -p troupe-core --test qa_engine`

use chrono::Duration;
use std::sync::Arc;
use troupe_core::registry::CharacterProfile;
use troupe_core::store::{CharacterState, RelationshipRecord};
use troupe_core::testing::{assert_denied, assert_spoke, harness_start, ScriptedReply, TestHarness};
use troupe_core::{
    Clock, Engine, EngineConfig, InMemoryStore, ManualClock, Registry, ScriptedGenerator, Table,
    TurnOutcome, TurnReason, TurnRequest,
};

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_full_turn_commits_everything() {
    let harness = TestHarness::new();
    harness.generator.queue_text("Thanks for the donuts, bo!");

    let outcome = harness
        .turn(
            TurnRequest::new("ada", "bo brought donuts")
                .addressed()
                .remember("bo brought donuts on Monday", 6)
                .affect("bo", 3, "donuts"),
        )
        .await;
    let report = assert_spoke(&outcome);

    assert_eq!(report.text, "Thanks for the donuts, bo!");
    assert!(!report.fell_back);

    let state = report.state.as_ref().expect("state should be written");
    assert_eq!(state.energy, 98);
    assert_eq!(state.last_spoke_at, Some(harness.now()));
    assert_eq!(state.interactions_today, 1);

    let memory = report.memory.as_ref().expect("memory should be stored");
    assert_eq!(memory.importance, 6);
    assert_eq!(report.deltas.len(), 1);
    assert_eq!(report.deltas[0].applied, 3);
    assert_eq!(harness.affinity("ada", "bo").await, Some(3));

    let actions = harness.records().recent_actions(5).await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].character, "ada");
}

#[tokio::test]
async fn test_context_carries_state_memories_and_relationships() {
    let harness = TestHarness::new();
    harness
        .engine
        .memory()
        .record_core("ada", "allergic to cats", 8)
        .await
        .unwrap();
    harness
        .engine
        .memory()
        .record("ada", "the printer is jammed again", 5)
        .await
        .unwrap();
    harness
        .seed_relationship(RelationshipRecord::new("ada", "bo").with_affinity(40))
        .await
        .unwrap();

    assert_spoke(&harness.turn(TurnRequest::new("ada", "Who fixed the printer?")).await);

    let calls = harness.generator.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.identity, "ada");
    assert_eq!(call.context.prompt, "Who fixed the printer?");
    assert_eq!(call.context.memories.pinned.len(), 1);
    assert_eq!(call.context.memories.working.len(), 1);
    assert_eq!(call.context.relationships.len(), 1);

    let rendered = call.context.render();
    assert!(rendered.contains("## Core Memories"));
    assert!(rendered.contains("allergic to cats"));
    assert!(rendered.contains("printer is jammed"));
}

#[tokio::test]
async fn test_constraints_follow_registration() {
    let registry = Registry::new().with_profile(
        "ada",
        CharacterProfile::new()
            .with_max_tokens(80)
            .with_generation_timeout(std::time::Duration::from_secs(10)),
    );
    let harness = TestHarness::with_setup(EngineConfig::default(), registry);

    assert_spoke(&harness.turn(TurnRequest::new("ada", "hi")).await);
    assert_spoke(&harness.turn(TurnRequest::new("bo", "hi").addressed()).await);

    let calls = harness.generator.calls();
    assert_eq!(calls[0].constraints.max_tokens, 80);
    assert_eq!(calls[0].constraints.timeout, std::time::Duration::from_secs(10));

    let defaults = &harness.engine.config().generation;
    assert_eq!(calls[1].constraints.max_tokens, defaults.max_tokens);
    assert_eq!(calls[1].constraints.timeout, defaults.timeout);
}

// =============================================================================
// Generation fallback
// =============================================================================

#[tokio::test]
async fn test_generation_failure_falls_back_and_still_commits() {
    let registry = Registry::new().with_profile(
        "ada",
        CharacterProfile::new().with_fallback_line("Ada shrugs and sips her tea."),
    );
    let harness = TestHarness::with_setup(EngineConfig::default(), registry);
    harness
        .generator
        .queue(ScriptedReply::Fail("overloaded".to_string()));

    let outcome = harness
        .turn(
            TurnRequest::new("ada", "Thoughts on the reorg?")
                .remember("asked about the reorg", 7)
                .affect("bo", -2, "brought up the reorg"),
        )
        .await;
    let report = assert_spoke(&outcome);

    assert!(report.fell_back);
    assert_eq!(report.text, "Ada shrugs and sips her tea.");
    assert!(report.memory.is_none());
    assert_eq!(report.deltas.len(), 1);
    assert_eq!(harness.affinity("ada", "bo").await, Some(-2));

    let state = harness.stored_state("ada").await.unwrap();
    assert_eq!(state.last_spoke_at, Some(harness.now()));
    assert!(harness
        .engine
        .memory()
        .retrieve("ada", None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_blank_generation_falls_back() {
    let harness = TestHarness::new();
    harness.generator.queue_text("   \n");

    let outcome = harness.turn(TurnRequest::new("bo", "hello?")).await;
    let report = assert_spoke(&outcome);
    assert!(report.fell_back);
    assert_eq!(report.text, "bo pauses, lost in thought.");
}

#[tokio::test(start_paused = true)]
async fn test_hanging_generation_times_out() {
    let registry = Registry::new().with_profile(
        "ada",
        CharacterProfile::new().with_generation_timeout(std::time::Duration::from_secs(8)),
    );
    let harness = TestHarness::with_setup(EngineConfig::default(), registry);
    harness.generator.queue(ScriptedReply::Hang);

    let started = tokio::time::Instant::now();
    let outcome = harness.turn(TurnRequest::new("ada", "Still there?")).await;
    let elapsed = started.elapsed();

    let report = assert_spoke(&outcome);
    assert!(report.fell_back);
    assert!(elapsed >= std::time::Duration::from_secs(8));
    assert!(elapsed < std::time::Duration::from_secs(9));
}

#[tokio::test(start_paused = true)]
async fn test_slow_generation_inside_deadline_is_kept() {
    let harness = TestHarness::new();
    harness.generator.queue(ScriptedReply::Delay(
        std::time::Duration::from_secs(5),
        "Sorry, was typing.".to_string(),
    ));

    let outcome = harness.turn(TurnRequest::new("ada", "Ada?")).await;
    let report = assert_spoke(&outcome);
    assert!(!report.fell_back);
    assert_eq!(report.text, "Sorry, was typing.");
}

// =============================================================================
// Store failures
// =============================================================================

#[tokio::test]
async fn test_unreadable_action_log_skips_turn() {
    let harness = TestHarness::new();
    harness.store.fail_reads(Table::Actions);

    let outcome = harness.turn(TurnRequest::new("ada", "hi").addressed()).await;
    assert!(matches!(outcome, TurnOutcome::Skipped { .. }));
    assert_eq!(harness.generator.call_count(), 0);
    assert!(harness.stored_state("ada").await.is_none());
}

#[tokio::test]
async fn test_memory_write_failure_is_swallowed() {
    let harness = TestHarness::new();
    harness.store.fail_writes(Table::Memories);

    let outcome = harness
        .turn(TurnRequest::new("ada", "hi").remember("said hi", 2))
        .await;
    let report = assert_spoke(&outcome);
    assert!(!report.fell_back);
    assert!(report.memory.is_none());
    assert!(report.state.is_some());
    assert_eq!(harness.records().recent_actions(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_state_write_failure_still_logs_action() {
    let harness = TestHarness::new();
    harness.store.fail_writes(Table::Characters);

    let outcome = harness
        .turn(TurnRequest::new("ada", "hi").affect("bo", 1, "waved"))
        .await;
    let report = assert_spoke(&outcome);
    assert!(report.state.is_none());
    assert_eq!(report.deltas.len(), 1);
    assert_eq!(harness.records().recent_actions(1).await.unwrap().len(), 1);
}

// =============================================================================
// Denial
// =============================================================================

#[tokio::test]
async fn test_denied_turn_writes_nothing() {
    let harness = TestHarness::new();
    let now = harness.now();
    harness
        .seed_character(
            CharacterState::new("ada", now)
                .with_energy(50)
                .with_last_spoke_at(now - Duration::seconds(10)),
        )
        .await
        .unwrap();

    let outcome = harness
        .turn(
            TurnRequest::new("ada", "hi")
                .addressed()
                .remember("should not be stored", 9)
                .affect("bo", 5, "should not apply"),
        )
        .await;
    assert_denied(&outcome, |r| matches!(r, TurnReason::EntityCooldown { .. }));

    assert_eq!(harness.generator.call_count(), 0);
    assert_eq!(harness.stored_state("ada").await.unwrap().energy, 50);
    assert_eq!(harness.affinity("ada", "bo").await, None);
    assert!(harness.records().recent_actions(5).await.unwrap().is_empty());
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_state_survives_snapshot_reload() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("troupe.json");
    let clock = Arc::new(ManualClock::new(harness_start()));

    let store = Arc::new(InMemoryStore::new());
    let engine = Engine::builder(store.clone(), Arc::new(ScriptedGenerator::default()))
        .with_clock(clock.clone())
        .build();
    assert_spoke(
        &engine
            .take_turn(TurnRequest::new("ada", "hi").remember("first day", 8))
            .await,
    );
    store
        .save_json(&path, clock.now())
        .await
        .expect("Failed to save snapshot");

    let restored = Arc::new(
        InMemoryStore::load_json(&path)
            .await
            .expect("Failed to load snapshot"),
    );
    let engine = Engine::builder(restored, Arc::new(ScriptedGenerator::default()))
        .with_clock(clock.clone())
        .build();

    clock.advance(Duration::seconds(30));
    let decision = engine.turns().may_act("ada", true).await.unwrap();
    assert!(!decision.allowed);

    let memories = engine.memory().retrieve("ada", None).await.unwrap();
    assert_eq!(memories.len(), 1);
}
