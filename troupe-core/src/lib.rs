//! Character state coordination engine.
//!
//! This crate provides:
//! - Turn coordination with global and per-entity cooldowns
//! - Location-driven energy/patience transitions with lazy recovery
//! - Tiered memory with importance-based retention
//! - Directional affinity with capped periodic decay
//! - A turn pipeline that degrades to fallback text instead of failing
//!
//! All state lives in a shared row store. Invocations never share process
//! memory and coordinate optimistically: rare duplicate actions are possible,
//! out-of-range values are not.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use troupe_core::{AnthropicGenerator, Engine, InMemoryStore, TurnRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryStore::new());
//!     let generator = Arc::new(AnthropicGenerator::from_env()?);
//!     let engine = Engine::builder(store, generator).build();
//!
//!     let outcome = engine
//!         .take_turn(TurnRequest::new("ada", "Morning, everyone!").addressed())
//!         .await;
//!     if let Some(report) = outcome.report() {
//!         println!("{}", report.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod decay;
pub mod engine;
pub mod error;
pub mod generation;
pub mod memory;
pub mod notify;
pub mod registry;
pub mod relationship;
pub mod resources;
pub mod store;
pub mod testing;
pub mod turn;

// Primary public API
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DecayConfig, EngineConfig, GenerationConfig};
pub use decay::{DecayInputs, DecayReport, DecayScheduler};
pub use engine::{Engine, EngineBuilder, TurnOutcome, TurnReport, TurnRequest};
pub use error::{ConfigError, EngineError, GenerationError, NotifyError, StoreError};
pub use generation::{AnthropicGenerator, Constraints, GenerationContext, Generator};
pub use memory::{MemoryStore, RetrievedMemories};
pub use notify::{Notification, NotificationSink, Outbox, TracingSink};
pub use registry::{CharacterProfile, Registry};
pub use relationship::{DeltaOutcome, RelationshipLedger};
pub use resources::{ActionOutcome, ResourceStateMachine};
pub use store::{CharacterState, InMemoryStore, Location, Records, Store, Table};
pub use testing::{ScriptedGenerator, TestHarness};
pub use turn::{TurnCoordinator, TurnDecision, TurnReason};
