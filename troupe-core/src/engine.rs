//! The turn pipeline.
//!
//! [`Engine`] wires the components into one call per trigger:
//!
//! ```text
//! may_act ─► claim ─► build context ─► generate (deadline) ─► commit
//!                                         │                     ├─ resource transition
//!                                         └─ fallback line      ├─ action log
//!                                                               ├─ memory (if generated)
//!                                                               └─ affinity deltas
//! ```
//!
//! Nothing in the pipeline surfaces an error to the caller. A store failure
//! before the claim skips the turn; after the claim every step is attempted
//! independently and failures are logged.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::decay::{DecayInputs, DecayReport, DecayScheduler};
use crate::error::StoreError;
use crate::generation::{generate_with_timeout, Constraints, GenerationContext, Generator};
use crate::memory::{MemoryStore, RetrievedMemories};
use crate::notify::{NotificationSink, Outbox, TracingSink};
use crate::registry::Registry;
use crate::relationship::{DeltaOutcome, RelationshipLedger};
use crate::resources::ResourceStateMachine;
use crate::store::{CharacterState, Location, MemoryRecord, Records, Store};
use crate::turn::{Claim, TurnCoordinator, TurnReason};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A requested change in how the speaker feels about someone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityChange {
    pub target: String,
    pub delta: i32,
    pub reason: String,
}

/// One trigger asking an entity to speak.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub name: String,
    pub prompt: String,
    /// Addressed or mentioned directly; skips the global cooldown.
    pub addressed: bool,
    /// Where the action takes place. The main floor is the default.
    pub context: Location,
    /// Extra text used to match memories.
    pub hint: Option<String>,
    /// A memory to store if the entity actually speaks.
    pub remember: Option<(String, u8)>,
    pub affinity: Vec<AffinityChange>,
}

impl TurnRequest {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            addressed: false,
            context: Location::MainFloor,
            hint: None,
            remember: None,
            affinity: Vec::new(),
        }
    }

    /// Mark the entity as directly addressed.
    pub fn addressed(mut self) -> Self {
        self.addressed = true;
        self
    }

    /// Set where the action takes place.
    pub fn at(mut self, context: Location) -> Self {
        self.context = context;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn remember(mut self, content: impl Into<String>, importance: u8) -> Self {
        self.remember = Some((content.into(), importance));
        self
    }

    pub fn affect(mut self, target: impl Into<String>, delta: i32, reason: impl Into<String>) -> Self {
        self.affinity.push(AffinityChange {
            target: target.into(),
            delta,
            reason: reason.into(),
        });
        self
    }
}

/// What a completed turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub text: String,
    /// The text is the fallback line because generation failed.
    pub fell_back: bool,
    /// State after the resource transition, if it was written.
    pub state: Option<CharacterState>,
    pub memory: Option<MemoryRecord>,
    pub deltas: Vec<DeltaOutcome>,
}

/// Result of [`Engine::take_turn`].
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The entity may not act now.
    Denied(TurnReason),
    /// The entity spoke, possibly with a fallback line.
    Spoke(TurnReport),
    /// The store could not be read, so no decision was made.
    Skipped { reason: String },
}

impl TurnOutcome {
    /// Get the report if the entity spoke.
    pub fn report(&self) -> Option<&TurnReport> {
        match self {
            TurnOutcome::Spoke(report) => Some(report),
            _ => None,
        }
    }

    pub fn spoke(&self) -> bool {
        matches!(self, TurnOutcome::Spoke(_))
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    store: Arc<dyn Store>,
    generator: Arc<dyn Generator>,
    config: EngineConfig,
    registry: Registry,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    delivery_timeout: Duration,
}

impl EngineBuilder {
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Set how long the sink gets per notification.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Build the engine and start its notification dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Engine {
        let records = Records::new(self.store);
        let config = Arc::new(self.config);
        let registry = Arc::new(self.registry);
        let clock = self.clock;

        let (outbox, _dispatcher) = Outbox::spawn(
            records.clone(),
            self.sink,
            clock.clone(),
            self.delivery_timeout,
        );

        Engine {
            turns: TurnCoordinator::new(
                records.clone(),
                config.clone(),
                registry.clone(),
                clock.clone(),
            ),
            resources: ResourceStateMachine::new(
                records.clone(),
                config.clone(),
                clock.clone(),
                outbox.clone(),
            ),
            memory: MemoryStore::new(records.clone(), clock.clone()),
            relationships: RelationshipLedger::new(
                records.clone(),
                config.clone(),
                clock.clone(),
                outbox.clone(),
            ),
            decay: Arc::new(DecayScheduler::new(
                records.clone(),
                config.clone(),
                registry.clone(),
                clock.clone(),
                outbox.clone(),
            )),
            records,
            config,
            registry,
            clock,
            generator: self.generator,
            outbox,
        }
    }
}

/// Coordinates turns, resources, memory and relationships over a shared store.
pub struct Engine {
    records: Records,
    config: Arc<EngineConfig>,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    generator: Arc<dyn Generator>,
    outbox: Outbox,
    turns: TurnCoordinator,
    resources: ResourceStateMachine,
    memory: MemoryStore,
    relationships: RelationshipLedger,
    decay: Arc<DecayScheduler>,
}

impl Engine {
    /// Start building an engine with default config, the system clock and a
    /// logging sink.
    pub fn builder(store: Arc<dyn Store>, generator: Arc<dyn Generator>) -> EngineBuilder {
        EngineBuilder {
            store,
            generator,
            config: EngineConfig::default(),
            registry: Registry::default(),
            clock: Arc::new(SystemClock),
            sink: Arc::new(TracingSink),
            delivery_timeout: Duration::from_secs(5),
        }
    }

    /// Run one turn for `request.name`.
    pub async fn take_turn(&self, request: TurnRequest) -> TurnOutcome {
        let name = request.name.as_str();

        let decision = match self.turns.may_act(name, request.addressed).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(name, error = %e, "Could not check cooldowns, skipping turn");
                return TurnOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };
        if !decision.allowed {
            return TurnOutcome::Denied(decision.reason);
        }

        let claim = match self.turns.claim(name).await {
            Ok(claim) if claim.won => claim,
            Ok(_) => return TurnOutcome::Denied(TurnReason::ClaimLost),
            Err(e) => {
                tracing::warn!(name, error = %e, "Early claim failed, continuing unclaimed");
                Claim {
                    won: false,
                    previous_spoke_at: None,
                }
            }
        };

        let context = self.build_context(&request).await;
        let (text, fell_back) = self.generate(name, &context).await;
        let report = self.commit(&request, &claim, text, fell_back).await;
        TurnOutcome::Spoke(report)
    }

    async fn build_context(&self, request: &TurnRequest) -> GenerationContext {
        let name = request.name.as_str();

        let state = match self.resources.current(name).await {
            Ok(Some(state)) => state,
            Ok(None) => CharacterState::new(name, self.clock.now()),
            Err(e) => {
                tracing::warn!(name, error = %e, "Failed to read state for context");
                CharacterState::new(name, self.clock.now())
            }
        };

        let hint = request.hint.as_deref().unwrap_or(request.prompt.as_str());
        let memories = self
            .memory
            .retrieve(name, Some(hint))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(name, error = %e, "Failed to read memories for context");
                RetrievedMemories::default()
            });

        let relationships = self
            .relationships
            .relationships_of(name)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(name, error = %e, "Failed to read relationships for context");
                Vec::new()
            });

        GenerationContext {
            state,
            memories,
            relationships,
            prompt: request.prompt.clone(),
        }
    }

    async fn generate(&self, name: &str, context: &GenerationContext) -> (String, bool) {
        let profile = self.registry.profile(name);
        let constraints = if self.registry.is_registered(name) {
            Constraints {
                max_tokens: profile.max_tokens,
                timeout: profile.generation_timeout,
            }
        } else {
            Constraints {
                max_tokens: self.config.generation.max_tokens,
                timeout: self.config.generation.timeout,
            }
        };

        match generate_with_timeout(self.generator.as_ref(), name, context, &constraints).await {
            Ok(text) => (text, false),
            Err(e) => {
                tracing::warn!(
                    name,
                    backend = self.generator.name(),
                    error = %e,
                    "Generation failed, using fallback line"
                );
                (profile.fallback_for(name), true)
            }
        }
    }

    async fn commit(
        &self,
        request: &TurnRequest,
        claim: &Claim,
        text: String,
        fell_back: bool,
    ) -> TurnReport {
        let name = request.name.as_str();

        // An unclaimed turn left last_spoke_at untouched, so it can be read again.
        let recorded = if claim.won {
            self.resources
                .record_claimed_action(name, request.context, claim.previous_spoke_at)
                .await
        } else {
            self.resources.record_action(name, request.context).await
        };
        let state = match recorded {
            Ok(outcome) => Some(outcome.state),
            Err(e) => {
                tracing::warn!(name, error = %e, "Failed to record resource transition");
                None
            }
        };

        let location = state
            .as_ref()
            .and_then(|s| s.location)
            .unwrap_or(request.context);
        if let Err(e) = self.turns.record_turn(name, location).await {
            tracing::warn!(name, error = %e, "Failed to append to action log");
        }

        let memory = match (&request.remember, fell_back) {
            (Some((content, importance)), false) => {
                match self.memory.record(name, content, *importance).await {
                    Ok(memory) => Some(memory),
                    Err(e) => {
                        tracing::warn!(name, error = %e, "Failed to store memory");
                        None
                    }
                }
            }
            _ => None,
        };

        let mut deltas = Vec::with_capacity(request.affinity.len());
        for change in &request.affinity {
            match self
                .relationships
                .apply_delta(name, &change.target, change.delta, &change.reason)
                .await
            {
                Ok(outcome) => deltas.push(outcome),
                Err(e) => {
                    tracing::warn!(name, target = %change.target, error = %e, "Failed to apply affinity change");
                }
            }
        }

        tracing::info!(name, fell_back, chars = text.len(), "Turn committed");
        TurnReport {
            text,
            fell_back,
            state,
            memory,
            deltas,
        }
    }

    /// Run one decay tick now.
    pub async fn run_decay(&self, inputs: &DecayInputs) -> Result<DecayReport, StoreError> {
        self.decay.run_tick(inputs).await
    }

    /// Run decay ticks in the background.
    pub fn spawn_decay<F>(&self, every: Duration, inputs: F) -> JoinHandle<()>
    where
        F: Fn() -> DecayInputs + Send + Sync + 'static,
    {
        self.decay.clone().spawn_periodic(every, inputs)
    }

    /// Wait until every queued notification has been handled.
    pub async fn flush_notifications(&self) {
        self.outbox.flush().await;
    }

    pub fn turns(&self) -> &TurnCoordinator {
        &self.turns
    }

    pub fn resources(&self) -> &ResourceStateMachine {
        &self.resources
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn relationships(&self) -> &RelationshipLedger {
        &self.relationships
    }

    pub fn decay(&self) -> &Arc<DecayScheduler> {
        &self.decay
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
