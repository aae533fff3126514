//! Turn coordination.
//!
//! Decides whether an entity may act right now. Both checks read the store and
//! are advisory: two invocations can read the same state and both be allowed.
//! [`TurnCoordinator::claim`] narrows that window by marking the entity as
//! speaking before any expensive work starts.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::StoreError;
use crate::registry::Registry;
use crate::store::{
    timestamp, ActionId, ActionRecord, CharacterState, Condition, Filter, Location, Records, Row,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Why a turn was allowed or denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnReason {
    /// Nothing stands in the way.
    Clear,
    /// Someone acted recently, but the entity was addressed directly.
    BypassedGlobalCooldown,
    /// Someone acted too recently.
    GlobalCooldown { remaining: Duration },
    /// The entity is one of the latest actors.
    AmongRecentActions,
    /// The entity itself spoke too recently.
    EntityCooldown { remaining: Duration },
    /// Another invocation claimed the turn first.
    ClaimLost,
}

/// Result of asking whether an entity may act.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnDecision {
    pub allowed: bool,
    pub reason: TurnReason,
}

impl TurnDecision {
    fn allow(reason: TurnReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn deny(reason: TurnReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// Result of an early claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// Whether this invocation set the speaking marker.
    pub won: bool,
    /// `last_spoke_at` as read just before claiming.
    pub previous_spoke_at: Option<DateTime<Utc>>,
}

/// Applies the global and per-entity cooldowns.
#[derive(Clone)]
pub struct TurnCoordinator {
    records: Records,
    config: Arc<EngineConfig>,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
}

impl TurnCoordinator {
    pub fn new(
        records: Records,
        config: Arc<EngineConfig>,
        registry: Arc<Registry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records,
            config,
            registry,
            clock,
        }
    }

    /// The per-entity cooldown after scaling by the entity's profile.
    pub fn entity_cooldown(&self, name: &str) -> Duration {
        let multiplier = self.registry.profile(name).cooldown_multiplier;
        let millis = self.config.entity_cooldown.num_milliseconds() as f64 * multiplier;
        Duration::milliseconds(millis.round() as i64)
    }

    /// Decide whether `name` may act now.
    ///
    /// `bypass` skips the global cooldown only; an addressed entity still
    /// respects its own cooldown.
    pub async fn may_act(&self, name: &str, bypass: bool) -> Result<TurnDecision, StoreError> {
        let now = self.clock.now();
        let window = self.config.recent_action_window.max(1);
        let recent = self.records.recent_actions(window).await?;

        let mut reason = TurnReason::Clear;
        if let Some(latest) = recent.first() {
            let elapsed = now - latest.occurred_at;
            if elapsed < self.config.global_cooldown {
                if !bypass {
                    let remaining = self.config.global_cooldown - elapsed;
                    tracing::debug!(name, ?remaining, "Denied by global cooldown");
                    return Ok(TurnDecision::deny(TurnReason::GlobalCooldown { remaining }));
                }
                reason = TurnReason::BypassedGlobalCooldown;
            }
        }

        if recent.iter().any(|action| action.character == name) {
            tracing::debug!(name, "Denied, among the latest actors");
            return Ok(TurnDecision::deny(TurnReason::AmongRecentActions));
        }

        let cooldown = self.entity_cooldown(name);
        if let Some(spoke_at) = self
            .records
            .character(name)
            .await?
            .and_then(|state| state.last_spoke_at)
        {
            let elapsed = now - spoke_at;
            if elapsed < cooldown {
                let remaining = cooldown - elapsed;
                tracing::debug!(name, ?remaining, "Denied by entity cooldown");
                return Ok(TurnDecision::deny(TurnReason::EntityCooldown { remaining }));
            }
        }

        Ok(TurnDecision::allow(reason))
    }

    /// Mark `name` as speaking now, unless someone else already did.
    ///
    /// The marker is a patch conditioned on `last_spoke_at` still being older
    /// than the cooldown, so on a store with atomic patches only one claimant
    /// wins. An entity without a row is created already claimed.
    pub async fn claim(&self, name: &str) -> Result<Claim, StoreError> {
        let now = self.clock.now();
        let Some(current) = self.records.character(name).await? else {
            let state = CharacterState::new(name, now).with_last_spoke_at(now);
            self.records.insert_character(&state).await?;
            tracing::debug!(name, "Claimed turn for new entity");
            return Ok(Claim {
                won: true,
                previous_spoke_at: None,
            });
        };

        let cutoff = now - self.entity_cooldown(name);
        let filter = Filter::new().eq("name", name).and(Condition::Or(vec![
            Condition::IsNull("last_spoke_at".to_string()),
            Condition::Lt("last_spoke_at".to_string(), timestamp(cutoff)),
        ]));
        let mut fields = Row::new();
        fields.insert("last_spoke_at".to_string(), timestamp(now));

        let won = self.records.patch_characters(&filter, fields).await? > 0;
        if !won {
            tracing::debug!(name, "Lost turn claim");
        }

        Ok(Claim {
            won,
            previous_spoke_at: current.last_spoke_at,
        })
    }

    /// Append a committed turn to the action log.
    pub async fn record_turn(&self, name: &str, context: Location) -> Result<ActionRecord, StoreError> {
        let action = ActionRecord {
            id: ActionId::new(),
            character: name.to_string(),
            context,
            occurred_at: self.clock.now(),
        };
        self.records.insert_action(&action).await?;
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::registry::CharacterProfile;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;

    fn setup(registry: Registry) -> (TurnCoordinator, Arc<ManualClock>, Records) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        ));
        let records = Records::new(Arc::new(InMemoryStore::new()));
        let coordinator = TurnCoordinator::new(
            records.clone(),
            Arc::new(EngineConfig::default()),
            Arc::new(registry),
            clock.clone(),
        );
        (coordinator, clock, records)
    }

    #[test]
    fn test_cooldown_multiplier() {
        let (coordinator, _, _) = setup(
            Registry::new().with_profile("ada", CharacterProfile::new().with_cooldown_multiplier(1.5)),
        );
        assert_eq!(coordinator.entity_cooldown("ada"), Duration::seconds(90));
        assert_eq!(coordinator.entity_cooldown("bo"), Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_global_cooldown_and_bypass() {
        let (coordinator, clock, _) = setup(Registry::new());
        coordinator.record_turn("ada", Location::MainFloor).await.unwrap();
        clock.advance(Duration::seconds(5));

        let denied = coordinator.may_act("bo", false).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(
            denied.reason,
            TurnReason::GlobalCooldown {
                remaining: Duration::seconds(7)
            }
        );

        let bypassed = coordinator.may_act("bo", true).await.unwrap();
        assert!(bypassed.allowed);
        assert_eq!(bypassed.reason, TurnReason::BypassedGlobalCooldown);
    }

    #[tokio::test]
    async fn test_second_claim_loses() {
        let (coordinator, _, records) = setup(Registry::new());
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        records
            .save_character(&CharacterState::new("ada", t0).with_last_spoke_at(t0))
            .await
            .unwrap();

        let first = coordinator.claim("ada").await.unwrap();
        let second = coordinator.claim("ada").await.unwrap();

        assert!(first.won);
        assert_eq!(first.previous_spoke_at, Some(t0));
        assert!(!second.won);
    }

    #[tokio::test]
    async fn test_claim_creates_missing_entity() {
        let (coordinator, clock, records) = setup(Registry::new());
        let claim = coordinator.claim("cy").await.unwrap();
        assert!(claim.won);

        let state = records.character("cy").await.unwrap().unwrap();
        assert_eq!(state.last_spoke_at, Some(clock.now()));
        assert_eq!(state.energy, 100);
    }
}
