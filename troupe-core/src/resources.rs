//! Energy, patience, mood and location.
//!
//! Every "spoke" event moves an entity's resources by a delta that depends on
//! where the action happened. Resting entities recover lazily: nothing ticks in
//! the background, recovery is computed from elapsed time whenever the state
//! is read.
//!
//! The pure parts ([`delta_for`], [`apply_recovery`], [`transition`]) carry the
//! rules; [`ResourceStateMachine`] reads, applies and writes them back.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::StoreError;
use crate::notify::{Notification, Outbox, RelocationReason};
use crate::store::{clamp_stat, timestamp, CharacterState, Filter, Location, Records, Row};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Change applied to resources by one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDelta {
    pub energy: i32,
    pub patience: i32,
}

/// The delta profile for an action taken at `location`.
pub fn delta_for(location: Location) -> ResourceDelta {
    let (energy, patience) = match location {
        Location::MainFloor => (-2, 0),
        Location::RestArea => (8, 5),
        Location::OpsArea => (-3, -1),
        Location::Outing => (-1, 3),
        Location::Meeting => (-2, 2),
        Location::StudyArea => (-1, 2),
    };
    ResourceDelta { energy, patience }
}

/// Apply passive recovery to a resting entity.
///
/// Returns `None` when nothing changes: the entity is not resting or no full
/// interval has elapsed. `updated_at` advances by the intervals consumed so a
/// partial interval carries over to the next read.
pub fn apply_recovery(
    state: &CharacterState,
    now: DateTime<Utc>,
    config: &EngineConfig,
) -> Option<CharacterState> {
    if !state.is_resting() {
        return None;
    }
    let interval = config.recovery_interval.num_seconds();
    if interval <= 0 {
        return None;
    }
    let intervals = (now - state.updated_at).num_seconds() / interval;
    if intervals <= 0 {
        return None;
    }

    let gained = i32::try_from(intervals).unwrap_or(i32::MAX);
    let mut recovered = state.clone();
    recovered.energy = clamp_stat(
        state
            .energy
            .saturating_add(config.recovery_energy.saturating_mul(gained)),
    );
    recovered.patience = clamp_stat(
        state
            .patience
            .saturating_add(config.recovery_patience.saturating_mul(gained)),
    );
    recovered.updated_at = state.updated_at + Duration::seconds(interval * intervals);
    Some(recovered)
}

/// Outcome of applying one action to a state.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: CharacterState,
    /// Where the entity was before, if it moved.
    pub moved_from: Option<Option<Location>>,
    /// Sent to rest for running out of energy.
    pub exhausted: bool,
}

/// Apply one action at `context` to `state`.
///
/// A default (main floor) context never moves an entity that sits at a
/// special location; the delta of its current location applies instead. An
/// explicit special context moves the entity there.
pub fn transition(
    state: CharacterState,
    context: Location,
    now: DateTime<Utc>,
    config: &EngineConfig,
) -> Transition {
    let before = state.location;
    let effective = match (context, before) {
        (Location::MainFloor, Some(current)) if current.is_special() => current,
        _ => context,
    };

    let delta = delta_for(effective);
    let mut next = state;
    next.location = Some(effective);
    next.energy = clamp_stat(next.energy + delta.energy);
    next.patience = clamp_stat(next.patience + delta.patience);

    let exhausted =
        effective == Location::MainFloor && next.energy == 0 && before != Some(Location::RestArea);
    if exhausted {
        next.location = Some(Location::RestArea);
        next.mood = config.exhaustion_mood.clone();
    }

    next.last_spoke_at = Some(now);
    next.updated_at = now;
    next.interactions_today = next.interactions_today.saturating_add(1);

    let moved_from = (next.location != before).then_some(before);
    Transition {
        state: next,
        moved_from,
        exhausted,
    }
}

/// Result of [`ResourceStateMachine::record_action`].
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub state: CharacterState,
    pub exhausted: bool,
    /// Silence that ended with this action, if it counted as an absence.
    pub returned_after: Option<Duration>,
}

/// Reads, transitions and persists entity resources.
#[derive(Clone)]
pub struct ResourceStateMachine {
    records: Records,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
    outbox: Outbox,
}

impl ResourceStateMachine {
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

    /// Read an entity's state, applying and persisting any pending recovery.
    pub async fn current(&self, name: &str) -> Result<Option<CharacterState>, StoreError> {
        let Some(state) = self.records.character(name).await? else {
            return Ok(None);
        };

        match apply_recovery(&state, self.clock.now(), &self.config) {
            Some(recovered) => {
                let mut fields = Row::new();
                fields.insert("energy".to_string(), Value::from(recovered.energy));
                fields.insert("patience".to_string(), Value::from(recovered.patience));
                fields.insert("updated_at".to_string(), timestamp(recovered.updated_at));
                self.records
                    .patch_characters(&Filter::new().eq("name", name), fields)
                    .await?;
                tracing::debug!(
                    name,
                    energy = recovered.energy,
                    patience = recovered.patience,
                    "Applied passive recovery"
                );
                Ok(Some(recovered))
            }
            None => Ok(Some(state)),
        }
    }

    /// Record that `name` spoke at `context`.
    pub async fn record_action(
        &self,
        name: &str,
        context: Location,
    ) -> Result<ActionOutcome, StoreError> {
        let previous = self
            .records
            .character(name)
            .await?
            .and_then(|state| state.last_spoke_at);
        self.record_claimed_action(name, context, previous).await
    }

    /// Record an action whose turn was already claimed.
    ///
    /// The claim overwrote `last_spoke_at`, so the value read before claiming
    /// is passed in for absence detection.
    pub async fn record_claimed_action(
        &self,
        name: &str,
        context: Location,
        previous_spoke_at: Option<DateTime<Utc>>,
    ) -> Result<ActionOutcome, StoreError> {
        let now = self.clock.now();
        let state = match self.records.character(name).await? {
            Some(state) => apply_recovery(&state, now, &self.config).unwrap_or(state),
            None => CharacterState::new(name, now),
        };

        let Transition {
            state,
            moved_from,
            exhausted,
        } = transition(state, context, now, &self.config);
        self.records.save_character(&state).await?;

        if exhausted {
            tracing::info!(name, energy = state.energy, "Exhausted, sent to rest");
            if let Some(from) = moved_from {
                self.outbox.emit(Notification::Relocated {
                    character: name.to_string(),
                    from,
                    to: Location::RestArea,
                    reason: RelocationReason::Exhaustion,
                });
            }
        }

        let returned_after = previous_spoke_at
            .map(|at| now - at)
            .filter(|away| *away > self.config.absence_threshold);
        if let Some(away) = returned_after {
            self.announce_return(name, away).await;
        }

        Ok(ActionOutcome {
            state,
            exhausted,
            returned_after,
        })
    }

    async fn announce_return(&self, name: &str, away: Duration) {
        let holders = match self
            .records
            .relationships_toward(name, self.config.strong_affinity)
            .await
        {
            Ok(holders) => holders,
            Err(e) => {
                tracing::warn!(name, error = %e, "Failed to read who to tell about return");
                return;
            }
        };

        tracing::info!(
            name,
            away_hours = away.num_hours(),
            recipients = holders.len(),
            "Returned from absence"
        );
        for holder in holders {
            self.outbox.emit(Notification::ReturnedFromAbsence {
                character: name.to_string(),
                recipient: holder.character,
                away_hours: away.num_hours(),
            });
        }
    }

    /// Move an entity, bypassing the action rules.
    pub async fn relocate(
        &self,
        name: &str,
        location: Location,
    ) -> Result<CharacterState, StoreError> {
        let mut state = self
            .current(name)
            .await?
            .unwrap_or_else(|| CharacterState::new(name, self.clock.now()));
        let from = state.location;
        state.location = Some(location);
        self.records.save_character(&state).await?;

        if from != Some(location) {
            self.outbox.emit(Notification::Relocated {
                character: name.to_string(),
                from,
                to: location,
                reason: RelocationReason::Directed,
            });
        }
        Ok(state)
    }

    /// Overwrite an entity's mood.
    pub async fn set_mood(&self, name: &str, mood: &str) -> Result<CharacterState, StoreError> {
        let mut state = self
            .current(name)
            .await?
            .unwrap_or_else(|| CharacterState::new(name, self.clock.now()));
        state.mood = mood.to_string();
        self.records.save_character(&state).await?;
        Ok(state)
    }

    /// Zero every entity's daily interaction counter.
    pub async fn reset_daily_counters(&self) -> Result<usize, StoreError> {
        let mut fields = Row::new();
        fields.insert("interactions_today".to_string(), Value::from(0));
        let reset = self.records.patch_characters(&Filter::new(), fields).await?;
        tracing::info!(reset, "Reset daily interaction counters");
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_default_context_keeps_special_location() {
        let config = EngineConfig::default();
        let state = CharacterState::new("ada", t0())
            .with_location(Location::OpsArea)
            .with_energy(50)
            .with_patience(50);

        let next = transition(state, Location::MainFloor, t0(), &config);
        assert_eq!(next.state.location, Some(Location::OpsArea));
        assert_eq!(next.state.energy, 47);
        assert_eq!(next.state.patience, 49);
        assert_eq!(next.moved_from, None);
    }

    #[test]
    fn test_explicit_special_context_relocates() {
        let config = EngineConfig::default();
        let state = CharacterState::new("ada", t0()).with_location(Location::OpsArea);

        let next = transition(state, Location::Outing, t0(), &config);
        assert_eq!(next.state.location, Some(Location::Outing));
        assert_eq!(next.moved_from, Some(Some(Location::OpsArea)));
    }

    #[test]
    fn test_unset_location_lands_on_main_floor() {
        let config = EngineConfig::default();
        let next = transition(CharacterState::new("ada", t0()), Location::MainFloor, t0(), &config);
        assert_eq!(next.state.location, Some(Location::MainFloor));
        assert_eq!(next.state.energy, 98);
        assert_eq!(next.state.interactions_today, 1);
    }

    #[test]
    fn test_rest_area_clamps_at_full() {
        let config = EngineConfig::default();
        let state = CharacterState::new("ada", t0())
            .with_location(Location::RestArea)
            .with_energy(97);
        let next = transition(state, Location::MainFloor, t0(), &config);
        assert_eq!(next.state.energy, 100);
        assert_eq!(next.state.patience, 100);
    }

    #[test]
    fn test_recovery_keeps_partial_interval() {
        let config = EngineConfig::default();
        let state = CharacterState::new("ada", t0())
            .with_location(Location::RestArea)
            .with_energy(40)
            .with_patience(10);

        let later = t0() + Duration::minutes(25);
        let recovered = apply_recovery(&state, later, &config).unwrap();
        assert_eq!(recovered.energy, 70);
        assert_eq!(recovered.patience, 34);
        assert_eq!(recovered.updated_at, t0() + Duration::minutes(20));

        assert!(apply_recovery(&state, t0() + Duration::minutes(9), &config).is_none());
    }

    #[test]
    fn test_no_recovery_off_rest_area() {
        let config = EngineConfig::default();
        let state = CharacterState::new("ada", t0())
            .with_location(Location::MainFloor)
            .with_energy(40);
        assert!(apply_recovery(&state, t0() + Duration::hours(3), &config).is_none());
    }
}
