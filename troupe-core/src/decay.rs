//! Periodic relationship decay.
//!
//! Each tick evaluates every relationship against four independent
//! subsystems, caps each one, sums them, and then applies whatever is left of
//! the entity's daily budget. The budget is shared by all of an entity's
//! relationships and tracked per calendar day in the `decay_ledger` table, so
//! repeated ticks on the same day cannot exceed it.
//!
//! | subsystem   | trigger                                               | cap |
//! |-------------|-------------------------------------------------------|-----|
//! | natural     | no interaction with the target inside the grace period | -5  |
//! | jealousy    | target spends noticeably more time with a rival       | -4  |
//! | unmet wants | open wants toward the target older than 8h            | -2  |
//! | collateral  | external signal passed in with the tick               | -3  |

use crate::clock::Clock;
use crate::config::{DecayConfig, EngineConfig};
use crate::error::StoreError;
use crate::notify::{Notification, Outbox, ShiftCause};
use crate::registry::{CharacterProfile, Registry};
use crate::relationship::clamp_affinity;
use crate::store::{DecayLedgerEntry, InteractionRecord, Records, RelationshipRecord, Row, WantRecord};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// External inputs for one tick.
#[derive(Debug, Clone, Default)]
pub struct DecayInputs {
    collateral: HashMap<(String, String), i32>,
}

impl DecayInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add collateral damage to how `name` feels about `target`. The sign is
    /// ignored; collateral only ever lowers affinity.
    pub fn with_collateral(mut self, name: &str, target: &str, loss: i32) -> Self {
        let total = self
            .collateral
            .entry((name.to_string(), target.to_string()))
            .or_default();
        *total = total.saturating_add(loss.saturating_abs());
        self
    }

    /// Collateral loss recorded for a pair, as a positive number.
    pub fn collateral(&self, name: &str, target: &str) -> i32 {
        self.collateral
            .get(&(name.to_string(), target.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

/// Capped subsystem results for one relationship. Every value is zero or
/// negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecayBreakdown {
    pub natural: i32,
    pub jealousy: i32,
    pub unmet_wants: i32,
    pub collateral: i32,
}

impl DecayBreakdown {
    pub fn total(&self) -> i32 {
        self.natural + self.jealousy + self.unmet_wants + self.collateral
    }
}

/// Bound a summed loss by what remains of the daily cap.
///
/// `already_applied` and `daily_cap` are positive magnitudes; the result is
/// zero or negative.
pub fn combine(total: i32, already_applied: i32, daily_cap: i32) -> i32 {
    let remaining = daily_cap.saturating_sub(already_applied).max(0);
    total.min(0).max(-remaining)
}

/// Loss from neglect.
///
/// Only positive affinity wears down, and only once the last interaction is
/// older than the grace period. The loss is the whole days since that
/// interaction, scaled by the entity's sensitivity.
pub fn natural_decay(
    rel: &RelationshipRecord,
    profile: &CharacterProfile,
    now: DateTime<Utc>,
    config: &DecayConfig,
) -> i32 {
    if profile.decay_immune || rel.affinity <= 0 {
        return 0;
    }
    let Some(last) = rel.last_interaction_at else {
        return 0;
    };
    let neglected = now - last;
    if neglected < config.grace_period {
        return 0;
    }

    let loss = (neglected.num_days() as f64 * profile.decay_sensitivity).round() as i32;
    -loss.clamp(0, config.natural_cap)
}

/// Loss from watching `rel.target` spend time with someone else.
///
/// `target_interactions` are the target's interactions in the jealousy window,
/// in either direction.
pub fn jealousy_loss(
    rel: &RelationshipRecord,
    profile: &CharacterProfile,
    target_interactions: &[InteractionRecord],
    config: &DecayConfig,
) -> i32 {
    if rel.affinity < config.jealousy_min_affinity {
        return 0;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for interaction in target_interactions {
        if let Some(other) = interaction.counterpart(&rel.target) {
            *counts.entry(other).or_default() += 1;
        }
    }
    let ours = counts.get(rel.character.as_str()).copied().unwrap_or(0);
    let jealous = counts.iter().any(|(other, &count)| {
        *other != rel.character
            && *other != rel.target
            && count >= config.jealousy_min_interactions
            && count as f64 >= config.jealousy_ratio * ours as f64
    });
    if !jealous {
        return 0;
    }

    let loss = (config.jealousy_base * profile.jealousy_intensity).round() as i32;
    -loss.clamp(0, config.jealousy_cap)
}

/// Loss from wants toward the target that have gone unmet too long.
pub fn unmet_wants_loss(wants: &[WantRecord], now: DateTime<Utc>, config: &DecayConfig) -> i32 {
    let stale = wants
        .iter()
        .filter(|want| want.fulfilled_at.is_none() && now - want.created_at > config.want_max_age)
        .count();
    let loss = i32::try_from(stale)
        .unwrap_or(i32::MAX)
        .saturating_mul(config.want_penalty);
    -loss.clamp(0, config.wants_cap)
}

/// Loss from the external collateral signal.
pub fn collateral_loss(signal: i32, config: &DecayConfig) -> i32 {
    -signal.saturating_abs().min(config.collateral_cap)
}

/// One relationship that lost affinity during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedDecay {
    pub character: String,
    pub target: String,
    pub breakdown: DecayBreakdown,
    /// Change written to the store.
    pub applied: i32,
    pub affinity: i32,
}

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecayReport {
    /// Relationships evaluated.
    pub evaluated: usize,
    pub applied: Vec<AppliedDecay>,
    /// Relationships whose loss was cut to nothing by the daily cap.
    pub capped: usize,
    /// Entities skipped because their reads or ledger failed.
    pub failed: usize,
}

impl DecayReport {
    /// Total affinity removed, as a positive number.
    pub fn total_loss(&self) -> i32 {
        self.applied.iter().map(|a| -a.applied).sum()
    }
}

/// Runs decay ticks.
#[derive(Clone)]
pub struct DecayScheduler {
    records: Records,
    config: Arc<EngineConfig>,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    outbox: Outbox,
}

type Evaluation = (RelationshipRecord, DecayBreakdown);

impl DecayScheduler {
    pub fn new(
        records: Records,
        config: Arc<EngineConfig>,
        registry: Arc<Registry>,
        clock: Arc<dyn Clock>,
        outbox: Outbox,
    ) -> Self {
        Self {
            records,
            config,
            registry,
            clock,
            outbox,
        }
    }

    /// Evaluate and apply one tick.
    ///
    /// Entities are evaluated concurrently. A failure for one entity is
    /// logged and the rest of the tick continues.
    pub async fn run_tick(&self, inputs: &DecayInputs) -> Result<DecayReport, StoreError> {
        let now = self.clock.now();
        let mut by_character: BTreeMap<String, Vec<RelationshipRecord>> = BTreeMap::new();
        for rel in self.records.all_relationships().await? {
            by_character.entry(rel.character.clone()).or_default().push(rel);
        }

        let evaluations = join_all(
            by_character
                .iter()
                .map(|(name, rels)| self.evaluate(name, rels, inputs, now)),
        )
        .await;

        let mut report = DecayReport::default();
        for ((name, _), evaluation) in by_character.iter().zip(evaluations) {
            match evaluation {
                Ok(evaluated) => {
                    report.evaluated += evaluated.len();
                    if let Err(e) = self.apply(name, evaluated, now, &mut report).await {
                        tracing::warn!(name = %name, error = %e, "Failed to apply decay");
                        report.failed += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Failed to evaluate decay");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            evaluated = report.evaluated,
            applied = report.applied.len(),
            total_loss = report.total_loss(),
            capped = report.capped,
            "Decay tick complete"
        );
        Ok(report)
    }

    async fn evaluate(
        &self,
        name: &str,
        rels: &[RelationshipRecord],
        inputs: &DecayInputs,
        now: DateTime<Utc>,
    ) -> Result<Vec<Evaluation>, StoreError> {
        let config = &self.config.decay;
        let profile = self.registry.profile(name);
        let mut evaluated = Vec::with_capacity(rels.len());

        for rel in rels {
            let jealousy = if rel.affinity >= config.jealousy_min_affinity {
                let seen = self
                    .records
                    .interactions_involving(&rel.target, now - config.jealousy_window)
                    .await?;
                jealousy_loss(rel, profile, &seen, config)
            } else {
                0
            };
            let wants = self.records.open_wants(name, &rel.target).await?;

            let breakdown = DecayBreakdown {
                natural: natural_decay(rel, profile, now, config),
                jealousy,
                unmet_wants: unmet_wants_loss(&wants, now, config),
                collateral: collateral_loss(inputs.collateral(name, &rel.target), config),
            };
            evaluated.push((rel.clone(), breakdown));
        }
        Ok(evaluated)
    }

    async fn apply(
        &self,
        name: &str,
        evaluated: Vec<Evaluation>,
        now: DateTime<Utc>,
        report: &mut DecayReport,
    ) -> Result<(), StoreError> {
        let day = now.date_naive();
        let daily_cap = self.config.decay.daily_cap;
        let already = self.records.decay_applied(name, day).await?;
        let mut used = already;

        for (rel, breakdown) in evaluated {
            let total = breakdown.total();
            if total == 0 {
                continue;
            }
            let bounded = combine(total, used, daily_cap);
            if bounded == 0 {
                report.capped += 1;
                continue;
            }

            let affinity = clamp_affinity(rel.affinity + bounded);
            let applied = affinity - rel.affinity;
            if applied == 0 {
                continue;
            }

            let mut fields = Row::new();
            fields.insert("affinity".to_string(), Value::from(affinity));
            if let Err(e) = self
                .records
                .patch_relationship(name, &rel.target, fields)
                .await
            {
                tracing::warn!(name, target = %rel.target, error = %e, "Failed to write decay");
                continue;
            }
            used -= applied;
            tracing::debug!(
                name,
                target = %rel.target,
                applied,
                affinity,
                ?breakdown,
                "Applied decay"
            );

            if applied.abs() >= self.config.shift_threshold {
                self.outbox.emit(Notification::RelationshipShifted {
                    character: name.to_string(),
                    target: rel.target.clone(),
                    delta: applied,
                    affinity,
                    cause: ShiftCause::Decay,
                });
            }
            report.applied.push(AppliedDecay {
                character: name.to_string(),
                target: rel.target,
                breakdown,
                applied,
                affinity,
            });
        }

        if used != already {
            self.records
                .save_decay_applied(&DecayLedgerEntry {
                    character: name.to_string(),
                    day,
                    applied: used,
                })
                .await?;
        }
        Ok(())
    }

    /// Run a tick every `every`, building fresh inputs each time.
    ///
    /// The first tick fires after one full period.
    pub fn spawn_periodic<F>(self: Arc<Self>, every: std::time::Duration, inputs: F) -> JoinHandle<()>
    where
        F: Fn() -> DecayInputs + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_tick(&inputs()).await {
                    tracing::warn!(error = %e, "Decay tick failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WantId;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn interaction(a: &str, b: &str) -> InteractionRecord {
        InteractionRecord {
            character: a.to_string(),
            target: b.to_string(),
            delta: 1,
            reason: "chat".to_string(),
            occurred_at: t0() - Duration::hours(5),
        }
    }

    #[test]
    fn test_combine_applies_daily_cap_after_sum() {
        let breakdown = DecayBreakdown {
            natural: -5,
            jealousy: -4,
            unmet_wants: -2,
            collateral: -3,
        };
        assert_eq!(breakdown.total(), -14);
        assert_eq!(combine(breakdown.total(), 0, 8), -8);
        assert_eq!(combine(-3, 6, 8), -2);
        assert_eq!(combine(-3, 8, 8), 0);
        assert_eq!(combine(-3, 0, 8), -3);
    }

    #[test]
    fn test_natural_decay_grace_and_cap() {
        let config = DecayConfig::default();
        let profile = CharacterProfile::new();
        let rel = RelationshipRecord::new("ada", "bo")
            .with_affinity(40)
            .with_last_interaction(t0() - Duration::days(3));

        assert_eq!(natural_decay(&rel, &profile, t0(), &config), -3);
        assert_eq!(
            natural_decay(&rel, &profile, t0() - Duration::days(2), &config),
            0
        );
        assert_eq!(
            natural_decay(&rel, &profile, t0() + Duration::days(30), &config),
            -5
        );

        let sensitive = CharacterProfile::new().with_decay_sensitivity(1.5);
        assert_eq!(natural_decay(&rel, &sensitive, t0(), &config), -5);

        let immune = CharacterProfile::new().decay_immune();
        assert_eq!(natural_decay(&rel, &immune, t0(), &config), 0);
    }

    #[test]
    fn test_natural_decay_skips_non_positive_affinity() {
        let config = DecayConfig::default();
        let rel = RelationshipRecord::new("ada", "bo")
            .with_affinity(-20)
            .with_last_interaction(t0() - Duration::days(10));
        assert_eq!(
            natural_decay(&rel, &CharacterProfile::new(), t0(), &config),
            0
        );
    }

    #[test]
    fn test_jealousy_needs_rival_majority() {
        let config = DecayConfig::default();
        let profile = CharacterProfile::new();
        let rel = RelationshipRecord::new("ada", "bo").with_affinity(60);

        let balanced = vec![
            interaction("bo", "cy"),
            interaction("cy", "bo"),
            interaction("bo", "ada"),
            interaction("ada", "bo"),
        ];
        assert_eq!(jealousy_loss(&rel, &profile, &balanced, &config), 0);

        let lopsided = vec![
            interaction("bo", "cy"),
            interaction("cy", "bo"),
            interaction("bo", "cy"),
            interaction("ada", "bo"),
        ];
        assert_eq!(jealousy_loss(&rel, &profile, &lopsided, &config), -2);

        let intense = CharacterProfile::new().with_jealousy_intensity(3.0);
        assert_eq!(jealousy_loss(&rel, &intense, &lopsided, &config), -4);

        let lukewarm = RelationshipRecord::new("ada", "bo").with_affinity(30);
        assert_eq!(jealousy_loss(&lukewarm, &profile, &lopsided, &config), 0);
    }

    #[test]
    fn test_unmet_wants_capped() {
        let config = DecayConfig::default();
        let want = |age_hours: i64| WantRecord {
            id: WantId::new(),
            character: "ada".to_string(),
            target: Some("bo".to_string()),
            description: "a proper apology".to_string(),
            created_at: t0() - Duration::hours(age_hours),
            fulfilled_at: None,
        };

        assert_eq!(unmet_wants_loss(&[want(2)], t0(), &config), 0);
        assert_eq!(unmet_wants_loss(&[want(9)], t0(), &config), -1);
        assert_eq!(
            unmet_wants_loss(&[want(9), want(10), want(30)], t0(), &config),
            -2
        );
    }

    #[test]
    fn test_collateral_capped() {
        let config = DecayConfig::default();
        let inputs = DecayInputs::new().with_collateral("ada", "bo", -7);
        assert_eq!(collateral_loss(inputs.collateral("ada", "bo"), &config), -3);
        assert_eq!(collateral_loss(inputs.collateral("bo", "ada"), &config), 0);
    }

    #[test]
    fn test_extreme_collateral_saturates() {
        let config = DecayConfig::default();
        let inputs = DecayInputs::new()
            .with_collateral("ada", "bo", i32::MIN)
            .with_collateral("ada", "bo", i32::MAX);
        assert_eq!(inputs.collateral("ada", "bo"), i32::MAX);
        assert_eq!(collateral_loss(i32::MIN, &config), -3);
        assert_eq!(collateral_loss(inputs.collateral("ada", "bo"), &config), -3);
        assert_eq!(combine(-3, i32::MIN, 8), -3);
    }
}
