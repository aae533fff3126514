//! Engine configuration.
//!
//! All tunable constants for cooldowns, recovery, relationship events and the
//! decay scheduler. Defaults match the documented behaviour; deployments may
//! override a subset through `TROUPE_*` environment variables.

use crate::error::ConfigError;
use crate::registry::{MAX_GENERATION_TIMEOUT, MIN_GENERATION_TIMEOUT};
use chrono::Duration;
use std::path::Path;

/// Configuration for the coordination engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum gap after the most recent action by anyone.
    pub global_cooldown: Duration,

    /// Minimum gap between two actions by the same entity.
    pub entity_cooldown: Duration,

    /// How many of the latest global actions count as "just acted".
    pub recent_action_window: usize,

    /// Silence longer than this makes the next action a return from absence.
    pub absence_threshold: Duration,

    /// Affinity at or above which a relationship counts as strong.
    pub strong_affinity: i32,

    /// Length of one passive recovery interval.
    pub recovery_interval: Duration,

    /// Energy regained per recovery interval.
    pub recovery_energy: i32,

    /// Patience regained per recovery interval.
    pub recovery_patience: i32,

    /// Mood label set when an entity is sent off to rest.
    pub exhaustion_mood: String,

    /// Largest affinity change a single direct event may apply.
    pub max_event_delta: i32,

    /// Smallest applied affinity change that is announced.
    pub shift_threshold: i32,

    /// Decay scheduler settings.
    pub decay: DecayConfig,

    /// Generation defaults when an entity has no registry profile.
    pub generation: GenerationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global_cooldown: Duration::seconds(12),
            entity_cooldown: Duration::seconds(60),
            recent_action_window: 2,
            absence_threshold: Duration::hours(24),
            strong_affinity: 50,
            recovery_interval: Duration::minutes(10),
            recovery_energy: 15,
            recovery_patience: 12,
            exhaustion_mood: "exhausted".to_string(),
            max_event_delta: 5,
            shift_threshold: 5,
            decay: DecayConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load defaults, then apply any `TROUPE_*` overrides from the environment.
    ///
    /// A `.env` file in the working directory or its parents is loaded first
    /// if present. Variables already set take precedence over the file.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars()
    }

    /// Like [`EngineConfig::from_env`], but the env file must exist at `path`.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenvy::from_path(path)?;
        Self::from_vars()
    }

    fn from_vars() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(secs) = env_i64("TROUPE_GLOBAL_COOLDOWN_SECS")? {
            config.global_cooldown = Duration::seconds(secs);
        }
        if let Some(secs) = env_i64("TROUPE_ENTITY_COOLDOWN_SECS")? {
            config.entity_cooldown = Duration::seconds(secs);
        }
        if let Some(hours) = env_i64("TROUPE_ABSENCE_HOURS")? {
            config.absence_threshold = Duration::hours(hours);
        }
        if let Some(mins) = env_i64("TROUPE_RECOVERY_INTERVAL_MINS")? {
            if mins <= 0 {
                return Err(ConfigError::Invalid {
                    key: "TROUPE_RECOVERY_INTERVAL_MINS",
                    value: mins.to_string(),
                });
            }
            config.recovery_interval = Duration::minutes(mins);
        }
        if let Some(cap) = env_i64("TROUPE_DECAY_DAILY_CAP")? {
            config.decay.daily_cap = non_negative("TROUPE_DECAY_DAILY_CAP", cap)?.min(100) as i32;
        }
        if let Some(secs) = env_i64("TROUPE_GENERATION_TIMEOUT_SECS")? {
            let secs = non_negative("TROUPE_GENERATION_TIMEOUT_SECS", secs)?;
            config.generation.timeout = std::time::Duration::from_secs(secs)
                .clamp(MIN_GENERATION_TIMEOUT, MAX_GENERATION_TIMEOUT);
        }

        Ok(config)
    }

    /// Set the global cooldown.
    pub fn with_global_cooldown(mut self, cooldown: Duration) -> Self {
        self.global_cooldown = cooldown;
        self
    }

    /// Set the per-entity cooldown.
    pub fn with_entity_cooldown(mut self, cooldown: Duration) -> Self {
        self.entity_cooldown = cooldown;
        self
    }

    /// Set the absence threshold.
    pub fn with_absence_threshold(mut self, threshold: Duration) -> Self {
        self.absence_threshold = threshold;
        self
    }

    /// Set the passive recovery interval.
    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval;
        self
    }

    /// Set the decay settings.
    pub fn with_decay(mut self, decay: DecayConfig) -> Self {
        self.decay = decay;
        self
    }

    /// Set the generation defaults.
    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }
}

/// Settings for the periodic relationship decay.
#[derive(Debug, Clone)]
pub struct DecayConfig {
    /// Interactions newer than this suppress natural decay.
    pub grace_period: Duration,
    pub natural_cap: i32,

    /// Jealousy is only evaluated at or above this affinity.
    pub jealousy_min_affinity: i32,
    pub jealousy_window: Duration,
    /// Rival interactions must reach this multiple of our own.
    pub jealousy_ratio: f64,
    /// Rival interactions needed before the ratio is considered.
    pub jealousy_min_interactions: usize,
    pub jealousy_base: f64,
    pub jealousy_cap: i32,

    /// Wants older than this start to hurt.
    pub want_max_age: Duration,
    pub want_penalty: i32,
    pub wants_cap: i32,

    pub collateral_cap: i32,

    /// Total loss allowed per entity per calendar day.
    pub daily_cap: i32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::days(2),
            natural_cap: 5,
            jealousy_min_affinity: 50,
            jealousy_window: Duration::days(3),
            jealousy_ratio: 1.5,
            jealousy_min_interactions: 2,
            jealousy_base: 2.0,
            jealousy_cap: 4,
            want_max_age: Duration::hours(8),
            want_penalty: 1,
            wants_cap: 2,
            collateral_cap: 3,
            daily_cap: 8,
        }
    }
}

/// Generation defaults.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub timeout: std::time::Duration,
    pub max_tokens: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout: std::time::Duration::from_secs(15),
            max_tokens: 300,
        }
    }
}

fn env_i64(key: &'static str) -> Result<Option<i64>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(None),
    }
}

fn non_negative(key: &'static str, value: i64) -> Result<u64, ConfigError> {
    u64::try_from(value).map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}
