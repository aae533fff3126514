//! Per-entity capabilities.
//!
//! Behaviour that differs between entities (cooldown pacing, how quickly they
//! drift apart, how jealous they get, which generation budget they use) lives
//! here, keyed by stable identity, instead of in conditionals around the code.

use std::collections::HashMap;
use std::time::Duration;

/// Shortest generation timeout a profile may carry.
pub const MIN_GENERATION_TIMEOUT: Duration = Duration::from_secs(8);

/// Longest generation timeout a profile may carry.
pub const MAX_GENERATION_TIMEOUT: Duration = Duration::from_secs(25);

/// Capabilities of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterProfile {
    /// Scales the per-entity cooldown.
    pub cooldown_multiplier: f64,

    /// Scales natural decay.
    pub decay_sensitivity: f64,

    /// Scales the jealousy penalty.
    pub jealousy_intensity: f64,

    /// Never loses affinity to neglect.
    pub decay_immune: bool,

    /// Deadline for one generation call.
    pub generation_timeout: Duration,

    /// Output budget for one generation call.
    pub max_tokens: usize,

    /// Line used when generation fails.
    pub fallback_line: Option<String>,
}

impl Default for CharacterProfile {
    fn default() -> Self {
        Self {
            cooldown_multiplier: 1.0,
            decay_sensitivity: 1.0,
            jealousy_intensity: 1.0,
            decay_immune: false,
            generation_timeout: Duration::from_secs(15),
            max_tokens: 300,
            fallback_line: None,
        }
    }
}

impl CharacterProfile {
    /// Create a profile with default multipliers.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cooldown_multiplier(mut self, multiplier: f64) -> Self {
        self.cooldown_multiplier = multiplier.max(0.0);
        self
    }

    pub fn with_decay_sensitivity(mut self, sensitivity: f64) -> Self {
        self.decay_sensitivity = sensitivity.max(0.0);
        self
    }

    pub fn with_jealousy_intensity(mut self, intensity: f64) -> Self {
        self.jealousy_intensity = intensity.max(0.0);
        self
    }

    pub fn decay_immune(mut self) -> Self {
        self.decay_immune = true;
        self
    }

    /// Set the generation timeout, kept within the supported backend range.
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout.clamp(MIN_GENERATION_TIMEOUT, MAX_GENERATION_TIMEOUT);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_fallback_line(mut self, line: impl Into<String>) -> Self {
        self.fallback_line = Some(line.into());
        self
    }

    /// The line shown when generation fails.
    pub fn fallback_for(&self, name: &str) -> String {
        self.fallback_line
            .clone()
            .unwrap_or_else(|| format!("{name} pauses, lost in thought."))
    }
}

/// Profiles by entity name, with a shared default.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    profiles: HashMap<String, CharacterProfile>,
    default: CharacterProfile,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile.
    pub fn with_profile(mut self, name: impl Into<String>, profile: CharacterProfile) -> Self {
        self.profiles.insert(name.into(), profile);
        self
    }

    /// Replace the profile used for unregistered entities.
    pub fn with_default(mut self, profile: CharacterProfile) -> Self {
        self.default = profile;
        self
    }

    /// Get an entity's profile, or the default.
    pub fn profile(&self, name: &str) -> &CharacterProfile {
        self.profiles.get(name).unwrap_or(&self.default)
    }

    /// Check whether an entity has its own profile.
    pub fn is_registered(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
