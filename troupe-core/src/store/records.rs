//! Typed rows.
//!
//! These are the shapes the engine reads from and writes to the store. Field
//! names are the column names.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Define a newtype ID wrapper around UUID.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random ID.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Get the underlying UUID.
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.0.to_string()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_id!(
    /// Identifier of a memory row.
    MemoryId
);

define_id!(
    /// Identifier of an action log row.
    ActionId
);

define_id!(
    /// Identifier of a want.
    WantId
);

/// Where an entity currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    /// The shared default space.
    #[default]
    MainFloor,
    RestArea,
    OpsArea,
    Meeting,
    StudyArea,
    Outing,
}

impl Location {
    /// Every location other than the main floor.
    pub const SPECIAL: [Location; 5] = [
        Location::RestArea,
        Location::OpsArea,
        Location::Meeting,
        Location::StudyArea,
        Location::Outing,
    ];

    /// Get the display name.
    pub fn name(&self) -> &'static str {
        match self {
            Location::MainFloor => "main floor",
            Location::RestArea => "rest area",
            Location::OpsArea => "ops area",
            Location::Meeting => "meeting",
            Location::StudyArea => "study area",
            Location::Outing => "outing",
        }
    }

    /// Special locations suppress default-context relocation.
    pub fn is_special(&self) -> bool {
        !matches!(self, Location::MainFloor)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lowest value a resource stat may hold.
pub const STAT_MIN: i32 = 0;

/// Highest value a resource stat may hold.
pub const STAT_MAX: i32 = 100;

/// Clamp a resource stat to its valid range.
pub fn clamp_stat(value: i32) -> i32 {
    value.clamp(STAT_MIN, STAT_MAX)
}

fn default_mood() -> String {
    "neutral".to_string()
}

fn full() -> i32 {
    STAT_MAX
}

/// Per-entity mutable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    /// Stable identity.
    pub name: String,
    #[serde(default = "default_mood")]
    pub mood: String,
    #[serde(default = "full")]
    pub energy: i32,
    #[serde(default = "full")]
    pub patience: i32,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub last_spoke_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interactions_today: u32,
    /// Last time resources were materialized.
    pub updated_at: DateTime<Utc>,
}

impl CharacterState {
    /// Create a fresh entity, rested and neutral.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            mood: default_mood(),
            energy: STAT_MAX,
            patience: STAT_MAX,
            location: None,
            last_spoke_at: None,
            interactions_today: 0,
            updated_at: now,
        }
    }

    pub fn with_energy(mut self, energy: i32) -> Self {
        self.energy = clamp_stat(energy);
        self
    }

    pub fn with_patience(mut self, patience: i32) -> Self {
        self.patience = clamp_stat(patience);
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = mood.into();
        self
    }

    pub fn with_last_spoke_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_spoke_at = Some(at);
        self
    }

    /// Check whether the entity is currently resting.
    pub fn is_resting(&self) -> bool {
        self.location == Some(Location::RestArea)
    }

    /// Check whether the entity sits somewhere other than the main floor.
    pub fn at_special_location(&self) -> bool {
        self.location.is_some_and(|l| l.is_special())
    }
}

/// A textual memory owned by one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub character: String,
    pub content: String,
    /// 1 to 10.
    pub importance: u8,
    #[serde(default)]
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
    /// Required for non-pinned memories.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryRecord {
    /// Pinned memories never expire; others are live until `expires_at`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_pinned || self.expires_at.is_some_and(|at| at > now)
    }
}

/// How one entity feels about another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub character: String,
    pub target: String,
    /// -100 to 100.
    #[serde(default)]
    pub affinity: i32,
    #[serde(default)]
    pub bond_type: Option<String>,
    #[serde(default)]
    pub bond_exclusive: bool,
    #[serde(default)]
    pub last_interaction_at: Option<DateTime<Utc>>,
}

impl RelationshipRecord {
    /// Create a neutral relationship.
    pub fn new(character: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            character: character.into(),
            target: target.into(),
            affinity: 0,
            bond_type: None,
            bond_exclusive: false,
            last_interaction_at: None,
        }
    }

    pub fn with_affinity(mut self, affinity: i32) -> Self {
        self.affinity = affinity.clamp(-100, 100);
        self
    }

    pub fn with_last_interaction(mut self, at: DateTime<Utc>) -> Self {
        self.last_interaction_at = Some(at);
        self
    }
}

/// One committed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: ActionId,
    pub character: String,
    pub context: Location,
    pub occurred_at: DateTime<Utc>,
}

/// One direct relationship event between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub character: String,
    pub target: String,
    pub delta: i32,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

impl InteractionRecord {
    /// The other party, if `name` took part.
    pub fn counterpart(&self, name: &str) -> Option<&str> {
        if self.character == name {
            Some(&self.target)
        } else if self.target == name {
            Some(&self.character)
        } else {
            None
        }
    }
}

/// Something an entity wants, optionally from someone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WantRecord {
    pub id: WantId,
    pub character: String,
    #[serde(default)]
    pub target: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub fulfilled_at: Option<DateTime<Utc>>,
}

/// Decay already applied to an entity on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayLedgerEntry {
    pub character: String,
    pub day: NaiveDate,
    /// Total affinity removed so far, as a positive number.
    pub applied: i32,
}
