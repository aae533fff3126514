//! Text generation boundary.
//!
//! The engine never talks to a model directly. It assembles a
//! [`GenerationContext`] and hands it to a [`Generator`], which returns text or
//! fails. Every call runs under a deadline.

pub mod anthropic;

pub use anthropic::AnthropicGenerator;

use crate::error::GenerationError;
use crate::memory::RetrievedMemories;
use crate::store::{CharacterState, RelationshipRecord};
use async_trait::async_trait;
use std::fmt::Write;
use std::time::Duration;

/// Everything known about an entity when it is asked to speak.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationContext {
    pub state: CharacterState,
    pub memories: RetrievedMemories,
    pub relationships: Vec<RelationshipRecord>,
    /// What the entity is responding to.
    pub prompt: String,
}

impl GenerationContext {
    /// Render the context as plain text for a model prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let state = &self.state;
        let location = state.location.unwrap_or_default();

        let _ = writeln!(out, "## State");
        let _ = writeln!(
            out,
            "Mood: {}. Energy: {}/100. Patience: {}/100. Location: {}.",
            state.mood, state.energy, state.patience, location
        );

        if !self.memories.pinned.is_empty() {
            let _ = writeln!(out, "\n## Core Memories");
            for memory in &self.memories.pinned {
                let _ = writeln!(out, "- {}", memory.content);
            }
        }

        if !self.memories.working.is_empty() {
            let _ = writeln!(out, "\n## Recent Memories");
            for memory in &self.memories.working {
                let _ = writeln!(out, "- {}", memory.content);
            }
        }

        if !self.relationships.is_empty() {
            let _ = writeln!(out, "\n## Relationships");
            for rel in &self.relationships {
                match &rel.bond_type {
                    Some(bond) => {
                        let _ = writeln!(out, "- {}: {} ({})", rel.target, rel.affinity, bond);
                    }
                    None => {
                        let _ = writeln!(out, "- {}: {}", rel.target, rel.affinity);
                    }
                }
            }
        }

        let _ = writeln!(out, "\n## Prompt\n{}", self.prompt);
        out
    }
}

/// Limits on one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    pub max_tokens: usize,
    pub timeout: Duration,
}

/// A text generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce text for `identity` given its context.
    async fn generate(
        &self,
        identity: &str,
        context: &GenerationContext,
        constraints: &Constraints,
    ) -> Result<String, GenerationError>;

    /// Backend name, for logs.
    fn name(&self) -> &str;
}

/// Run a generator under the deadline in `constraints`.
pub async fn generate_with_timeout(
    generator: &dyn Generator,
    identity: &str,
    context: &GenerationContext,
    constraints: &Constraints,
) -> Result<String, GenerationError> {
    match tokio::time::timeout(
        constraints.timeout,
        generator.generate(identity, context, constraints),
    )
    .await
    {
        Ok(Ok(text)) if text.trim().is_empty() => Err(GenerationError::Empty),
        Ok(result) => result,
        Err(_) => Err(GenerationError::Timeout {
            duration: constraints.timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Location, MemoryId, MemoryRecord};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_render_includes_sections() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let core = MemoryRecord {
            id: MemoryId::new(),
            character: "ada".to_string(),
            content: "Founded the team".to_string(),
            importance: 10,
            is_pinned: true,
            created_at: now,
            expires_at: None,
        };
        let context = GenerationContext {
            state: CharacterState::new("ada", now).with_location(Location::StudyArea),
            memories: RetrievedMemories {
                pinned: vec![core],
                working: Vec::new(),
            },
            relationships: vec![RelationshipRecord::new("ada", "bo").with_affinity(55)],
            prompt: "How was the weekend?".to_string(),
        };

        let text = context.render();
        assert!(text.contains("Location: study area."));
        assert!(text.contains("## Core Memories\n- Founded the team"));
        assert!(!text.contains("## Recent Memories"));
        assert!(text.contains("- bo: 55"));
        assert!(text.ends_with("How was the weekend?\n"));
    }
}
