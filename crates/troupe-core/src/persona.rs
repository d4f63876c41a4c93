//! Persona profiles and the fixed roster declared at start

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::PersonaId;

/// A persona profile defines one AI participant: its identity on the chat
/// server and the system prompt its worker assembles requests from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub id: PersonaId,
    pub display_name: String,
    pub system_prompt: String,
}

impl PersonaProfile {
    pub fn new(
        id: impl Into<PersonaId>,
        display_name: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            system_prompt: system_prompt.into(),
        }
    }
}

/// The fixed set of personas sharing a hub, with one designated coordinator.
///
/// The roster is immutable once built; registration, mention grammar, and
/// routing defaults are all derived from it.
#[derive(Debug, Clone)]
pub struct Roster {
    profiles: Vec<PersonaProfile>,
    coordinator: PersonaId,
}

impl Roster {
    pub fn new(profiles: Vec<PersonaProfile>, coordinator: PersonaId) -> Result<Self> {
        if profiles.is_empty() {
            bail!("roster must declare at least one persona");
        }
        if !profiles.iter().any(|p| p.id == coordinator) {
            bail!("coordinator '{}' is not in the roster", coordinator);
        }
        info!(
            "Roster built with {} personas (coordinator: {})",
            profiles.len(),
            coordinator
        );
        Ok(Self {
            profiles,
            coordinator,
        })
    }

    pub fn get(&self, id: &PersonaId) -> Option<&PersonaProfile> {
        self.profiles.iter().find(|p| &p.id == id)
    }

    pub fn contains(&self, id: &PersonaId) -> bool {
        self.get(id).is_some()
    }

    pub fn coordinator(&self) -> &PersonaId {
        &self.coordinator
    }

    pub fn ids(&self) -> impl Iterator<Item = &PersonaId> {
        self.profiles.iter().map(|p| &p.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PersonaProfile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Built-in roster used when the configuration declares no personas:
/// a coordinator plus four specialists.
pub fn default_roster() -> Roster {
    let profiles = vec![
        PersonaProfile::new(
            PersonaId::new("master"),
            "Master",
            "You are Master, the lead coordinator of a multi-agent team.\n\
             Your role:\n\
             - Coordinate work between Dev, QA, PM, and Ops agents\n\
             - Make high-level decisions and delegate tasks\n\
             - Synthesize information from other agents\n\
             - Respond to humans when no specific agent is mentioned\n\n\
             When delegating, use @dev, @qa, @pm, or @ops to address specific agents.\n\
             Keep responses concise and actionable.",
        ),
        PersonaProfile::new(
            PersonaId::new("dev"),
            "Dev",
            "You are Dev, the development specialist.\n\
             Your role:\n\
             - Write and review code\n\
             - Implement features and fix bugs\n\
             - Explain technical concepts\n\
             - Suggest architectural improvements\n\n\
             When you need QA testing, mention @qa. For deployment, mention @ops.\n\
             Focus on clean, maintainable code.",
        ),
        PersonaProfile::new(
            PersonaId::new("qa"),
            "QA",
            "You are QA, the quality assurance specialist.\n\
             Your role:\n\
             - Review code for bugs and edge cases\n\
             - Suggest test scenarios\n\
             - Verify implementations meet requirements\n\
             - Report issues to @dev\n\n\
             Be thorough but constructive in your feedback.",
        ),
        PersonaProfile::new(
            PersonaId::new("pm"),
            "PM",
            "You are PM, the product manager.\n\
             Your role:\n\
             - Clarify requirements and user stories\n\
             - Prioritize features and tasks\n\
             - Track progress and blockers\n\
             - Communicate with stakeholders\n\n\
             Keep the team focused on delivering value.",
        ),
        PersonaProfile::new(
            PersonaId::new("ops"),
            "Ops",
            "You are Ops, the operations specialist.\n\
             Your role:\n\
             - Handle deployment and infrastructure\n\
             - Monitor system health\n\
             - Manage configurations\n\
             - Respond to incidents\n\n\
             Prioritize stability and reliability.",
        ),
    ];

    Roster::new(profiles, PersonaId::new("master")).expect("default roster is valid")
}
