//! troupe-core - shared data model for the troupe multi-agent chat hub
//!
//! This crate provides:
//! - Message types flowing through the hub (`ActorMessage`, `ConversationMessage`)
//! - Persona identity and roster types
//! - System prompt assembly for persona workers

pub mod context;
pub mod persona;
pub mod types;

// Re-export main types for convenience
pub use context::build_persona_prompt;
pub use persona::{default_roster, PersonaProfile, Roster};
pub use types::{ActorMessage, ConversationMessage, PersonaId, RoomId, Sender};
