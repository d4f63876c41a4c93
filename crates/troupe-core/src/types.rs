//! Shared types for troupe-core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of a persona in the roster.
///
/// Persona ids are lowercase tokens (`master`, `dev`, ...). Construction
/// normalizes case so that mention parsing and routing agree on the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonaId(String);

impl PersonaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PersonaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PersonaId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Opaque handle for one external chat channel (a room).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Who authored a message: the human in the room, a persona, or the hub itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Human,
    Persona(PersonaId),
    System,
}

impl Sender {
    pub fn is_human(&self) -> bool {
        matches!(self, Sender::Human)
    }

    /// Label used in transcripts: `Human`, the persona id, or `System`.
    pub fn label(&self) -> &str {
        match self {
            Sender::Human => "Human",
            Sender::Persona(id) => id.as_str(),
            Sender::System => "System",
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A unit of work bound for exactly one persona's mailbox.
///
/// Immutable after creation; the router assigns ids from a monotonic
/// sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorMessage {
    pub id: String,
    pub from: Sender,
    pub to: PersonaId,
    pub room: RoomId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ActorMessage {
    pub fn new(
        id: impl Into<String>,
        from: Sender,
        to: PersonaId,
        room: RoomId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from,
            to,
            room,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An entry in a room's conversation history.
///
/// `to` is the set of addressed personas; empty means a broadcast reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub from: Sender,
    pub to: Vec<PersonaId>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ConversationMessage {
    pub fn new(
        id: impl Into<String>,
        from: Sender,
        to: Vec<PersonaId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from,
            to,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_human(&self) -> bool {
        self.from.is_human()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_id_normalizes_case() {
        assert_eq!(PersonaId::new("Dev"), PersonaId::new("dev"));
        assert_eq!(PersonaId::new("QA").as_str(), "qa");
    }

    #[test]
    fn test_sender_labels() {
        assert_eq!(Sender::Human.label(), "Human");
        assert_eq!(Sender::Persona(PersonaId::new("dev")).label(), "dev");
        assert_eq!(Sender::System.label(), "System");
    }

    #[test]
    fn test_actor_message_metadata() {
        let msg = ActorMessage::new(
            "msg_1",
            Sender::Human,
            PersonaId::new("dev"),
            RoomId::new("general"),
            "fix it",
        )
        .with_metadata("sender_id", "u123");

        assert_eq!(msg.metadata.get("sender_id").map(String::as_str), Some("u123"));
        assert_eq!(msg.to, PersonaId::new("dev"));
    }

    #[test]
    fn test_conversation_message_is_human() {
        let human = ConversationMessage::new("h1", Sender::Human, vec![], "hi");
        let reply = ConversationMessage::new(
            "r1",
            Sender::Persona(PersonaId::new("qa")),
            vec![],
            "done",
        );
        assert!(human.is_human());
        assert!(!reply.is_human());
    }
}
