//! Contract the hub expects from a chat-server client

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use troupe_core::{PersonaId, RoomId};

/// One incoming message from the chat server.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub author_id: String,
    pub author_name: String,
    pub room: RoomId,
    pub text: String,
}

/// Capabilities the external chat-server client must provide.
///
/// The network side (how bytes become events and how posts go out) is the
/// collaborator's business; the gateway only relies on this surface.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Start delivering incoming messages to the provided sender.
    async fn start(&self, tx: mpsc::Sender<ChatEvent>) -> Result<()>;

    /// Post `text` in `room` under the persona's dedicated identity.
    async fn post_as(&self, persona: &PersonaId, room: &RoomId, text: &str) -> Result<()>;

    /// Post `text` in `room` under the gateway's master identity.
    async fn post_via_gateway(&self, room: &RoomId, text: &str) -> Result<()>;

    /// Best-effort typing hint.
    async fn typing(&self, room: &RoomId) -> Result<()>;

    /// Whether a dedicated client exists for this persona's identity.
    fn has_identity(&self, persona: &PersonaId) -> bool;

    /// Loop prevention: does this author id belong to one of our own bot
    /// identities (any persona or the gateway itself)?
    fn is_own(&self, author_id: &str) -> bool;
}
