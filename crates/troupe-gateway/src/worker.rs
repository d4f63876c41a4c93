//! Per-persona mailbox handlers

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use troupe_core::{build_persona_prompt, ActorMessage, PersonaProfile, Sender};
use troupe_hub::{ConversationManager, MessageHandler};

use crate::bus::{InboundRequest, RequestPublisher, BUS_CHANNEL};

pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Mailbox handler for one persona: turns each delivered `ActorMessage`
/// into a model request carrying the persona's prompt and the room's
/// recent transcript.
pub struct PersonaWorker {
    profile: PersonaProfile,
    conversations: Arc<ConversationManager>,
    requests: RequestPublisher,
    history_window: usize,
}

impl PersonaWorker {
    pub fn new(
        profile: PersonaProfile,
        conversations: Arc<ConversationManager>,
        requests: RequestPublisher,
        history_window: usize,
    ) -> Self {
        let history_window = if history_window == 0 {
            DEFAULT_HISTORY_WINDOW
        } else {
            history_window
        };
        Self {
            profile,
            conversations,
            requests,
            history_window,
        }
    }
}

#[async_trait]
impl MessageHandler for PersonaWorker {
    async fn handle(&self, msg: ActorMessage) -> anyhow::Result<()> {
        info!(
            "Persona '{}' processing message from {} in room '{}'",
            self.profile.id,
            msg.from.label(),
            msg.room
        );

        // Copy the window out before any bus I/O.
        let conv = self.conversations.get_or_create(&msg.room).await;
        let transcript = conv.context_for(&self.profile.id, self.history_window).await;
        let system_prompt = build_persona_prompt(&self.profile, &transcript);

        let sender_id = match &msg.from {
            Sender::Persona(id) => id.to_string(),
            _ => msg.metadata.get("sender_id").cloned().unwrap_or_default(),
        };

        let mut metadata = HashMap::new();
        metadata.insert("agent".to_string(), self.profile.id.to_string());
        metadata.insert("system_prompt".to_string(), system_prompt);
        metadata.insert("is_multi_agent".to_string(), "true".to_string());

        let request = InboundRequest {
            channel: BUS_CHANNEL.to_string(),
            sender_id,
            room: msg.room.clone(),
            content: format!("[From {}]: {}", msg.from.label(), msg.content),
            session_key: format!("multi:{}:{}", msg.room, self.profile.id),
            metadata,
        };

        self.requests.publish(request).await
    }
}
