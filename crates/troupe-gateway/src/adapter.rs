//! The gateway adapter: inbound chat events in, persona replies out

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use troupe_core::{PersonaId, RoomId, Roster};
use troupe_hub::{ActorSystem, ConversationManager, Router};

use crate::bus::{InboundRequest, OutboundReply, RequestPublisher, BUS_CHANNEL};
use crate::chat::{ChatClient, ChatEvent};
use crate::chunk::{split_message, DEFAULT_CHUNK_LIMIT};
use crate::mentions::MentionParser;
use crate::worker::{PersonaWorker, DEFAULT_HISTORY_WINDOW};

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

const UNROUTABLE_NOTICE: &str =
    "I couldn't hand that message to any agent right now. Please try again in a moment.";

/// Bridges the chat server, the hub, and the LLM bus.
///
/// Inbound: chat event -> mention parse -> router -> raw utterance on the
/// bus. Outbound: bus reply -> chunked post under the persona identity ->
/// response bookkeeping -> re-injected persona-to-persona mentions.
pub struct Gateway {
    chat: Arc<dyn ChatClient>,
    system: Arc<ActorSystem>,
    conversations: Arc<ConversationManager>,
    router: Arc<Router>,
    roster: Roster,
    mentions: MentionParser,
    requests: RequestPublisher,
    rooms: Vec<RoomId>,
    mailbox_capacity: usize,
    history_window: usize,
    send_timeout: Duration,
    chunk_limit: usize,
}

impl Gateway {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        roster: Roster,
        system: Arc<ActorSystem>,
        conversations: Arc<ConversationManager>,
        router: Arc<Router>,
        requests: RequestPublisher,
    ) -> Self {
        let mentions = MentionParser::new(&roster);
        Self {
            chat,
            system,
            conversations,
            router,
            roster,
            mentions,
            requests,
            rooms: Vec::new(),
            mailbox_capacity: troupe_hub::mailbox::DEFAULT_MAILBOX_CAPACITY,
            history_window: DEFAULT_HISTORY_WINDOW,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            chunk_limit: DEFAULT_CHUNK_LIMIT,
        }
    }

    /// Restrict the gateway to these rooms. Empty means all rooms.
    pub fn with_rooms(mut self, rooms: Vec<RoomId>) -> Self {
        self.rooms = rooms;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_chunk_limit(mut self, limit: usize) -> Self {
        self.chunk_limit = limit;
        self
    }

    /// Register every roster persona, install its worker handler, and
    /// start all mailboxes.
    pub async fn start(&self) -> Result<()> {
        for profile in self.roster.iter() {
            let mailbox = self
                .system
                .register(profile.id.clone(), self.mailbox_capacity)
                .await?;
            mailbox.set_handler(Arc::new(PersonaWorker::new(
                profile.clone(),
                self.conversations.clone(),
                self.requests.clone(),
                self.history_window,
            )))?;
        }
        self.system.start_all().await;
        info!("Gateway started with {} personas", self.roster.len());
        Ok(())
    }

    /// Drive the gateway until cancellation, then shut the hub down.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<ChatEvent>,
        mut replies: mpsc::Receiver<OutboundReply>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = events.recv() => match maybe {
                    Some(event) => self.handle_chat_event(event).await,
                    None => break,
                },
                maybe = replies.recv() => match maybe {
                    Some(reply) => self.handle_reply(reply).await,
                    None => break,
                },
            }
        }

        self.system.stop_all().await;
        self.conversations.stop().await;
        info!("Gateway stopped");
    }

    /// Inbound path for one chat event.
    pub async fn handle_chat_event(&self, event: ChatEvent) {
        // Loop prevention: never re-ingest our own bot identities.
        if self.chat.is_own(&event.author_id) {
            return;
        }
        if !self.rooms.is_empty() && !self.rooms.contains(&event.room) {
            return;
        }

        if let Err(e) = self.chat.typing(&event.room).await {
            debug!("Failed to send typing hint: {:#}", e);
        }

        let targets = self.mentions.parse(&event.text);
        let content = self.mentions.strip(&event.text);

        info!(
            "Received message from {} targeting {:?}",
            event.author_name,
            targets.iter().map(|t| t.as_str()).collect::<Vec<_>>()
        );

        let failures = self
            .router
            .route_from_human(&targets, &content, &event.room, &event.author_id)
            .await;
        for (persona, err) in &failures {
            error!("Failed to route to '{}': {}", persona, err);
        }

        let attempted = if targets.is_empty() { 1 } else { distinct(&targets) };
        if !failures.is_empty() && failures.len() == attempted {
            self.post_unroutable_notice(&event.room).await;
        }

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), event.author_id.clone());
        metadata.insert("display_name".to_string(), event.author_name.clone());
        metadata.insert(
            "target_agents".to_string(),
            targets
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(","),
        );

        let request = InboundRequest {
            channel: BUS_CHANNEL.to_string(),
            sender_id: event.author_id,
            room: event.room.clone(),
            content,
            session_key: format!("multi:{}", event.room),
            metadata,
        };
        if let Err(e) = self.requests.publish(request).await {
            error!("Failed to publish utterance on the bus: {:#}", e);
        }
    }

    /// Outbound path for one completed persona reply.
    pub async fn handle_reply(&self, reply: OutboundReply) {
        let OutboundReply {
            room,
            persona,
            content,
        } = reply;

        if let Err(e) = self.post_chunked(&persona, &room, &content).await {
            error!(
                "Failed to post reply from '{}' in '{}': {:#}",
                persona, room, e
            );
            return;
        }

        // Exactly one resolution per reply, regardless of chunk count.
        self.router
            .handle_agent_response(&persona, &content, &room)
            .await;

        let mentioned = self.mentions.parse(&content);
        if mentioned.is_empty() {
            return;
        }

        let cleaned = self.mentions.strip(&content);
        for target in mentioned {
            if let Err(e) = self
                .router
                .route_to_agent(&persona, &target, &cleaned, &room)
                .await
            {
                error!("Failed to route '{}' -> '{}': {}", persona, target, e);
            }
        }
    }

    /// Post a body in order, chunked, under the persona's identity with a
    /// per-send timeout. Falls back to the gateway identity when the
    /// persona has no client of its own.
    async fn post_chunked(&self, persona: &PersonaId, room: &RoomId, content: &str) -> Result<()> {
        let via_gateway = !self.chat.has_identity(persona);
        if via_gateway {
            warn!(
                "No client for persona '{}', posting via gateway identity",
                persona
            );
        }

        for chunk in split_message(content, self.chunk_limit) {
            let send = async {
                if via_gateway {
                    self.chat.post_via_gateway(room, &chunk).await
                } else {
                    self.chat.post_as(persona, room, &chunk).await
                }
            };

            match tokio::time::timeout(self.send_timeout, send).await {
                Ok(result) => {
                    result.with_context(|| format!("posting as '{}' in '{}'", persona, room))?
                }
                Err(_) => bail!(
                    "send timeout posting as '{}' after {:?}",
                    persona,
                    self.send_timeout
                ),
            }
        }
        Ok(())
    }

    async fn post_unroutable_notice(&self, room: &RoomId) {
        let coordinator = self.router.coordinator().clone();
        if let Err(e) = self.post_chunked(&coordinator, room, UNROUTABLE_NOTICE).await {
            error!("Failed to post unroutable notice in '{}': {:#}", room, e);
        }
    }
}

fn distinct(targets: &[PersonaId]) -> usize {
    let mut seen: Vec<&PersonaId> = Vec::new();
    for t in targets {
        if !seen.contains(&t) {
            seen.push(t);
        }
    }
    seen.len()
}
