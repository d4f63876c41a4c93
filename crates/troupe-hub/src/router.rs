//! Routes human utterances and persona traffic into mailboxes, keeping
//! conversation bookkeeping consistent

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error};

use troupe_core::{ActorMessage, ConversationMessage, PersonaId, RoomId, Sender};

use crate::actor::ActorSystem;
use crate::conversation::ConversationManager;
use crate::error::HubError;

/// Translates "human utterance with targets" and "persona reply with
/// mentions" into mailbox sends.
///
/// Every accepted enqueue increments the room's pending counter exactly
/// once; `handle_agent_response` is the only completion path, and a failed
/// enqueue rolls its increment back immediately.
pub struct Router {
    system: Arc<ActorSystem>,
    conversations: Arc<ConversationManager>,
    coordinator: PersonaId,
    seq: AtomicU64,
}

impl Router {
    pub fn new(
        system: Arc<ActorSystem>,
        conversations: Arc<ConversationManager>,
        coordinator: PersonaId,
    ) -> Self {
        Self {
            system,
            conversations,
            coordinator,
            seq: AtomicU64::new(0),
        }
    }

    pub fn coordinator(&self) -> &PersonaId {
        &self.coordinator
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Route a human utterance to its targets.
    ///
    /// Empty targets default to the coordinator; duplicates are dropped
    /// keeping first-seen order. The history entry records the effective
    /// target list. Per-target enqueue failures are returned aggregated;
    /// the remaining targets still proceed.
    pub async fn route_from_human(
        &self,
        targets: &[PersonaId],
        content: &str,
        room: &RoomId,
        sender_id: &str,
    ) -> Vec<(PersonaId, HubError)> {
        let targets = self.resolve_targets(targets);
        let conv = self.conversations.get_or_create(room).await;

        conv.add_message(
            ConversationMessage::new(
                self.next_id("human"),
                Sender::Human,
                targets.clone(),
                content,
            )
            .with_metadata("sender_id", sender_id),
        )
        .await;

        let mut failures = Vec::new();
        for to in targets {
            let msg = ActorMessage::new(
                self.next_id("msg"),
                Sender::Human,
                to.clone(),
                room.clone(),
                content,
            )
            .with_metadata("sender_id", sender_id)
            .with_metadata("is_human", "true");

            conv.increment_pending().await;
            if let Err(e) = self.system.route(msg).await {
                conv.decrement_pending().await;
                error!("Failed to route human message to '{}': {}", to, e);
                failures.push((to, e));
            }
        }

        failures
    }

    /// Route one persona-to-persona message. Self-mentions route like any
    /// other target.
    pub async fn route_to_agent(
        &self,
        from: &PersonaId,
        to: &PersonaId,
        content: &str,
        room: &RoomId,
    ) -> Result<(), HubError> {
        let conv = self.conversations.get_or_create(room).await;

        let msg = ActorMessage::new(
            self.next_id("msg"),
            Sender::Persona(from.clone()),
            to.clone(),
            room.clone(),
            content,
        );

        conv.increment_pending().await;
        if let Err(e) = self.system.route(msg).await {
            conv.decrement_pending().await;
            return Err(e);
        }

        conv.add_message(ConversationMessage::new(
            self.next_id("msg"),
            Sender::Persona(from.clone()),
            vec![to.clone()],
            content,
        ))
        .await;

        Ok(())
    }

    /// Resolve one enqueued message: called exactly once per reply posted,
    /// not once per reply line. A reply for an unknown room is a no-op.
    pub async fn handle_agent_response(&self, from: &PersonaId, content: &str, room: &RoomId) {
        let Some(conv) = self.conversations.get(room).await else {
            debug!("Reply from '{}' for unknown room '{}'", from, room);
            return;
        };

        conv.decrement_pending().await;
        conv.add_message(ConversationMessage::new(
            self.next_id("resp"),
            Sender::Persona(from.clone()),
            vec![],
            content,
        ))
        .await;
    }

    /// Dedup preserving first-seen order; empty defaults to the coordinator.
    fn resolve_targets(&self, targets: &[PersonaId]) -> Vec<PersonaId> {
        let mut seen = Vec::new();
        for t in targets {
            if !seen.contains(t) {
                seen.push(t.clone());
            }
        }
        if seen.is_empty() {
            seen.push(self.coordinator.clone());
        }
        seen
    }
}
