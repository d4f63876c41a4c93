//! Request/response bus between the hub and the model side
//!
//! The hub publishes `InboundRequest`s and consumes `OutboundReply`s; the
//! prompt/model machinery lives on the other side of the bus and is not
//! this crate's concern.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use troupe_core::{PersonaId, RoomId};

/// Channel tag carried on every request published by the hub.
pub const BUS_CHANNEL: &str = "multi_agent";

/// A request for the model side: either a raw human utterance or a
/// persona worker's assembled prompt (identified by `metadata["agent"]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundRequest {
    pub channel: String,
    pub sender_id: String,
    pub room: RoomId,
    pub content: String,
    pub session_key: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A completed model reply for one persona in one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundReply {
    pub room: RoomId,
    pub persona: PersonaId,
    pub content: String,
}

/// Bounded two-way bus. Create it once, hand the publisher handles to the
/// hub and the model side, then `split` into the consumer ends.
pub struct LlmBus {
    request_tx: mpsc::Sender<InboundRequest>,
    request_rx: mpsc::Receiver<InboundRequest>,
    reply_tx: mpsc::Sender<OutboundReply>,
    reply_rx: mpsc::Receiver<OutboundReply>,
}

impl LlmBus {
    pub fn new(capacity: usize) -> Self {
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (reply_tx, reply_rx) = mpsc::channel(capacity);
        info!("Created LLM bus (capacity: {})", capacity);
        Self {
            request_tx,
            request_rx,
            reply_tx,
            reply_rx,
        }
    }

    /// Handle used by the hub to publish requests.
    pub fn requests(&self) -> RequestPublisher {
        RequestPublisher {
            tx: self.request_tx.clone(),
        }
    }

    /// Handle used by the model side to post replies.
    pub fn replies(&self) -> ReplyPublisher {
        ReplyPublisher {
            tx: self.reply_tx.clone(),
        }
    }

    /// Consume the bus, yielding the request stream (for the model side)
    /// and the reply stream (for the gateway).
    pub fn split(
        self,
    ) -> (
        mpsc::Receiver<InboundRequest>,
        mpsc::Receiver<OutboundReply>,
    ) {
        (self.request_rx, self.reply_rx)
    }
}

/// Clonable publisher for model requests.
#[derive(Clone)]
pub struct RequestPublisher {
    tx: mpsc::Sender<InboundRequest>,
}

impl RequestPublisher {
    pub async fn publish(&self, request: InboundRequest) -> Result<()> {
        debug!(
            "Publishing request on '{}' (session: {})",
            request.channel, request.session_key
        );
        self.tx
            .send(request)
            .await
            .map_err(|_| anyhow!("LLM request bus is closed"))
    }
}

/// Clonable publisher for model replies.
#[derive(Clone)]
pub struct ReplyPublisher {
    tx: mpsc::Sender<OutboundReply>,
}

impl ReplyPublisher {
    pub async fn publish(&self, reply: OutboundReply) -> Result<()> {
        debug!(
            "Publishing reply from '{}' for room '{}'",
            reply.persona, reply.room
        );
        self.tx
            .send(reply)
            .await
            .map_err(|_| anyhow!("LLM reply bus is closed"))
    }
}
