//! troupe-gateway - bridges the external chat server, the in-process hub,
//! and the LLM request/response bus
//!
//! This crate provides:
//! - The `ChatClient` contract the hub expects from a chat-server client
//! - The mention grammar over the persona roster
//! - Per-persona worker handlers that assemble prompts and publish requests
//! - The `Gateway` adapter owning the inbound and outbound paths

pub mod adapter;
pub mod bus;
pub mod chat;
pub mod chunk;
pub mod mentions;
pub mod worker;

// Re-export main types for convenience
pub use adapter::Gateway;
pub use bus::{InboundRequest, LlmBus, OutboundReply, ReplyPublisher, RequestPublisher};
pub use chat::{ChatClient, ChatEvent};
pub use chunk::split_message;
pub use mentions::MentionParser;
pub use worker::PersonaWorker;
