//! troupe-hub - the in-process messaging fabric of the troupe chat hub
//!
//! This crate provides:
//! - Bounded per-persona mailboxes, each drained by a single worker task
//! - The actor system registry with lifecycle and statistics
//! - Per-room conversation state with pending tracking and an idle reaper
//! - The router translating human and persona traffic into mailbox sends

pub mod actor;
pub mod conversation;
pub mod error;
pub mod mailbox;
pub mod router;

// Re-export main types for convenience
pub use actor::{ActorSystem, MailboxStats};
pub use conversation::{Conversation, ConversationManager, ConversationState};
pub use error::HubError;
pub use mailbox::{Mailbox, MessageHandler};
pub use router::Router;
