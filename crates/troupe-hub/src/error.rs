//! Error types for the messaging fabric

use thiserror::Error;
use troupe_core::PersonaId;

/// Errors surfaced by mailboxes, the actor system, and the router.
///
/// Queue-full and unknown-persona conditions are reportable to callers,
/// never silently dropped; the router pairs every failed enqueue with a
/// pending-counter rollback.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("mailbox full for persona '{persona}': {depth} messages (capacity {capacity})")]
    MailboxFull {
        persona: PersonaId,
        depth: usize,
        capacity: usize,
    },

    #[error("persona '{persona}' is not registered")]
    UnknownPersona { persona: PersonaId },

    #[error("mailbox for persona '{persona}' is stopped")]
    MailboxClosed { persona: PersonaId },

    #[error("timed out enqueueing for persona '{persona}' after {timeout_ms}ms")]
    SendTimeout { persona: PersonaId, timeout_ms: u64 },

    #[error("persona '{persona}' cannot be changed after the system started")]
    AlreadyStarted { persona: PersonaId },
}
