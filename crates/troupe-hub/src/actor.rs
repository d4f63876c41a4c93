//! Actor system: persona registry, routing, and lifecycle

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use troupe_core::{ActorMessage, PersonaId};

use crate::error::HubError;
use crate::mailbox::Mailbox;

/// Snapshot of one mailbox's queue state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxStats {
    pub depth: usize,
    pub capacity: usize,
}

/// Registry of persona -> mailbox, driving all workers in lockstep.
///
/// The registry is read-mostly; registration happens once at start, then
/// routing only takes the read lock.
pub struct ActorSystem {
    mailboxes: RwLock<HashMap<PersonaId, Arc<Mailbox>>>,
    started: AtomicBool,
}

impl ActorSystem {
    pub fn new() -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Register a persona with the given mailbox capacity.
    ///
    /// Re-registering before `start_all` replaces the mailbox with the new
    /// capacity; afterwards the registry is frozen and new personas are
    /// rejected.
    pub async fn register(
        &self,
        persona: PersonaId,
        capacity: usize,
    ) -> Result<Arc<Mailbox>, HubError> {
        let mut mailboxes = self.mailboxes.write().await;

        if self.started.load(Ordering::SeqCst) {
            if let Some(existing) = mailboxes.get(&persona) {
                warn!(
                    "Ignoring re-registration of '{}' after start",
                    persona
                );
                return Ok(existing.clone());
            }
            return Err(HubError::AlreadyStarted { persona });
        }

        let mailbox = Arc::new(Mailbox::new(persona.clone(), capacity));
        mailboxes.insert(persona.clone(), mailbox.clone());
        info!("Registered persona '{}' (capacity: {})", persona, capacity);
        Ok(mailbox)
    }

    pub async fn get(&self, persona: &PersonaId) -> Option<Arc<Mailbox>> {
        self.mailboxes.read().await.get(persona).cloned()
    }

    /// Forward a message to its target persona's mailbox.
    pub async fn route(&self, msg: ActorMessage) -> Result<(), HubError> {
        let mailbox = {
            let mailboxes = self.mailboxes.read().await;
            mailboxes.get(&msg.to).cloned()
        };

        match mailbox {
            Some(mailbox) => mailbox.send(msg),
            None => Err(HubError::UnknownPersona {
                persona: msg.to.clone(),
            }),
        }
    }

    /// Send one copy of `msg` to every listed persona; per-target failures
    /// are collected, successes proceed regardless.
    pub async fn broadcast(
        &self,
        msg: ActorMessage,
        personas: &[PersonaId],
    ) -> Vec<(PersonaId, HubError)> {
        let mut failures = Vec::new();

        for persona in personas {
            let mut copy = msg.clone();
            copy.to = persona.clone();
            if let Err(e) = self.route(copy).await {
                failures.push((persona.clone(), e));
            }
        }

        failures
    }

    /// Start every registered mailbox worker. Idempotent.
    pub async fn start_all(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Actor system already started");
            return;
        }

        let mailboxes = self.mailboxes.read().await;
        for mailbox in mailboxes.values() {
            mailbox.start();
        }
        info!("All {} mailboxes started", mailboxes.len());
    }

    /// Stop every mailbox worker. Idempotent; in-flight handlers observe
    /// cancellation at their next await point.
    pub async fn stop_all(&self) {
        let mailboxes = self.mailboxes.read().await;
        for mailbox in mailboxes.values() {
            mailbox.stop();
        }
        info!("All mailboxes stopped");
    }

    /// Snapshot of queue depth and capacity per persona.
    pub async fn stats(&self) -> HashMap<PersonaId, MailboxStats> {
        let mailboxes = self.mailboxes.read().await;
        mailboxes
            .iter()
            .map(|(persona, mailbox)| {
                (
                    persona.clone(),
                    MailboxStats {
                        depth: mailbox.depth(),
                        capacity: mailbox.capacity(),
                    },
                )
            })
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.mailboxes.read().await.len()
    }
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}
