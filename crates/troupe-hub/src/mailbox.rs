//! Bounded per-persona mailbox drained by a single worker task

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use troupe_core::{ActorMessage, PersonaId};

use crate::error::HubError;

pub const DEFAULT_MAILBOX_CAPACITY: usize = 100;

/// Handler invoked by a mailbox worker for each delivered message.
///
/// Handler errors are logged and swallowed; the worker proceeds to the
/// next message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: ActorMessage) -> anyhow::Result<()>;
}

/// A bounded FIFO queue owned by one persona, drained by exactly one
/// worker task.
///
/// `send` is a non-blocking offer; a full queue is a reportable error.
/// Messages enqueued into a single mailbox reach the handler in enqueue
/// order. No ordering is defined across mailboxes.
pub struct Mailbox {
    persona: PersonaId,
    capacity: usize,
    tx: mpsc::Sender<ActorMessage>,
    // Taken by the first start(); None afterwards.
    rx: Mutex<Option<mpsc::Receiver<ActorMessage>>>,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl Mailbox {
    pub fn new(persona: PersonaId, capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_MAILBOX_CAPACITY
        } else {
            capacity
        };
        let (tx, rx) = mpsc::channel(capacity);

        Self {
            persona,
            capacity,
            tx,
            rx: Mutex::new(Some(rx)),
            handler: RwLock::new(None),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn persona(&self) -> &PersonaId {
        &self.persona
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current queue depth.
    pub fn depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Install the worker handler. Only allowed while unstarted.
    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) -> Result<(), HubError> {
        if self.started.load(Ordering::SeqCst) {
            warn!(
                "Rejected handler change for started mailbox '{}'",
                self.persona
            );
            return Err(HubError::AlreadyStarted {
                persona: self.persona.clone(),
            });
        }
        *self.handler.write().expect("handler lock poisoned") = Some(handler);
        Ok(())
    }

    /// Non-blocking offer. Fails when the queue is full or the mailbox
    /// has been stopped.
    pub fn send(&self, msg: ActorMessage) -> Result<(), HubError> {
        if self.cancel.is_cancelled() {
            return Err(HubError::MailboxClosed {
                persona: self.persona.clone(),
            });
        }

        match self.tx.try_send(msg) {
            Ok(()) => {
                debug!(
                    "Message queued for '{}' (depth: {})",
                    self.persona,
                    self.depth()
                );
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Mailbox full for '{}' ({} messages)",
                    self.persona, self.capacity
                );
                Err(HubError::MailboxFull {
                    persona: self.persona.clone(),
                    depth: self.capacity,
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => Err(HubError::MailboxClosed {
                persona: self.persona.clone(),
            }),
        }
    }

    /// Blocking offer, bounded by `timeout`.
    pub async fn send_timeout(
        &self,
        msg: ActorMessage,
        timeout: Duration,
    ) -> Result<(), HubError> {
        if self.cancel.is_cancelled() {
            return Err(HubError::MailboxClosed {
                persona: self.persona.clone(),
            });
        }

        match self.tx.send_timeout(msg, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(HubError::SendTimeout {
                persona: self.persona.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(SendTimeoutError::Closed(_)) => Err(HubError::MailboxClosed {
                persona: self.persona.clone(),
            }),
        }
    }

    /// Spawn the single worker task. A second call is a logged no-op.
    pub fn start(&self) {
        let mut rx_guard = self.rx.lock().expect("receiver lock poisoned");
        let Some(mut rx) = rx_guard.take() else {
            warn!("Mailbox '{}' already started", self.persona);
            return;
        };
        drop(rx_guard);
        self.started.store(true, Ordering::SeqCst);

        // The handler is fixed once the worker is running.
        let handler = self.handler.read().expect("handler lock poisoned").clone();
        let persona = self.persona.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    maybe = rx.recv() => match maybe {
                        Some(msg) => process_message(&persona, handler.as_deref(), msg).await,
                        None => break,
                    },
                }
            }
            debug!("Mailbox worker for '{}' exited", persona);
        });

        info!(
            "Mailbox started for '{}' (capacity: {})",
            self.persona, self.capacity
        );
    }

    /// Signal the worker to exit after at most the message it is currently
    /// processing. Idempotent; further sends fail afterwards.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        info!("Mailbox stopped for '{}'", self.persona);
    }
}

async fn process_message(persona: &PersonaId, handler: Option<&dyn MessageHandler>, msg: ActorMessage) {
    let Some(handler) = handler else {
        warn!("No handler set for mailbox '{}', dropping message", persona);
        return;
    };

    if let Err(e) = handler.handle(msg).await {
        error!("Handler error for '{}': {:#}", persona, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use troupe_core::{RoomId, Sender};

    struct RecordingHandler {
        seen: Arc<StdMutex<Vec<String>>>,
        notify: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, msg: ActorMessage) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(msg.id.clone());
            let _ = self.notify.send(());
            Ok(())
        }
    }

    struct FailingHandler {
        notify: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl MessageHandler for FailingHandler {
        async fn handle(&self, _msg: ActorMessage) -> anyhow::Result<()> {
            let _ = self.notify.send(());
            anyhow::bail!("boom")
        }
    }

    fn msg(id: &str) -> ActorMessage {
        ActorMessage::new(
            id,
            Sender::Human,
            PersonaId::new("dev"),
            RoomId::new("general"),
            "content",
        )
    }

    #[tokio::test]
    async fn test_fifo_delivery_order() {
        let mailbox = Mailbox::new(PersonaId::new("dev"), 10);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        mailbox
            .set_handler(Arc::new(RecordingHandler {
                seen: seen.clone(),
                notify: tx,
            }))
            .unwrap();

        mailbox.send(msg("a")).unwrap();
        mailbox.send(msg("b")).unwrap();
        mailbox.send(msg("c")).unwrap();
        mailbox.start();

        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_send_fails_when_full() {
        let mailbox = Mailbox::new(PersonaId::new("qa"), 1);
        mailbox.send(msg("a")).unwrap();

        let result = mailbox.send(msg("b"));
        assert!(matches!(result, Err(HubError::MailboxFull { .. })));
        assert_eq!(mailbox.depth(), 1);
    }

    #[tokio::test]
    async fn test_send_timeout_when_full() {
        let mailbox = Mailbox::new(PersonaId::new("qa"), 1);
        mailbox.send(msg("a")).unwrap();

        let result = mailbox
            .send_timeout(msg("b"), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(HubError::SendTimeout { .. })));
    }

    #[tokio::test]
    async fn test_send_fails_after_stop() {
        let mailbox = Mailbox::new(PersonaId::new("dev"), 10);
        mailbox.start();
        mailbox.stop();
        mailbox.stop(); // idempotent

        let result = mailbox.send(msg("a"));
        assert!(matches!(result, Err(HubError::MailboxClosed { .. })));
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_worker() {
        let mailbox = Mailbox::new(PersonaId::new("dev"), 10);
        let (tx, mut rx) = mpsc::unbounded_channel();
        mailbox
            .set_handler(Arc::new(FailingHandler { notify: tx }))
            .unwrap();
        mailbox.start();

        mailbox.send(msg("a")).unwrap();
        mailbox.send(msg("b")).unwrap();

        // Both messages reach the handler despite the first error.
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_handler_rejected_after_start() {
        let mailbox = Mailbox::new(PersonaId::new("dev"), 10);
        mailbox.start();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = mailbox.set_handler(Arc::new(RecordingHandler { seen, notify: tx }));
        assert!(matches!(result, Err(HubError::AlreadyStarted { .. })));
    }

    #[tokio::test]
    async fn test_zero_capacity_uses_default() {
        let mailbox = Mailbox::new(PersonaId::new("dev"), 0);
        assert_eq!(mailbox.capacity(), DEFAULT_MAILBOX_CAPACITY);
    }
}
