//! Per-room conversation state and the idle reaper

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use troupe_core::{ConversationMessage, PersonaId, RoomId, Sender};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Entries retained per room before front eviction kicks in.
const HISTORY_CAP: usize = 1000;

/// Lifecycle state of a conversation.
///
/// `Idle` is only ever the state of a never-touched room; once pending
/// work resolves the room settles back to `Active`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    Active,
    Processing,
    Closed,
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Processing => write!(f, "processing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

struct ConversationInner {
    state: ConversationState,
    pending: usize,
    history: VecDeque<ConversationMessage>,
    active_agents: HashSet<PersonaId>,
    last_activity: DateTime<Utc>,
}

/// Tracks one room's history window, in-flight work, and participants.
///
/// All mutation happens under the per-conversation lock; readers copy the
/// window they need out before doing anything slow.
pub struct Conversation {
    id: String,
    room: RoomId,
    created_at: DateTime<Utc>,
    idle_timeout: Duration,
    inner: RwLock<ConversationInner>,
}

impl Conversation {
    fn new(room: RoomId, idle_timeout: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: format!("conv_{}", Uuid::new_v4()),
            room,
            created_at: now,
            idle_timeout,
            inner: RwLock::new(ConversationInner {
                state: ConversationState::Idle,
                pending: 0,
                history: VecDeque::new(),
                active_agents: HashSet::new(),
                last_activity: now,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Append a message, stamping it under the lock so history timestamps
    /// are non-decreasing. Tracks the sender and every addressee as active
    /// participants.
    pub async fn add_message(&self, mut msg: ConversationMessage) {
        let mut inner = self.inner.write().await;

        msg.timestamp = Utc::now();
        if let Sender::Persona(id) = &msg.from {
            inner.active_agents.insert(id.clone());
        }
        for to in &msg.to {
            inner.active_agents.insert(to.clone());
        }

        inner.history.push_back(msg);
        if inner.history.len() > HISTORY_CAP {
            inner.history.pop_front();
            debug!("History cap reached for '{}', evicting oldest entry", self.room);
        }

        inner.last_activity = Utc::now();
        if inner.state == ConversationState::Idle {
            inner.state = ConversationState::Active;
        }
    }

    pub async fn increment_pending(&self) {
        let mut inner = self.inner.write().await;

        inner.pending += 1;
        if inner.state != ConversationState::Closed {
            inner.state = ConversationState::Processing;
        }
        inner.last_activity = Utc::now();

        debug!(
            "Pending incremented for '{}' (pending: {})",
            self.room, inner.pending
        );
    }

    /// Decrement below zero is a no-op, logged as a warning: it indicates
    /// a routing bug, not a crash condition.
    pub async fn decrement_pending(&self) {
        let mut inner = self.inner.write().await;

        if inner.pending > 0 {
            inner.pending -= 1;
        } else {
            warn!(
                "Pending decrement below zero for '{}' (conversation {})",
                self.room, self.id
            );
        }

        if inner.pending == 0 && inner.state != ConversationState::Closed {
            inner.state = ConversationState::Active;
        }
        inner.last_activity = Utc::now();

        debug!(
            "Pending decremented for '{}' (pending: {})",
            self.room, inner.pending
        );
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.read().await.pending
    }

    pub async fn is_idle(&self) -> bool {
        self.inner.read().await.pending == 0
    }

    pub async fn state(&self) -> ConversationState {
        self.inner.read().await.state
    }

    pub async fn last_activity(&self) -> DateTime<Utc> {
        self.inner.read().await.last_activity
    }

    pub async fn message_count(&self) -> usize {
        self.inner.read().await.history.len()
    }

    /// Personas that have sent or been addressed in this room, sorted for
    /// deterministic output.
    pub async fn active_agents(&self) -> Vec<PersonaId> {
        let inner = self.inner.read().await;
        let mut agents: Vec<PersonaId> = inner.active_agents.iter().cloned().collect();
        agents.sort();
        agents
    }

    /// The last `k` messages, oldest first.
    pub async fn recent_messages(&self, k: usize) -> Vec<ConversationMessage> {
        let inner = self.inner.read().await;
        let skip = inner.history.len().saturating_sub(k);
        inner.history.iter().skip(skip).cloned().collect()
    }

    /// Render the last `k` messages as a transcript, one `[label]: content`
    /// line per entry. The persona argument is reserved for per-persona
    /// redaction; the output is currently persona-independent.
    pub async fn context_for(&self, _persona: &PersonaId, k: usize) -> String {
        let messages = self.recent_messages(k).await;
        let mut transcript = String::new();
        for msg in &messages {
            transcript.push_str(&format!("[{}]: {}\n", msg.from.label(), msg.content));
        }
        transcript
    }

    /// Transition to `Closed` iff the room is reap-eligible at `now`.
    /// Checked and applied under one lock so a racing increment wins.
    async fn try_close_idle(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.write().await;

        if inner.state == ConversationState::Closed || inner.pending > 0 {
            return false;
        }
        let idle_for = (now - inner.last_activity)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if idle_for <= self.idle_timeout {
            return false;
        }

        inner.state = ConversationState::Closed;
        true
    }

    async fn close(&self) {
        let mut inner = self.inner.write().await;
        inner.state = ConversationState::Closed;
    }
}

/// Create-on-demand registry of room conversations with a background
/// reaper closing rooms that have gone quiet.
pub struct ConversationManager {
    rooms: Arc<RwLock<HashMap<RoomId, Arc<Conversation>>>>,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

impl ConversationManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self::with_reap_interval(idle_timeout, DEFAULT_REAP_INTERVAL)
    }

    pub fn with_reap_interval(idle_timeout: Duration, reap_interval: Duration) -> Self {
        let idle_timeout = if idle_timeout.is_zero() {
            DEFAULT_IDLE_TIMEOUT
        } else {
            idle_timeout
        };

        let manager = Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout,
            cancel: CancellationToken::new(),
        };
        manager.spawn_reaper(reap_interval);
        manager
    }

    fn spawn_reaper(&self, reap_interval: Duration) {
        let rooms = self.rooms.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reap_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        reap_idle_rooms(&rooms).await;
                    }
                }
            }
            debug!("Conversation reaper exited");
        });
    }

    /// Get the room's conversation, creating it on first touch.
    pub async fn get_or_create(&self, room: &RoomId) -> Arc<Conversation> {
        let mut rooms = self.rooms.write().await;

        if let Some(conv) = rooms.get(room) {
            return conv.clone();
        }

        let conv = Arc::new(Conversation::new(room.clone(), self.idle_timeout));
        rooms.insert(room.clone(), conv.clone());
        info!("Created conversation {} for room '{}'", conv.id, room);
        conv
    }

    pub async fn get(&self, room: &RoomId) -> Option<Arc<Conversation>> {
        self.rooms.read().await.get(room).cloned()
    }

    /// Close a room and drop it from the registry.
    pub async fn close(&self, room: &RoomId) {
        let removed = self.rooms.write().await.remove(room);

        if let Some(conv) = removed {
            conv.close().await;
            info!(
                "Closed conversation {} for room '{}' ({} messages)",
                conv.id,
                room,
                conv.message_count().await
            );
        }
    }

    /// Cancel the reaper and close every room.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let drained: Vec<(RoomId, Arc<Conversation>)> =
            self.rooms.write().await.drain().collect();
        for (room, conv) in drained {
            conv.close().await;
            info!("Closed conversation {} for room '{}'", conv.id, room);
        }
    }

    pub async fn count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

/// One reaper pass: snapshot the registry, then check each room without
/// holding the registry lock across per-room work.
async fn reap_idle_rooms(rooms: &Arc<RwLock<HashMap<RoomId, Arc<Conversation>>>>) {
    let snapshot: Vec<(RoomId, Arc<Conversation>)> = {
        let guard = rooms.read().await;
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    };

    let now = Utc::now();
    for (room, conv) in snapshot {
        if conv.try_close_idle(now).await {
            rooms.write().await.remove(&room);
            info!(
                "Reaped idle conversation {} for room '{}'",
                conv.id, room
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn human(id: &str, to: Vec<PersonaId>, content: &str) -> ConversationMessage {
        ConversationMessage::new(id, Sender::Human, to, content)
    }

    fn from_persona(id: &str, persona: &str, content: &str) -> ConversationMessage {
        ConversationMessage::new(id, Sender::Persona(PersonaId::new(persona)), vec![], content)
    }

    #[tokio::test]
    async fn test_state_machine_transitions() {
        let conv = Conversation::new(RoomId::new("general"), DEFAULT_IDLE_TIMEOUT);
        assert_eq!(conv.state().await, ConversationState::Idle);

        conv.add_message(human("h1", vec![], "hello")).await;
        assert_eq!(conv.state().await, ConversationState::Active);

        conv.increment_pending().await;
        assert_eq!(conv.state().await, ConversationState::Processing);
        assert_eq!(conv.pending_count().await, 1);

        conv.decrement_pending().await;
        // Never back to Idle once touched.
        assert_eq!(conv.state().await, ConversationState::Active);
        assert!(conv.is_idle().await);
    }

    #[tokio::test]
    async fn test_decrement_below_zero_is_noop() {
        let conv = Conversation::new(RoomId::new("general"), DEFAULT_IDLE_TIMEOUT);
        conv.decrement_pending().await;
        assert_eq!(conv.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_active_agents_tracking() {
        let conv = Conversation::new(RoomId::new("general"), DEFAULT_IDLE_TIMEOUT);

        conv.add_message(human("h1", vec![PersonaId::new("dev")], "fix it"))
            .await;
        conv.add_message(from_persona("r1", "qa", "on it")).await;

        let agents = conv.active_agents().await;
        assert_eq!(agents, vec![PersonaId::new("dev"), PersonaId::new("qa")]);
    }

    #[tokio::test]
    async fn test_recent_messages_window() {
        let conv = Conversation::new(RoomId::new("general"), DEFAULT_IDLE_TIMEOUT);
        for i in 0..5 {
            conv.add_message(human(&format!("h{}", i), vec![], &format!("msg {}", i)))
                .await;
        }

        let recent = conv.recent_messages(3).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "msg 2");
        assert_eq!(recent[2].content, "msg 4");

        // Timestamps are non-decreasing.
        for pair in recent.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn test_context_labels() {
        let conv = Conversation::new(RoomId::new("general"), DEFAULT_IDLE_TIMEOUT);
        conv.add_message(human("h1", vec![PersonaId::new("dev")], "please fix login"))
            .await;
        conv.add_message(from_persona("r1", "dev", "looking now")).await;
        conv.add_message(ConversationMessage::new("s1", Sender::System, vec![], "deploy done"))
            .await;

        let transcript = conv.context_for(&PersonaId::new("dev"), 10).await;
        assert_eq!(
            transcript,
            "[Human]: please fix login\n[dev]: looking now\n[System]: deploy done\n"
        );
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_conversation() {
        let manager = ConversationManager::new(DEFAULT_IDLE_TIMEOUT);
        let a = manager.get_or_create(&RoomId::new("general")).await;
        let b = manager.get_or_create(&RoomId::new("general")).await;
        assert_eq!(a.id(), b.id());
        assert_eq!(manager.count().await, 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_close_removes_room() {
        let manager = ConversationManager::new(DEFAULT_IDLE_TIMEOUT);
        let room = RoomId::new("general");
        let conv = manager.get_or_create(&room).await;

        manager.close(&room).await;
        assert_eq!(conv.state().await, ConversationState::Closed);
        assert!(manager.get(&room).await.is_none());
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_reaper_closes_idle_room() {
        let manager = ConversationManager::with_reap_interval(
            Duration::from_millis(50),
            Duration::from_millis(20),
        );
        let room = RoomId::new("general");
        let conv = manager.get_or_create(&room).await;
        conv.add_message(human("h1", vec![], "hello")).await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(manager.get(&room).await.is_none());
        assert_eq!(conv.state().await, ConversationState::Closed);

        // A fresh room comes back empty.
        let fresh = manager.get_or_create(&room).await;
        assert_ne!(fresh.id(), conv.id());
        assert_eq!(fresh.message_count().await, 0);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_reaper_spares_pending_room() {
        let manager = ConversationManager::with_reap_interval(
            Duration::from_millis(50),
            Duration::from_millis(20),
        );
        let room = RoomId::new("general");
        let conv = manager.get_or_create(&room).await;
        conv.increment_pending().await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(manager.get(&room).await.is_some());
        assert_eq!(conv.state().await, ConversationState::Processing);
        manager.stop().await;
    }
}
