//! End-to-end scenarios: chat event in, routed work, persona replies out.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use troupe_core::{PersonaId, PersonaProfile, RoomId, Roster};
use troupe_gateway::{
    ChatClient, ChatEvent, Gateway, InboundRequest, LlmBus, OutboundReply,
};
use troupe_hub::{ActorSystem, ConversationManager, ConversationState, Router};

#[derive(Debug, Clone, PartialEq)]
struct Post {
    identity: String,
    room: RoomId,
    text: String,
}

struct MockChat {
    posts: Mutex<Vec<Post>>,
    own: HashSet<String>,
    without_identity: HashSet<PersonaId>,
}

impl MockChat {
    fn new(personas: &[&str]) -> Self {
        let mut own: HashSet<String> = personas.iter().map(|p| format!("bot:{}", p)).collect();
        own.insert("bot:gateway".to_string());
        Self {
            posts: Mutex::new(Vec::new()),
            own,
            without_identity: HashSet::new(),
        }
    }

    fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for MockChat {
    async fn start(&self, _tx: mpsc::Sender<ChatEvent>) -> Result<()> {
        Ok(())
    }

    async fn post_as(&self, persona: &PersonaId, room: &RoomId, text: &str) -> Result<()> {
        self.posts.lock().unwrap().push(Post {
            identity: persona.to_string(),
            room: room.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn post_via_gateway(&self, room: &RoomId, text: &str) -> Result<()> {
        self.posts.lock().unwrap().push(Post {
            identity: "gateway".to_string(),
            room: room.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn typing(&self, _room: &RoomId) -> Result<()> {
        Ok(())
    }

    fn has_identity(&self, persona: &PersonaId) -> bool {
        !self.without_identity.contains(persona)
    }

    fn is_own(&self, author_id: &str) -> bool {
        self.own.contains(author_id)
    }
}

struct Harness {
    chat: Arc<MockChat>,
    conversations: Arc<ConversationManager>,
    gateway: Gateway,
    request_rx: mpsc::Receiver<InboundRequest>,
}

fn roster_of(names: &[&str]) -> Roster {
    let profiles = names
        .iter()
        .map(|n| PersonaProfile::new(PersonaId::new(*n), n.to_uppercase(), format!("You are {}.", n)))
        .collect();
    Roster::new(profiles, PersonaId::new(names[0])).unwrap()
}

fn build(names: &[&str], chat: Arc<MockChat>) -> Harness {
    let roster = roster_of(names);
    let system = Arc::new(ActorSystem::new());
    let conversations = Arc::new(ConversationManager::new(Duration::from_secs(300)));
    let router = Arc::new(Router::new(
        system.clone(),
        conversations.clone(),
        roster.coordinator().clone(),
    ));

    let bus = LlmBus::new(32);
    let requests = bus.requests();
    let (request_rx, _reply_rx) = bus.split();

    let gateway = Gateway::new(
        chat.clone(),
        roster,
        system,
        conversations.clone(),
        router,
        requests,
    );

    Harness {
        chat,
        conversations,
        gateway,
        request_rx,
    }
}

async fn harness(names: &[&str]) -> Harness {
    let chat = Arc::new(MockChat::new(names));
    let h = build(names, chat);
    h.gateway.start().await.unwrap();
    h
}

fn event(text: &str) -> ChatEvent {
    ChatEvent {
        author_id: "u1".to_string(),
        author_name: "alice".to_string(),
        room: RoomId::new("general"),
        text: text.to_string(),
    }
}

/// Receive the next worker-published request (skipping raw human
/// utterances), failing after a timeout.
async fn next_agent_request(rx: &mut mpsc::Receiver<InboundRequest>) -> InboundRequest {
    loop {
        let req = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for request")
            .expect("request bus closed");
        if req.metadata.contains_key("agent") {
            return req;
        }
    }
}

#[tokio::test]
async fn single_target_routes_to_mentioned_persona() {
    let mut h = harness(&["master", "dev"]).await;
    let room = RoomId::new("general");

    h.gateway
        .handle_chat_event(event("@dev please fix login"))
        .await;

    let req = next_agent_request(&mut h.request_rx).await;
    assert_eq!(req.metadata.get("agent").map(String::as_str), Some("dev"));
    assert_eq!(req.content, "[From Human]: please fix login");
    assert_eq!(req.session_key, "multi:general:dev");

    let conv = h.conversations.get(&room).await.unwrap();
    assert_eq!(conv.pending_count().await, 1);
    let history = conv.recent_messages(10).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].is_human());
    assert_eq!(history[0].to, vec![PersonaId::new("dev")]);
    assert_eq!(history[0].content, "please fix login");

    // No second request: master received nothing.
    assert!(
        tokio::time::timeout(Duration::from_millis(100), next_agent_request(&mut h.request_rx))
            .await
            .is_err()
    );
    h.conversations.stop().await;
}

#[tokio::test]
async fn no_mention_defaults_to_coordinator() {
    let mut h = harness(&["master", "dev"]).await;
    let room = RoomId::new("general");

    h.gateway.handle_chat_event(event("status?")).await;

    let req = next_agent_request(&mut h.request_rx).await;
    assert_eq!(req.metadata.get("agent").map(String::as_str), Some("master"));

    let conv = h.conversations.get(&room).await.unwrap();
    assert_eq!(conv.pending_count().await, 1);
    let history = conv.recent_messages(10).await;
    assert_eq!(history[0].to, vec![PersonaId::new("master")]);
    h.conversations.stop().await;
}

#[tokio::test]
async fn fan_out_dedups_targets() {
    let mut h = harness(&["master", "dev", "qa"]).await;
    let room = RoomId::new("general");

    h.gateway
        .handle_chat_event(event("@qa @dev @qa run tests"))
        .await;

    let first = next_agent_request(&mut h.request_rx).await;
    let second = next_agent_request(&mut h.request_rx).await;
    let mut agents: Vec<String> = vec![
        first.metadata["agent"].clone(),
        second.metadata["agent"].clone(),
    ];
    agents.sort();
    assert_eq!(agents, vec!["dev", "qa"]);

    // Exactly one request per persona.
    assert!(
        tokio::time::timeout(Duration::from_millis(100), next_agent_request(&mut h.request_rx))
            .await
            .is_err()
    );

    let conv = h.conversations.get(&room).await.unwrap();
    let history = conv.recent_messages(10).await;
    assert_eq!(
        history[0].to,
        vec![PersonaId::new("qa"), PersonaId::new("dev")]
    );
    assert_eq!(conv.pending_count().await, 2);
    h.conversations.stop().await;
}

#[tokio::test]
async fn persona_reply_posts_and_routes_mentions() {
    let mut h = harness(&["master", "dev", "qa"]).await;
    let room = RoomId::new("general");

    h.gateway.handle_chat_event(event("@dev ship it")).await;
    let _dev_req = next_agent_request(&mut h.request_rx).await;

    h.gateway
        .handle_reply(OutboundReply {
            room: room.clone(),
            persona: PersonaId::new("dev"),
            content: "@qa PR ready".to_string(),
        })
        .await;

    // Posted under dev's identity.
    let posts = h.chat.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].identity, "dev");
    assert_eq!(posts[0].room, room);
    assert!(posts[0].text.contains("PR ready"));

    // The mention re-enters the hub as dev -> qa with cleaned content.
    let qa_req = next_agent_request(&mut h.request_rx).await;
    assert_eq!(qa_req.metadata.get("agent").map(String::as_str), Some("qa"));
    assert_eq!(qa_req.content, "[From dev]: PR ready");
    assert_eq!(qa_req.sender_id, "dev");

    // dev's reply resolved its own enqueue; qa's is the only pending one.
    let conv = h.conversations.get(&room).await.unwrap();
    assert_eq!(conv.pending_count().await, 1);
    h.conversations.stop().await;
}

#[tokio::test]
async fn pending_returns_to_zero_after_all_replies() {
    let mut h = harness(&["master", "dev", "qa"]).await;
    let room = RoomId::new("general");

    h.gateway.handle_chat_event(event("@qa @dev run tests")).await;
    let _ = next_agent_request(&mut h.request_rx).await;
    let _ = next_agent_request(&mut h.request_rx).await;

    for persona in ["qa", "dev"] {
        h.gateway
            .handle_reply(OutboundReply {
                room: room.clone(),
                persona: PersonaId::new(persona),
                content: "done".to_string(),
            })
            .await;
    }

    let conv = h.conversations.get(&room).await.unwrap();
    assert_eq!(conv.pending_count().await, 0);
    assert_eq!(conv.state().await, ConversationState::Active);
    h.conversations.stop().await;
}

#[tokio::test]
async fn own_bot_messages_are_dropped() {
    let h = harness(&["master", "dev"]).await;

    let mut ev = event("@dev hello");
    ev.author_id = "bot:dev".to_string();
    h.gateway.handle_chat_event(ev).await;

    assert!(h.conversations.get(&RoomId::new("general")).await.is_none());
    assert!(h.chat.posts().is_empty());
    h.conversations.stop().await;
}

#[tokio::test]
async fn unroutable_message_posts_notice_as_coordinator() {
    // No personas registered: every route fails.
    let chat = Arc::new(MockChat::new(&["master", "dev"]));
    let h = build(&["master", "dev"], chat.clone());

    h.gateway.handle_chat_event(event("@dev hello")).await;

    let posts = chat.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].identity, "master");
    assert!(posts[0].text.contains("try again"));

    // The failed enqueue rolled its pending increment back.
    let conv = h.conversations.get(&RoomId::new("general")).await.unwrap();
    assert_eq!(conv.pending_count().await, 0);
    h.conversations.stop().await;
}

#[tokio::test]
async fn gateway_identity_fallback_when_persona_client_missing() {
    let mut chat = MockChat::new(&["master", "dev"]);
    chat.without_identity.insert(PersonaId::new("dev"));
    let chat = Arc::new(chat);

    let h = build(&["master", "dev"], chat.clone());
    h.gateway.start().await.unwrap();

    h.gateway
        .handle_reply(OutboundReply {
            room: RoomId::new("general"),
            persona: PersonaId::new("dev"),
            content: "hello from dev".to_string(),
        })
        .await;

    let posts = chat.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].identity, "gateway");
    h.conversations.stop().await;
}

#[tokio::test]
async fn long_replies_are_chunked_in_order() {
    let chat = Arc::new(MockChat::new(&["master"]));
    let h = build(&["master"], chat.clone());
    h.gateway.start().await.unwrap();

    let body = (0..200)
        .map(|i| format!("line {}", i))
        .collect::<Vec<_>>()
        .join("\n");
    assert!(body.len() > 1500);

    h.gateway
        .handle_reply(OutboundReply {
            room: RoomId::new("general"),
            persona: PersonaId::new("master"),
            content: body,
        })
        .await;

    let posts = chat.posts();
    assert!(posts.len() > 1);
    assert!(posts.iter().all(|p| p.text.len() <= 1500));
    assert!(posts[0].text.starts_with("line 0"));
    assert!(posts.last().unwrap().text.ends_with("line 199"));
    h.conversations.stop().await;
}

#[tokio::test]
async fn idle_room_is_reaped_after_replies_settle() {
    let chat = Arc::new(MockChat::new(&["master"]));
    let roster = roster_of(&["master"]);
    let system = Arc::new(ActorSystem::new());
    let conversations = Arc::new(ConversationManager::with_reap_interval(
        Duration::from_millis(50),
        Duration::from_millis(20),
    ));
    let router = Arc::new(Router::new(
        system.clone(),
        conversations.clone(),
        PersonaId::new("master"),
    ));
    let bus = LlmBus::new(32);
    let requests = bus.requests();
    let (mut request_rx, _reply_rx) = bus.split();
    let gateway = Gateway::new(
        chat,
        roster,
        system,
        conversations.clone(),
        router,
        requests,
    );
    gateway.start().await.unwrap();

    let room = RoomId::new("general");
    gateway.handle_chat_event(event("status?")).await;
    let _ = next_agent_request(&mut request_rx).await;

    gateway
        .handle_reply(OutboundReply {
            room: room.clone(),
            persona: PersonaId::new("master"),
            content: "all good".to_string(),
        })
        .await;

    let old_id = conversations.get(&room).await.unwrap().id().to_string();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(conversations.get(&room).await.is_none());

    // A fresh conversation starts empty.
    let fresh = conversations.get_or_create(&room).await;
    assert_ne!(fresh.id(), old_id);
    assert_eq!(fresh.message_count().await, 0);
    conversations.stop().await;
}
