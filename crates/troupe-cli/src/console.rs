//! Console chat client — a stdin/stdout stand-in for a real chat server,
//! useful for exercising the hub locally.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use troupe_core::{PersonaId, RoomId, Roster};
use troupe_gateway::{ChatClient, ChatEvent};

pub const CONSOLE_AUTHOR_ID: &str = "console-user";

pub struct ConsoleChat {
    room: RoomId,
    own_identities: HashSet<String>,
}

impl ConsoleChat {
    pub fn new(room: RoomId, roster: &Roster) -> Self {
        let mut own_identities: HashSet<String> = roster
            .ids()
            .map(|id| format!("troupe:{}", id))
            .collect();
        own_identities.insert("troupe:gateway".to_string());
        Self {
            room,
            own_identities,
        }
    }
}

#[async_trait]
impl ChatClient for ConsoleChat {
    async fn start(&self, tx: mpsc::Sender<ChatEvent>) -> Result<()> {
        let room = self.room.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let text = line.trim().to_string();
                        if text.is_empty() {
                            continue;
                        }
                        let event = ChatEvent {
                            author_id: CONSOLE_AUTHOR_ID.to_string(),
                            author_name: "you".to_string(),
                            room: room.clone(),
                            text,
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            debug!("Console reader exited");
        });

        info!("Console chat attached to room '{}'", self.room);
        Ok(())
    }

    async fn post_as(&self, persona: &PersonaId, room: &RoomId, text: &str) -> Result<()> {
        println!("[{}] <{}> {}", room, persona, text);
        Ok(())
    }

    async fn post_via_gateway(&self, room: &RoomId, text: &str) -> Result<()> {
        println!("[{}] <gateway> {}", room, text);
        Ok(())
    }

    async fn typing(&self, room: &RoomId) -> Result<()> {
        debug!("typing in '{}'", room);
        Ok(())
    }

    fn has_identity(&self, _persona: &PersonaId) -> bool {
        true
    }

    fn is_own(&self, author_id: &str) -> bool {
        self.own_identities.contains(author_id)
    }
}
