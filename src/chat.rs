//! Live chat about one item
//!
//! A [`ChatSession`] seeds itself from the persisted history, joins the
//! item's broadcast channel and keeps a local, creation-ordered message list.
//! Sending appends optimistically, then runs the durable write and the
//! broadcast side by side. Every message carries the id its sender generated
//! (`client_id`), so history rows, broadcasts and the sender's own optimistic
//! copy all collapse into one entry.

use crate::cache::{QueryCache, QueryKey};
use crate::error::{Error, Result};
use crate::hooks::Viewer;
use crate::local_store::ActiveChats;
use crate::models::{Item, Message, NewMessage, Role};
use crate::remote::{Backend, LiveChannel};
use crate::validation::FieldErrors;
use chrono::{DateTime, Utc};
use lostfound_realtime::BroadcastEvent;
pub use lostfound_realtime::ConnectionState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MESSAGE_EVENT: &str = "message";

/// Broadcast topic for an item's chat.
pub fn chat_topic(item_id: Uuid) -> String {
    format!("chat-{}", item_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Shown locally, durable write still running
    Pending,
    Delivered,
    /// The durable write failed; the message exists only here
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Sender-generated id, the dedup key
    pub client_id: Uuid,
    /// Row id once the durable write is known to have succeeded
    pub server_id: Option<Uuid>,
    pub item_id: Uuid,
    pub sender: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub delivery: Delivery,
}

impl ChatMessage {
    fn from_row(row: Message) -> Self {
        Self {
            // rows written before client ids existed fall back to their own id
            client_id: row.client_id.unwrap_or(row.id),
            server_id: Some(row.id),
            item_id: row.item_id,
            sender: row.sender,
            text: row.text,
            created_at: row.created_at,
            delivery: Delivery::Delivered,
        }
    }
}

/// What goes over the broadcast channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub client_id: Uuid,
    pub item_id: Uuid,
    pub sender: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ChatMessage> for ChatPayload {
    fn from(message: &ChatMessage) -> Self {
        Self {
            client_id: message.client_id,
            item_id: message.item_id,
            sender: message.sender,
            text: message.text.clone(),
            created_at: message.created_at,
        }
    }
}

impl ChatPayload {
    fn into_message(self) -> ChatMessage {
        ChatMessage {
            client_id: self.client_id,
            server_id: None,
            item_id: self.item_id,
            sender: self.sender,
            text: self.text,
            created_at: self.created_at,
            // the sender broadcasts alongside its durable write
            delivery: Delivery::Delivered,
        }
    }
}

/// One open chat panel
pub struct ChatSession {
    backend: Arc<dyn Backend>,
    cache: QueryCache,
    active_chats: Option<ActiveChats>,
    item_id: Uuid,
    item_title: String,
    viewer: Viewer,
    state: watch::Sender<ConnectionState>,
    channel: Option<Box<dyn LiveChannel>>,
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    /// A disconnected session; call [`ChatSession::connect`] to go live.
    pub fn new(backend: Arc<dyn Backend>, cache: QueryCache, viewer: Viewer, item: &Item) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            backend,
            cache,
            active_chats: None,
            item_id: item.id,
            item_title: item.title.clone(),
            viewer,
            state,
            channel: None,
            messages: Vec::new(),
        }
    }

    /// Records opened and used chats in `active_chats`.
    pub fn with_active_chats(mut self, active_chats: ActiveChats) -> Self {
        self.active_chats = Some(active_chats);
        self
    }

    /// `new` followed by `connect`.
    pub async fn open(
        backend: Arc<dyn Backend>,
        cache: QueryCache,
        viewer: Viewer,
        item: &Item,
        active_chats: Option<ActiveChats>,
    ) -> Result<Self> {
        let mut session = Self::new(backend, cache, viewer, item);
        session.active_chats = active_chats;
        session.connect().await?;
        Ok(session)
    }

    pub fn item_id(&self) -> Uuid {
        self.item_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Messages ordered by creation time.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Loads the history and joins the item's channel. A failed join leaves
    /// the session disconnected; there is no automatic retry.
    pub async fn connect(&mut self) -> Result<()> {
        if !self.viewer.is_authenticated() {
            return Err(Error::auth("Sign in to chat about this item"));
        }
        if self.is_connected() {
            return Ok(());
        }
        self.state.send_replace(ConnectionState::Connecting);

        match self.join().await {
            Ok(channel) => {
                self.channel = Some(channel);
                self.state.send_replace(ConnectionState::Connected);
                info!(item = %self.item_id, "chat connected");
                self.touch_active_chat();
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                warn!(item = %self.item_id, error = %e, "chat failed to connect");
                Err(e)
            }
        }
    }

    async fn join(&mut self) -> Result<Box<dyn LiveChannel>> {
        let history = self.backend.list_messages(self.item_id).await?;
        for row in history {
            self.merge(ChatMessage::from_row(row));
        }
        self.backend.join_channel(&chat_topic(self.item_id)).await
    }

    /// Inserts `message` unless its client id is already present. Returns
    /// whether it was added.
    fn merge(&mut self, message: ChatMessage) -> bool {
        if let Some(existing) = self
            .messages
            .iter_mut()
            .find(|m| m.client_id == message.client_id)
        {
            if existing.server_id.is_none() {
                existing.server_id = message.server_id;
            }
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| (m.created_at, m.client_id) <= (message.created_at, message.client_id));
        self.messages.insert(at, message);
        true
    }

    /// Sends `text` under the viewer's role. The message is visible
    /// immediately; the returned id is its client id.
    pub async fn send(&mut self, text: &str) -> Result<Uuid> {
        let text = text.trim();
        if text.is_empty() {
            let mut errors = FieldErrors::new();
            errors.add("text", "Message cannot be empty");
            return Err(Error::Validation(errors));
        }
        if !self.viewer.is_authenticated() {
            return Err(Error::auth("Sign in to chat about this item"));
        }

        let message = ChatMessage {
            client_id: Uuid::new_v4(),
            server_id: None,
            item_id: self.item_id,
            sender: self.viewer.role(),
            text: text.to_string(),
            created_at: Utc::now(),
            delivery: Delivery::Pending,
        };
        let client_id = message.client_id;
        let payload = serde_json::to_value(ChatPayload::from(&message))?;
        let row = NewMessage {
            item_id: self.item_id,
            sender: message.sender,
            text: message.text.clone(),
            client_id,
            created_at: Some(message.created_at),
        };
        self.merge(message);

        let backend = self.backend.clone();
        let broadcast = async {
            match &self.channel {
                Some(channel) if self.state() == ConnectionState::Connected => {
                    channel.send(MESSAGE_EVENT, payload).await
                }
                _ => Err(Error::Network("chat is not connected".to_string())),
            }
        };
        let (stored, broadcast) = tokio::join!(backend.insert_message(&row), broadcast);

        if let Err(e) = broadcast {
            warn!(item = %self.item_id, error = %e, "broadcast failed, message stored only");
        }
        self.touch_active_chat();

        match stored {
            Ok(stored) => {
                if let Some(local) = self.messages.iter_mut().find(|m| m.client_id == client_id) {
                    // keep the sender's timestamp, it is what the row and the
                    // broadcast both carry
                    local.server_id = Some(stored.id);
                    local.delivery = Delivery::Delivered;
                }
                self.cache.invalidate(&QueryKey::messages(self.item_id));
                self.cache.invalidate(&QueryKey::chats());
                Ok(client_id)
            }
            Err(e) => {
                if let Some(local) = self.messages.iter_mut().find(|m| m.client_id == client_id) {
                    local.delivery = Delivery::Failed;
                }
                Err(e)
            }
        }
    }

    fn accept(&mut self, event: BroadcastEvent) -> Option<ChatMessage> {
        if event.event != MESSAGE_EVENT {
            return None;
        }
        let payload = match serde_json::from_value::<ChatPayload>(event.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(item = %self.item_id, error = %e, "ignoring malformed chat broadcast");
                return None;
            }
        };
        if payload.item_id != self.item_id {
            return None;
        }
        let message = payload.into_message();
        if self.merge(message.clone()) {
            Some(message)
        } else {
            debug!(client_id = %message.client_id, "duplicate chat message dropped");
            None
        }
    }

    /// Waits for the next new message from the channel. `None` once the
    /// channel is gone, which also drops the session to `Disconnected`.
    pub async fn next_message(&mut self) -> Option<ChatMessage> {
        loop {
            let event = match self.channel.as_mut() {
                Some(channel) => channel.recv().await,
                None => return None,
            };
            match event {
                Some(event) => {
                    if let Some(message) = self.accept(event) {
                        return Some(message);
                    }
                }
                None => {
                    info!(item = %self.item_id, "chat channel closed");
                    self.channel = None;
                    self.state.send_replace(ConnectionState::Disconnected);
                    return None;
                }
            }
        }
    }

    /// Applies every broadcast already queued; returns how many new
    /// messages were added.
    pub fn drain(&mut self) -> usize {
        let mut added = 0;
        while let Some(event) = self.channel.as_mut().and_then(|c| c.try_recv()) {
            if self.accept(event).is_some() {
                added += 1;
            }
        }
        added
    }

    /// Leaves the channel.
    pub async fn close(&mut self) -> Result<()> {
        let result = match self.channel.take() {
            Some(mut channel) => channel.leave().await,
            None => Ok(()),
        };
        self.state.send_replace(ConnectionState::Disconnected);
        result
    }

    fn touch_active_chat(&self) {
        if let Some(active_chats) = &self.active_chats {
            if let Err(e) = active_chats.touch(self.item_id, &self.item_title) {
                warn!(error = %e, "failed to record active chat");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_topic_naming() {
        let id = Uuid::parse_str("6a1f4a4e-1f1e-4c55-9d4b-8f9a0b3c2d11").unwrap();
        assert_eq!(chat_topic(id), "chat-6a1f4a4e-1f1e-4c55-9d4b-8f9a0b3c2d11");
    }

    #[test]
    fn test_legacy_rows_key_on_row_id() {
        let row = Message {
            id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            sender: Role::Admin,
            text: "Halo".into(),
            client_id: None,
            created_at: Utc::now(),
        };
        let message = ChatMessage::from_row(row.clone());
        assert_eq!(message.client_id, row.id);
        assert_eq!(message.server_id, Some(row.id));
        assert_eq!(message.delivery, Delivery::Delivered);
    }

    #[test]
    fn test_payload_wire_shape() {
        let now = Utc::now();
        let payload = ChatPayload {
            client_id: Uuid::nil(),
            item_id: Uuid::nil(),
            sender: Role::User,
            text: "Masih ada?".into(),
            created_at: now - Duration::seconds(1),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["sender"], json!("user"));
        assert_eq!(value["text"], json!("Masih ada?"));
        let back: ChatPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }
}
