//! Admin dashboard

use crate::cache::{CachePolicy, QueryCache, QueryKey};
use crate::error::{Error, Result};
use crate::hooks::{AuthHooks, Items, Viewer};
use crate::models::{Item, ItemType, Message, Profile, Role};
use crate::remote::Backend;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub total: usize,
    pub lost: usize,
    pub found: usize,
}

impl Stats {
    pub fn from_items(items: &[Item]) -> Self {
        let lost = items.iter().filter(|i| i.kind == ItemType::Lost).count();
        Self {
            total: items.len(),
            lost,
            found: items.len() - lost,
        }
    }
}

/// Latest activity in one item's chat
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSummary {
    pub item_id: Uuid,
    /// Absent when the item has since been deleted
    pub item_title: Option<String>,
    pub last_text: String,
    pub last_sender: Role,
    pub last_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Groups messages per item, most recent conversation first.
pub fn summarize_chats(messages: &[Message], items: &[Item]) -> Vec<ChatSummary> {
    let titles: HashMap<Uuid, &str> = items.iter().map(|i| (i.id, i.title.as_str())).collect();
    let mut by_item: HashMap<Uuid, ChatSummary> = HashMap::new();

    for message in messages {
        let summary = by_item.entry(message.item_id).or_insert_with(|| ChatSummary {
            item_id: message.item_id,
            item_title: titles.get(&message.item_id).map(|t| t.to_string()),
            last_text: message.text.clone(),
            last_sender: message.sender,
            last_at: message.created_at,
            message_count: 0,
        });
        summary.message_count += 1;
        if message.created_at > summary.last_at {
            summary.last_text = message.text.clone();
            summary.last_sender = message.sender;
            summary.last_at = message.created_at;
        }
    }

    let mut summaries: Vec<ChatSummary> = by_item.into_values().collect();
    summaries.sort_by(|a, b| b.last_at.cmp(&a.last_at).then(a.item_id.cmp(&b.item_id)));
    summaries
}

/// Admin-only view over items, users and chats
pub struct Dashboard {
    backend: Arc<dyn Backend>,
    cache: QueryCache,
    items: Items,
    auth: AuthHooks,
    viewer: Viewer,
}

impl Dashboard {
    /// Opens the dashboard for an admin; anyone else gets `Forbidden`.
    pub async fn open(backend: Arc<dyn Backend>, cache: QueryCache) -> Result<Self> {
        let auth = AuthHooks::new(backend.clone(), cache.clone());
        let viewer = auth.viewer().await?;
        if !viewer.is_authenticated() {
            return Err(Error::auth("Sign in to open the dashboard"));
        }
        if !viewer.is_admin() {
            return Err(Error::forbidden("The dashboard is for admins only"));
        }
        debug!(admin = ?viewer.user_id(), "dashboard opened");
        Ok(Self {
            items: Items::new(backend.clone(), cache.clone()),
            backend,
            cache,
            auth,
            viewer,
        })
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub async fn stats(&self) -> Result<Stats> {
        Ok(Stats::from_items(&self.items.list_all().await?))
    }

    pub async fn items(&self) -> Result<Vec<Item>> {
        self.items.list_all().await
    }

    pub async fn profiles(&self) -> Result<Vec<Profile>> {
        self.auth.profiles().await
    }

    pub async fn chats(&self) -> Result<Vec<ChatSummary>> {
        let items = self.items.list_all().await?;
        let backend = self.backend.clone();
        let messages: Vec<Message> = self
            .cache
            .fetch(QueryKey::chats(), CachePolicy::UntilInvalidated, || async move {
                backend.list_all_messages().await
            })
            .await?;
        Ok(summarize_chats(&messages, &items))
    }

    pub async fn delete_item(&self, id: Uuid) -> Result<()> {
        self.items.delete(id).await
    }

    pub async fn toggle_item_type(&self, id: Uuid) -> Result<Item> {
        self.items.toggle_type(id).await
    }

    pub async fn set_role(&self, id: Uuid, role: Role) -> Result<Profile> {
        self.auth.set_role(id, role).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use crate::models::{Category, Location};

    fn item(kind: ItemType, title: &str) -> Item {
        Item {
            id: Uuid::new_v4(),
            title: title.into(),
            description: "-".into(),
            category: Category::Other,
            kind,
            location: Location::Medan,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            image_url: None,
            contact_name: "A".into(),
            contact_phone: "081234567890".into(),
            contact_email: None,
            user_id: None,
            created_at: Utc::now(),
        }
    }

    fn message(item_id: Uuid, text: &str, sender: Role, at: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4(),
            item_id,
            sender,
            text: text.into(),
            client_id: None,
            created_at: at,
        }
    }

    #[test]
    fn test_stats() {
        let items = vec![
            item(ItemType::Lost, "a"),
            item(ItemType::Found, "b"),
            item(ItemType::Lost, "c"),
        ];
        assert_eq!(
            Stats::from_items(&items),
            Stats {
                total: 3,
                lost: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_chat_summaries_newest_first() {
        let wallet = item(ItemType::Lost, "Dompet");
        let keys = item(ItemType::Found, "Kunci");
        let t0 = Utc::now();
        let messages = vec![
            message(wallet.id, "Halo", Role::User, t0),
            message(keys.id, "Kunci saya", Role::User, t0 + Duration::seconds(1)),
            message(wallet.id, "Sudah diambil", Role::Admin, t0 + Duration::seconds(5)),
        ];

        let summaries = summarize_chats(&messages, &[wallet.clone(), keys.clone()]);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].item_id, wallet.id);
        assert_eq!(summaries[0].item_title.as_deref(), Some("Dompet"));
        assert_eq!(summaries[0].last_text, "Sudah diambil");
        assert_eq!(summaries[0].last_sender, Role::Admin);
        assert_eq!(summaries[0].message_count, 2);
        assert_eq!(summaries[1].message_count, 1);
    }

    #[test]
    fn test_summary_for_deleted_item_has_no_title() {
        let orphan = message(Uuid::new_v4(), "?", Role::User, Utc::now());
        let summaries = summarize_chats(&[orphan], &[]);
        assert_eq!(summaries[0].item_title, None);
    }
}
