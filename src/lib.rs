//! Lost & Found client library
//!
//! Headless client for the Lost & Found service: report and browse lost and
//! found items, sign in, chat with the admin about an item and run the admin
//! dashboard. Persistence, auth, images and live chat are served by a hosted
//! Supabase project; this crate adds the query cache, validation and chat
//! state on top.

pub mod cache;
pub mod chat;
pub mod config;
pub mod contact;
pub mod dashboard;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod local_store;
pub mod models;
pub mod notify;
pub mod remote;
pub mod routes;
pub mod scope;
pub mod validation;

use std::sync::Arc;

use crate::cache::QueryCache;
use crate::chat::ChatSession;
use crate::config::LostFoundConfig;
use crate::dashboard::Dashboard;
use crate::error::Result;
use crate::hooks::{AuthHooks, Items, Viewer};
use crate::local_store::{ActiveChats, LocalStore};
use crate::models::Item;
use crate::remote::{Backend, SupabaseBackend};
use crate::scope::ViewScope;

pub use lostfound_auth::{Session, User};

/// The main entry point for the Lost & Found client
///
/// Owns the process-wide query cache; it lives as long as this value and is
/// cleared on sign-out.
pub struct LostFound {
    backend: Arc<dyn Backend>,
    cache: QueryCache,
    store: LocalStore,
    /// Project settings and client options
    pub config: LostFoundConfig,
}

impl LostFound {
    /// Create a client for a hosted project
    ///
    /// # Example
    ///
    /// ```no_run
    /// use lostfound::{config::LostFoundConfig, models::ItemType, LostFound};
    ///
    /// # async fn run() -> lostfound::error::Result<()> {
    /// let config = LostFoundConfig::new("https://your-project.supabase.co", "your-anon-key")?;
    /// let app = LostFound::new(config)?;
    /// let lost = app.items().list_by_type(ItemType::Lost).await?;
    /// println!("{} lost items", lost.len());
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: LostFoundConfig) -> Result<Self> {
        let store = LocalStore::from_path(config.options.storage_path.as_deref())?;
        let backend = SupabaseBackend::new(&config, store.clone())?;
        Ok(Self::with_backend(config, Arc::new(backend), store))
    }

    /// Reads the configuration from the environment (and `.env`).
    pub fn from_env() -> Result<Self> {
        Self::new(LostFoundConfig::from_env()?)
    }

    /// Create a client over any [`Backend`]
    pub fn with_backend(config: LostFoundConfig, backend: Arc<dyn Backend>, store: LocalStore) -> Self {
        Self {
            backend,
            cache: QueryCache::new(),
            store,
            config,
        }
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Item queries and mutations
    pub fn items(&self) -> Items {
        Items::new(self.backend.clone(), self.cache.clone())
    }

    /// Session, sign-in/up/out and profiles
    pub fn auth(&self) -> AuthHooks {
        AuthHooks::new(self.backend.clone(), self.cache.clone())
    }

    pub fn active_chats(&self) -> ActiveChats {
        ActiveChats::new(self.store.clone())
    }

    /// A fresh cancellation scope for one view
    pub fn scope(&self) -> ViewScope {
        ViewScope::new()
    }

    /// Opens the live chat about `item` for `viewer`.
    pub async fn open_chat(&self, viewer: Viewer, item: &Item) -> Result<ChatSession> {
        ChatSession::open(
            self.backend.clone(),
            self.cache.clone(),
            viewer,
            item,
            Some(self.active_chats()),
        )
        .await
    }

    pub async fn dashboard(&self) -> Result<Dashboard> {
        Dashboard::open(self.backend.clone(), self.cache.clone()).await
    }

    /// WhatsApp link to the admin about `item`.
    pub fn admin_chat_link(&self, item: &Item) -> String {
        contact::admin_chat_link(&self.config.options.admin_whatsapp, item.id, &item.title)
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::config::{ClientOptions, LostFoundConfig};
    pub use crate::error::{Error, Result};
    pub use crate::hooks::Viewer;
    pub use crate::models::{Category, Item, ItemType, Location, Role};
    pub use crate::LostFound;
}
