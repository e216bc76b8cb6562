//! Small key/value store persisted as one JSON object
//!
//! Holds the persisted auth session and the list of chats the user has open.
//! Without a path the store lives in memory only.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

pub const ACTIVE_CHATS_KEY: &str = "activeChats";

#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    path: Option<PathBuf>,
    values: Arc<Mutex<Map<String, Value>>>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the store at `path`. A missing file starts empty; a corrupt one
    /// is logged and replaced on the next write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let text = fs::read_to_string(&path)?;
            match serde_json::from_str::<Map<String, Value>>(&text) {
                Ok(values) => values,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "local store unreadable, starting empty");
                    Map::new()
                }
            }
        } else {
            Map::new()
        };
        debug!(path = %path.display(), keys = values.len(), "opened local store");
        Ok(Self {
            path: Some(path),
            values: Arc::new(Mutex::new(values)),
        })
    }

    pub fn from_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::open(path),
            None => Ok(Self::in_memory()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Typed read. Values that no longer parse are reported as errors.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let mut values = self.lock();
        values.insert(key.to_string(), value);
        self.flush(&values)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.lock();
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }

    fn flush(&self, values: &Map<String, Value>) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, serde_json::to_vec_pretty(values)?)?;
        }
        Ok(())
    }
}

/// One chat the user has opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveChat {
    pub item_id: Uuid,
    pub item_title: String,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ActiveChats {
    store: LocalStore,
}

impl ActiveChats {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Newest activity first. Unparsable content reads as empty.
    pub fn list(&self) -> Vec<ActiveChat> {
        let mut chats = match self.store.get::<Vec<ActiveChat>>(ACTIVE_CHATS_KEY) {
            Ok(chats) => chats.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable active chats");
                Vec::new()
            }
        };
        chats.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        chats
    }

    /// Adds the chat or bumps its activity time.
    pub fn touch(&self, item_id: Uuid, item_title: &str) -> Result<()> {
        self.touch_at(item_id, item_title, Utc::now())
    }

    pub fn touch_at(&self, item_id: Uuid, item_title: &str, at: DateTime<Utc>) -> Result<()> {
        let mut chats = self.list();
        chats.retain(|chat| chat.item_id != item_id);
        chats.insert(
            0,
            ActiveChat {
                item_id,
                item_title: item_title.to_string(),
                last_activity: at,
            },
        );
        self.store.set(ACTIVE_CHATS_KEY, &chats)
    }

    pub fn remove(&self, item_id: Uuid) -> Result<()> {
        let mut chats = self.list();
        let before = chats.len();
        chats.retain(|chat| chat.item_id != item_id);
        if chats.len() != before {
            self.store.set(ACTIVE_CHATS_KEY, &chats)?;
        }
        Ok(())
    }
}
