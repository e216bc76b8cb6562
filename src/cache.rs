//! Process-wide query cache with prefix-tag invalidation
//!
//! Values are stored per [`QueryKey`]. A tag is just a key prefix:
//! invalidating `["items"]` marks `["items", "lost"]`, `["items", "found"]`
//! and `["items", "all"]` stale and wakes every view subscribed to them.
//! Views refetch on wake-up; the cache itself never fetches on its own.

use crate::error::Result;
use crate::models::ItemType;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, trace};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Every item list, whatever the type.
    pub fn items_tag() -> Self {
        Self::new(["items"])
    }

    pub fn items(kind: ItemType) -> Self {
        Self::new(["items", kind.as_str()])
    }

    pub fn all_items() -> Self {
        Self::new(["items", "all"])
    }

    pub fn item(id: Uuid) -> Self {
        Self::new(["item".to_string(), id.to_string()])
    }

    pub fn session() -> Self {
        Self::new(["session"])
    }

    pub fn profile(id: Uuid) -> Self {
        Self::new(["profile".to_string(), id.to_string()])
    }

    pub fn profiles() -> Self {
        Self::new(["profiles"])
    }

    pub fn messages(item_id: Uuid) -> Self {
        Self::new(["messages".to_string(), item_id.to_string()])
    }

    /// Chat summaries shown on the admin dashboard.
    pub fn chats() -> Self {
        Self::new(["chats"])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// True when `tag` is a prefix of this key.
    pub fn matches(&self, tag: &QueryKey) -> bool {
        self.0.starts_with(&tag.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Reuse the stored value until it is invalidated
    #[default]
    UntilInvalidated,
    /// Never serve a stored value; every read goes to the backend
    AlwaysRefetch,
}

/// Invalidations kept for [`QueryCache::was_invalidated_since`]
pub const INVALIDATION_LOG_CAPACITY: usize = 256;

/// One `invalidate` call as recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub tag: QueryKey,
    /// Entries (cached or subscribed) the tag matched
    pub matched: usize,
}

struct Entry {
    value: Option<Arc<dyn Any + Send + Sync>>,
    stale: bool,
    /// Bumped on every invalidation; a fetch that started under an older
    /// version does not store its result.
    version: u64,
    notify: watch::Sender<u64>,
}

impl Entry {
    fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            value: None,
            stale: false,
            version: 0,
            notify,
        }
    }

    fn invalidate(&mut self) {
        self.stale = true;
        self.version += 1;
        self.notify.send_replace(self.version);
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<QueryKey, Entry>,
    log: VecDeque<Invalidation>,
    /// Log position of `log[0]`; positions keep counting across trims
    log_start: usize,
    /// Bumped by `clear`
    epoch: u64,
}

/// Shared, cloneable handle to the cache.
#[derive(Clone, Default)]
pub struct QueryCache {
    inner: Arc<Mutex<CacheInner>>,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("QueryCache")
            .field("entries", &inner.entries.len())
            .field("epoch", &inner.epoch)
            .finish()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the stored value for `key` when it is fresh, otherwise runs
    /// `fetcher` and stores what it returns. Errors are passed through and
    /// never stored.
    pub async fn fetch<T, F, Fut>(&self, key: QueryKey, policy: CachePolicy, fetcher: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (version, epoch) = {
            let mut inner = self.lock();
            let epoch = inner.epoch;
            let entry = inner.entries.entry(key.clone()).or_insert_with(Entry::new);
            if policy == CachePolicy::UntilInvalidated && !entry.stale {
                if let Some(value) = entry.value.as_ref().and_then(|v| v.downcast_ref::<T>()) {
                    trace!(%key, "cache hit");
                    return Ok(value.clone());
                }
            }
            (entry.version, epoch)
        };

        debug!(%key, "fetching");
        let value = fetcher().await?;

        let mut inner = self.lock();
        if inner.epoch != epoch {
            debug!(%key, "cache cleared during fetch, result not stored");
            return Ok(value);
        }
        let entry = inner.entries.entry(key.clone()).or_insert_with(Entry::new);
        if entry.version == version {
            entry.value = Some(Arc::new(value.clone()));
            entry.stale = false;
        } else {
            debug!(%key, "invalidated during fetch, result not stored");
        }
        Ok(value)
    }

    /// Fresh stored value, if any.
    pub fn get<T: Clone + 'static>(&self, key: &QueryKey) -> Option<T> {
        let inner = self.lock();
        let entry = inner.entries.get(key)?;
        if entry.stale {
            return None;
        }
        entry
            .value
            .as_ref()
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.lock().entries.get(key).map_or(true, |e| e.stale || e.value.is_none())
    }

    /// Receiver that changes whenever `key` is invalidated or the cache is
    /// cleared.
    pub fn subscribe(&self, key: QueryKey) -> watch::Receiver<u64> {
        let mut inner = self.lock();
        inner
            .entries
            .entry(key)
            .or_insert_with(Entry::new)
            .notify
            .subscribe()
    }

    /// Marks every entry under `tag` stale and notifies its subscribers.
    /// Returns how many entries matched; zero means nothing happened.
    pub fn invalidate(&self, tag: &QueryKey) -> usize {
        let mut inner = self.lock();
        let mut matched = 0;
        for (key, entry) in inner.entries.iter_mut() {
            if key.matches(tag) {
                entry.invalidate();
                matched += 1;
            }
        }
        debug!(%tag, matched, "invalidated");
        if inner.log.len() == INVALIDATION_LOG_CAPACITY {
            inner.log.pop_front();
            inner.log_start += 1;
        }
        inner.log.push_back(Invalidation {
            tag: tag.clone(),
            matched,
        });
        matched
    }

    /// Drops every stored value and wakes every subscriber.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.entries.retain(|_, entry| {
            entry.value = None;
            entry.invalidate();
            entry.notify.receiver_count() > 0
        });
        inner.log_start += inner.log.len();
        inner.log.clear();
        debug!(epoch = inner.epoch, "cache cleared");
    }

    /// Retained invalidations since the last `clear`, oldest first.
    pub fn invalidations(&self) -> Vec<Invalidation> {
        self.lock().log.iter().cloned().collect()
    }

    /// Whether any invalidation since log position `since` covered `key`.
    /// A position older than the retained log answers true.
    pub fn was_invalidated_since(&self, since: usize, key: &QueryKey) -> bool {
        let inner = self.lock();
        if since < inner.log_start {
            return true;
        }
        inner
            .log
            .iter()
            .skip(since - inner.log_start)
            .any(|inv| key.matches(&inv.tag))
    }

    /// Current log position, for a later `was_invalidated_since`.
    pub fn log_len(&self) -> usize {
        let inner = self.lock();
        inner.log_start + inner.log.len()
    }

    pub fn len(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|e| e.value.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
