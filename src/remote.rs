//! Remote data client
//!
//! [`Backend`] is the one seam between the application and the hosted
//! platform. [`SupabaseBackend`] implements it over the REST, auth, storage
//! and realtime clients; tests swap in an in-memory implementation.

use crate::config::LostFoundConfig;
use crate::error::{Error, Result};
use crate::local_store::LocalStore;
use crate::models::{
    Item, ItemChanges, ItemType, Message, NewItem, NewMessage, NewProfile, Profile, Role,
};
use async_trait::async_trait;
use bytes::Bytes;
use lostfound_auth::{Auth, AuthError, AuthOptions};
use lostfound_postgrest::{PostgrestClient, SortOrder};
use lostfound_realtime::{Channel, ConnectionState, RealtimeClient, RealtimeClientOptions};
use lostfound_storage::{FileOptions, StorageClient};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub use lostfound_auth::{Session, SignUpResponse};
pub use lostfound_realtime::BroadcastEvent;

const ITEMS: &str = "items";
const PROFILES: &str = "profiles";
const MESSAGES: &str = "messages";

/// Parses the auth user id of `session` into the row-id type.
pub fn session_user_id(session: &Session) -> Result<Uuid> {
    Uuid::parse_str(&session.user.id)
        .map_err(|e| Error::auth(format!("session carries an invalid user id: {}", e)))
}

/// A joined broadcast channel
#[async_trait]
pub trait LiveChannel: Send + Sync {
    async fn send(&self, event: &str, payload: Value) -> Result<()>;

    /// Next broadcast; `None` once the channel is gone.
    async fn recv(&mut self) -> Option<BroadcastEvent>;

    fn try_recv(&mut self) -> Option<BroadcastEvent>;

    async fn leave(&mut self) -> Result<()>;
}

/// Every remote operation the application performs
#[async_trait]
pub trait Backend: Send + Sync {
    /// The current session after re-verifying it with the provider; a
    /// session the provider rejects is dropped and reported as `None`.
    async fn current_session(&self) -> Result<Option<Session>>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    async fn sign_up(&self, email: &str, password: &str, full_name: &str)
        -> Result<SignUpResponse>;

    async fn sign_out(&self) -> Result<()>;

    /// Items of one type, newest first.
    async fn list_items(&self, kind: ItemType) -> Result<Vec<Item>>;

    async fn list_all_items(&self) -> Result<Vec<Item>>;

    async fn get_item(&self, id: Uuid) -> Result<Option<Item>>;

    async fn insert_item(&self, item: &NewItem) -> Result<Item>;

    async fn update_item(&self, id: Uuid, changes: &ItemChanges) -> Result<Item>;

    async fn delete_item(&self, id: Uuid) -> Result<()>;

    /// Stores `bytes` in the image bucket and returns its public URL.
    async fn upload_object(&self, name: &str, bytes: Bytes, content_type: &str) -> Result<String>;

    async fn remove_object(&self, name: &str) -> Result<()>;

    async fn insert_profile(&self, profile: &NewProfile) -> Result<Profile>;

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>>;

    async fn list_profiles(&self) -> Result<Vec<Profile>>;

    async fn update_profile_role(&self, id: Uuid, role: Role) -> Result<Profile>;

    /// Messages about one item, oldest first.
    async fn list_messages(&self, item_id: Uuid) -> Result<Vec<Message>>;

    /// Every message, newest first.
    async fn list_all_messages(&self) -> Result<Vec<Message>>;

    async fn insert_message(&self, message: &NewMessage) -> Result<Message>;

    /// Joins the broadcast channel `topic`, waiting for the server's ack.
    async fn join_channel(&self, topic: &str) -> Result<Box<dyn LiveChannel>>;
}

/// [`Backend`] over a hosted Supabase project
pub struct SupabaseBackend {
    base_url: String,
    anon_key: String,
    http_client: Client,
    auth: Auth,
    storage: StorageClient,
    realtime: RealtimeClient,
    store: LocalStore,
    session_key: String,
    persist_session: bool,
    image_bucket: String,
}

impl SupabaseBackend {
    /// Builds the sub-clients and restores a persisted session, if any.
    pub fn new(config: &LostFoundConfig, store: LocalStore) -> Result<Self> {
        let options = &config.options;
        let base_url = config.base_url();

        let mut builder = Client::builder();
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        let auth = Auth::new(
            &base_url,
            &config.anon_key,
            http_client.clone(),
            AuthOptions {
                auto_refresh_token: options.auto_refresh_token,
            },
        );
        let storage = StorageClient::new(&base_url, &config.anon_key, http_client.clone());
        let realtime = RealtimeClient::new_with_options(
            &base_url,
            &config.anon_key,
            RealtimeClientOptions {
                heartbeat_interval: options.heartbeat_interval.as_millis() as u64,
                reply_timeout: options.join_timeout.as_millis() as u64,
            },
        );

        let backend = Self {
            base_url,
            anon_key: config.anon_key.clone(),
            http_client,
            auth,
            storage,
            realtime,
            store,
            session_key: config.session_storage_key(),
            persist_session: options.persist_session,
            image_bucket: options.image_bucket.clone(),
        };
        backend.restore_session();
        Ok(backend)
    }

    fn restore_session(&self) {
        if !self.persist_session {
            return;
        }
        match self.store.get::<Session>(&self.session_key) {
            Ok(Some(session)) => {
                debug!(user = %session.user.id, "restored persisted session");
                self.auth.set_session(Some(session));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "discarding unreadable persisted session");
                if let Err(e) = self.store.remove(&self.session_key) {
                    warn!(error = %e, "failed to remove persisted session");
                }
            }
        }
    }

    fn persist(&self) -> Result<()> {
        if !self.persist_session {
            return Ok(());
        }
        match self.auth.get_session() {
            Some(session) => self.store.set(&self.session_key, &session),
            None => self.store.remove(&self.session_key),
        }
    }

    fn forget_session(&self) {
        self.auth.set_session(None);
        if let Err(e) = self.persist() {
            warn!(error = %e, "failed to clear persisted session");
        }
    }

    /// Connection state of the realtime socket.
    pub fn realtime_state(&self) -> ConnectionState {
        self.realtime.connection_state()
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    /// Query builder for `table`, authenticated as the current user when
    /// there is one.
    fn from(&self, table: &str) -> Result<PostgrestClient> {
        let client = PostgrestClient::new(&self.base_url, &self.anon_key, table, self.http_client.clone());
        match self.auth.get_session() {
            Some(session) => Ok(client.with_auth(&session.access_token)?),
            None => Ok(client),
        }
    }

    fn storage(&self) -> StorageClient {
        match self.auth.get_session() {
            Some(session) => self.storage.clone().with_auth(&session.access_token),
            None => self.storage.clone(),
        }
    }
}

fn first_row<T>(rows: Vec<T>, what: &str) -> Result<T> {
    rows.into_iter()
        .next()
        .ok_or_else(|| Error::not_found(what.to_string()))
}

#[async_trait]
impl Backend for SupabaseBackend {
    #[instrument(skip(self))]
    async fn current_session(&self) -> Result<Option<Session>> {
        if self.auth.get_session().is_none() {
            return Ok(None);
        }
        match self.auth.get_user().await {
            Ok(user) => {
                debug!(user = %user.id, "session verified");
                // get_user may have refreshed the tokens
                self.persist()?;
                Ok(self.auth.get_session())
            }
            Err(AuthError::ApiError { status, message }) if status.is_client_error() => {
                info!(%status, %message, "provider rejected stored session");
                self.forget_session();
                Ok(None)
            }
            Err(AuthError::MissingSession) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, password))]
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.auth.sign_in_with_password(email, password).await?;
        self.persist()?;
        info!(user = %session.user.id, "signed in");
        Ok(session)
    }

    #[instrument(skip(self, password))]
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<SignUpResponse> {
        let response = self
            .auth
            .sign_up(email, password, Some(json!({ "full_name": full_name })))
            .await?;
        if response.session.is_some() {
            self.persist()?;
        }
        Ok(response)
    }

    async fn sign_out(&self) -> Result<()> {
        let result = self.auth.sign_out().await;
        if let Err(e) = self.persist() {
            warn!(error = %e, "failed to clear persisted session");
        }
        self.realtime.set_auth(None).await;
        match result {
            Ok(()) | Err(AuthError::MissingSession) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_items(&self, kind: ItemType) -> Result<Vec<Item>> {
        Ok(self
            .from(ITEMS)?
            .select("*")
            .eq("type", kind.as_str())
            .order("created_at", SortOrder::Descending)
            .execute()
            .await?)
    }

    async fn list_all_items(&self) -> Result<Vec<Item>> {
        Ok(self
            .from(ITEMS)?
            .select("*")
            .order("created_at", SortOrder::Descending)
            .execute()
            .await?)
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<Item>> {
        Ok(self
            .from(ITEMS)?
            .select("*")
            .eq("id", &id.to_string())
            .maybe_single()
            .await?)
    }

    #[instrument(skip(self, item), fields(title = %item.title))]
    async fn insert_item(&self, item: &NewItem) -> Result<Item> {
        let rows = self.from(ITEMS)?.insert::<_, Item>(item).await?;
        first_row(rows, "inserted item was not returned")
    }

    async fn update_item(&self, id: Uuid, changes: &ItemChanges) -> Result<Item> {
        let rows = self
            .from(ITEMS)?
            .eq("id", &id.to_string())
            .update::<_, Item>(changes)
            .await?;
        first_row(rows, &format!("item {} was not updated", id))
    }

    async fn delete_item(&self, id: Uuid) -> Result<()> {
        let rows: Vec<Item> = self
            .from(ITEMS)?
            .eq("id", &id.to_string())
            .delete()
            .await?;
        first_row(rows, &format!("item {} was not deleted", id)).map(|_| ())
    }

    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload_object(&self, name: &str, bytes: Bytes, content_type: &str) -> Result<String> {
        let storage = self.storage();
        let bucket = storage.from(&self.image_bucket);
        let options = FileOptions::new()
            .with_content_type(content_type)
            .with_cache_control("3600")
            .with_upsert(false);
        bucket.upload(name, bytes, Some(options)).await?;
        Ok(bucket.get_public_url(name))
    }

    async fn remove_object(&self, name: &str) -> Result<()> {
        let storage = self.storage();
        storage.from(&self.image_bucket).remove(&[name]).await?;
        Ok(())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<Profile> {
        let rows = self.from(PROFILES)?.insert::<_, Profile>(profile).await?;
        first_row(rows, "inserted profile was not returned")
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        Ok(self
            .from(PROFILES)?
            .select("*")
            .eq("id", &id.to_string())
            .maybe_single()
            .await?)
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>> {
        Ok(self
            .from(PROFILES)?
            .select("*")
            .order("created_at", SortOrder::Descending)
            .execute()
            .await?)
    }

    async fn update_profile_role(&self, id: Uuid, role: Role) -> Result<Profile> {
        let rows = self
            .from(PROFILES)?
            .eq("id", &id.to_string())
            .update::<_, Profile>(json!({ "role": role }))
            .await?;
        first_row(rows, &format!("profile {} was not updated", id))
    }

    async fn list_messages(&self, item_id: Uuid) -> Result<Vec<Message>> {
        Ok(self
            .from(MESSAGES)?
            .select("*")
            .eq("item_id", &item_id.to_string())
            .order("created_at", SortOrder::Ascending)
            .execute()
            .await?)
    }

    async fn list_all_messages(&self) -> Result<Vec<Message>> {
        Ok(self
            .from(MESSAGES)?
            .select("*")
            .order("created_at", SortOrder::Descending)
            .execute()
            .await?)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        let rows = self.from(MESSAGES)?.insert::<_, Message>(message).await?;
        first_row(rows, "inserted message was not returned")
    }

    #[instrument(skip(self))]
    async fn join_channel(&self, topic: &str) -> Result<Box<dyn LiveChannel>> {
        let token = self.auth.get_session().map(|s| s.access_token);
        self.realtime.set_auth(token).await;
        let channel = self.realtime.channel(topic).subscribe().await?;
        Ok(Box::new(RealtimeChannel { channel }))
    }
}

struct RealtimeChannel {
    channel: Channel,
}

#[async_trait]
impl LiveChannel for RealtimeChannel {
    async fn send(&self, event: &str, payload: Value) -> Result<()> {
        Ok(self.channel.send_broadcast(event, payload).await?)
    }

    async fn recv(&mut self) -> Option<BroadcastEvent> {
        self.channel.recv().await
    }

    fn try_recv(&mut self) -> Option<BroadcastEvent> {
        self.channel.try_recv()
    }

    async fn leave(&mut self) -> Result<()> {
        Ok(self.channel.unsubscribe().await?)
    }
}
