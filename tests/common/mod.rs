#![allow(dead_code)]

//! In-memory backend shared by the integration tests.
//!
//! A `World` plays the hosted platform: tables, the image bucket, users and
//! broadcast topics, with the same row-policy outcomes the real project
//! has. Each `MemoryBackend` is one client with its own session.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use lostfound::error::{Error, Result};
use lostfound::models::{
    Category, Item, ItemChanges, ItemType, Location, Message, NewItem, NewMessage, NewProfile,
    Profile, Role,
};
use lostfound::remote::{Backend, BroadcastEvent, LiveChannel, Session, SignUpResponse};
use lostfound::validation::ReportForm;
use lostfound::User;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

type Subscribers = Vec<(usize, mpsc::UnboundedSender<BroadcastEvent>)>;

#[derive(Default)]
pub struct World {
    users: Mutex<HashMap<String, (String, Uuid)>>,
    /// `full_name` given at sign-up, carried as user metadata
    names: Mutex<HashMap<Uuid, String>>,
    pub items: Mutex<Vec<Item>>,
    pub profiles: Mutex<Vec<Profile>>,
    pub messages: Mutex<Vec<Message>>,
    pub objects: Mutex<HashMap<String, Bytes>>,
    channels: Mutex<HashMap<String, Subscribers>>,
    next_channel: AtomicUsize,
    clock: Mutex<Option<DateTime<Utc>>>,
    skew: Mutex<Option<Duration>>,
    /// Deliver broadcasts back to their sender too
    pub echo_broadcasts: AtomicBool,
    pub refuse_joins: AtomicBool,
    /// Sign-up answers without a session, as with email confirmation on
    pub require_confirmation: AtomicBool,
}

impl World {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Strictly increasing server timestamps.
    pub fn now(&self) -> DateTime<Utc> {
        let mut clock = self.clock.lock().unwrap();
        let now = Utc::now() + self.skew.lock().unwrap().unwrap_or_else(Duration::zero);
        let next = match *clock {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        *clock = Some(next);
        next
    }

    /// Moves the server clock away from the clients' clocks.
    pub fn skew_clock(&self, by: Duration) {
        *self.skew.lock().unwrap() = Some(by);
    }

    /// Registers a confirmed user with a profile.
    pub fn add_user(&self, email: &str, password: &str, role: Role) -> Uuid {
        let id = Uuid::new_v4();
        self.users
            .lock()
            .unwrap()
            .insert(email.to_string(), (password.to_string(), id));
        self.profiles.lock().unwrap().push(Profile {
            id,
            email: Some(email.to_string()),
            full_name: Some(email.split('@').next().unwrap_or(email).to_string()),
            role,
            created_at: Some(self.now()),
        });
        id
    }

    pub fn seed_item(&self, kind: ItemType, title: &str, owner: Option<Uuid>) -> Item {
        let item = Item {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: format!("{} description", title),
            category: Category::Other,
            kind,
            location: Location::Jakarta,
            date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            image_url: None,
            contact_name: "Seeder".to_string(),
            contact_phone: "081234567890".to_string(),
            contact_email: None,
            user_id: owner,
            created_at: self.now(),
        };
        self.items.lock().unwrap().push(item.clone());
        item
    }

    pub fn item(&self, id: Uuid) -> Option<Item> {
        self.items.lock().unwrap().iter().find(|i| i.id == id).cloned()
    }

    pub fn item_count(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn profile(&self, id: Uuid) -> Option<Profile> {
        self.profiles
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    fn role_of(&self, id: Uuid) -> Role {
        self.profile(id).map(|p| p.role).unwrap_or_default()
    }

    fn session_for(&self, id: Uuid, email: &str) -> Session {
        Session {
            access_token: format!("token-{}", id),
            refresh_token: format!("refresh-{}", id),
            expires_in: 3600,
            expires_at: Some(Utc::now().timestamp() + 3600),
            token_type: "bearer".to_string(),
            user: User {
                id: id.to_string(),
                email: Some(email.to_string()),
                user_metadata: match self.names.lock().unwrap().get(&id) {
                    Some(name) => serde_json::json!({ "full_name": name }),
                    None => Value::Null,
                },
                created_at: None,
            },
        }
    }
}

/// One client of the world
pub struct MemoryBackend {
    pub world: Arc<World>,
    session: Mutex<Option<Session>>,
    calls: Mutex<Vec<&'static str>>,
    failures: Mutex<HashMap<&'static str, VecDeque<Error>>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Self::in_world(World::new())
    }

    pub fn in_world(world: Arc<World>) -> Arc<Self> {
        Arc::new(Self {
            world,
            session: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        })
    }

    /// Another client sharing this backend's world.
    pub fn participant(&self) -> Arc<Self> {
        Self::in_world(self.world.clone())
    }

    /// Signs in without going through the hooks or recording a call.
    pub fn login_as(&self, email: &str) -> Uuid {
        let id = self.world.users.lock().unwrap()[email].1;
        *self.session.lock().unwrap() = Some(self.world.session_for(id, email));
        id
    }

    pub fn has_session(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    /// Makes the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: &'static str, error: Error) {
        self.failures
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn enter(&self, op: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(op);
        match self.failures.lock().unwrap().get_mut(op).and_then(|q| q.pop_front()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn uid(&self) -> Option<Uuid> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|s| Uuid::parse_str(&s.user.id).ok())
    }

    fn is_admin(&self) -> bool {
        self.uid().map_or(false, |id| self.world.role_of(id) == Role::Admin)
    }

    fn rls_violation(table: &str) -> Error {
        Error::Forbidden(format!(
            "new row violates row-level security policy for table \"{}\"",
            table
        ))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn current_session(&self) -> Result<Option<Session>> {
        self.enter("current_session")?;
        Ok(self.session.lock().unwrap().clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        self.enter("sign_in")?;
        let user = self.world.users.lock().unwrap().get(email).cloned();
        match user {
            Some((stored, id)) if stored == password => {
                let session = self.world.session_for(id, email);
                *self.session.lock().unwrap() = Some(session.clone());
                Ok(session)
            }
            _ => Err(Error::Remote("Invalid login credentials".to_string())),
        }
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<SignUpResponse> {
        self.enter("sign_up")?;
        let id = {
            let mut users = self.world.users.lock().unwrap();
            if users.contains_key(email) {
                return Err(Error::Remote("User already registered".to_string()));
            }
            let id = Uuid::new_v4();
            users.insert(email.to_string(), (password.to_string(), id));
            id
        };
        self.world
            .names
            .lock()
            .unwrap()
            .insert(id, full_name.to_string());
        let session = self.world.session_for(id, email);
        if self.world.require_confirmation.load(Ordering::SeqCst) {
            Ok(SignUpResponse {
                user: session.user,
                session: None,
            })
        } else {
            *self.session.lock().unwrap() = Some(session.clone());
            Ok(SignUpResponse {
                user: session.user.clone(),
                session: Some(session),
            })
        }
    }

    async fn sign_out(&self) -> Result<()> {
        let result = self.enter("sign_out");
        *self.session.lock().unwrap() = None;
        result
    }

    async fn list_items(&self, kind: ItemType) -> Result<Vec<Item>> {
        self.enter("list_items")?;
        let mut items: Vec<Item> = self
            .world
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.kind == kind)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn list_all_items(&self) -> Result<Vec<Item>> {
        self.enter("list_all_items")?;
        let mut items = self.world.items.lock().unwrap().clone();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<Item>> {
        self.enter("get_item")?;
        Ok(self.world.item(id))
    }

    async fn insert_item(&self, item: &NewItem) -> Result<Item> {
        self.enter("insert_item")?;
        let uid = self.uid().ok_or_else(|| Self::rls_violation("items"))?;
        if item.user_id != Some(uid) {
            return Err(Self::rls_violation("items"));
        }
        let stored = Item {
            id: Uuid::new_v4(),
            title: item.title.clone(),
            description: item.description.clone(),
            category: item.category,
            kind: item.kind,
            location: item.location,
            date: item.date,
            image_url: item.image_url.clone(),
            contact_name: item.contact_name.clone(),
            contact_phone: item.contact_phone.clone(),
            contact_email: item.contact_email.clone(),
            user_id: item.user_id,
            created_at: self.world.now(),
        };
        self.world.items.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn update_item(&self, id: Uuid, changes: &ItemChanges) -> Result<Item> {
        self.enter("update_item")?;
        let uid = self.uid();
        let admin = self.is_admin();
        let mut items = self.world.items.lock().unwrap();
        match items
            .iter_mut()
            .find(|i| i.id == id && (admin || (uid.is_some() && i.user_id == uid)))
        {
            Some(item) => {
                changes.apply_to(item);
                Ok(item.clone())
            }
            None => Err(Error::NotFound(format!("item {} was not updated", id))),
        }
    }

    async fn delete_item(&self, id: Uuid) -> Result<()> {
        self.enter("delete_item")?;
        if !self.is_admin() {
            return Err(Error::NotFound(format!("item {} was not deleted", id)));
        }
        let mut items = self.world.items.lock().unwrap();
        let before = items.len();
        items.retain(|i| i.id != id);
        if items.len() == before {
            return Err(Error::NotFound(format!("item {} was not deleted", id)));
        }
        self.world
            .messages
            .lock()
            .unwrap()
            .retain(|m| m.item_id != id);
        Ok(())
    }

    async fn upload_object(&self, name: &str, bytes: Bytes, _content_type: &str) -> Result<String> {
        self.enter("upload_object")?;
        if self.uid().is_none() {
            return Err(Error::Forbidden("new row violates row-level security policy".into()));
        }
        self.world
            .objects
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes);
        Ok(format!(
            "https://test.supabase.co/storage/v1/object/public/images/{}",
            name
        ))
    }

    async fn remove_object(&self, name: &str) -> Result<()> {
        self.enter("remove_object")?;
        self.world.objects.lock().unwrap().remove(name);
        Ok(())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<Profile> {
        self.enter("insert_profile")?;
        if self.uid() != Some(profile.id) {
            return Err(Self::rls_violation("profiles"));
        }
        let stored = Profile {
            id: profile.id,
            email: Some(profile.email.clone()),
            full_name: Some(profile.full_name.clone()),
            role: profile.role,
            created_at: Some(self.world.now()),
        };
        self.world.profiles.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.enter("get_profile")?;
        if self.uid() != Some(id) && !self.is_admin() {
            return Ok(None);
        }
        Ok(self.world.profile(id))
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.enter("list_profiles")?;
        let uid = self.uid();
        let admin = self.is_admin();
        Ok(self
            .world
            .profiles
            .lock()
            .unwrap()
            .iter()
            .filter(|p| admin || Some(p.id) == uid)
            .cloned()
            .collect())
    }

    async fn update_profile_role(&self, id: Uuid, role: Role) -> Result<Profile> {
        self.enter("update_profile_role")?;
        if !self.is_admin() {
            return Err(Error::NotFound(format!("profile {} was not updated", id)));
        }
        let mut profiles = self.world.profiles.lock().unwrap();
        let profile = profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::NotFound(format!("profile {} was not updated", id)))?;
        profile.role = role;
        Ok(profile.clone())
    }

    async fn list_messages(&self, item_id: Uuid) -> Result<Vec<Message>> {
        self.enter("list_messages")?;
        let mut messages: Vec<Message> = self
            .world
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.item_id == item_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn list_all_messages(&self) -> Result<Vec<Message>> {
        self.enter("list_all_messages")?;
        let mut messages = self.world.messages.lock().unwrap().clone();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(messages)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        self.enter("insert_message")?;
        if self.uid().is_none() {
            return Err(Self::rls_violation("messages"));
        }
        let mut messages = self.world.messages.lock().unwrap();
        if messages.iter().any(|m| m.client_id == Some(message.client_id)) {
            return Err(Error::Remote(
                "duplicate key value violates unique constraint \"messages_client_id_key\"".into(),
            ));
        }
        let stored = Message {
            id: Uuid::new_v4(),
            item_id: message.item_id,
            sender: message.sender,
            text: message.text.clone(),
            client_id: Some(message.client_id),
            created_at: message.created_at.unwrap_or_else(|| self.world.now()),
        };
        messages.push(stored.clone());
        Ok(stored)
    }

    async fn join_channel(&self, topic: &str) -> Result<Box<dyn LiveChannel>> {
        self.enter("join_channel")?;
        if self.world.refuse_joins.load(Ordering::SeqCst) {
            return Err(Error::Forbidden("Unauthorized".into()));
        }
        let id = self.world.next_channel.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.world
            .channels
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push((id, tx));
        Ok(Box::new(MemoryChannel {
            world: self.world.clone(),
            topic: topic.to_string(),
            id,
            inbox: tokio::sync::Mutex::new(rx),
        }))
    }
}

struct MemoryChannel {
    world: Arc<World>,
    topic: String,
    id: usize,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<BroadcastEvent>>,
}

#[async_trait]
impl LiveChannel for MemoryChannel {
    async fn send(&self, event: &str, payload: Value) -> Result<()> {
        let echo = self.world.echo_broadcasts.load(Ordering::SeqCst);
        let channels = self.world.channels.lock().unwrap();
        if let Some(subscribers) = channels.get(&self.topic) {
            for (id, tx) in subscribers {
                if *id != self.id || echo {
                    let _ = tx.send(BroadcastEvent::new(event, payload.clone()));
                }
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<BroadcastEvent> {
        self.inbox.get_mut().recv().await
    }

    fn try_recv(&mut self) -> Option<BroadcastEvent> {
        self.inbox.get_mut().try_recv().ok()
    }

    async fn leave(&mut self) -> Result<()> {
        let mut channels = self.world.channels.lock().unwrap();
        if let Some(subscribers) = channels.get_mut(&self.topic) {
            subscribers.retain(|(id, _)| *id != self.id);
        }
        Ok(())
    }
}

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

pub fn report_form(kind: ItemType) -> ReportForm {
    ReportForm {
        kind,
        title: "Dompet coklat".to_string(),
        description: "Dompet kulit berisi KTP".to_string(),
        category: Some(Category::Documents),
        location: Some(Location::Bandung),
        date: Some(NaiveDate::from_ymd_opt(2024, 4, 30).unwrap()),
        contact_name: "Budi".to_string(),
        contact_phone: "081234567890".to_string(),
        contact_email: "budi@example.com".to_string(),
    }
}

pub fn new_item(kind: ItemType) -> NewItem {
    report_form(kind).to_new_item(today(), None, None).unwrap()
}
