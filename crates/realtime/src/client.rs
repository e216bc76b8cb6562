use crate::channel::ChannelBuilder;
use crate::error::RealtimeError;
use crate::message::{ChannelEvent, RealtimeMessage, PHOENIX_TOPIC};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex, MutexGuard, RwLock};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct RealtimeClientOptions {
    /// Milliseconds between heartbeats.
    pub heartbeat_interval: u64,
    /// Milliseconds to wait for a `phx_reply`.
    pub reply_timeout: u64,
}

impl Default for RealtimeClientOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: 30_000,
            reply_timeout: 10_000,
        }
    }
}

/// One server-side join, shared by every local subscriber of the topic.
struct Route {
    join_ref: String,
    broadcast_self: bool,
    subscribers: Vec<(u32, mpsc::UnboundedSender<RealtimeMessage>)>,
}

/// A subscriber's place in a route
pub(crate) struct Subscription {
    pub id: u32,
    pub join_ref: String,
    pub inbox: mpsc::UnboundedReceiver<RealtimeMessage>,
}

/// Handle to one websocket connection; clones share it.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    key: String,
    options: RealtimeClientOptions,
    next_ref: AtomicU32,
    socket: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    // full topic -> its join and subscriber inboxes
    routes: RwLock<HashMap<String, Route>>,
    next_subscriber: AtomicU32,
    // held across a join so a second subscriber never races the first
    join_lock: Mutex<()>,
    // message ref -> waiter for its phx_reply
    pending: Mutex<HashMap<String, oneshot::Sender<RealtimeMessage>>>,
    state: watch::Sender<ConnectionState>,
    access_token: RwLock<Option<String>>,
    connect_lock: Mutex<()>,
    // bumped per socket so a stale reader cannot tear down its successor
    generation: AtomicU32,
}

impl RealtimeClient {
    pub fn new(url: &str, key: &str) -> Self {
        Self::new_with_options(url, key, RealtimeClientOptions::default())
    }

    pub fn new_with_options(url: &str, key: &str, options: RealtimeClientOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                url: url.to_string(),
                key: key.to_string(),
                options,
                next_ref: AtomicU32::new(1),
                socket: RwLock::new(None),
                routes: RwLock::new(HashMap::new()),
                next_subscriber: AtomicU32::new(1),
                join_lock: Mutex::new(()),
                pending: Mutex::new(HashMap::new()),
                state,
                access_token: RwLock::new(None),
                connect_lock: Mutex::new(()),
                generation: AtomicU32::new(0),
            }),
        }
    }

    /// Token sent with later channel joins so private topics see the user.
    pub async fn set_auth(&self, token: Option<String>) {
        debug!("setting realtime auth token (is_some: {})", token.is_some());
        *self.inner.access_token.write().await = token;
    }

    pub(crate) async fn access_token(&self) -> Option<String> {
        self.inner.access_token.read().await.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn on_state_change(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn channel(&self, topic: &str) -> ChannelBuilder {
        ChannelBuilder::new(self.clone(), topic)
    }

    pub(crate) fn next_ref(&self) -> String {
        self.inner.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            info!("realtime connection {:?} -> {:?}", previous, state);
        }
    }

    /// Websocket endpoint for the project URL, mapping http(s) to ws(s).
    pub fn endpoint(&self) -> Result<Url, RealtimeError> {
        let mut url = Url::parse(&self.inner.url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(RealtimeError::ConnectionError(format!(
                    "Unsupported URL scheme: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            RealtimeError::ConnectionError(format!("Cannot use scheme {}", scheme))
        })?;
        url.set_path("/realtime/v1/websocket");
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.inner.key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    /// Opens the socket unless it is already open.
    pub async fn connect(&self) -> Result<(), RealtimeError> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.connection_state() == ConnectionState::Connected {
            return Ok(());
        }

        let endpoint = self.endpoint()?;
        self.set_state(ConnectionState::Connecting);
        debug!("connecting to {}", endpoint.as_str());

        let ws_stream = match connect_async(endpoint.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                error!("websocket connection failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                return Err(RealtimeError::ConnectionError(format!(
                    "WebSocket connection failed: {}",
                    e
                )));
            }
        };

        let (mut write, mut read) = ws_stream.split();
        let (socket_tx, mut socket_rx) = mpsc::unbounded_channel::<Message>();
        *self.inner.socket.write().await = Some(socket_tx);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(ConnectionState::Connected);

        tokio::spawn(async move {
            while let Some(message) = socket_rx.recv().await {
                let closing = message.is_close();
                if let Err(e) = write.send(message).await {
                    error!("websocket send failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = write.close().await;
            debug!("writer task finished");
        });

        let client = self.clone();
        tokio::spawn(async move {
            let mut heartbeat = interval(Duration::from_millis(
                client.inner.options.heartbeat_interval,
            ));
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            heartbeat.tick().await;

            loop {
                tokio::select! {
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => client.dispatch(&text).await,
                        Some(Ok(Message::Close(reason))) => {
                            debug!("server closed socket: {:?}", reason);
                            break;
                        }
                        Some(Ok(other)) => trace!("ignoring frame {:?}", other),
                        Some(Err(e)) => {
                            warn!("websocket read failed: {}", e);
                            break;
                        }
                        None => break,
                    },
                    _ = heartbeat.tick() => {
                        let beat = RealtimeMessage::new(PHOENIX_TOPIC, ChannelEvent::Heartbeat, json!({}))
                            .with_ref(client.next_ref());
                        if let Err(e) = client.send(&beat).await {
                            warn!("heartbeat failed: {}", e);
                            break;
                        }
                    }
                }
            }
            if client.inner.generation.load(Ordering::SeqCst) == generation {
                client.teardown().await;
            }
        });

        Ok(())
    }

    /// Closes the socket; every open channel stream ends.
    pub async fn disconnect(&self) -> Result<(), RealtimeError> {
        if let Some(socket) = self.inner.socket.read().await.as_ref() {
            let _ = socket.send(Message::Close(None));
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.teardown().await;
        Ok(())
    }

    async fn teardown(&self) {
        *self.inner.socket.write().await = None;
        self.inner.routes.write().await.clear();
        self.inner.pending.lock().await.clear();
        self.set_state(ConnectionState::Disconnected);
    }

    async fn dispatch(&self, text: &str) {
        let message = match serde_json::from_str::<RealtimeMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                error!("unparsable frame ({}): {}", e, text);
                return;
            }
        };
        trace!("received {} on {}", message.event, message.topic);

        if message.kind() == Some(ChannelEvent::PhoenixReply) {
            if let Some(message_ref) = &message.message_ref {
                if let Some(waiter) = self.inner.pending.lock().await.remove(message_ref) {
                    let _ = waiter.send(message);
                    return;
                }
            }
        }

        if message.topic == PHOENIX_TOPIC {
            return;
        }

        let routes = self.inner.routes.read().await;
        match routes.get(&message.topic) {
            Some(route) => {
                for (id, inbox) in &route.subscribers {
                    if inbox.send(message.clone()).is_err() {
                        debug!("inbox of subscriber {} closed, dropping frame", id);
                    }
                }
            }
            None => debug!("frame for unsubscribed topic {}", message.topic),
        }
    }

    pub(crate) async fn send(&self, message: &RealtimeMessage) -> Result<(), RealtimeError> {
        let text = serde_json::to_string(message)?;
        let socket = self.inner.socket.read().await;
        let socket = socket
            .as_ref()
            .ok_or_else(|| RealtimeError::ConnectionError("Socket is not connected".into()))?;
        socket
            .send(Message::Text(text))
            .map_err(|_| RealtimeError::ConnectionError("Socket writer has stopped".into()))
    }

    /// Sends `message` and waits for the `phx_reply` carrying its ref.
    pub(crate) async fn request(
        &self,
        message: RealtimeMessage,
    ) -> Result<RealtimeMessage, RealtimeError> {
        let message_ref = message
            .message_ref
            .clone()
            .ok_or_else(|| RealtimeError::ChannelError("Request without ref".into()))?;
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .await
            .insert(message_ref.clone(), tx);

        if let Err(e) = self.send(&message).await {
            self.inner.pending.lock().await.remove(&message_ref);
            return Err(e);
        }

        let wait = Duration::from_millis(self.inner.options.reply_timeout);
        match timeout(wait, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RealtimeError::ConnectionError(
                "Connection closed before reply".into(),
            )),
            Err(_) => {
                self.inner.pending.lock().await.remove(&message_ref);
                Err(RealtimeError::Timeout(format!(
                    "{} on {}",
                    message.event, message.topic
                )))
            }
        }
    }

    pub(crate) async fn lock_joins(&self) -> MutexGuard<'_, ()> {
        self.inner.join_lock.lock().await
    }

    /// Adds a subscriber to a topic this socket already joined.
    pub(crate) async fn attach(&self, topic: &str) -> Option<Subscription> {
        let mut routes = self.inner.routes.write().await;
        let route = routes.get_mut(topic)?;
        // channels dropped without unsubscribing
        route.subscribers.retain(|(_, tx)| !tx.is_closed());
        if route.subscribers.is_empty() {
            routes.remove(topic);
            return None;
        }
        let route = routes.get_mut(topic)?;
        let (tx, inbox) = mpsc::unbounded_channel();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        route.subscribers.push((id, tx));
        Some(Subscription {
            id,
            join_ref: route.join_ref.clone(),
            inbox,
        })
    }

    /// Opens the route for a join about to be sent under `join_ref`.
    pub(crate) async fn register(
        &self,
        topic: &str,
        join_ref: &str,
        broadcast_self: bool,
    ) -> Subscription {
        let (tx, inbox) = mpsc::unbounded_channel();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.inner.routes.write().await.insert(
            topic.to_string(),
            Route {
                join_ref: join_ref.to_string(),
                broadcast_self,
                subscribers: vec![(id, tx)],
            },
        );
        Subscription {
            id,
            join_ref: join_ref.to_string(),
            inbox,
        }
    }

    /// Drops one subscriber. Returns true when it was the topic's last, so
    /// the server-side join should be left.
    pub(crate) async fn unregister(&self, topic: &str, subscriber: u32) -> bool {
        let mut routes = self.inner.routes.write().await;
        let route = match routes.get_mut(topic) {
            Some(route) => route,
            None => return false,
        };
        route.subscribers.retain(|(id, _)| *id != subscriber);
        if route.subscribers.is_empty() {
            routes.remove(topic);
            true
        } else {
            false
        }
    }

    /// Hands a broadcast sent by `from` to the topic's other local
    /// subscribers. The server skips this socket unless `self` is on.
    pub(crate) async fn fan_out(&self, topic: &str, from: u32, message: &RealtimeMessage) {
        let routes = self.inner.routes.read().await;
        if let Some(route) = routes.get(topic) {
            if route.broadcast_self {
                return;
            }
            for (id, inbox) in &route.subscribers {
                if *id != from {
                    let _ = inbox.send(message.clone());
                }
            }
        }
    }
}
