use crate::client::{ConnectionState, RealtimeClient, Subscription};
use crate::error::RealtimeError;
use crate::message::{BroadcastEvent, ChannelEvent, RealtimeMessage, ReplyStatus};
use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Joined,
    Closed,
    Errored,
}

/// Join options for one topic.
pub struct ChannelBuilder {
    client: RealtimeClient,
    topic: String,
    broadcast_self: bool,
    broadcast_ack: bool,
}

impl ChannelBuilder {
    pub(crate) fn new(client: RealtimeClient, topic: &str) -> Self {
        Self {
            client,
            topic: topic.to_string(),
            broadcast_self: false,
            broadcast_ack: false,
        }
    }

    /// Also deliver this socket's own broadcasts back to it.
    pub fn broadcast_self(mut self, enabled: bool) -> Self {
        self.broadcast_self = enabled;
        self
    }

    /// Ask the server to acknowledge each broadcast.
    pub fn broadcast_ack(mut self, enabled: bool) -> Self {
        self.broadcast_ack = enabled;
        self
    }

    /// Connects if needed, joins the topic and waits for the server's ok.
    /// A topic this socket already joined is shared with the existing
    /// subscribers, under the options of the first join.
    pub async fn subscribe(self) -> Result<Channel, RealtimeError> {
        if self.client.connection_state() != ConnectionState::Connected {
            self.client.connect().await?;
        }

        let topic = format!("realtime:{}", self.topic);
        let _joining = self.client.lock_joins().await;
        if let Some(subscription) = self.client.attach(&topic).await {
            debug!("{} already joined, adding subscriber {}", topic, subscription.id);
            return Ok(Channel::new(self.client.clone(), topic, subscription));
        }

        let mut payload = json!({
            "config": {
                "broadcast": { "self": self.broadcast_self, "ack": self.broadcast_ack },
                "presence": { "key": "" },
                "postgres_changes": [],
                "private": false
            }
        });
        if let Some(token) = self.client.access_token().await {
            payload["access_token"] = json!(token);
        }

        let join_ref = self.client.next_ref();
        let subscription = self
            .client
            .register(&topic, &join_ref, self.broadcast_self)
            .await;
        let join = RealtimeMessage::new(&topic, ChannelEvent::PhoenixJoin, payload)
            .with_ref(join_ref.clone())
            .with_join_ref(join_ref);

        let reply = match self.client.request(join).await {
            Ok(reply) => reply,
            Err(e) => {
                self.client.unregister(&topic, subscription.id).await;
                return Err(e);
            }
        };

        match reply.reply_status() {
            Some(ReplyStatus::Ok) => {
                info!("joined {}", topic);
                Ok(Channel::new(self.client.clone(), topic, subscription))
            }
            Some(ReplyStatus::Error(reason)) => {
                warn!("join of {} refused: {}", topic, reason);
                self.client.unregister(&topic, subscription.id).await;
                Err(RealtimeError::SubscriptionError(reason))
            }
            None => {
                self.client.unregister(&topic, subscription.id).await;
                Err(RealtimeError::SubscriptionError(format!(
                    "unexpected join reply: {}",
                    reply.event
                )))
            }
        }
    }
}

/// A joined topic. Incoming broadcasts queue up until read.
pub struct Channel {
    client: RealtimeClient,
    topic: String,
    subscriber: u32,
    join_ref: String,
    inbox: mpsc::UnboundedReceiver<RealtimeMessage>,
    state: ChannelState,
    left: bool,
}

impl Channel {
    fn new(client: RealtimeClient, topic: String, subscription: Subscription) -> Self {
        Self {
            client,
            topic,
            subscriber: subscription.id,
            join_ref: subscription.join_ref,
            inbox: subscription.inbox,
            state: ChannelState::Joined,
            left: false,
        }
    }

    /// Full topic, including the `realtime:` prefix.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub async fn send_broadcast(
        &self,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), RealtimeError> {
        if self.state != ChannelState::Joined {
            return Err(RealtimeError::ChannelError(format!(
                "{} is not joined",
                self.topic
            )));
        }
        let frame = RealtimeMessage::new(
            &self.topic,
            ChannelEvent::Broadcast,
            BroadcastEvent::new(event, payload).to_wire(),
        )
        .with_ref(self.client.next_ref())
        .with_join_ref(self.join_ref.clone());
        self.client.send(&frame).await?;
        self.client.fan_out(&self.topic, self.subscriber, &frame).await;
        Ok(())
    }

    /// Waits for the next broadcast. `None` once the channel or socket closed.
    pub async fn recv(&mut self) -> Option<BroadcastEvent> {
        while self.state == ChannelState::Joined {
            let message = match self.inbox.recv().await {
                Some(message) => message,
                None => {
                    self.state = ChannelState::Closed;
                    break;
                }
            };
            if let Some(event) = self.accept(message) {
                return Some(event);
            }
        }
        None
    }

    /// Next queued broadcast without waiting.
    pub fn try_recv(&mut self) -> Option<BroadcastEvent> {
        while self.state == ChannelState::Joined {
            match self.inbox.try_recv() {
                Ok(message) => {
                    if let Some(event) = self.accept(message) {
                        return Some(event);
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return None,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.state = ChannelState::Closed;
                }
            }
        }
        None
    }

    fn accept(&mut self, message: RealtimeMessage) -> Option<BroadcastEvent> {
        match message.kind() {
            Some(ChannelEvent::Broadcast) => BroadcastEvent::from_wire(&message.payload),
            Some(ChannelEvent::PhoenixError) => {
                warn!("{} errored: {}", self.topic, message.payload);
                self.state = ChannelState::Errored;
                None
            }
            Some(ChannelEvent::PhoenixClose) => {
                debug!("{} closed by server", self.topic);
                self.state = ChannelState::Closed;
                None
            }
            _ => None,
        }
    }

    /// Leaves the topic; further sends fail. The server-side join is only
    /// left with the topic's last subscriber.
    pub async fn unsubscribe(&mut self) -> Result<(), RealtimeError> {
        if self.left {
            return Ok(());
        }
        self.left = true;
        self.state = ChannelState::Closed;
        if !self.client.unregister(&self.topic, self.subscriber).await {
            debug!("{} still has other subscribers", self.topic);
            return Ok(());
        }
        let leave = RealtimeMessage::new(&self.topic, ChannelEvent::PhoenixLeave, json!({}))
            .with_ref(self.client.next_ref())
            .with_join_ref(self.join_ref.clone());
        match self.client.send(&leave).await {
            Ok(()) => Ok(()),
            // socket already gone, nothing left to leave
            Err(RealtimeError::ConnectionError(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
