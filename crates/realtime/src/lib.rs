//! Realtime broadcast client for Lost & Found
//!
//! Speaks the Phoenix channel protocol (`vsn=1.0.0`, JSON object frames)
//! over a single websocket: join a topic, wait for the server's
//! acknowledgment, then send and receive broadcast events on it.

mod channel;
mod client;
mod error;
mod message;

pub use channel::{Channel, ChannelBuilder, ChannelState};
pub use client::{ConnectionState, RealtimeClient, RealtimeClientOptions};
pub use error::RealtimeError;
pub use message::{BroadcastEvent, ChannelEvent, RealtimeMessage, ReplyStatus};
