//! Real-time fan-out of post events.
//!
//! Events go out on a per-post channel (`post.<id>`) as a JSON envelope
//! `{"event": ..., "data": ...}`. Delivery is fire-and-forget.

use anyhow::Result;
use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

pub const POST_LIKED: &str = "post.liked";
pub const COMMENT_ADDED: &str = "comment.added";

pub fn post_channel(post_id: i64) -> String {
    format!("post.{}", post_id)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub channel: String,
    pub event: String,
    pub data: Value,
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisBroadcaster {
    client: Client,
}

impl RedisBroadcaster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Broadcaster for RedisBroadcaster {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<()> {
        let message = serde_json::json!({ "event": event, "data": payload }).to_string();
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.publish::<_, _, ()>(channel, message).await?;
        Ok(())
    }
}

/// In-process broadcaster. Messages published with no subscriber are dropped.
pub struct MemoryBroadcaster {
    sender: broadcast::Sender<Envelope>,
}

impl MemoryBroadcaster {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

impl Default for MemoryBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Broadcaster for MemoryBroadcaster {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<()> {
        let envelope = Envelope {
            channel: channel.to_string(),
            event: event.to_string(),
            data: payload,
        };
        if self.sender.send(envelope).is_err() {
            tracing::debug!(channel, event, "no subscribers for broadcast");
        }
        Ok(())
    }
}
