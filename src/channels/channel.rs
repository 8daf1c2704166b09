//! Channel trait and message types.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use uuid::Uuid;

use crate::error::ChannelError;

/// A message received from a front-end.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: Uuid,
    /// Channel this message came from.
    pub channel: String,
    pub user_id: String,
    pub content: String,
    /// Conversation thread, for front-ends that have them.
    pub thread_id: Option<String>,
    pub received_at: DateTime<Utc>,
    /// Channel-specific extras. A `decision` entry bypasses the provider chain.
    pub metadata: serde_json::Value,
}

impl IncomingMessage {
    pub fn new(
        channel: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            user_id: user_id.into(),
            content: content.into(),
            thread_id: None,
            received_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Merged stream of inbound messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// Text going back to the user.
#[derive(Debug, Clone)]
pub struct OutgoingResponse {
    pub content: String,
    pub thread_id: Option<String>,
    /// Channel-specific extras, e.g. `{"file": path}` for an attachment.
    pub metadata: serde_json::Value,
}

impl OutgoingResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            thread_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Attached file path, if any.
    pub fn file(&self) -> Option<&str> {
        self.metadata.get("file").and_then(|v| v.as_str())
    }
}

/// A messaging front-end.
///
/// Channels turn their transport into a stream of [`IncomingMessage`]s and
/// deliver replies back. Transport details stay behind this trait.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name ("cli", "http").
    fn name(&self) -> &str;

    /// Start listening. The stream ends when the channel closes.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Reply to a message received on this channel.
    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;

    /// Send a proactive message (scheduled digests, alerts).
    ///
    /// Default implementation does nothing, for channels with no way to
    /// reach the user unprompted.
    async fn broadcast(
        &self,
        _user_id: &str,
        _response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
