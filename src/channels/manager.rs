//! Channel manager: merges inbound streams and routes replies.

use std::collections::BTreeMap;

use futures::stream;
use tokio::sync::RwLock;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

pub struct ChannelManager {
    channels: RwLock<BTreeMap<String, Box<dyn Channel>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a channel. A later channel with the same name replaces the
    /// earlier one.
    pub fn add(&mut self, channel: Box<dyn Channel>) {
        let name = channel.name().to_string();
        if self.channels.get_mut().insert(name.clone(), channel).is_some() {
            tracing::warn!("Replaced channel: {}", name);
        } else {
            tracing::debug!("Added channel: {}", name);
        }
    }

    /// Start every channel and merge their streams. Fails only when none start.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let channels = self.channels.read().await;
        let mut streams = Vec::new();

        for (name, channel) in channels.iter() {
            match channel.start().await {
                Ok(stream) => {
                    tracing::info!("Started channel: {}", name);
                    streams.push(stream);
                }
                Err(e) => tracing::error!("Failed to start channel {}: {}", name, e),
            }
        }

        if streams.is_empty() {
            return Err(ChannelError::StartupFailed {
                name: "all".to_string(),
                reason: "No channels started successfully".to_string(),
            });
        }

        Ok(Box::pin(stream::select_all(streams)))
    }

    /// Reply on the channel the message came from.
    pub async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let channels = self.channels.read().await;
        match channels.get(&msg.channel) {
            Some(channel) => channel.respond(msg, response).await,
            None => Err(ChannelError::SendFailed {
                name: msg.channel.clone(),
                reason: "Channel not found".to_string(),
            }),
        }
    }

    /// Send a proactive message to `user_id` on every channel.
    pub async fn broadcast_all(
        &self,
        user_id: &str,
        response: OutgoingResponse,
    ) -> Vec<(String, Result<(), ChannelError>)> {
        let channels = self.channels.read().await;
        let mut results = Vec::with_capacity(channels.len());
        for (name, channel) in channels.iter() {
            results.push((name.clone(), channel.broadcast(user_id, response.clone()).await));
        }
        results
    }

    pub async fn health_check_all(&self) -> Vec<(String, Result<(), ChannelError>)> {
        let channels = self.channels.read().await;
        let mut results = Vec::with_capacity(channels.len());
        for (name, channel) in channels.iter() {
            results.push((name.clone(), channel.health_check().await));
        }
        results
    }

    pub async fn shutdown_all(&self) -> Result<(), ChannelError> {
        let channels = self.channels.read().await;
        for (name, channel) in channels.iter() {
            if let Err(e) = channel.shutdown().await {
                tracing::error!("Error shutting down channel {}: {}", name, e);
            }
        }
        Ok(())
    }

    pub async fn channel_names(&self) -> Vec<String> {
        self.channels.read().await.keys().cloned().collect()
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
