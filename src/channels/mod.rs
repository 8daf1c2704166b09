//! Messaging front-ends.
//!
//! Each channel turns its transport into a stream of [`IncomingMessage`]s.
//! The [`ChannelManager`] merges those streams for the agent and routes
//! replies back to the channel a message came from.

mod channel;
mod cli;
mod http;
mod manager;

pub use channel::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
pub use cli::CliChannel;
pub use http::{HttpChannel, HttpServer};
pub use manager::ChannelManager;
