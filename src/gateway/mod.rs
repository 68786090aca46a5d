//! Inbound events and outbound replies.
//!
//! The real chat gateway lives outside this crate. Events reach the bot as
//! newline-delimited JSON through the [`Router`], and replies leave the same way.
pub mod router;

pub use router::Router;

use serde::{Deserialize, Serialize};

/// An event delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The gateway session is up.
    Ready { user_name: String },
    /// A message was posted in a guild channel or a DM.
    Message(MessageEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: u64,
    pub channel_id: u64,
    #[serde(default)]
    pub channel_name: Option<String>,
    /// `None` for direct messages.
    #[serde(default)]
    pub guild_id: Option<u64>,
    #[serde(default)]
    pub guild_name: Option<String>,
    pub author: Author,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub edited_at: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub tts: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub bot: bool,
    /// Whether the author holds guild administrator permissions.
    #[serde(default)]
    pub administrator: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: u64,
    pub filename: String,
    pub url: String,
}

/// A message the bot sends back to a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub channel_id: u64,
    pub content: String,
}

impl Reply {
    pub fn new(channel_id: u64, content: impl Into<String>) -> Self {
        Self {
            channel_id,
            content: content.into(),
        }
    }
}
