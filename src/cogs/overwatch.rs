use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::cogs::{parse_channel, Cog, CommandContext};
use crate::engine::{JsonLineStore, JsonStore, Registry};
use crate::gateway::{MessageEvent, Reply};
use crate::{Error, Record, RecordWriter, Result};

/// Document key holding the watch list.
pub const GUILDS_KEY: &str = "Guilds";

/// Guild ID (as a string key) to watched channel IDs.
pub type WatchList = BTreeMap<String, Vec<u64>>;

/// Logs every message posted in watched channels to a per-channel JSON Lines file.
pub struct Overwatch {
    config: Arc<JsonStore>,
    logs: Registry<JsonLineStore>,
    guilds: Mutex<WatchList>,
}

enum Removal {
    Removed,
    NotWatched,
    GuildNotWatched,
}

impl Overwatch {
    /// Loads the watch list from `config`. A malformed list is logged and replaced by an empty one.
    pub async fn new(config: Arc<JsonStore>, logs: Registry<JsonLineStore>) -> Result<Self> {
        let guilds = match config.get_as::<WatchList>(GUILDS_KEY).await {
            Ok(list) => list.unwrap_or_default(),
            Err(Error::Serialization(e)) => {
                warn!("Ignoring malformed watch list in {:?}: {}", config.path(), e);
                WatchList::new()
            }
            Err(e) => return Err(e),
        };
        info!("Overwatch watching {} guild(s)", guilds.len());
        Ok(Self {
            config,
            logs,
            guilds: Mutex::new(guilds),
        })
    }

    pub fn logs(&self) -> &Registry<JsonLineStore> {
        &self.logs
    }

    /// Channels watched in `guild_id`, in the order they were added.
    pub async fn watched(&self, guild_id: u64) -> Vec<u64> {
        self.guilds
            .lock()
            .await
            .get(&guild_id.to_string())
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_watched(&self, guild_id: u64, channel_id: u64) -> bool {
        self.guilds
            .lock()
            .await
            .get(&guild_id.to_string())
            .map_or(false, |channels| channels.contains(&channel_id))
    }

    /// Starts watching a channel. Returns `false` if it was already watched.
    pub async fn watch(&self, guild_id: u64, channel_id: u64) -> Result<bool> {
        let mut guilds = self.guilds.lock().await;
        let mut next = guilds.clone();
        let channels = next.entry(guild_id.to_string()).or_default();
        if channels.contains(&channel_id) {
            return Ok(false);
        }
        channels.push(channel_id);

        self.config.set_as(GUILDS_KEY, &next).await?;
        *guilds = next;
        Ok(true)
    }

    async fn unwatch(&self, guild_id: u64, channel_id: u64) -> Result<Removal> {
        let mut guilds = self.guilds.lock().await;
        let key = guild_id.to_string();
        let mut next = guilds.clone();
        let channels = match next.get_mut(&key) {
            Some(channels) => channels,
            None => return Ok(Removal::GuildNotWatched),
        };
        if !channels.contains(&channel_id) {
            return Ok(Removal::NotWatched);
        }
        channels.retain(|c| *c != channel_id);
        if channels.is_empty() {
            next.remove(&key);
        }

        self.config.set_as(GUILDS_KEY, &next).await?;
        *guilds = next;
        Ok(Removal::Removed)
    }
}

/// The record stored for one logged message.
pub fn message_record(message: &MessageEvent) -> Record {
    let attachments: Vec<Value> = message
        .attachments
        .iter()
        .map(|a| json!({"id": a.id, "filename": a.filename, "url": a.url}))
        .collect();

    let record = json!({
        "id": message.id,
        "content": message.content,
        "author": {
            "id": message.author.id,
            "name": message.author.name,
            "bot": message.author.bot,
        },
        "channel": {
            "id": message.channel_id,
            "name": message.channel_name,
        },
        "guild": {
            "id": message.guild_id,
            "name": message.guild_name,
        },
        "created_at": message.created_at,
        "edited_at": message.edited_at,
        "attachments": attachments,
        "pinned": message.pinned,
        "tts": message.tts,
    });
    match record {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[async_trait]
impl Cog for Overwatch {
    fn name(&self) -> &'static str {
        "Overwatch"
    }

    fn commands(&self) -> &'static [&'static str] {
        &["overwatch", "ow"]
    }

    async fn on_command(&self, ctx: &CommandContext<'_>) -> Result<Option<Reply>> {
        let guild_id = match ctx.guild() {
            Ok(id) => id,
            Err(reply) => return Ok(Some(reply)),
        };
        if let Err(reply) = ctx.require_admin() {
            return Ok(Some(reply));
        }

        let sub = ctx.arg(0).map(str::to_lowercase);
        let channel = ctx.arg(1).and_then(parse_channel);

        let reply = match (sub.as_deref(), channel) {
            (Some("add"), Some(channel_id)) => {
                if self.watch(guild_id, channel_id).await? {
                    format!("Added channel <#{}> to be logged.", channel_id)
                } else {
                    format!("Channel <#{}> is already being logged.", channel_id)
                }
            }
            (Some("remove"), Some(channel_id)) => match self.unwatch(guild_id, channel_id).await? {
                Removal::Removed => format!("Removed channel <#{}> from being logged.", channel_id),
                Removal::NotWatched => format!("Channel <#{}> is not being logged.", channel_id),
                Removal::GuildNotWatched => "No channels are being logged.".to_string(),
            },
            (Some("add"), None) | (Some("remove"), None) => {
                format!("Usage: `{}overwatch {} <#channel>`", ctx.prefix, sub.as_deref().unwrap_or_default())
            }
            (Some("list"), _) => {
                let channels = self.watched(guild_id).await;
                if channels.is_empty() {
                    "No channels are being logged in this server.".to_string()
                } else {
                    let mentions: Vec<String> = channels.iter().map(|c| format!("<#{}>", c)).collect();
                    format!("Channels currently being logged: {}", mentions.join(", "))
                }
            }
            _ => "Overwatch is a group command. Use `add`, `remove`, or `list` subcommands.".to_string(),
        };
        Ok(Some(ctx.reply(reply)))
    }

    async fn on_message(&self, message: &MessageEvent) -> Result<()> {
        let guild_id = match message.guild_id {
            Some(id) => id,
            None => return Ok(()),
        };
        if message.author.bot || !self.is_watched(guild_id, message.channel_id).await {
            return Ok(());
        }

        let log = self.logs.get(&message.channel_id.to_string()).await?;
        log.add(message_record(message)).await?;
        Ok(())
    }
}
