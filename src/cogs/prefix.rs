use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cogs::{Cog, CommandContext};
use crate::engine::JsonStore;
use crate::gateway::Reply;
use crate::{DocumentWriter, Result};

const MAX_PREFIX_LEN: usize = 16;

/// Resolves command prefixes and manages per-guild extras.
///
/// Extras are kept in one document keyed by guild ID; a guild whose list
/// becomes empty loses its key.
pub struct Prefixes {
    store: Arc<JsonStore>,
    defaults: Vec<String>,
    bot_id: Option<u64>,
    // Serializes read-modify-write of a guild's list across two store calls.
    edit: Mutex<()>,
}

impl Prefixes {
    pub fn new(store: Arc<JsonStore>, defaults: Vec<String>, bot_id: Option<u64>) -> Self {
        Self {
            store,
            defaults,
            bot_id,
            edit: Mutex::new(()),
        }
    }

    /// Extra prefixes stored for `guild_id`.
    pub async fn guild_prefixes(&self, guild_id: u64) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_as::<Vec<String>>(&guild_id.to_string())
            .await?
            .unwrap_or_default())
    }

    /// Every prefix accepted for a message: defaults, mentions of the bot, then the guild's extras.
    pub async fn for_guild(&self, guild_id: Option<u64>) -> Result<Vec<String>> {
        let mut prefixes = self.defaults.clone();
        if let Some(id) = self.bot_id {
            prefixes.extend([
                format!("<@!{}> ", id),
                format!("<@{}> ", id),
                format!("<@!{}>", id),
                format!("<@{}>", id),
            ]);
        }
        if let Some(guild_id) = guild_id {
            prefixes.extend(self.guild_prefixes(guild_id).await?);
        }
        Ok(prefixes)
    }

    async fn add(&self, guild_id: u64, prefix: &str) -> Result<bool> {
        let _edit = self.edit.lock().await;
        let mut current = self.guild_prefixes(guild_id).await?;
        if self.defaults.iter().any(|p| p == prefix) || current.iter().any(|p| p == prefix) {
            return Ok(false);
        }
        current.push(prefix.to_string());
        self.store.set_as(&guild_id.to_string(), &current).await?;
        Ok(true)
    }

    async fn remove(&self, guild_id: u64, prefix: &str) -> Result<bool> {
        let _edit = self.edit.lock().await;
        let mut current = self.guild_prefixes(guild_id).await?;
        let before = current.len();
        current.retain(|p| p != prefix);
        if current.len() == before {
            return Ok(false);
        }

        let key = guild_id.to_string();
        if current.is_empty() {
            self.store.delete(&key).await?;
        } else {
            self.store.set_as(&key, &current).await?;
        }
        Ok(true)
    }
}

#[async_trait]
impl Cog for Prefixes {
    fn name(&self) -> &'static str {
        "Prefix"
    }

    fn commands(&self) -> &'static [&'static str] {
        &["prefix"]
    }

    async fn on_command(&self, ctx: &CommandContext<'_>) -> Result<Option<Reply>> {
        let guild_id = match ctx.guild() {
            Ok(id) => id,
            Err(reply) => return Ok(Some(reply)),
        };

        let sub = ctx.arg(0).map(str::to_lowercase);
        let reply = match (sub.as_deref(), ctx.arg(1)) {
            (Some("list"), _) | (None, _) => {
                let shown: Vec<String> = self
                    .defaults
                    .iter()
                    .cloned()
                    .chain(self.guild_prefixes(guild_id).await?)
                    .map(|p| format!("`{}`", p))
                    .collect();
                format!("Prefixes here: {}", shown.join(", "))
            }
            (Some(action @ ("add" | "remove")), arg) => {
                if let Err(reply) = ctx.require_admin() {
                    return Ok(Some(reply));
                }
                match arg {
                    None => format!("Usage: `{}prefix {} <prefix>`", ctx.prefix, action),
                    Some(p) if p.chars().count() > MAX_PREFIX_LEN => {
                        format!("Prefixes can be at most {} characters long.", MAX_PREFIX_LEN)
                    }
                    Some(p) if action == "add" => {
                        if self.add(guild_id, p).await? {
                            format!("Added prefix `{}`.", p)
                        } else {
                            format!("`{}` is already a prefix here.", p)
                        }
                    }
                    Some(p) => {
                        if self.remove(guild_id, p).await? {
                            format!("Removed prefix `{}`.", p)
                        } else {
                            format!("`{}` is not a custom prefix here.", p)
                        }
                    }
                }
            }
            _ => "Use `prefix list`, `prefix add <prefix>` or `prefix remove <prefix>`.".to_string(),
        };
        Ok(Some(ctx.reply(reply)))
    }
}
