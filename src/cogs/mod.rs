//! Command handlers and event listeners.
//!
//! A cog groups commands that share state. Cogs reach disk only through the
//! stores in [`crate::engine`].
pub mod overwatch;
pub mod prefix;
pub mod utility;

pub use overwatch::Overwatch;
pub use prefix::Prefixes;
pub use utility::Utility;

use async_trait::async_trait;

use crate::gateway::{MessageEvent, Reply};
use crate::Result;

/// Sent in place of a reply when a store operation fails.
pub const STORE_FAILURE_NOTICE: &str = "Something went wrong while saving that.";

/// A command invocation parsed from a message.
#[derive(Debug)]
pub struct CommandContext<'a> {
    pub message: &'a MessageEvent,
    /// The prefix the message was invoked with.
    pub prefix: String,
    /// Lower-cased command name.
    pub name: String,
    pub args: Vec<String>,
}

impl<'a> CommandContext<'a> {
    /// Parses `message` against `prefixes`. The longest matching prefix wins.
    pub fn parse(message: &'a MessageEvent, prefixes: &[String]) -> Option<Self> {
        let prefix = prefixes
            .iter()
            .filter(|p| !p.is_empty() && message.content.starts_with(p.as_str()))
            .max_by_key(|p| p.len())?;

        let mut words = message.content[prefix.len()..].split_whitespace();
        let name = words.next()?.to_lowercase();
        Some(Self {
            message,
            prefix: prefix.clone(),
            name,
            args: words.map(str::to_string).collect(),
        })
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn reply(&self, content: impl Into<String>) -> Reply {
        Reply::new(self.message.channel_id, content)
    }

    /// Refuses commands outside a guild. Returns the guild ID otherwise.
    pub fn guild(&self) -> std::result::Result<u64, Reply> {
        self.message
            .guild_id
            .ok_or_else(|| self.reply("This command can only be used in a server."))
    }

    /// Refuses commands from authors without administrator permissions.
    pub fn require_admin(&self) -> std::result::Result<(), Reply> {
        if self.message.author.administrator {
            Ok(())
        } else {
            Err(self.reply("You need administrator permissions to use this command."))
        }
    }
}

/// A group of commands and listeners.
#[async_trait]
pub trait Cog: Send + Sync {
    fn name(&self) -> &'static str;

    /// Command names (and aliases) this cog answers to, lower-case.
    fn commands(&self) -> &'static [&'static str];

    /// Runs a command addressed to this cog.
    async fn on_command(&self, ctx: &CommandContext<'_>) -> Result<Option<Reply>>;

    /// Sees every non-bot message, commands included.
    async fn on_message(&self, _message: &MessageEvent) -> Result<()> {
        Ok(())
    }
}

/// Parses a channel argument given either as `<#id>` or a bare ID.
pub fn parse_channel(arg: &str) -> Option<u64> {
    let id = arg
        .strip_prefix("<#")
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(arg);
    id.parse().ok()
}
