use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::cogs::{Cog, CommandContext};
use crate::gateway::Reply;
use crate::Result;

/// Status commands that need no storage.
pub struct Utility {
    started: Instant,
}

impl Utility {
    pub fn new() -> Self {
        Self { started: Instant::now() }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for Utility {
    fn default() -> Self {
        Self::new()
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

#[async_trait]
impl Cog for Utility {
    fn name(&self) -> &'static str {
        "Utility"
    }

    fn commands(&self) -> &'static [&'static str] {
        &["ping", "uptime"]
    }

    async fn on_command(&self, ctx: &CommandContext<'_>) -> Result<Option<Reply>> {
        let reply = match ctx.name.as_str() {
            "ping" => "Pong!".to_string(),
            "uptime" => format!("Time since I went online: `{}`", format_duration(self.uptime())),
            _ => return Ok(None),
        };
        Ok(Some(ctx.reply(reply)))
    }
}
