use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{error, info};

use crate::cogs::{Cog, CommandContext, Overwatch, Prefixes, Utility, STORE_FAILURE_NOTICE};
use crate::config::Settings;
use crate::engine::{DocumentOptions, JsonLineStore, JsonStore, LineLogOptions, Registry};
use crate::gateway::{Event, MessageEvent, Reply};
use crate::{Error, Result};

/// Answered by the bot itself rather than a cog.
const HELP_COMMAND: &str = "help";

/// The bot: shared stores plus the cogs that use them.
pub struct Bot {
    settings: Settings,
    prefixes: Arc<Prefixes>,
    cogs: Vec<Arc<dyn Cog>>,
    pending: Arc<AtomicUsize>,
}

/// Counts one event as in flight until dropped. See [`Bot::wait`].
pub struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Bot {
    /// Opens every store under `settings.data_dir` and loads the cogs.
    pub async fn new(settings: Settings) -> Result<Self> {
        let doc_options = DocumentOptions::default().with_indent(settings.indent);
        let (overwatch_file, prefixes_file) = (settings.overwatch_file(), settings.prefixes_file());
        let (overwatch_config, prefix_store) = tokio::task::spawn_blocking(move || -> Result<_> {
            let overwatch = JsonStore::open_with(overwatch_file, doc_options.clone())?;
            let prefixes = JsonStore::open_with(prefixes_file, doc_options)?;
            Ok((Arc::new(overwatch), Arc::new(prefixes)))
        })
        .await
        .map_err(|e| Error::Internal(format!("opening bot documents failed: {}", e)))??;
        let message_logs = Registry::<JsonLineStore>::line_logs(
            settings.overwatch_dir(),
            "jsonl",
            LineLogOptions::new("id").unique_only(),
        );

        let prefixes = Arc::new(Prefixes::new(prefix_store, settings.prefixes.clone(), settings.bot_id));
        let overwatch = Arc::new(Overwatch::new(overwatch_config, message_logs).await?);
        let cogs: Vec<Arc<dyn Cog>> = vec![
            overwatch as Arc<dyn Cog>,
            prefixes.clone() as Arc<dyn Cog>,
            Arc::new(Utility::new()) as Arc<dyn Cog>,
        ];
        for cog in &cogs {
            info!("{} cog has been loaded", cog.name());
        }

        Ok(Self {
            settings,
            prefixes,
            cogs,
            pending: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Marks an event as accepted. [`wait`](Bot::wait) blocks until the guard is dropped.
    pub fn track(&self) -> PendingGuard {
        PendingGuard::new(&self.pending)
    }

    /// Number of events accepted but not yet fully handled.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Handles one event and returns the replies to send.
    pub async fn handle(&self, event: Event) -> Vec<Reply> {
        let _pending = self.track();
        match event {
            Event::Ready { user_name } => {
                info!("{} is online!", user_name);
                Vec::new()
            }
            Event::Message(message) => self.handle_message(&message).await,
        }
    }

    async fn handle_message(&self, message: &MessageEvent) -> Vec<Reply> {
        if message.author.bot {
            return Vec::new();
        }

        for cog in &self.cogs {
            if let Err(e) = cog.on_message(message).await {
                error!("{} listener failed on message {}: {}", cog.name(), message.id, e);
            }
        }

        let prefixes = match self.prefixes.for_guild(message.guild_id).await {
            Ok(p) => p,
            Err(e) => {
                error!("Could not load prefixes for guild {:?}: {}", message.guild_id, e);
                self.settings.prefixes.clone()
            }
        };
        let ctx = match CommandContext::parse(message, &prefixes) {
            Some(ctx) => ctx,
            None => return Vec::new(),
        };
        if ctx.name == HELP_COMMAND {
            return vec![ctx.reply(self.help(&ctx))];
        }
        let cog = match self.cogs.iter().find(|c| c.commands().contains(&ctx.name.as_str())) {
            Some(cog) => cog,
            None => return Vec::new(),
        };

        match cog.on_command(&ctx).await {
            Ok(reply) => reply.into_iter().collect(),
            Err(e) => {
                error!("{} command `{}` failed: {}", cog.name(), ctx.name, e);
                vec![ctx.reply(STORE_FAILURE_NOTICE)]
            }
        }
    }

    /// Lists every cog's commands, or the commands of the cog named (or owning the command named) in the first argument.
    fn help(&self, ctx: &CommandContext<'_>) -> String {
        let invoke = |cog: &Arc<dyn Cog>| {
            cog.commands()
                .iter()
                .map(|c| format!("`{}{}`", ctx.prefix, c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let topic = match ctx.arg(0) {
            Some(topic) => topic.to_lowercase(),
            None => {
                let mut lines = vec![format!(
                    "Here is my command set. Use `{}{} <command>` for more on one.",
                    ctx.prefix, HELP_COMMAND
                )];
                lines.extend(self.cogs.iter().map(|cog| format!("**{}**: {}", cog.name(), invoke(cog))));
                return lines.join("\n");
            }
        };

        let found = self
            .cogs
            .iter()
            .find(|cog| cog.name().eq_ignore_ascii_case(&topic) || cog.commands().contains(&topic.as_str()));
        match found {
            Some(cog) => format!("Help for **{}**: {}", cog.name(), invoke(cog)),
            None => format!("The command or category `{}` does not exist.", topic),
        }
    }

    /// Waits until no event is being handled.
    pub async fn wait(&self) {
        while self.pending() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cogs::tests::message;
    use crate::RecordReader;
    use std::path::Path;
    use tempfile::tempdir;

    fn settings(dir: &Path) -> Settings {
        Settings {
            data_dir: dir.to_path_buf(),
            bot_id: Some(42),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_new_materializes_files() {
        let dir = tempdir().unwrap();
        let bot = Bot::new(settings(dir.path())).await.unwrap();

        assert!(bot.settings().overwatch_file().exists());
        assert!(bot.settings().prefixes_file().exists());
    }

    #[tokio::test]
    async fn test_dispatches_by_prefix() {
        let dir = tempdir().unwrap();
        let bot = Bot::new(settings(dir.path())).await.unwrap();

        let replies = bot.handle(Event::Message(message(Some(1), 2, "//ping", false))).await;
        assert_eq!(replies, vec![Reply::new(2, "Pong!")]);

        let replies = bot.handle(Event::Message(message(Some(1), 2, "<@42> ping", false))).await;
        assert_eq!(replies, vec![Reply::new(2, "Pong!")]);

        assert!(bot.handle(Event::Message(message(Some(1), 2, "?ping", false))).await.is_empty());
        assert!(bot.handle(Event::Message(message(Some(1), 2, "//dance", false))).await.is_empty());
    }

    #[tokio::test]
    async fn test_guild_prefix_applies_to_commands() {
        let dir = tempdir().unwrap();
        let bot = Bot::new(settings(dir.path())).await.unwrap();

        bot.handle(Event::Message(message(Some(1), 2, "//prefix add ?", true))).await;

        let replies = bot.handle(Event::Message(message(Some(1), 2, "?ping", false))).await;
        assert_eq!(replies, vec![Reply::new(2, "Pong!")]);
        let elsewhere = bot.handle(Event::Message(message(Some(7), 2, "?ping", false))).await;
        assert!(elsewhere.is_empty());
    }

    #[tokio::test]
    async fn test_help_lists_cogs() {
        let dir = tempdir().unwrap();
        let bot = Bot::new(settings(dir.path())).await.unwrap();

        let replies = bot.handle(Event::Message(message(Some(1), 2, "//help", false))).await;
        assert_eq!(replies.len(), 1);
        let text = &replies[0].content;
        assert!(text.starts_with("Here is my command set. Use `//help <command>` for more on one."));
        assert!(text.contains("**Overwatch**: `//overwatch`, `//ow`"));
        assert!(text.contains("**Prefix**: `//prefix`"));
        assert!(text.contains("**Utility**: `//ping`, `//uptime`"));

        let replies = bot.handle(Event::Message(message(Some(1), 2, "//help ow", false))).await;
        assert_eq!(replies, vec![Reply::new(2, "Help for **Overwatch**: `//overwatch`, `//ow`")]);
        let replies = bot.handle(Event::Message(message(Some(1), 2, "//help utility", false))).await;
        assert_eq!(replies, vec![Reply::new(2, "Help for **Utility**: `//ping`, `//uptime`")]);
        let replies = bot.handle(Event::Message(message(Some(1), 2, "//help dance", false))).await;
        assert_eq!(replies, vec![Reply::new(2, "The command or category `dance` does not exist.")]);
    }

    #[tokio::test]
    async fn test_new_fails_when_data_dir_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let res = Bot::new(settings(&blocker)).await;
        assert!(matches!(res, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_tracked_events_hold_wait() {
        let dir = tempdir().unwrap();
        let bot = Arc::new(Bot::new(settings(dir.path())).await.unwrap());

        let guard = bot.track();
        assert_eq!(bot.pending(), 1);
        let waiter = {
            let bot = bot.clone();
            tokio::spawn(async move { bot.wait().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bot.pending(), 0);
    }

    #[tokio::test]
    async fn test_bot_authors_are_ignored() {
        let dir = tempdir().unwrap();
        let bot = Bot::new(settings(dir.path())).await.unwrap();
        let mut msg = message(Some(1), 2, "//ping", false);
        msg.author.bot = true;

        assert!(bot.handle(Event::Message(msg)).await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_becomes_notice() {
        let dir = tempdir().unwrap();
        let bot = Bot::new(settings(dir.path())).await.unwrap();

        std::fs::remove_dir_all(dir.path()).unwrap();
        let replies = bot.handle(Event::Message(message(Some(1), 2, "//ow add 10", true))).await;
        assert_eq!(replies, vec![Reply::new(2, STORE_FAILURE_NOTICE)]);
    }

    #[tokio::test]
    async fn test_command_messages_are_logged_too() {
        let dir = tempdir().unwrap();
        let bot = Bot::new(settings(dir.path())).await.unwrap();

        bot.handle(Event::Message(message(Some(1), 2, "//ow add 2", true))).await;
        let mut next = message(Some(1), 2, "//ping", false);
        next.id = 1001;
        bot.handle(Event::Message(next)).await;

        let log = JsonLineStore::open(
            bot.settings().overwatch_dir().join("2.jsonl"),
            LineLogOptions::new("id"),
        )
        .unwrap();
        let records = log.read_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], serde_json::json!(1001));
        bot.wait().await;
    }
}
