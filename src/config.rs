use std::env;
use std::path::PathBuf;

use crate::{Error, Result};

/// Runtime settings for the bot.
///
/// Resolved from `BOT_*` environment variables; the binaries layer their
/// command-line flags on top.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Root directory of every JSON file the bot keeps (`BOT_DATA_DIR`).
    pub data_dir: PathBuf,
    /// Command prefixes accepted in every guild (`BOT_PREFIXES`, comma separated).
    pub prefixes: Vec<String>,
    /// The bot's own user ID; enables `<@ID>` mention prefixes (`BOT_ID`).
    pub bot_id: Option<u64>,
    /// Indent used when writing documents (`BOT_JSON_INDENT`).
    pub indent: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            prefixes: vec!["//".to_string()],
            bot_id: None,
            indent: 4,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary variable source. Unset or blank variables keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Settings::default();

        if let Some(dir) = var("BOT_DATA_DIR") {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = var("BOT_PREFIXES") {
            let prefixes = parse_prefixes(&raw);
            if !prefixes.is_empty() {
                settings.prefixes = prefixes;
            }
        }
        if let Some(raw) = var("BOT_ID") {
            settings.bot_id = Some(parse_number("BOT_ID", &raw)?);
        }
        if let Some(raw) = var("BOT_JSON_INDENT") {
            settings.indent = parse_number("BOT_JSON_INDENT", &raw)?;
        }

        Ok(settings)
    }

    /// The bot-wide watch list document.
    pub fn overwatch_file(&self) -> PathBuf {
        self.data_dir.join("overwatch.json")
    }

    /// Directory holding one message log per watched channel.
    pub fn overwatch_dir(&self) -> PathBuf {
        self.data_dir.join("overwatch")
    }

    /// The per-guild extra prefixes document.
    pub fn prefixes_file(&self) -> PathBuf {
        self.data_dir.join("prefixes.json")
    }
}

fn parse_prefixes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("{} must be a non-negative integer, got {:?}", key, raw)))
}
