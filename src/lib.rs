//! Cogstore is the persistence layer of a guild-scoped chat bot.
//!
//! Every piece of state the bot keeps lives in small local JSON files:
//! bot-wide configuration as single JSON documents, and per-channel message
//! logs as JSON Lines. Both kinds of store serialize access behind one lock
//! per instance and push blocking file I/O onto tokio's blocking pool, so many
//! command handlers can share them without stalling the event loop.
//!
//! ## Core Components
//! - [`engine`]: atomic file replace, the document store, the line-log store and
//!   the per-identity registry.
//! - [`cogs`]: command handlers and listeners that call into the stores.
//! - [`gateway`]: event/reply types and the line-oriented event router.
//! - [`bot`]: wires settings, stores and cogs together.

pub mod bot;
pub mod cogs;
pub mod config;
pub mod engine;
pub mod gateway;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::PathBuf;
use thiserror::Error;

pub use engine::UpdateOutcome;

/// A JSON object persisted as one document file.
pub type Document = Map<String, Value>;

/// A JSON object occupying one line of a line-log file.
pub type Record = Map<String, Value>;

/// Errors returned by the stores and the layers built on them.
#[derive(Error, Debug)]
pub enum Error {
    /// A required argument was missing or malformed (e.g. a null match value).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A line-log entry could not be parsed as a JSON object.
    #[error("corrupt record in {} at line {line}: {reason}", path.display())]
    Corruption {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    /// An I/O error occurred while reading, writing or renaming a file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// An internal error occurred (e.g. a blocking task panicked).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Read access to a single JSON document.
#[async_trait]
pub trait DocumentReader: Send + Sync {
    /// Returns the value stored under `key`, or `None` if it is absent.
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    /// Lists the top-level keys of the document.
    async fn keys(&self) -> Result<Vec<String>>;
    /// Lists the top-level values of the document.
    async fn values(&self) -> Result<Vec<Value>>;
    /// Returns a copy of the whole document.
    async fn snapshot(&self) -> Result<Document>;
}

/// Mutations of a single JSON document. Every mutation is persisted before it returns.
#[async_trait]
pub trait DocumentWriter: Send + Sync {
    /// Stores `value` under `key`, overwriting any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    /// Removes `key` and returns its value. Missing keys return `None` and leave the file alone.
    async fn delete(&self, key: &str) -> Result<Option<Value>>;
    /// Replaces the whole document with `replacement`, or the default document if `None`.
    async fn clear(&self, replacement: Option<Document>) -> Result<Document>;
    /// Re-reads the document from disk, discarding the in-memory copy.
    async fn load(&self) -> Result<Document>;
}

/// A complete document store.
pub trait DocumentStore: DocumentReader + DocumentWriter {}

impl<T: DocumentReader + DocumentWriter> DocumentStore for T {}

/// Lookups over an append-only log of records.
///
/// `field` defaults to the log's configured key field when `None`. A null
/// `value` is rejected with [`Error::InvalidArgument`].
#[async_trait]
pub trait RecordReader: Send + Sync {
    /// Returns the first record whose `field` equals `value`.
    async fn get(&self, field: Option<&str>, value: &Value) -> Result<Option<Record>>;
    /// Returns every record whose `field` equals `value`, in file order.
    async fn get_all(&self, field: Option<&str>, value: &Value) -> Result<Vec<Record>>;
    /// Returns every record in file order.
    async fn read_all(&self) -> Result<Vec<Record>>;
}

/// Mutations of an append-only log of records.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    /// Appends `record`. Returns `false` when a unique-only log already holds its key.
    async fn add(&self, record: Record) -> Result<bool>;
    /// Replaces the first record matching `field == value`, or appends `record` if none matches.
    async fn update(&self, field: Option<&str>, value: &Value, record: Record) -> Result<UpdateOutcome>;
    /// Removes every record matching `field == value` and returns how many were dropped.
    async fn remove(&self, field: Option<&str>, value: &Value) -> Result<usize>;
    /// Truncates the log.
    async fn clear(&self) -> Result<()>;
}

/// A complete line-log store.
pub trait RecordLog: RecordReader + RecordWriter {}

impl<T: RecordReader + RecordWriter> RecordLog for T {}
