use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::engine::atomic::AtomicFile;
use crate::engine::executor::run_locked;
use crate::{Error, Record, RecordReader, RecordWriter, Result};

/// Construction options for a [`JsonLineStore`].
#[derive(Debug, Clone)]
pub struct LineLogOptions {
    /// Field that identifies a record; the default lookup field.
    pub key_field: String,
    /// Reject appends whose key value is already present.
    pub unique_only: bool,
}

impl LineLogOptions {
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            unique_only: false,
        }
    }

    pub fn unique_only(mut self) -> Self {
        self.unique_only = true;
        self
    }
}

/// What [`RecordWriter::update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The first matching record was replaced in place.
    Replaced,
    /// Nothing matched, so the record was appended.
    Appended,
    /// Nothing matched and the append was skipped as a unique-only duplicate.
    Skipped,
}

struct LogState {
    path: PathBuf,
    key_field: String,
    unique_only: bool,
}

/// Parsed lines of a log file, with the raw text kept for verbatim copies.
struct Lines {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    number: usize,
}

impl Iterator for Lines {
    type Item = Result<(String, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        loop {
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            self.number += 1;
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(parse_line(&self.path, self.number, buf));
        }
    }
}

fn parse_line(path: &Path, number: usize, raw: Vec<u8>) -> Result<(String, Record)> {
    let corruption = |reason: String| Error::Corruption {
        path: path.to_path_buf(),
        line: number,
        reason,
    };
    let line = String::from_utf8(raw).map_err(|e| corruption(e.to_string()))?;
    match serde_json::from_str::<Value>(&line) {
        Ok(Value::Object(record)) => Ok((line, record)),
        Ok(_) => Err(corruption("expected a JSON object".to_string())),
        Err(e) => Err(corruption(e.to_string())),
    }
}

fn matches(record: &Record, field: &str, value: &Value) -> bool {
    record.get(field) == Some(value)
}

fn require_value(value: &Value) -> Result<()> {
    if value.is_null() {
        return Err(Error::InvalidArgument("match value cannot be null".to_string()));
    }
    Ok(())
}

/// True when the file has content that does not end in a newline.
fn needs_separator(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

impl LogState {
    fn field<'a>(&'a self, field: Option<&'a str>) -> &'a str {
        field.unwrap_or(&self.key_field)
    }

    fn lines(&self) -> Result<Lines> {
        let reader = match File::open(&self.path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Lines {
            path: self.path.clone(),
            reader,
            number: 0,
        })
    }

    fn find_first(&self, field: &str, value: &Value) -> Result<Option<Record>> {
        for entry in self.lines()? {
            let (_, record) = entry?;
            if matches(&record, field, value) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn find_all(&self, field: &str, value: &Value) -> Result<Vec<Record>> {
        let mut found = Vec::new();
        for entry in self.lines()? {
            let (_, record) = entry?;
            if matches(&record, field, value) {
                found.push(record);
            }
        }
        Ok(found)
    }

    /// The record's key value. Every stored line carries a non-null key.
    fn require_key<'r>(&self, record: &'r Record) -> Result<&'r Value> {
        match record.get(&self.key_field) {
            Some(key) if !key.is_null() => Ok(key),
            _ => Err(Error::InvalidArgument(format!(
                "record is missing key field `{}`",
                self.key_field
            ))),
        }
    }

    fn append(&self, record: &Record) -> Result<bool> {
        let key = self.require_key(record)?;
        if self.unique_only && self.find_first(&self.key_field, key)?.is_some() {
            debug!("Skipping duplicate {}={} in {:?}", self.key_field, key, self.path);
            return Ok(false);
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        if needs_separator(&mut file)? {
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(true)
    }

    fn replace_first(&self, field: &str, value: &Value, replacement: &Record) -> Result<UpdateOutcome> {
        self.require_key(replacement)?;
        let mut out = AtomicFile::create(&self.path)?;
        let mut replaced = false;
        for entry in self.lines()? {
            let (raw, record) = entry?;
            if !replaced && matches(&record, field, value) {
                serde_json::to_writer(&mut out, replacement)?;
                replaced = true;
            } else {
                out.write_all(raw.as_bytes())?;
            }
            out.write_all(b"\n")?;
        }

        if replaced {
            out.commit()?;
            return Ok(UpdateOutcome::Replaced);
        }
        out.discard();
        if self.append(replacement)? {
            Ok(UpdateOutcome::Appended)
        } else {
            Ok(UpdateOutcome::Skipped)
        }
    }

    fn remove_all(&self, field: &str, value: &Value) -> Result<usize> {
        let mut out = AtomicFile::create(&self.path)?;
        let mut removed = 0;
        for entry in self.lines()? {
            let (raw, record) = entry?;
            if matches(&record, field, value) {
                removed += 1;
                continue;
            }
            out.write_all(raw.as_bytes())?;
            out.write_all(b"\n")?;
        }

        if removed == 0 {
            out.discard();
        } else {
            out.commit()?;
        }
        Ok(removed)
    }

    fn truncate(&self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.sync_all()?;
        Ok(())
    }
}

/// An append-only JSON Lines log backed by one file.
///
/// Records are JSON objects identified by a key field. Lookups scan the file
/// from the start; `update` and `remove` rewrite it through an
/// [`AtomicFile`]. A line that does not parse fails the whole operation with
/// [`Error::Corruption`].
pub struct JsonLineStore {
    path: PathBuf,
    key_field: String,
    state: Arc<Mutex<LogState>>,
}

impl JsonLineStore {
    /// Opens the log at `path`, creating it and its parent directories if needed.
    pub fn open<P: AsRef<Path>>(path: P, options: LineLogOptions) -> Result<Self> {
        if options.key_field.is_empty() {
            return Err(Error::InvalidArgument("key field cannot be empty".to_string()));
        }
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;

        let state = LogState {
            path: path.clone(),
            key_field: options.key_field.clone(),
            unique_only: options.unique_only,
        };
        Ok(Self {
            path,
            key_field: options.key_field,
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }
}

#[async_trait]
impl RecordReader for JsonLineStore {
    async fn get(&self, field: Option<&str>, value: &Value) -> Result<Option<Record>> {
        require_value(value)?;
        let field = field.map(str::to_owned);
        let value = value.clone();
        run_locked(&self.state, move |state| {
            state.find_first(state.field(field.as_deref()), &value)
        })
        .await
    }

    async fn get_all(&self, field: Option<&str>, value: &Value) -> Result<Vec<Record>> {
        require_value(value)?;
        let field = field.map(str::to_owned);
        let value = value.clone();
        run_locked(&self.state, move |state| {
            state.find_all(state.field(field.as_deref()), &value)
        })
        .await
    }

    async fn read_all(&self) -> Result<Vec<Record>> {
        run_locked(&self.state, |state| {
            state.lines()?.map(|entry| entry.map(|(_, record)| record)).collect()
        })
        .await
    }
}

#[async_trait]
impl RecordWriter for JsonLineStore {
    async fn add(&self, record: Record) -> Result<bool> {
        run_locked(&self.state, move |state| state.append(&record)).await
    }

    async fn update(&self, field: Option<&str>, value: &Value, record: Record) -> Result<UpdateOutcome> {
        require_value(value)?;
        let field = field.map(str::to_owned);
        let value = value.clone();
        run_locked(&self.state, move |state| {
            let outcome = state.replace_first(state.field(field.as_deref()), &value, &record)?;
            debug!("Update on {:?}: {:?}", state.path, outcome);
            Ok(outcome)
        })
        .await
    }

    async fn remove(&self, field: Option<&str>, value: &Value) -> Result<usize> {
        require_value(value)?;
        let field = field.map(str::to_owned);
        let value = value.clone();
        run_locked(&self.state, move |state| {
            state.remove_all(state.field(field.as_deref()), &value)
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        run_locked(&self.state, |state| state.truncate()).await
    }
}
