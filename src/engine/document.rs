use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::engine::atomic;
use crate::engine::executor::run_locked;
use crate::{Document, DocumentReader, DocumentWriter, Result};

/// Construction options for a [`JsonStore`].
#[derive(Debug, Clone)]
pub struct DocumentOptions {
    /// Spaces per nesting level when writing; `0` writes compact JSON.
    pub indent: usize,
    /// Written when the backing file does not exist yet, and restored by `clear(None)`.
    pub default_document: Document,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            indent: 4,
            default_document: Document::new(),
        }
    }
}

impl DocumentOptions {
    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn with_default(mut self, document: Document) -> Self {
        self.default_document = document;
        self
    }
}

struct DocumentState {
    path: PathBuf,
    indent: usize,
    default: Document,
    data: Document,
}

impl DocumentState {
    fn persist(&self, data: &Document) -> Result<()> {
        atomic::write_json(&self.path, data, self.indent)
    }
}

/// A single JSON object backed by one file.
///
/// The document is held in memory and every mutation is written through
/// with an atomic replace before it becomes visible to readers. A store
/// instance must be the only writer of its file.
pub struct JsonStore {
    path: PathBuf,
    state: Arc<Mutex<DocumentState>>,
}

impl JsonStore {
    /// Opens the document at `path` with the default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, DocumentOptions::default())
    }

    /// Opens the document at `path`.
    ///
    /// A missing file is created, together with its parent directories, and
    /// filled with the default document. A file that does not hold a JSON
    /// object is treated as empty.
    pub fn open_with<P: AsRef<Path>>(path: P, options: DocumentOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut state = DocumentState {
            path: path.clone(),
            indent: options.indent,
            default: options.default_document,
            data: Document::new(),
        };

        if path.exists() {
            state.data = read_document(&path, &state.default)?;
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            state.persist(&state.default)?;
            state.data = state.default.clone();
            debug!("Created document {:?}", path);
        }

        Ok(Self {
            path,
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.data.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.data.is_empty()
    }

    /// Fetches `key` and deserializes it into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(val) => Ok(Some(serde_json::from_value(val)?)),
            None => Ok(None),
        }
    }

    /// Serializes `value` and stores it under `key`.
    pub async fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let val = serde_json::to_value(value)?;
        self.set(key, val).await
    }
}

/// Reads a document leniently: a missing file yields `default`, unparsable
/// content yields an empty document.
fn read_document(path: &Path, default: &Document) -> Result<Document> {
    let content = match fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(default.clone()),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<Value>(&content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => {
            warn!("Document {:?} is not a JSON object, treating it as empty", path);
            Ok(Document::new())
        }
        Err(e) => {
            warn!("Could not parse document {:?}, treating it as empty: {}", path, e);
            Ok(Document::new())
        }
    }
}

#[async_trait]
impl DocumentReader for JsonStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.state.lock().await.data.get(key).cloned())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().await.data.keys().cloned().collect())
    }

    async fn values(&self) -> Result<Vec<Value>> {
        Ok(self.state.lock().await.data.values().cloned().collect())
    }

    async fn snapshot(&self) -> Result<Document> {
        Ok(self.state.lock().await.data.clone())
    }
}

#[async_trait]
impl DocumentWriter for JsonStore {
    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_string();
        run_locked(&self.state, move |state| {
            let mut next = state.data.clone();
            next.insert(key, value);
            state.persist(&next)?;
            state.data = next;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        run_locked(&self.state, move |state| {
            if !state.data.contains_key(&key) {
                return Ok(None);
            }
            let mut next = state.data.clone();
            let removed = next.remove(&key);
            state.persist(&next)?;
            state.data = next;
            Ok(removed)
        })
        .await
    }

    async fn clear(&self, replacement: Option<Document>) -> Result<Document> {
        run_locked(&self.state, move |state| {
            let next = replacement.unwrap_or_else(|| state.default.clone());
            state.persist(&next)?;
            state.data = next.clone();
            debug!("Cleared document {:?}", state.path);
            Ok(next)
        })
        .await
    }

    async fn load(&self) -> Result<Document> {
        run_locked(&self.state, |state| {
            let data = read_document(&state.path, &state.default)?;
            state.data = data.clone();
            Ok(data)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_open_materializes_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("dirs").join("prefixes.json");
        let options = DocumentOptions::default().with_default(doc(json!({"Guilds": {}})));

        let store = JsonStore::open_with(&path, options).unwrap();

        assert!(path.exists());
        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&raw).unwrap(), json!({"Guilds": {}}));
        assert_eq!(store.get("Guilds").await.unwrap(), Some(json!({})));
    }

    #[tokio::test]
    async fn test_open_existing_keeps_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"prefix": "!"}"#).unwrap();

        let options = DocumentOptions::default().with_default(doc(json!({"prefix": "//"})));
        let store = JsonStore::open_with(&path, options).unwrap();

        assert_eq!(store.get("prefix").await.unwrap(), Some(json!("!")));
        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"prefix": "!"}"#);
    }

    #[tokio::test]
    async fn test_corrupt_document_reads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{\"Guilds\": {\"1\": [").unwrap();

        let store = JsonStore::open(&path).unwrap();
        assert!(store.is_empty().await);

        fs::write(&path, "[1, 2, 3]").unwrap();
        assert_eq!(store.load().await.unwrap(), Document::new());

        store.set("fresh", json!(true)).await.unwrap();
        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, json!({"fresh": true}));
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("values.json")).unwrap();

        let samples = vec![
            ("null", json!(null)),
            ("int", json!(-42)),
            ("big", json!(1095384735293128744u64)),
            ("float", json!(2.5)),
            ("bool", json!(false)),
            ("text", json!("héllo wörld ✓ 日本")),
            ("list", json!([1, "two", [3], {"four": 4}])),
            ("nested", json!({"a": {"b": {"c": [true, null]}}})),
        ];
        for (key, value) in &samples {
            store.set(key, value.clone()).await.unwrap();
        }
        for (key, value) in &samples {
            assert_eq!(store.get(key).await.unwrap().as_ref(), Some(value));
        }

        let reopened = JsonStore::open(store.path()).unwrap();
        for (key, value) in &samples {
            assert_eq!(reopened.get(key).await.unwrap().as_ref(), Some(value));
        }
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("empty.json")).unwrap();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("del.json")).unwrap();
        store.set("k1", json!("v1")).await.unwrap();

        assert_eq!(store.delete("k1").await.unwrap(), Some(json!("v1")));
        assert_eq!(store.get("k1").await.unwrap(), None);
        let raw: Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw, json!({}));
    }

    #[tokio::test]
    async fn test_delete_missing_key_leaves_file_alone() {
        let dir = tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("idem.json")).unwrap();
        store.set("keep", json!(1)).await.unwrap();

        let before = fs::read(store.path()).unwrap();
        let modified = fs::metadata(store.path()).unwrap().modified().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.delete("missing").await.unwrap(), None);

        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert_eq!(fs::metadata(store.path()).unwrap().modified().unwrap(), modified);
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempdir().unwrap();
        let options = DocumentOptions::default().with_default(doc(json!({"Guilds": {}})));
        let store = JsonStore::open_with(dir.path().join("clear.json"), options).unwrap();
        store.set("extra", json!(1)).await.unwrap();

        let cleared = store.clear(None).await.unwrap();
        assert_eq!(cleared, doc(json!({"Guilds": {}})));
        assert_eq!(store.keys().await.unwrap(), vec!["Guilds".to_string()]);

        let replaced = store.clear(Some(doc(json!({"a": 1, "b": 2})))).await.unwrap();
        assert_eq!(replaced.len(), 2);
        assert_eq!(store.values().await.unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(JsonStore::open(store.path()).unwrap().snapshot().await.unwrap(), replaced);
    }

    #[tokio::test]
    async fn test_load_picks_up_out_of_band_edit() {
        let dir = tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("edit.json")).unwrap();
        store.set("a", json!(1)).await.unwrap();

        fs::write(store.path(), r#"{"a": 2, "b": 3}"#).unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!(1)));

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, doc(json!({"a": 2, "b": 3})));
        assert_eq!(store.get("b").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Watch {
            channels: Vec<u64>,
        }

        let dir = tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("typed.json")).unwrap();
        let watch = Watch { channels: vec![10, 20] };

        store.set_as("watch", &watch).await.unwrap();
        assert_eq!(store.get_as::<Watch>("watch").await.unwrap(), Some(watch));
        assert_eq!(store.get_as::<Watch>("absent").await.unwrap(), None);

        store.set("bad", json!("not a watch")).await.unwrap();
        assert!(matches!(store.get_as::<Watch>("bad").await, Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn test_concurrent_sets_lose_nothing() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonStore::open(dir.path().join("many.json")).unwrap());

        let mut handles = Vec::new();
        for i in 0..32 {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                s.set(&format!("guild_{}", i), json!(i)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let keys: Vec<String> = (0..16).map(|i| format!("chan_{}", i)).collect();
        let results = futures::future::join_all(keys.iter().map(|k| store.set(k, json!(k)))).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let reopened = JsonStore::open(store.path()).unwrap();
        assert_eq!(reopened.len().await, 48);
        for i in 0..32 {
            assert_eq!(reopened.get(&format!("guild_{}", i)).await.unwrap(), Some(json!(i)));
        }
    }

    #[tokio::test]
    async fn test_failed_write_releases_lock_and_keeps_memory() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("guild");
        let store = JsonStore::open(sub.join("config.json")).unwrap();
        store.set("a", json!(1)).await.unwrap();

        fs::remove_dir_all(&sub).unwrap();
        assert!(matches!(store.set("b", json!(2)).await, Err(Error::Io(_))));
        assert!(matches!(store.delete("a").await, Err(Error::Io(_))));
        assert_eq!(store.get("b").await.unwrap(), None);
        assert_eq!(store.get("a").await.unwrap(), Some(json!(1)));

        fs::create_dir_all(&sub).unwrap();
        store.set("b", json!(2)).await.unwrap();
        let raw: Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw, json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn test_cancelled_set_does_not_wedge_store() {
        let dir = tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("cancel.json")).unwrap();

        for i in 0..8 {
            let _ = tokio::time::timeout(Duration::ZERO, store.set(&format!("k{}", i), json!(i))).await;
        }

        tokio::time::timeout(Duration::from_secs(5), store.set("last", json!(true)))
            .await
            .expect("store lock leaked")
            .unwrap();
        assert_eq!(store.get("last").await.unwrap(), Some(json!(true)));
    }
}
