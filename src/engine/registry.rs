use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use tokio::sync::Mutex;

use crate::engine::{DocumentOptions, JsonLineStore, JsonStore, LineLogOptions};
use crate::{Error, Result};

type Opener<S> = dyn Fn(PathBuf) -> Result<S> + Send + Sync;

/// One owned store per identity (guild ID, channel ID, ...), opened on first use.
///
/// Each identity maps to `<root>/<id>.<extension>`. Identities are limited to
/// ASCII letters, digits, `-` and `_`, so they cannot name a path outside
/// `root`. Within one process a registry is the only owner of its files.
pub struct Registry<S> {
    root: PathBuf,
    extension: String,
    opener: Arc<Opener<S>>,
    stores: Mutex<HashMap<String, Arc<S>>>,
}

impl<S: Send + Sync + 'static> Registry<S> {
    pub fn new<P, F>(root: P, extension: &str, opener: F) -> Self
    where
        P: AsRef<Path>,
        F: Fn(PathBuf) -> Result<S> + Send + Sync + 'static,
    {
        Self {
            root: root.as_ref().to_path_buf(),
            extension: extension.trim_start_matches('.').to_string(),
            opener: Arc::new(opener),
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File that backs the store for `id`.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::InvalidArgument(format!("invalid store identity {:?}", id)));
        }
        Ok(self.root.join(format!("{}.{}", id, self.extension)))
    }

    /// Returns the store for `id`, opening it on a blocking thread if it is not cached yet.
    pub async fn get(&self, id: &str) -> Result<Arc<S>> {
        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(id) {
            return Ok(store.clone());
        }

        let path = self.path_for(id)?;
        let opener = self.opener.clone();
        let store = tokio::task::spawn_blocking(move || opener(path))
            .await
            .map_err(|e| Error::Internal(format!("opening store failed: {}", e)))??;

        debug!("Opened store {:?} under {:?}", id, self.root);
        let store = Arc::new(store);
        stores.insert(id.to_string(), store.clone());
        Ok(store)
    }

    /// Identities with a cached store, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.stores.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drops the cached store for `id`. Handles already given out keep working.
    pub async fn evict(&self, id: &str) -> Option<Arc<S>> {
        self.stores.lock().await.remove(id)
    }
}

impl Registry<JsonLineStore> {
    /// A registry of line logs sharing one set of options.
    pub fn line_logs<P: AsRef<Path>>(root: P, extension: &str, options: LineLogOptions) -> Self {
        Self::new(root, extension, move |path| JsonLineStore::open(path, options.clone()))
    }
}

impl Registry<JsonStore> {
    /// A registry of documents sharing one set of options.
    pub fn documents<P: AsRef<Path>>(root: P, options: DocumentOptions) -> Self {
        Self::new(root, "json", move |path| JsonStore::open_with(path, options.clone()))
    }
}
