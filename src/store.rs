//! Persistent key-value store for credentials.
//!
//! The store holds JSON documents keyed by string. It is only used for
//! opaque get/set/remove of small documents: the app registration, the
//! token pair and the outstanding OAuth nonces.
//!
//! Two implementations are provided:
//! * [`MemoryStore`] keeps everything in process memory
//! * [`FileStore`] persists all documents in a single JSON file
//!
//! # Semantics
//!
//! [`Store::set`] inserts a document when the key is absent and otherwise
//! replaces the given top-level fields of the existing document, leaving
//! other fields untouched.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// A stored JSON document.
pub type Document = Map<String, Value>;

/// Key of the persisted token pair.
pub const TOKENS_KEY: &str = "spotify.tokens";

/// Key of the persisted app registration.
pub const APP_INFO_KEY: &str = "spotify.app";

/// Key of the outstanding OAuth nonces.
pub const NONCES_KEY: &str = "spotify.nonces";

/// Asynchronous document store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns all documents stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<Document>>;

    /// Returns the first document stored under `key`, if any.
    async fn get_one(&self, key: &str) -> Result<Option<Document>> {
        Ok(self.get(key).await?.into_iter().next())
    }

    /// Inserts `document` under `key`, or merges its fields into the
    /// document that is already there.
    async fn set(&self, key: &str, document: Document) -> Result<()>;

    /// Removes the document under `key`. Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Loads and deserializes the document under `key`.
///
/// # Errors
///
/// Returns `DataLoss` if the stored document does not have the shape of
/// `T`, or whatever error the store raised.
pub async fn load<T>(store: &dyn Store, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    match store.get_one(key).await? {
        Some(document) => serde_json::from_value(Value::Object(document))
            .map(Some)
            .map_err(|e| Error::data_loss(format!("{key} is corrupt: {e}"))),
        None => Ok(None),
    }
}

/// Serializes `value` and stores it under `key`.
///
/// # Errors
///
/// Returns `Internal` if `value` does not serialize into a JSON object, or
/// whatever error the store raised.
pub async fn save<T>(store: &dyn Store, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    match serde_json::to_value(value)? {
        Value::Object(document) => store.set(key, document).await,
        other => Err(Error::internal(format!(
            "{key} must be stored as an object, not {other}"
        ))),
    }
}

fn merge(documents: &mut HashMap<String, Document>, key: &str, document: Document) {
    match documents.get_mut(key) {
        Some(existing) => existing.extend(document),
        None => {
            documents.insert(key.to_owned(), document);
        }
    }
}

/// In-memory store.
///
/// Nothing survives a restart. Counts its writes, which makes it useful to
/// assert that an operation did not touch the store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, Document>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` and `remove` calls so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<Document>> {
        let documents = self.documents.lock().await;
        Ok(documents.get(key).cloned().into_iter().collect())
    }

    async fn set(&self, key: &str, document: Document) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        merge(&mut *self.documents.lock().await, key, document);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.documents.lock().await.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON file.
///
/// The file is read once on [`open`](Self::open) and rewritten as a whole
/// on every change. Writes go to a temporary sibling first, which is then
/// renamed over the original so that a crash never leaves a truncated file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    documents: Mutex<HashMap<String, Document>>,
}

impl FileStore {
    /// Store files should be small; refuse anything larger.
    const MAX_FILE_SIZE: u64 = 1024 * 1024;

    /// Opens the store at `path`, creating it when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or created, is too
    /// large, or does not contain a JSON object.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let documents = match tokio::fs::metadata(&path).await {
            Ok(metadata) => {
                if metadata.len() > Self::MAX_FILE_SIZE {
                    return Err(Error::resource_exhausted(format!(
                        "{} is too large",
                        path.display()
                    )));
                }

                let contents = tokio::fs::read_to_string(&path).await?;
                serde_json::from_str::<HashMap<String, Document>>(&contents).map_err(|e| {
                    Error::data_loss(format!("{} is corrupt: {e}", path.display()))
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("creating credential store at {}", path.display());
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        let store = Self {
            path,
            documents: Mutex::new(documents),
        };

        // Write back immediately to fail fast on a read-only location.
        {
            let documents = store.documents.lock().await;
            store.flush(&documents).await?;
        }

        debug!("opened credential store at {}", store.path.display());
        Ok(store)
    }

    async fn flush(&self, documents: &HashMap<String, Document>) -> Result<()> {
        let contents = serde_json::to_vec_pretty(documents)?;

        let mut temporary = self.path.clone().into_os_string();
        temporary.push(".tmp");
        let temporary = PathBuf::from(temporary);

        tokio::fs::write(&temporary, contents).await?;

        // The store contains secrets: keep it private to the user.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temporary, std::fs::Permissions::from_mode(0o600))
                .await?;
        }

        tokio::fs::rename(&temporary, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, key: &str) -> Result<Vec<Document>> {
        let documents = self.documents.lock().await;
        Ok(documents.get(key).cloned().into_iter().collect())
    }

    async fn set(&self, key: &str, document: Document) -> Result<()> {
        let mut documents = self.documents.lock().await;
        let previous = documents.clone();
        merge(&mut documents, key, document);

        if let Err(e) = self.flush(&documents).await {
            *documents = previous;
            return Err(e);
        }

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut documents = self.documents.lock().await;
        if let Some(removed) = documents.remove(key) {
            if let Err(e) = self.flush(&documents).await {
                documents.insert(key.to_owned(), removed);
                return Err(e);
            }
        }

        Ok(())
    }
}
