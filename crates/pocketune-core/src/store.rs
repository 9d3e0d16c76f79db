//! Persistent key/blob storage abstraction.
//!
//! The engines persist small JSON values (queue state, playback session) under
//! logical keys and keep downloaded audio plus the catalog files as blobs.
//! Both concerns sit behind traits so the engines can run against the real
//! file system in production and an in-memory store in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use pocketune_core::store::{FileStore, KeyValueStore};
//!
//! let store = FileStore::new("/data/pocketune")?;
//! store.set("downloading_id", "dQw4w9WgXcQ")?;
//! assert_eq!(store.get("downloading_id")?.as_deref(), Some("dQw4w9WgXcQ"));
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::{Error, Result, StorageError};

/// Sub-directory of the store root that holds small keyed values.
const STATE_DIR: &str = "state";

/// URI scheme used by [`FileStore`] blob references.
const FILE_SCHEME: &str = "file://";

/// URI scheme used by [`MemoryStore`] blob references.
const MEMORY_SCHEME: &str = "memory://";

fn read_error(key: &str, e: impl ToString) -> Error {
    Error::Storage(StorageError::ReadFailed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn write_error(key: &str, e: impl ToString) -> Error {
    Error::Storage(StorageError::WriteFailed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn delete_error(key: &str, e: impl ToString) -> Error {
    Error::Storage(StorageError::DeleteFailed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Durable storage for small string values addressed by key.
#[cfg_attr(test, mockall::automock)]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` when the key was never written or was removed.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Check whether a key holds a value.
    fn contains(&self, key: &str) -> bool {
        matches!(self.get(key), Ok(Some(_)))
    }

    /// Read a settings key that must have been configured by the user.
    fn require(&self, key: &str) -> Result<String> {
        self.get(key)?
            .ok_or_else(|| Error::Storage(StorageError::MissingKey(key.to_string())))
    }
}

/// Durable storage for named binary objects (audio files, catalog JSON).
pub trait BlobStore: Send + Sync {
    /// Read a blob, `None` when it does not exist.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Write a whole blob at once.
    fn write(&self, name: &str, contents: &[u8]) -> Result<()>;

    /// Open a streaming writer that replaces the blob.
    fn create(&self, name: &str) -> Result<Box<dyn Write + Send>>;

    /// Delete a blob. Returns `false` when there was nothing to delete.
    fn remove(&self, name: &str) -> Result<bool>;

    /// Check whether a blob exists.
    fn exists(&self, name: &str) -> bool;

    /// File reference stored in the catalog for a blob.
    fn uri_for(&self, name: &str) -> String;

    /// Resolve a stored file reference back to a blob name.
    fn name_from_uri(&self, uri: &str) -> Option<String>;
}

/// Directory-backed store.
///
/// Keys live as individual files under `state/`, blobs directly in the root.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let state_dir = root.join(STATE_DIR);
        fs::create_dir_all(&state_dir).map_err(|e| write_error(&state_dir.display().to_string(), e))?;
        debug!("Opened file store at {}", root.display());
        Ok(Self { root })
    }

    /// Root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(STATE_DIR).join(key)
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.key_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(read_error(key, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value).map_err(|e| write_error(key, e))?;
        fs::rename(&tmp, &path).map_err(|e| write_error(key, e))
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(delete_error(key, e)),
        }
    }
}

impl BlobStore for FileStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.blob_path(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(read_error(name, e)),
        }
    }

    fn write(&self, name: &str, contents: &[u8]) -> Result<()> {
        let path = self.blob_path(name);
        let tmp = path.with_extension("partial");
        fs::write(&tmp, contents).map_err(|e| write_error(name, e))?;
        fs::rename(&tmp, &path).map_err(|e| write_error(name, e))
    }

    fn create(&self, name: &str) -> Result<Box<dyn Write + Send>> {
        let file = fs::File::create(self.blob_path(name)).map_err(|e| write_error(name, e))?;
        Ok(Box::new(io::BufWriter::new(file)))
    }

    fn remove(&self, name: &str) -> Result<bool> {
        match fs::remove_file(self.blob_path(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(delete_error(name, e)),
        }
    }

    fn exists(&self, name: &str) -> bool {
        self.blob_path(name).is_file()
    }

    fn uri_for(&self, name: &str) -> String {
        format!("{FILE_SCHEME}{}", self.blob_path(name).display())
    }

    fn name_from_uri(&self, uri: &str) -> Option<String> {
        let path = Path::new(uri.strip_prefix(FILE_SCHEME).unwrap_or(uri));
        if path.parent() != Some(self.root.as_path()) {
            warn!("File reference {} is outside the store root", uri);
            return None;
        }
        path.file_name().map(|n| n.to_string_lossy().into_owned())
    }
}

type SharedMap<V> = Arc<Mutex<HashMap<String, V>>>;

/// In-memory store used by tests and throwaway sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: SharedMap<String>,
    blobs: SharedMap<Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all blobs currently stored.
    #[must_use]
    pub fn blob_names(&self) -> Vec<String> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = blobs.keys().cloned().collect();
        names.sort();
        names
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

impl BlobStore for MemoryStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.get(name).cloned())
    }

    fn write(&self, name: &str, contents: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.insert(name.to_string(), contents.to_vec());
        Ok(())
    }

    fn create(&self, name: &str) -> Result<Box<dyn Write + Send>> {
        self.write(name, &[])?;
        Ok(Box::new(MemoryBlobWriter {
            name: name.to_string(),
            blobs: Arc::clone(&self.blobs),
        }))
    }

    fn remove(&self, name: &str) -> Result<bool> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.remove(name).is_some())
    }

    fn exists(&self, name: &str) -> bool {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.contains_key(name)
    }

    fn uri_for(&self, name: &str) -> String {
        format!("{MEMORY_SCHEME}{name}")
    }

    fn name_from_uri(&self, uri: &str) -> Option<String> {
        uri.strip_prefix(MEMORY_SCHEME).map(str::to_string)
    }
}

/// Appends straight into the shared blob map.
struct MemoryBlobWriter {
    name: String,
    blobs: SharedMap<Vec<u8>>,
}

impl Write for MemoryBlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.entry(self.name.clone()).or_default().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read a JSON value stored under a key, treating corrupt data as absent.
pub(crate) fn load_json<T, K>(store: &K, key: &str) -> Option<T>
where
    T: serde::de::DeserializeOwned,
    K: KeyValueStore + ?Sized,
{
    match store.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding unreadable value under {}: {}", key, e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!("Failed to read {}: {}", key, e);
            None
        }
    }
}

/// Serialize a value as JSON under a key.
pub(crate) fn save_json<T, K>(store: &K, key: &str, value: &T) -> Result<()>
where
    T: serde::Serialize + ?Sized,
    K: KeyValueStore + ?Sized,
{
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}
