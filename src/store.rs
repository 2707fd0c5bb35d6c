//! Key-value backends for cached metadata.
//!
//! The cache only needs `exists`/`get`/`set`; anything that can answer those
//! (an in-process map, a directory, a remote key-value server) can back it.

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("no value stored under `{0}`")]
    MissingKey(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Byte-oriented key-value store capability.
pub trait MetadataStore {
    fn exists(&self, key: &str) -> Result<bool, StoreError>;
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

impl<S: MetadataStore + ?Sized> MetadataStore for &S {
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        (**self).exists(key)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).set(key, value)
    }
}

impl<S: MetadataStore + ?Sized> MetadataStore for Arc<S> {
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        (**self).exists(key)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).set(key, value)
    }
}

/// Process-local store. Values are copied in and out, never shared.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.with_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.len().map(|len| len == 0)
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Vec<u8>>) -> T,
    ) -> Result<T, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_owned()))?;
        Ok(f(&mut entries))
    }
}

impl MetadataStore for MemoryStore {
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.with_entries(|entries| entries.contains_key(key))
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.with_entries(|entries| entries.get(key).cloned())?
            .ok_or_else(|| StoreError::MissingKey(key.to_owned()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            entries.insert(key.to_owned(), value.to_vec());
        })
    }
}

/// One file per key under a root directory.
///
/// File names are the SHA-256 of the key, so arbitrarily long paths used as
/// identities map to fixed-length names that never escape the root. Each file
/// starts with the full key (length-prefixed) followed by the value, and reads
/// only answer for the exact key that was written.
///
/// Writers stage into a uniquely named temporary file in the root and rename
/// it over the entry, so concurrent writers of one key never share a staging
/// file and readers never observe a partial value.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|err| {
            StoreError::Unavailable(format!("cannot create {}: {err}", root.display()))
        })?;
        if !root.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.root.join(format!("{digest:x}.json"))
    }

    fn ensure_root(&self) -> Result<(), StoreError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "{} is no longer reachable",
                self.root.display()
            )))
        }
    }

    /// The stored value for `key`, or `None` when no entry holds that key.
    fn read_entry(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_root()?;
        let path = self.entry_path(key);
        let mut bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let malformed =
            || StoreError::Unavailable(format!("malformed cache entry {}", path.display()));
        let newline = bytes.iter().position(|&b| b == b'\n').ok_or_else(malformed)?;
        let key_len: usize = std::str::from_utf8(&bytes[..newline])
            .ok()
            .and_then(|len| len.parse().ok())
            .ok_or_else(malformed)?;
        let value_start = newline + 1 + key_len;
        if bytes.len() < value_start {
            return Err(malformed());
        }
        if &bytes[newline + 1..value_start] != key.as_bytes() {
            log::warn!("{} holds a different key, treating as absent", path.display());
            return Ok(None);
        }
        Ok(Some(bytes.split_off(value_start)))
    }
}

impl MetadataStore for DirectoryStore {
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.read_entry(key)?.is_some())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.read_entry(key)?
            .ok_or_else(|| StoreError::MissingKey(key.to_owned()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.ensure_root()?;
        let mut staging = NamedTempFile::new_in(&self.root)?;
        write!(staging, "{}\n", key.len())?;
        staging.write_all(key.as_bytes())?;
        staging.write_all(value)?;
        staging.as_file().sync_data()?;
        staging
            .persist(self.entry_path(key))
            .map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }
}
