use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::source::SourceError;

const INFO_KEY_SUFFIX: &str = ":info";

/// Stable handle for one DICOM object on disk.
///
/// Identities built with [`FileIdentity::resolve`] are canonical paths, so two
/// spellings of the same file (relative, via symlink, with `..`) collapse to a
/// single identity while distinct files never share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileIdentity(String);

impl FileIdentity {
    /// Wrap an already-normalized identity without touching the filesystem.
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Canonicalize `path` into an identity.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotFound`] when the path does not resolve to an
    /// existing file, and [`SourceError::NonUtf8Path`] when the canonical path
    /// is not valid UTF-8.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let canonical = path.canonicalize().map_err(|source| SourceError::NotFound {
            path: path.to_path_buf(),
            source,
        })?;
        canonical
            .into_os_string()
            .into_string()
            .map(Self)
            .map_err(|raw| SourceError::NonUtf8Path(PathBuf::from(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// Key under which this object's metadata is stored: `<identity>:info`.
    ///
    /// Appending a fixed suffix is injective, so distinct identities never
    /// derive the same key.
    pub fn store_key(&self) -> String {
        format!("{}{INFO_KEY_SUFFIX}", self.0)
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FileIdentity {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
