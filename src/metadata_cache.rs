//! Read-through metadata cache.
//!
//! A lookup checks the store first and only falls back to parsing the DICOM
//! object on a miss, writing the freshly parsed record back before returning
//! it. There is no cross-caller coordination: two callers missing on the same
//! identity at the same time both parse and both write the same value.

use thiserror::Error;

use crate::{
    enums::Origin,
    identity::FileIdentity,
    metadata::{EncodeError, MetadataRecord},
    source::SourceError,
    store::{MetadataStore, StoreError},
};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// The record was parsed but could not be written to the store. The
    /// record itself is still usable; see [`CacheError::into_record`].
    #[error("metadata for {identity} could not be encoded: {source}")]
    Encoding {
        identity: FileIdentity,
        record: Box<MetadataRecord>,
        #[source]
        source: EncodeError,
    },

    #[error("stored value under `{key}` is not a metadata record: {source}")]
    CorruptEntry {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    /// Recover the computed record from an [`CacheError::Encoding`] failure.
    pub fn into_record(self) -> Option<MetadataRecord> {
        match self {
            CacheError::Encoding { record, .. } => Some(*record),
            _ => None,
        }
    }
}

/// A record together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub identity: FileIdentity,
    pub record: MetadataRecord,
    pub origin: Origin,
}

/// Read-through cache bound to one store.
#[derive(Debug, Clone)]
pub struct MetadataCache<S> {
    store: S,
}

impl<S: MetadataStore> MetadataCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return the metadata for `identity`, parsing only on a cache miss.
    ///
    /// `parse` runs at most once, and never when the store already holds the
    /// key.
    ///
    /// # Errors
    ///
    /// * [`CacheError::SourceUnavailable`] when `parse` fails.
    /// * [`CacheError::StoreUnavailable`] when the store cannot be reached.
    ///   There is no uncached fallback.
    /// * [`CacheError::Encoding`] when the parsed record cannot be stored.
    ///   Nothing is written; the record rides along in the error.
    /// * [`CacheError::CorruptEntry`] when the stored bytes do not decode.
    pub fn lookup<F>(&self, identity: &FileIdentity, parse: F) -> Result<CacheEntry, CacheError>
    where
        F: FnOnce() -> Result<MetadataRecord, SourceError>,
    {
        let key = identity.store_key();

        if self.store.exists(&key)? {
            let bytes = self.store.get(&key)?;
            let record = MetadataRecord::decode(&bytes)
                .map_err(|source| CacheError::CorruptEntry { key: key.clone(), source })?;
            log::debug!("metadata cache hit for {key}");
            return Ok(CacheEntry {
                identity: identity.clone(),
                record,
                origin: Origin::Retrieved,
            });
        }

        log::debug!("metadata cache miss for {key}, parsing {identity}");
        let record = parse()?;
        let encoded = match record.encode() {
            Ok(encoded) => encoded,
            Err(source) => {
                return Err(CacheError::Encoding {
                    identity: identity.clone(),
                    record: Box::new(record),
                    source,
                });
            }
        };
        self.store.set(&key, &encoded)?;

        Ok(CacheEntry {
            identity: identity.clone(),
            record,
            origin: Origin::Computed,
        })
    }

    /// Same as [`lookup`](Self::lookup) without the origin tag.
    pub fn get_metadata<F>(
        &self,
        identity: &FileIdentity,
        parse: F,
    ) -> Result<MetadataRecord, CacheError>
    where
        F: FnOnce() -> Result<MetadataRecord, SourceError>,
    {
        self.lookup(identity, parse).map(|entry| entry.record)
    }
}

/// One-shot read-through lookup against `store`.
pub fn get_metadata<S, F>(
    identity: &FileIdentity,
    store: &S,
    parse: F,
) -> Result<MetadataRecord, CacheError>
where
    S: MetadataStore + ?Sized,
    F: FnOnce() -> Result<MetadataRecord, SourceError>,
{
    MetadataCache::new(store).get_metadata(identity, parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::MetadataValue, store::MemoryStore};
    use pretty_assertions::assert_eq;
    use std::{cell::Cell, io};

    fn scan_record() -> MetadataRecord {
        MetadataRecord::new()
            .with("patient_id", "PAT-001")
            .with("modality", "NM")
            .with("rows", 64_i64)
            .with("slice_location", "(missing)")
    }

    struct UnreachableStore;

    impl MetadataStore for UnreachableStore {
        fn exists(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_owned()))
        }

        fn get(&self, _key: &str) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_owned()))
        }

        fn set(&self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_owned()))
        }
    }

    /// Answers `exists` but fails every write.
    struct ReadOnlyStore(MemoryStore);

    impl MetadataStore for ReadOnlyStore {
        fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.0.exists(key)
        }

        fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
            self.0.get(key)
        }

        fn set(&self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read-only replica".to_owned()))
        }
    }

    #[test]
    fn miss_parses_once_and_populates_store() {
        let store = MemoryStore::new();
        let calls = Cell::new(0);
        let identity = FileIdentity::new("scan.dcm");

        let entry = MetadataCache::new(&store)
            .lookup(&identity, || {
                calls.set(calls.get() + 1);
                Ok(scan_record())
            })
            .unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(entry.origin, Origin::Computed);
        assert_eq!(entry.record, scan_record());
        let stored = store.get("scan.dcm:info").unwrap();
        assert_eq!(MetadataRecord::decode(&stored).unwrap(), scan_record());
    }

    #[test]
    fn hit_skips_parse() {
        let store = MemoryStore::new();
        let identity = FileIdentity::new("scan.dcm");
        let calls = Cell::new(0);
        let parse = || {
            calls.set(calls.get() + 1);
            Ok(scan_record())
        };

        let first = get_metadata(&identity, &store, parse).unwrap();
        let second = get_metadata(&identity, &store, parse).unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn hit_reports_retrieved_origin() {
        let store = MemoryStore::new();
        store
            .set("scan.dcm:info", &scan_record().encode().unwrap())
            .unwrap();

        let entry = MetadataCache::new(&store)
            .lookup(&FileIdentity::new("scan.dcm"), || {
                panic!("parse must not run on a hit")
            })
            .unwrap();
        assert_eq!(entry.origin, Origin::Retrieved);
        assert_eq!(entry.record, scan_record());
    }

    #[test]
    fn source_failure_is_surfaced_and_nothing_is_stored() {
        let store = MemoryStore::new();
        let err = get_metadata(&FileIdentity::new("gone.dcm"), &store, || {
            Err(SourceError::NotFound {
                path: "gone.dcm".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            })
        })
        .unwrap_err();

        assert!(matches!(err, CacheError::SourceUnavailable(_)));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn unreachable_store_does_not_fall_back_to_parse() {
        let calls = Cell::new(0);
        let err = get_metadata(&FileIdentity::new("scan.dcm"), &UnreachableStore, || {
            calls.set(calls.get() + 1);
            Ok(scan_record())
        })
        .unwrap_err();

        assert!(matches!(err, CacheError::StoreUnavailable(StoreError::Unavailable(_))));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn failed_populate_is_store_unavailable() {
        let store = ReadOnlyStore(MemoryStore::new());
        let err = get_metadata(&FileIdentity::new("scan.dcm"), &store, || Ok(scan_record()))
            .unwrap_err();
        assert!(matches!(err, CacheError::StoreUnavailable(_)));
    }

    #[test]
    fn encoding_failure_writes_nothing_and_returns_record() {
        let store = MemoryStore::new();
        let record = scan_record().with("slice_thickness", MetadataValue::Float(f64::INFINITY));

        let err = get_metadata(&FileIdentity::new("scan.dcm"), &store, || Ok(record.clone()))
            .unwrap_err();

        assert!(matches!(err, CacheError::Encoding { .. }));
        assert!(store.is_empty().unwrap());
        assert_eq!(err.into_record(), Some(record));
    }

    #[test]
    fn corrupt_entry_is_reported() {
        let store = MemoryStore::new();
        store.set("scan.dcm:info", b"not json").unwrap();

        let err = get_metadata(&FileIdentity::new("scan.dcm"), &store, || Ok(scan_record()))
            .unwrap_err();
        match err {
            CacheError::CorruptEntry { key, .. } => assert_eq!(key, "scan.dcm:info"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn identities_do_not_share_entries() {
        let store = MemoryStore::new();
        let a = get_metadata(&FileIdentity::new("a.dcm"), &store, || {
            Ok(MetadataRecord::new().with("patient_id", "A"))
        })
        .unwrap();
        let b = get_metadata(&FileIdentity::new("b.dcm"), &store, || {
            Ok(MetadataRecord::new().with("patient_id", "B"))
        })
        .unwrap();

        assert_ne!(a, b);
        assert_eq!(store.len().unwrap(), 2);
    }
}
