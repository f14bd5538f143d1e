//! In-memory [`Backend`] implementation.
//!
//! Grounded in the teacher workspace's `storage::engines::hashmap::HashMapStorage`,
//! but without `DashMap`'s internal sharding: spec.md §5 guarantees a backend
//! is only ever touched by its owning store actor, so a plain `BTreeMap`
//! suffices (and gives us a free ordered key iteration for `keys()`/
//! `snapshot()`, which `Data`'s `Ord` impl makes possible). An auxiliary
//! `BTreeMap<Timestamp, BTreeSet<Data>>` expiry index lets the master's tick
//! scan (spec.md §4.3) find due entries without walking the whole store.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use broker_core::{Data, ErrorKind, Timestamp, TypeTag};

use super::{Backend, ExpiryUpdate, KeyExpiry, SnapshotValue};

/// One stored entry. `version` is additive instrumentation (spec.md
/// SPEC_FULL.md §4, modeled on the teacher's `RecordMetadata::version`): it
/// is exposed through `snapshot()` for diagnostics and does not affect any
/// command/event semantics.
#[derive(Debug, Clone, PartialEq)]
struct Entry {
    value: Data,
    expiry: Option<Timestamp>,
    version: u64,
}

/// A single-threaded, in-memory key-value backend over [`Data`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: BTreeMap<Data, Entry>,
    expiry_index: BTreeMap<Timestamp, BTreeSet<Data>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes `key` from the expiry index bucket for `expiry`, if any.
    fn unindex(&mut self, key: &Data, expiry: Option<Timestamp>) {
        if let Some(ts) = expiry {
            if let Some(bucket) = self.expiry_index.get_mut(&ts) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.expiry_index.remove(&ts);
                }
            }
        }
    }

    fn index(&mut self, key: Data, expiry: Option<Timestamp>) {
        if let Some(ts) = expiry {
            self.expiry_index.entry(ts).or_default().insert(key);
        }
    }

    /// Resolves the `expiry` an entry should carry after a write, per
    /// [`ExpiryUpdate`]'s refresh-on-provided policy, and re-indexes it.
    fn resolve_expiry(&mut self, key: &Data, existing: Option<Timestamp>, update: ExpiryUpdate) -> Option<Timestamp> {
        let new_expiry = match update {
            ExpiryUpdate::Refresh(ts) => Some(ts),
            ExpiryUpdate::Preserve => existing,
        };
        if new_expiry != existing {
            self.unindex(key, existing);
            self.index(key.clone(), new_expiry);
        }
        new_expiry
    }

    fn bump_or_insert(&mut self, key: Data, value: Data, expiry: ExpiryUpdate) {
        let existing_expiry = self.entries.get(&key).and_then(|e| e.expiry);
        let next_version = self.entries.get(&key).map_or(1, |e| e.version + 1);
        let resolved = self.resolve_expiry(&key, existing_expiry, expiry);
        self.entries.insert(
            key,
            Entry {
                value,
                expiry: resolved,
                version: next_version,
            },
        );
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn put(&mut self, key: Data, value: Data, expiry: ExpiryUpdate) -> Result<(), ErrorKind> {
        self.bump_or_insert(key, value, expiry);
        Ok(())
    }

    async fn add(
        &mut self,
        key: Data,
        value: Data,
        init_type: TypeTag,
        expiry: ExpiryUpdate,
    ) -> Result<Data, ErrorKind> {
        let current = self.entries.get(&key).map(|e| &e.value);
        let result = Data::add(current, &value, init_type)?;
        self.bump_or_insert(key, result.clone(), expiry);
        Ok(result)
    }

    async fn subtract(
        &mut self,
        key: Data,
        value: Data,
        expiry: ExpiryUpdate,
    ) -> Result<Data, ErrorKind> {
        let current = self.entries.get(&key).map(|e| &e.value);
        let result = Data::subtract(current, &value)?;
        self.bump_or_insert(key, result.clone(), expiry);
        Ok(result)
    }

    async fn erase(&mut self, key: &Data) -> Result<(), ErrorKind> {
        if let Some(entry) = self.entries.remove(key) {
            self.unindex(key, entry.expiry);
        }
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), ErrorKind> {
        self.entries.clear();
        self.expiry_index.clear();
        Ok(())
    }

    async fn expire(&mut self, key: &Data, now: Timestamp) -> Result<bool, ErrorKind> {
        let due = self
            .entries
            .get(key)
            .and_then(|e| e.expiry)
            .is_some_and(|expiry| expiry.has_elapsed(now));
        if due {
            self.erase(key).await?;
        }
        Ok(due)
    }

    async fn get(&self, key: &Data) -> Result<Data, ErrorKind> {
        self.entries
            .get(key)
            .map(|e| e.value.clone())
            .ok_or(ErrorKind::NoSuchKey)
    }

    async fn exists(&self, key: &Data) -> Result<bool, ErrorKind> {
        Ok(self.entries.contains_key(key))
    }

    async fn size(&self) -> Result<u64, ErrorKind> {
        Ok(self.entries.len() as u64)
    }

    async fn keys(&self) -> Result<Vec<Data>, ErrorKind> {
        Ok(self.entries.keys().cloned().collect())
    }

    async fn snapshot(&self) -> Result<Vec<(Data, SnapshotValue)>, ErrorKind> {
        Ok(self
            .entries
            .iter()
            .map(|(k, e)| {
                (
                    k.clone(),
                    SnapshotValue {
                        value: e.value.clone(),
                        expiry: e.expiry,
                    },
                )
            })
            .collect())
    }

    async fn expiries(&self) -> Result<Vec<KeyExpiry>, ErrorKind> {
        Ok(self
            .expiry_index
            .iter()
            .flat_map(|(ts, keys)| keys.iter().map(move |k| KeyExpiry { key: k.clone(), expiry: *ts }))
            .collect())
    }
}
