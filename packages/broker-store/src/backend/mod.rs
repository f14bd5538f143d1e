//! The backend contract (spec.md §4.2 "Backend Contract").
//!
//! Modeled on the teacher workspace's storage-layer traits
//! (`topgun_server::storage::engine::StorageEngine` /
//! `topgun_server::storage::map_data_store::MapDataStore`): an
//! `async_trait`, owned exclusively by a single store actor (spec.md §5 —
//! "Backends are accessed only by their owning store actor, so no
//! backend-internal locking is required"), wrapped in `Box<dyn Backend>`.
//!
//! Unlike the teacher's three-layer storage hierarchy (`StorageEngine` +
//! `MapDataStore` + `RecordStore`, built for partitioned CRDT maps with
//! backup replicas), spec.md's backend contract is a single flat trait:
//! there is exactly one authoritative copy of an entry per store (spec.md
//! §3 invariant 1), so there is no separate backup-layer abstraction here.

pub mod factory;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use broker_core::{Data, ErrorKind, Timestamp};

/// An entry snapshotted out of a backend: its value and optional expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotValue {
    pub value: Data,
    pub expiry: Option<Timestamp>,
}

/// A `(key, expiry)` pair as returned by [`Backend::expiries`].
#[derive(Debug, Clone, PartialEq)]
pub struct KeyExpiry {
    pub key: Data,
    pub expiry: Timestamp,
}

/// The expiry-refresh policy for `put`-family operations (spec.md §9 open
/// question, resolved): if `expiry` is `Some`, it replaces whatever expiry
/// (if any) the entry had; if `None`, the existing expiry (if any) is
/// preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryUpdate {
    Refresh(Timestamp),
    Preserve,
}

impl ExpiryUpdate {
    #[must_use]
    pub fn from_option(expiry: Option<Timestamp>) -> Self {
        match expiry {
            Some(ts) => Self::Refresh(ts),
            None => Self::Preserve,
        }
    }
}

/// Single-threaded key-value engine over [`Data`] (spec.md §4.2).
///
/// Owned exclusively by one store actor; `Send` (to move into the actor's
/// task) but deliberately not `Sync` — nothing shares a backend across
/// actors.
#[async_trait]
pub trait Backend: Send {
    /// Overwrites the value at `key`. `expiry` follows [`ExpiryUpdate`]
    /// semantics.
    ///
    /// # Errors
    /// `ErrorKind::BackendFailure` on I/O failure.
    async fn put(&mut self, key: Data, value: Data, expiry: ExpiryUpdate) -> Result<(), ErrorKind>;

    /// `add(key, value, init_type)` (spec.md §4.1/§4.2).
    ///
    /// # Errors
    /// `ErrorKind::TypeClash` if `value` is incompatible with the existing
    /// (or freshly initialized) type at `key`; `ErrorKind::BackendFailure`
    /// on I/O failure.
    async fn add(
        &mut self,
        key: Data,
        value: Data,
        init_type: broker_core::TypeTag,
        expiry: ExpiryUpdate,
    ) -> Result<Data, ErrorKind>;

    /// `subtract(key, value)` (spec.md §4.1/§4.2).
    ///
    /// # Errors
    /// `ErrorKind::NoSuchKey` if `key` is absent; `ErrorKind::TypeClash` if
    /// `value` is incompatible; `ErrorKind::BackendFailure` on I/O failure.
    async fn subtract(
        &mut self,
        key: Data,
        value: Data,
        expiry: ExpiryUpdate,
    ) -> Result<Data, ErrorKind>;

    /// Removes `key` if present. Idempotent: removing an absent key is not
    /// an error.
    ///
    /// # Errors
    /// `ErrorKind::BackendFailure` on I/O failure.
    async fn erase(&mut self, key: &Data) -> Result<(), ErrorKind>;

    /// Removes every entry.
    ///
    /// # Errors
    /// `ErrorKind::BackendFailure` on I/O failure.
    async fn clear(&mut self) -> Result<(), ErrorKind>;

    /// Removes `key` iff it is present *and* its expiry is at or before
    /// `now`. Returns whether a removal happened.
    ///
    /// # Errors
    /// `ErrorKind::BackendFailure` on I/O failure.
    async fn expire(&mut self, key: &Data, now: Timestamp) -> Result<bool, ErrorKind>;

    /// # Errors
    /// `ErrorKind::NoSuchKey` if absent; `ErrorKind::BackendFailure` on I/O
    /// failure.
    async fn get(&self, key: &Data) -> Result<Data, ErrorKind>;

    /// # Errors
    /// `ErrorKind::BackendFailure` on I/O failure.
    async fn exists(&self, key: &Data) -> Result<bool, ErrorKind>;

    /// # Errors
    /// `ErrorKind::BackendFailure` on I/O failure.
    async fn size(&self) -> Result<u64, ErrorKind>;

    /// # Errors
    /// `ErrorKind::BackendFailure` on I/O failure.
    async fn keys(&self) -> Result<Vec<Data>, ErrorKind>;

    /// A full copy of every entry, for the master's `snapshot_reply`.
    ///
    /// # Errors
    /// `ErrorKind::BackendFailure` on I/O failure.
    async fn snapshot(&self) -> Result<Vec<(Data, SnapshotValue)>, ErrorKind>;

    /// Every entry that carries an expiry, for the master's tick scan.
    ///
    /// # Errors
    /// `ErrorKind::BackendFailure` on I/O failure.
    async fn expiries(&self) -> Result<Vec<KeyExpiry>, ErrorKind>;
}
