//! Persistent backend (spec.md §4.2 "a persistent backend (example:
//! SQLite)"), built on `sqlx`'s `sqlite` feature.
//!
//! Grounded in the teacher workspace's `sqlx`-based storage choice, switched
//! from the `postgres` feature to `sqlite` (see `DESIGN.md` — this crate has
//! no Postgres backend in scope). Every row is `(key_blob, value_blob,
//! expiry_ms)`; `key_blob`/`value_blob` are `rmp-serde` encodings of `Data`,
//! matching the wire format the rest of the crate already uses for commands
//! and events (spec.md §6 "Persisted state layout... Serialization format
//! is delegated to the value-model serializer").
//!
//! `synchronous = FULL` trades throughput for spec.md's durability
//! requirement: "after acknowledging put/erase/add/subtract, the change
//! survives crash."

use async_trait::async_trait;
use broker_core::{Data, ErrorKind, Timestamp, TypeTag};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::error;

use super::{Backend, ExpiryUpdate, KeyExpiry, SnapshotValue};

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Opens (creating if absent) the database file at `path` and ensures
    /// the `store_entries` table exists.
    ///
    /// # Errors
    /// Propagates `sqlx::Error` on any failure to connect or migrate; the
    /// caller ([`super::factory::BackendKind::build`]) maps this to
    /// `ErrorKind::CannotOpenFile`.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Full);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS store_entries (\
                key_blob BLOB PRIMARY KEY, \
                value_blob BLOB NOT NULL, \
                expiry_ms INTEGER\
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    fn encode(value: &Data) -> Result<Vec<u8>, ErrorKind> {
        rmp_serde::to_vec_named(value).map_err(|e| {
            error!(error = %e, "failed to encode data for sqlite backend");
            ErrorKind::BackendFailure
        })
    }

    fn decode(bytes: &[u8]) -> Result<Data, ErrorKind> {
        rmp_serde::from_slice(bytes).map_err(|e| {
            error!(error = %e, "failed to decode data from sqlite backend");
            ErrorKind::BackendFailure
        })
    }

    async fn read_value(&self, key: &Data) -> Result<Option<(Data, Option<Timestamp>)>, ErrorKind> {
        let key_blob = Self::encode(key)?;
        let row = sqlx::query("SELECT value_blob, expiry_ms FROM store_entries WHERE key_blob = ?")
            .bind(key_blob)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "sqlite read failed");
                ErrorKind::BackendFailure
            })?;
        let Some(row) = row else { return Ok(None) };
        let value_blob: Vec<u8> = row.get("value_blob");
        let expiry_ms: Option<i64> = row.get("expiry_ms");
        Ok(Some((Self::decode(&value_blob)?, expiry_ms.map(Timestamp))))
    }

    async fn write_value(&self, key: &Data, value: &Data, expiry: Option<Timestamp>) -> Result<(), ErrorKind> {
        let key_blob = Self::encode(key)?;
        let value_blob = Self::encode(value)?;
        sqlx::query(
            "INSERT INTO store_entries (key_blob, value_blob, expiry_ms) VALUES (?, ?, ?) \
             ON CONFLICT(key_blob) DO UPDATE SET value_blob = excluded.value_blob, expiry_ms = excluded.expiry_ms",
        )
        .bind(key_blob)
        .bind(value_blob)
        .bind(expiry.map(|t| t.0))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "sqlite write failed");
            ErrorKind::BackendFailure
        })?;
        Ok(())
    }

    fn resolve_expiry(existing: Option<Timestamp>, update: ExpiryUpdate) -> Option<Timestamp> {
        match update {
            ExpiryUpdate::Refresh(ts) => Some(ts),
            ExpiryUpdate::Preserve => existing,
        }
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn put(&mut self, key: Data, value: Data, expiry: ExpiryUpdate) -> Result<(), ErrorKind> {
        let existing = self.read_value(&key).await?.and_then(|(_, e)| e);
        let resolved = Self::resolve_expiry(existing, expiry);
        self.write_value(&key, &value, resolved).await
    }

    async fn add(
        &mut self,
        key: Data,
        value: Data,
        init_type: TypeTag,
        expiry: ExpiryUpdate,
    ) -> Result<Data, ErrorKind> {
        let existing = self.read_value(&key).await?;
        let current = existing.as_ref().map(|(v, _)| v);
        let result = Data::add(current, &value, init_type)?;
        let resolved = Self::resolve_expiry(existing.and_then(|(_, e)| e), expiry);
        self.write_value(&key, &result, resolved).await?;
        Ok(result)
    }

    async fn subtract(
        &mut self,
        key: Data,
        value: Data,
        expiry: ExpiryUpdate,
    ) -> Result<Data, ErrorKind> {
        let existing = self.read_value(&key).await?;
        let current = existing.as_ref().map(|(v, _)| v);
        let result = Data::subtract(current, &value)?;
        let resolved = Self::resolve_expiry(existing.and_then(|(_, e)| e), expiry);
        self.write_value(&key, &result, resolved).await?;
        Ok(result)
    }

    async fn erase(&mut self, key: &Data) -> Result<(), ErrorKind> {
        let key_blob = Self::encode(key)?;
        sqlx::query("DELETE FROM store_entries WHERE key_blob = ?")
            .bind(key_blob)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "sqlite erase failed");
                ErrorKind::BackendFailure
            })?;
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), ErrorKind> {
        sqlx::query("DELETE FROM store_entries")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "sqlite clear failed");
                ErrorKind::BackendFailure
            })?;
        Ok(())
    }

    async fn expire(&mut self, key: &Data, now: Timestamp) -> Result<bool, ErrorKind> {
        let Some((_, Some(expiry))) = self.read_value(key).await? else {
            return Ok(false);
        };
        if expiry.has_elapsed(now) {
            self.erase(key).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn get(&self, key: &Data) -> Result<Data, ErrorKind> {
        self.read_value(key)
            .await?
            .map(|(v, _)| v)
            .ok_or(ErrorKind::NoSuchKey)
    }

    async fn exists(&self, key: &Data) -> Result<bool, ErrorKind> {
        Ok(self.read_value(key).await?.is_some())
    }

    async fn size(&self) -> Result<u64, ErrorKind> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM store_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "sqlite count failed");
                ErrorKind::BackendFailure
            })?;
        let n: i64 = row.get("n");
        Ok(n.max(0).unsigned_abs())
    }

    async fn keys(&self) -> Result<Vec<Data>, ErrorKind> {
        let rows = sqlx::query("SELECT key_blob FROM store_entries")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "sqlite keys scan failed");
                ErrorKind::BackendFailure
            })?;
        rows.iter()
            .map(|row| Self::decode(&row.get::<Vec<u8>, _>("key_blob")))
            .collect()
    }

    async fn snapshot(&self) -> Result<Vec<(Data, SnapshotValue)>, ErrorKind> {
        let rows = sqlx::query("SELECT key_blob, value_blob, expiry_ms FROM store_entries")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "sqlite snapshot scan failed");
                ErrorKind::BackendFailure
            })?;
        rows.iter()
            .map(|row| {
                let key = Self::decode(&row.get::<Vec<u8>, _>("key_blob"))?;
                let value = Self::decode(&row.get::<Vec<u8>, _>("value_blob"))?;
                let expiry_ms: Option<i64> = row.get("expiry_ms");
                Ok((key, SnapshotValue { value, expiry: expiry_ms.map(Timestamp) }))
            })
            .collect()
    }

    async fn expiries(&self) -> Result<Vec<KeyExpiry>, ErrorKind> {
        let rows = sqlx::query(
            "SELECT key_blob, expiry_ms FROM store_entries WHERE expiry_ms IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "sqlite expiries scan failed");
            ErrorKind::BackendFailure
        })?;
        rows.iter()
            .map(|row| {
                let key = Self::decode(&row.get::<Vec<u8>, _>("key_blob"))?;
                let expiry_ms: i64 = row.get("expiry_ms");
                Ok(KeyExpiry { key, expiry: Timestamp(expiry_ms) })
            })
            .collect()
    }
}
