use super::durable::{DurableInfo, DurableStore};
use super::schema::CACHE_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::{read_schema_version, BASE_DB_VERSION};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Durable cache tier stored in a local SQLite file.
#[derive(Clone)]
pub struct SqliteDurableStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDurableStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open cache database")?;
        let latest = CACHE_VERSIONED_SCHEMAS
            .last()
            .context("No cache schema defined")?;

        if is_new_db {
            info!("Creating new cache database at {:?}", path);
            latest.create(&conn)?;
        } else {
            let db_version = read_schema_version(&conn)?;
            if db_version < 1 {
                bail!(
                    "Cache database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let version_index = CACHE_VERSIONED_SCHEMAS
                .iter()
                .position(|s| s.version == db_version as usize)
                .with_context(|| format!("Unknown cache database version {}", db_version))?;
            CACHE_VERSIONED_SCHEMAS[version_index]
                .validate(&conn)
                .with_context(|| {
                    format!(
                        "Cache database schema validation failed for version {}",
                        db_version
                    )
                })?;

            if (db_version as usize) < latest.version {
                info!(
                    "Migrating cache database from version {} to {}",
                    db_version, latest.version
                );
                Self::migrate_if_needed(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut latest_from = from_version;
        for schema in CACHE_VERSIONED_SCHEMAS.iter() {
            if schema.version > from_version {
                if let Some(migration_fn) = schema.migration {
                    migration_fn(&tx).with_context(|| {
                        format!("Failed to run migration to version {}", schema.version)
                    })?;
                }
                latest_from = schema.version;
            }
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| anyhow!("Cache database lock poisoned"))?;
            f(&conn)
        })
        .await
        .context("Cache database task failed")?
    }

    fn now_secs() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Whole seconds to keep a row, rounded up.
fn ttl_secs(ttl: Duration) -> i64 {
    (ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)) as i64
}

#[async_trait]
impl DurableStore for SqliteDurableStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((value, expires_at)) if expires_at > Self::now_secs() => {
                    let value = serde_json::from_str(&value)
                        .with_context(|| format!("Corrupt cache entry for {}", key))?;
                    Ok(Some(value))
                }
                Some(_) => {
                    conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                    Ok(None)
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        let key = key.to_string();
        let value = serde_json::to_string(value)?;
        let expires_at = Self::now_secs() + ttl_secs(ttl);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    async fn flush(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM cache_entries", [])?;
            Ok(())
        })
        .await
    }

    async fn info(&self) -> Result<DurableInfo> {
        self.with_conn(|conn| {
            let entries: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cache_entries WHERE expires_at > ?1",
                params![Self::now_secs()],
                |row| row.get(0),
            )?;
            Ok(DurableInfo {
                backend: "sqlite".to_string(),
                entries: entries as u64,
                schema_version: read_schema_version(conn)?,
            })
        })
        .await
    }
}
