//! 🗃️ Relational destinations through sqlx: SQLite files and Postgres clusters.
//!
//! Pools are built lazily, so `connect` does no I/O and a typo'd host surfaces at `ping`,
//! where the resolver is already prepared to catch it and let the pool go.
//!
//! - `sqlite:<path>`, `sqlite://<path>`, `sqlite::memory:`: the connection string names the file.
//!   The file is created if missing; its parent directory is not.
//! - `postgres://...`, `postgresql://...`: the target's `database` overrides whatever the
//!   connection string names, so one cluster URL can serve many targets.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, trace};

use crate::config::StorageTarget;
use crate::storage::registry::scheme_of;
use crate::storage::{Connector, Storage, StorageBackend, StorageKind};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const SQLITE_MAX_CONNECTIONS: u32 = 5;
const POSTGRES_MAX_CONNECTIONS: u32 = 10;

/// 🔌 Connector for `sqlite`, `postgres` and `postgresql`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlConnector;

#[async_trait]
impl Connector for SqlConnector {
    async fn connect(&self, target: &StorageTarget) -> Result<StorageBackend> {
        let redacted = target.redacted();
        let pool = match scheme_of(&target.connection_string).as_deref() {
            Some("sqlite") => {
                let options = SqliteConnectOptions::from_str(&target.connection_string)
                    .with_context(|| format!("💀 '{redacted}' is not a SQLite URL sqlx can read"))?
                    .create_if_missing(true);
                SqlPool::Sqlite(
                    SqlitePoolOptions::new()
                        .max_connections(SQLITE_MAX_CONNECTIONS)
                        .acquire_timeout(ACQUIRE_TIMEOUT)
                        .connect_lazy_with(options),
                )
            }
            Some("postgres" | "postgresql") => {
                let options = PgConnectOptions::from_str(&target.connection_string)
                    .with_context(|| format!("💀 '{redacted}' is not a Postgres URL sqlx can read"))?
                    .database(&target.database);
                SqlPool::Postgres(
                    PgPoolOptions::new()
                        .max_connections(POSTGRES_MAX_CONNECTIONS)
                        .acquire_timeout(ACQUIRE_TIMEOUT)
                        .connect_lazy_with(options),
                )
            }
            other => anyhow::bail!(
                "💀 the SQL backend speaks sqlite and postgres, not '{}'",
                other.unwrap_or("<none>")
            ),
        };

        debug!(location = %redacted, database = %target.database, "🗃️ sql pool ready (lazy)");
        Ok(StorageBackend::Sql(SqlStorage {
            pool,
            location: redacted,
            database: target.database.clone(),
        }))
    }
}

#[derive(Clone)]
enum SqlPool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

/// 🗃️ A lazy pool for one relational database.
pub struct SqlStorage {
    pool: SqlPool,
    location: String,
    database: String,
}

impl SqlStorage {
    pub fn kind(&self) -> StorageKind {
        match self.pool {
            SqlPool::Sqlite(_) => StorageKind::Sqlite,
            SqlPool::Postgres(_) => StorageKind::Postgres,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn sqlite_pool(&self) -> Option<&SqlitePool> {
        match &self.pool {
            SqlPool::Sqlite(pool) => Some(pool),
            SqlPool::Postgres(_) => None,
        }
    }

    pub fn postgres_pool(&self) -> Option<&PgPool> {
        match &self.pool {
            SqlPool::Postgres(pool) => Some(pool),
            SqlPool::Sqlite(_) => None,
        }
    }
}

impl fmt::Debug for SqlStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlStorage")
            .field("kind", &self.kind())
            .field("location", &self.location)
            .field("database", &self.database)
            .finish()
    }
}

#[async_trait]
impl Storage for SqlStorage {
    /// 📡 `SELECT 1`. The first real connection happens here.
    async fn ping(&self) -> Result<()> {
        let outcome = match &self.pool {
            SqlPool::Sqlite(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            SqlPool::Postgres(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
        };
        outcome.with_context(|| {
            format!(
                "💀 '{}' did not answer SELECT 1. Is it running? Does database '{}' exist? Did someone rotate the password again?",
                self.location, self.database
            )
        })?;
        trace!(location = %self.location, "✅ sql storage answered");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match &self.pool {
            SqlPool::Sqlite(pool) => pool.close().await,
            SqlPool::Postgres(pool) => pool.close().await,
        }
        debug!(location = %self.location, "🗑️ sql pool drained and closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_sqlite_in_memory_says_hello() {
        let mut handle = SqlConnector
            .connect(&StorageTarget::new("sqlite::memory:", "main"))
            .await
            .expect("💀 an in-memory SQLite pool should build without I/O");
        assert_eq!(handle.kind(), StorageKind::Sqlite);
        handle.ping().await.expect("💀 SELECT 1 against :memory: should just work");
        handle.close().await.expect("close");

        if let StorageBackend::Sql(sql) = &handle {
            assert!(sql.sqlite_pool().is_some_and(|pool| pool.is_closed()));
        } else {
            panic!("💀 expected a sql handle, got {handle:?}");
        }
    }

    #[tokio::test]
    async fn the_one_where_a_sqlite_file_appears_on_first_ping() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("histam.db");
        let handle = SqlConnector
            .connect(&StorageTarget::new(format!("sqlite://{}", path.display()), "main"))
            .await
            .expect("connect");
        assert!(!path.exists(), "💀 a lazy pool should not touch the disk on connect");
        handle.ping().await.expect("💀 ping should create and open the file");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn the_one_where_the_parent_directory_does_not_exist() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("no").join("such").join("dir").join("x.db");
        let handle = SqlConnector
            .connect(&StorageTarget::new(format!("sqlite://{}", path.display()), "main"))
            .await
            .expect("💀 connect is lazy and should succeed anyway");
        let err = handle.ping().await.expect_err("💀 a missing parent directory must fail the ping");
        assert!(format!("{err:#}").contains("did not answer SELECT 1"));
    }

    #[tokio::test]
    async fn the_one_where_postgres_takes_the_database_from_the_target() {
        let mut handle = SqlConnector
            .connect(&StorageTarget::new("postgres://u:pw@127.0.0.1:5432/ignored", "histam"))
            .await
            .expect("💀 building a lazy Postgres pool should not need a server");
        assert_eq!(handle.kind(), StorageKind::Postgres);
        match &handle {
            StorageBackend::Sql(sql) => {
                assert_eq!(sql.database(), "histam");
                assert!(!format!("{sql:?}").contains("pw@"));
            }
            other => panic!("💀 expected a sql handle, got {other:?}"),
        }
        handle.close().await.expect("close");
    }
}
