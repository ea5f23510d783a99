//! 🗄️ Storage — where the replicated data will eventually land.
//!
//! 🎭 This module is the casting agency for destinations. Need a SQLite file? A Postgres
//! cluster? A MongoDB replica set? A directory of NDJSON? An Elasticsearch node that may
//! or may not be awake? We've got a backend for that. Each one is picked by the scheme in
//! its connection string, opened, pinged once, and handed to the job, or released if
//! anything goes sideways.
//!
//! 🧠 Knowledge graph:
//! - Pattern: [`Storage`] trait → concrete handles → [`StorageBackend`] enum (dispatch by match)
//! - `registry`: scheme → `Connector` lookup, additive (register a scheme, get a backend)
//! - `resolver`: concurrent fan-out/fan-in over all targets, all-or-nothing
//! - A handle that passed `ping` once is *not* promised to stay alive. The executor copes.
//!
//! 🦆 The duck is here because every file must have one. This is law. Do not question the duck.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

pub mod elasticsearch;
pub mod file;
pub mod in_mem;
pub mod mongo;
pub mod registry;
pub mod resolver;
pub mod sql;

pub use registry::{Connector, StorageRegistry, scheme_of};
pub use resolver::{ResolvedStorage, release_all, resolve_storage};

/// 🔌 An open connection to one destination store.
///
/// # Contract 📜
/// - `ping` is a liveness check: cheap, read-only, and it talks to the real backend.
/// - `close` releases whatever the handle holds. Called exactly once by whoever owns it.
///   Calling it twice is harmless, but it's also a bug somewhere upstream.
#[async_trait]
pub trait Storage: fmt::Debug + Send + Sync {
    /// 📡 "Are you there?" Returns `Err` when the backend doesn't answer properly.
    async fn ping(&self) -> Result<()>;
    /// 🗑️ Release the connection. Pools drain, files unlock, the RAM ledger ticks.
    async fn close(&mut self) -> Result<()>;
}

/// 🏷️ What kind of store a handle talks to. Mostly for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    InMemory,
    File,
    Elasticsearch,
    Sqlite,
    Postgres,
    MongoDb,
    External,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InMemory => "memory",
            Self::File => "file",
            Self::Elasticsearch => "elasticsearch",
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::MongoDb => "mongodb",
            Self::External => "external",
        };
        f.write_str(name)
    }
}

/// 🎭 The many faces of a storage handle.
///
/// Built-ins get their own variant so the common path is a plain `match`.
/// `External` is the side door for schemes registered at runtime through
/// `StorageRegistry::register`, so adding a backend never means editing the resolver.
#[derive(Debug)]
pub enum StorageBackend {
    InMemory(in_mem::InMemoryStorage),
    File(file::FileStorage),
    Elasticsearch(elasticsearch::ElasticsearchStorage),
    Sql(sql::SqlStorage),
    Mongo(mongo::MongoStorage),
    External(Box<dyn Storage>),
}

impl StorageBackend {
    pub fn kind(&self) -> StorageKind {
        match self {
            Self::InMemory(_) => StorageKind::InMemory,
            Self::File(_) => StorageKind::File,
            Self::Elasticsearch(_) => StorageKind::Elasticsearch,
            Self::Sql(sql) => sql.kind(),
            Self::Mongo(_) => StorageKind::MongoDb,
            Self::External(_) => StorageKind::External,
        }
    }
}

#[async_trait]
impl Storage for StorageBackend {
    async fn ping(&self) -> Result<()> {
        match self {
            Self::InMemory(s) => s.ping().await,
            Self::File(s) => s.ping().await,
            Self::Elasticsearch(s) => s.ping().await,
            Self::Sql(s) => s.ping().await,
            Self::Mongo(s) => s.ping().await,
            Self::External(s) => s.ping().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::InMemory(s) => s.close().await,
            Self::File(s) => s.close().await,
            Self::Elasticsearch(s) => s.close().await,
            Self::Sql(s) => s.close().await,
            Self::Mongo(s) => s.close().await,
            Self::External(s) => s.close().await,
        }
    }
}
