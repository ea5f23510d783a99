//! 📒 The scheme registry — a phone book where every entry is a URL prefix.
//!
//! `sqlite:` → call the SQL connector. `file://` → call the file connector.
//! `bogus://` → nobody picks up, and the resolver writes that down as a failure.
//!
//! Adding a backend means adding an entry. The resolver never learns the names.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::config::StorageTarget;
use crate::storage::StorageBackend;
use crate::storage::elasticsearch::ElasticsearchConnector;
use crate::storage::file::FileConnector;
use crate::storage::in_mem::{MemoryConnector, MemoryLedger};
use crate::storage::mongo::MongoConnector;
use crate::storage::sql::SqlConnector;

/// 🔌 Knows how to turn one kind of connection string into an open handle.
///
/// `connect` constructs the handle. It should not ping; the resolver pings right after,
/// under the same cancellation scope, and releases the handle if the ping fails.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &StorageTarget) -> Result<StorageBackend>;
}

/// 📒 scheme → connector.
#[derive(Clone)]
pub struct StorageRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
    memory_ledger: Arc<MemoryLedger>,
}

impl Default for StorageRegistry {
    /// 🏗️ Every built-in backend, ready to go.
    fn default() -> Self {
        let mut registry = Self::empty();
        let memory = MemoryConnector::new(Arc::clone(&registry.memory_ledger));
        registry.register("memory", memory);
        registry.register("file", FileConnector);
        for scheme in ["http", "https", "elasticsearch", "elasticsearch+https"] {
            registry.register(scheme, ElasticsearchConnector);
        }
        for scheme in ["sqlite", "postgres", "postgresql"] {
            registry.register(scheme, SqlConnector);
        }
        for scheme in ["mongodb", "mongodb+srv"] {
            registry.register(scheme, MongoConnector);
        }
        registry
    }
}

impl StorageRegistry {
    /// 🫙 A registry that knows no schemes at all. Mostly for tests and the very brave.
    pub fn empty() -> Self {
        Self {
            connectors: HashMap::new(),
            memory_ledger: Arc::new(MemoryLedger::default()),
        }
    }

    /// ➕ Register (or replace) the connector for `scheme`. Case-insensitive.
    pub fn register(&mut self, scheme: &str, connector: impl Connector + 'static) -> &mut Self {
        self.connectors
            .insert(scheme.to_ascii_lowercase(), Arc::new(connector));
        self
    }

    /// 🔍 Find the connector for a target, or explain why there isn't one.
    pub fn connector_for(&self, target: &StorageTarget) -> Result<Arc<dyn Connector>> {
        let scheme = scheme_of(&target.connection_string).ok_or_else(|| {
            anyhow!(
                "💀 '{}' has no recognisable scheme. We need a prefix like 'sqlite:' or 'postgres://' to know who to call.",
                target.redacted()
            )
        })?;
        self.connectors.get(&scheme).cloned().ok_or_else(|| {
            anyhow!(
                "💀 unknown storage scheme '{}'. We know: {}. Typo, or a backend we haven't met yet?",
                scheme,
                self.schemes().join(", ")
            )
        })
    }

    /// 📜 Registered schemes, sorted, for error messages and `--help`-ish output.
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// 📊 Bookkeeping for `memory://` handles opened through this registry.
    pub fn memory_ledger(&self) -> &Arc<MemoryLedger> {
        &self.memory_ledger
    }
}

impl fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

/// 🔑 The backend key of a connection string: everything before the first `:`, lower-cased.
///
/// `postgres://u@h/db` → `postgres`, `sqlite::memory:` → `sqlite`, `/tmp/x` → `None`.
pub fn scheme_of(connection_string: &str) -> Option<String> {
    let (scheme, _) = connection_string.trim().split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return None;
    }
    Some(scheme.to_ascii_lowercase())
}
