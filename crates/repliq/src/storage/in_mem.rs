//! # Previously, on Repliq...
//!
//! 🎬 The replication job needed a destination. Postgres was down for maintenance.
//! SQLite was on a read-only volume. Elasticsearch was yellow, and yellow is a mood.
//! Someone had to be the destination that's always there, lives entirely in RAM,
//! and vanishes the moment you blink.
//!
//! That someone was this module.
//!
//! `memory://<name>` gives you a storage handle with no I/O behind it, for tests and dry runs.
//! It can also be told to misbehave, because the interesting tests are the ones where
//! something breaks:
//!
//! | option | effect |
//! |---|---|
//! | `fail=connect` | `connect` errors |
//! | `fail=ping` | `ping` errors |
//! | `connect_latency_ms=N` | `connect` sleeps N ms first |
//! | `ping_latency_ms=N` | `ping` sleeps N ms first |
//!
//! Every handle reports to a [`MemoryLedger`] so tests can prove nothing leaked.
//!
//! ⚠️ This is NOT for production. If you're deploying this to prod, please also deploy a therapist.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Url;
use tracing::trace;

use crate::config::StorageTarget;
use crate::storage::{Connector, Storage, StorageBackend};

/// 📊 Counts in-memory handles opened and released. Shared by every handle from one registry.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    opened: AtomicUsize,
    released: AtomicUsize,
}

impl MemoryLedger {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// 🔓 Handles opened and not yet released. Zero is the only acceptable answer after a failure.
    pub fn open_handles(&self) -> usize {
        self.opened().saturating_sub(self.released())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePoint {
    Connect,
    Ping,
}

#[derive(Debug, Default)]
struct MemoryOptions {
    fail: Option<FailurePoint>,
    connect_latency: Option<Duration>,
    ping_latency: Option<Duration>,
}

fn parse_options(url: &Url) -> Result<MemoryOptions> {
    let mut options = MemoryOptions::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "fail" => {
                options.fail = Some(match value.as_ref() {
                    "connect" => FailurePoint::Connect,
                    "ping" => FailurePoint::Ping,
                    other => bail!("💀 memory storage can fail at 'connect' or 'ping', not '{other}'"),
                })
            }
            "connect_latency_ms" => options.connect_latency = Some(parse_millis(&key, &value)?),
            "ping_latency_ms" => options.ping_latency = Some(parse_millis(&key, &value)?),
            other => bail!("💀 unknown memory storage option '{other}'"),
        }
    }
    Ok(options)
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    let millis: u64 = value
        .parse()
        .with_context(|| format!("💀 '{key}' wants whole milliseconds, got '{value}'"))?;
    Ok(Duration::from_millis(millis))
}

/// 🔌 Connector for `memory://`.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    ledger: Arc<MemoryLedger>,
}

impl MemoryConnector {
    pub fn new(ledger: Arc<MemoryLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, target: &StorageTarget) -> Result<StorageBackend> {
        let url = Url::parse(&target.connection_string).with_context(|| {
            format!(
                "💀 '{}' is not a memory URL. Try 'memory://<name>'.",
                target.redacted()
            )
        })?;
        let options = parse_options(&url)?;

        if let Some(latency) = options.connect_latency {
            tokio::time::sleep(latency).await;
        }
        if options.fail == Some(FailurePoint::Connect) {
            bail!("💀 memory storage was told to refuse the connection, and it is nothing if not obedient");
        }

        let name = url.host_str().unwrap_or_default().to_string();
        self.ledger.opened.fetch_add(1, Ordering::SeqCst);
        trace!(name = %name, database = %target.database, "🧠 in-memory storage opened");

        Ok(StorageBackend::InMemory(InMemoryStorage {
            name,
            database: target.database.clone(),
            fail_ping: options.fail == Some(FailurePoint::Ping),
            ping_latency: options.ping_latency,
            ledger: Arc::clone(&self.ledger),
            released: false,
        }))
    }
}

/// 🧠 A storage handle that lives in RAM and reports its own death to the ledger.
#[derive(Debug)]
pub struct InMemoryStorage {
    name: String,
    database: String,
    fail_ping: bool,
    ping_latency: Option<Duration>,
    ledger: Arc<MemoryLedger>,
    released: bool,
}

impl InMemoryStorage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.ledger.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn ping(&self) -> Result<()> {
        if let Some(latency) = self.ping_latency {
            tokio::time::sleep(latency).await;
        }
        if self.released {
            bail!("💀 memory storage '{}' was already released", self.name);
        }
        if self.fail_ping {
            bail!(
                "💀 memory storage '{}' was told to ignore pings. It's not you, it's the query string.",
                self.name
            );
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        trace!(name = %self.name, "🗑️ in-memory storage released");
        self.release();
        Ok(())
    }
}

// -- dropping without close still counts as a release, RAM gets reclaimed either way
impl Drop for InMemoryStorage {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(ledger: &Arc<MemoryLedger>, cs: &str) -> Result<StorageBackend> {
        MemoryConnector::new(Arc::clone(ledger))
            .connect(&StorageTarget::new(cs, "test"))
            .await
    }

    #[tokio::test]
    async fn the_one_where_the_ledger_balances() {
        let ledger = Arc::new(MemoryLedger::default());
        let mut handle = connect(&ledger, "memory://primary")
            .await
            .expect("💀 memory storage refused a perfectly polite connection");
        handle.ping().await.expect("💀 memory storage ignored a ping");
        assert_eq!(ledger.open_handles(), 1);

        handle.close().await.expect("💀 closing RAM should not be hard");
        handle.close().await.expect("💀 a second close should be harmless");
        assert_eq!(ledger.opened(), 1);
        assert_eq!(ledger.released(), 1);
        assert_eq!(ledger.open_handles(), 0);
    }

    #[tokio::test]
    async fn the_one_where_dropping_counts_as_letting_go() {
        let ledger = Arc::new(MemoryLedger::default());
        let handle = connect(&ledger, "memory://dropped").await.expect("connect");
        assert_eq!(ledger.open_handles(), 1);
        drop(handle);
        assert_eq!(ledger.open_handles(), 0);
    }

    #[tokio::test]
    async fn the_one_where_it_fails_exactly_where_told() {
        let ledger = Arc::new(MemoryLedger::default());
        assert!(connect(&ledger, "memory://x?fail=connect").await.is_err());
        assert_eq!(ledger.opened(), 0, "💀 a refused connect must not count as opened");

        let handle = connect(&ledger, "memory://x?fail=ping").await.expect("connect");
        assert!(handle.ping().await.is_err());

        assert!(connect(&ledger, "memory://x?fail=sometimes").await.is_err());
        assert!(connect(&ledger, "memory://x?colour=blue").await.is_err());
    }

    #[tokio::test]
    async fn the_one_where_latency_is_honoured() {
        let ledger = Arc::new(MemoryLedger::default());
        let started = std::time::Instant::now();
        let handle = connect(&ledger, "memory://slow?connect_latency_ms=30&ping_latency_ms=30")
            .await
            .expect("connect");
        handle.ping().await.expect("ping");
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
