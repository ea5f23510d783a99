//! 📂 Previously, on "Things That Could Go Wrong With A Directory"...
//!
//! The disk was quiet. Too quiet. A replication job had been told to write under
//! `file:///var/lib/repliq`. Simple, they said. What could go wrong?
//!
//! The parent didn't exist. The volume was mounted read-only. Someone had chmod'ed it
//! to 0500 in 2019 "temporarily".
//!
//! This backend is the file-system document store: `file://<root>` plus a `database`
//! becomes the directory `<root>/<database>`, one file per table later on. Connecting
//! creates the directory. Pinging proves we can actually write there.
//!
//! 🦆 (mandatory, no notes)

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::{debug, trace};

use crate::config::StorageTarget;
use crate::storage::{Connector, Storage, StorageBackend};

const PING_FILE_NAME: &str = ".repliq-ping";

/// 🔌 Connector for `file://`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileConnector;

#[async_trait]
impl Connector for FileConnector {
    async fn connect(&self, target: &StorageTarget) -> Result<StorageBackend> {
        let root = root_path(&target.connection_string)?;
        let directory = root.join(database_dir_name(&target.database)?);

        tokio::fs::create_dir_all(&directory).await.with_context(|| {
            format!(
                "💀 The directory '{}' could not be conjured into existence. \
                 We stared at the path. The path stared back. One of us was wrong about permissions.",
                directory.display()
            )
        })?;
        debug!(directory = %directory.display(), "📂 file storage ready");

        Ok(StorageBackend::File(FileStorage { directory }))
    }
}

/// 🧭 `file:///abs/path` → `/abs/path`, `file://rel/path` → `rel/path`.
fn root_path(connection_string: &str) -> Result<PathBuf> {
    let trimmed = connection_string.trim();
    let rest = trimmed
        .strip_prefix("file://")
        .or_else(|| trimmed.strip_prefix("file:"))
        .unwrap_or(trimmed);
    if rest.is_empty() {
        bail!("💀 the connection string names no directory. 'file://' alone is a mood, not a path.");
    }
    Ok(PathBuf::from(rest))
}

/// 🚧 `database` must be one plain directory name that stays under the root.
/// `../etc`, `a/b`, `/tmp` and friends are turned away before anything touches the disk.
fn database_dir_name(database: &str) -> Result<&Path> {
    let path = Path::new(database);
    let mut components = path.components();
    let single_plain_name = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_plain_name || database.contains(['/', '\\']) {
        bail!(
            "💀 database '{database}' must be a single directory name, no separators, no '.' or '..', \
             nothing absolute. It lives under the root, not wherever it pleases."
        );
    }
    Ok(path)
}

/// 📂 A directory we've checked we can write to.
#[derive(Debug)]
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// 🗄️ Where a table's records go: `<directory>/<table>.ndjson`.
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.directory.join(format!("{table}.ndjson"))
    }
}

#[async_trait]
impl Storage for FileStorage {
    /// 📡 Write a ping file and delete it. Read-only mounts fail here, not 10,000 records later.
    async fn ping(&self) -> Result<()> {
        let metadata = tokio::fs::metadata(&self.directory).await.with_context(|| {
            format!(
                "💀 '{}' vanished between connect and ping. Spooky.",
                self.directory.display()
            )
        })?;
        if !metadata.is_dir() {
            bail!("💀 '{}' exists but is not a directory", self.directory.display());
        }

        let ping_file = self.directory.join(PING_FILE_NAME);
        tokio::fs::write(&ping_file, b"ping").await.with_context(|| {
            format!(
                "💀 '{}' is not writable. The bytes knocked; nobody let them in.",
                self.directory.display()
            )
        })?;
        tokio::fs::remove_file(&ping_file)
            .await
            .with_context(|| format!("💀 could not clean up ping file '{}'", ping_file.display()))?;
        trace!(directory = %self.directory.display(), "✅ file storage is writable");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // -- 🗑️ nothing is held open between writes, so there is nothing to let go of
        trace!(directory = %self.directory.display(), "🗑️ file storage released");
        Ok(())
    }
}
