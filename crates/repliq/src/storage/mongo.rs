//! 🍃 MongoDB destinations: `mongodb://` and `mongodb+srv://`.
//!
//! The driver parses the URL in `connect` and then keeps its sockets to itself until someone
//! actually asks for something. So, same deal as the SQL pools: a bad host shows up at `ping`,
//! not at `connect`. `mongodb+srv://` is the exception, it has to ask DNS for the seed list first.
//!
//! The target's `database` is the one we ping and the one the executor writes to, whatever the
//! URL's path says. The URL's path is only the auth database as far as the driver cares.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use mongodb::Client;
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use tracing::{debug, trace};

use crate::config::StorageTarget;
use crate::storage::{Connector, Storage, StorageBackend};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(10);
const APP_NAME: &str = "repliq";

/// 🔌 Connector for `mongodb` and `mongodb+srv`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(&self, target: &StorageTarget) -> Result<StorageBackend> {
        let redacted = target.redacted();
        let mut options = ClientOptions::parse(&target.connection_string)
            .await
            .with_context(|| format!("💀 '{redacted}' is not a MongoDB URL the driver can read"))?;
        // -- 🔧 the driver's default server selection wait is 30s; ours is a liveness check, not a vigil
        options.connect_timeout = Some(CONNECT_TIMEOUT);
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        options.app_name.get_or_insert_with(|| APP_NAME.to_string());

        let client = Client::with_options(options)
            .with_context(|| format!("💀 the MongoDB client for '{redacted}' refused to be built"))?;

        debug!(location = %redacted, database = %target.database, "🍃 mongodb client ready (lazy)");
        Ok(StorageBackend::Mongo(MongoStorage {
            client: Some(client),
            location: redacted,
            database: target.database.clone(),
        }))
    }
}

/// 🍃 One client, one database. `None` once released.
pub struct MongoStorage {
    client: Option<Client>,
    location: String,
    database: String,
}

impl MongoStorage {
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }
}

impl fmt::Debug for MongoStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoStorage")
            .field("location", &self.location)
            .field("database", &self.database)
            .field("released", &self.client.is_none())
            .finish()
    }
}

#[async_trait]
impl Storage for MongoStorage {
    /// 📡 `{ ping: 1 }` against the target database. First real round trip happens here.
    async fn ping(&self) -> Result<()> {
        let Some(client) = &self.client else {
            bail!("💀 mongodb storage '{}' was already released", self.location);
        };
        client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await
            .with_context(|| {
                format!(
                    "💀 '{}' did not answer ping on database '{}'. Is mongod up? Is the replica set \
                     having one of its elections again?",
                    self.location, self.database
                )
            })?;
        trace!(location = %self.location, "✅ mongodb storage answered");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.shutdown().await;
            debug!(location = %self.location, "🗑️ mongodb client shut down");
        }
        Ok(())
    }
}
