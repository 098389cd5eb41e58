use crate::mongo::MongoConfig;
use anyhow::{Context, Result};
use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, Tls, TlsOptions};
use mongodb::{Client, Collection};
use std::time::Duration;
use tracing::{debug, info};

/// MongoDB client wrapper with connection pooling
///
/// Cloning is cheap; all clones share one pool.
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
}

impl MongoClient {
    /// Creates a pooled client. No connection is opened until the first
    /// operation, so call `ping` to verify the server is reachable.
    pub async fn new(config: &MongoConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(config.connection_uri())
            .await
            .context("Invalid MongoDB connection string")?;
        options.app_name = Some(config.app_name.clone());
        options.min_pool_size = Some(config.min_pool_size);
        options.max_pool_size = Some(config.max_pool_size);

        if config.tls_enabled {
            let mut tls = TlsOptions::default();
            tls.allow_invalid_certificates = Some(config.allow_invalid_certificates);
            tls.ca_file_path = config.ca_file_path.clone();
            tls.cert_key_file_path = config.client_pem_path.clone();
            options.tls = Some(Tls::Enabled(tls));
        }

        let client = Client::with_options(options).context("Failed to create MongoDB client")?;

        info!(
            host = %config.host,
            port = config.port,
            tls = config.tls_enabled,
            min_pool_size = config.min_pool_size,
            max_pool_size = config.max_pool_size,
            "MongoDB client created"
        );

        Ok(Self { client })
    }

    /// Pings the server to verify connectivity
    pub async fn ping(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(
            timeout,
            self.client.database("admin").run_command(doc! { "ping": 1 }),
        )
        .await
        .context("Timed out waiting for MongoDB")?
        .context("MongoDB ping failed")?;
        debug!("MongoDB connection successful");
        Ok(())
    }

    /// Collection handle; the collection is created on first insert
    pub fn collection(&self, database: &str, collection: &str) -> Collection<Document> {
        self.client.database(database).collection(collection)
    }

    /// Closes the pool after in-flight operations complete
    pub async fn shutdown(self) {
        info!("Closing MongoDB connection pool");
        self.client.shutdown().await;
    }
}
