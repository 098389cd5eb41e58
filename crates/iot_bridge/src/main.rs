mod config;

use bridge_runner::Runner;
use common::domain::{DeviceDirectory, DocumentSink};
use common::mongo::{MongoClient, MongoDocumentRepository};
use common::telemetry::{init_telemetry, shutdown_telemetry};
use common::{load_connection_material, ConnectionMaterial};
use crate::config::ServiceConfig;
use ingest_worker::{HttpDeviceDirectory, IngestWorker, IngestWorkerConfig};
use std::sync::Arc;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    // Initialize configuration and tracing
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers = match init_telemetry(&config.telemetry_config()) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {:#}", e);
            std::process::exit(1);
        }
    };

    info!(
        mqtt_host = %config.mqtt_hostname,
        mqtt_port = config.mqtt_port,
        topic_filter = %config.mqtt_namespace,
        mongodb_host = %config.mongodb_hostname,
        mongodb_port = config.mongodb_port,
        otel_enabled = config.otel_enabled,
        "Starting iot-bridge service"
    );
    debug!(
        cert_dir = %config.cert_dir,
        directory_url = %config.directory_url,
        refresh_interval_secs = config.directory_refresh_interval_secs,
        "Configuration loaded"
    );

    // Credentials must be readable before anything connects
    let material = match load_connection_material(&config.credential_paths()) {
        Ok(material) => material,
        Err(e) => {
            error!("Failed to load TLS material: {}", e);
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    let mongo_client = match connect_mongo(&config, &material).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect to MongoDB: {:#}", e);
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    let directory: Arc<dyn DeviceDirectory> =
        match HttpDeviceDirectory::new(config.directory_config()) {
            Ok(directory) => Arc::new(directory),
            Err(e) => {
                error!("Failed to build device directory client: {:#}", e);
                shutdown_telemetry(telemetry_providers);
                std::process::exit(1);
            }
        };
    let sink: Arc<dyn DocumentSink> =
        Arc::new(MongoDocumentRepository::new(mongo_client.clone()));

    let ingest_worker = IngestWorker::new(
        directory,
        sink,
        &material.bus,
        IngestWorkerConfig {
            bus: config.bus_config(),
            ingestion: config.ingestion_config(),
            refresh_interval: config.refresh_interval(),
            directory_timeout: config.directory_timeout(),
        },
    )
    .await;

    // Build runner with all processes
    let mut runner = Runner::new();
    for (name, process) in ingest_worker.into_runner_processes() {
        runner = runner.with_boxed_process(name, process);
    }

    // Processes have drained by the time closers run
    runner = runner
        .with_closer(move || async move {
            info!("Running cleanup tasks...");
            mongo_client.shutdown().await;

            // Shutdown telemetry and flush pending traces and logs
            shutdown_telemetry(telemetry_providers);

            info!("Cleanup complete");
            Ok(())
        })
        .with_closer_timeout(config.shutdown_timeout());

    // Run the service
    if runner.run().await.is_err() {
        std::process::exit(1);
    }
}

async fn connect_mongo(
    config: &ServiceConfig,
    material: &ConnectionMaterial,
) -> anyhow::Result<MongoClient> {
    info!("Initializing MongoDB...");
    let client = MongoClient::new(&config.mongo_config(&material.storage)).await?;
    client.ping(config.startup_timeout()).await?;
    Ok(client)
}
