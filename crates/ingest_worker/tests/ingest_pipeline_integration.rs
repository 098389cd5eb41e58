#![cfg(feature = "integration-tests")]

use anyhow::Result;
use async_trait::async_trait;
use bridge_runner::Runner;
use common::domain::{DeviceDirectory, DocumentSink, DomainResult, InsertDocumentInput};
use common::mongo::{MongoClient, MongoConfig, MongoDocumentRepository};
use common::BusTlsMaterial;
use ingest_worker::{BusSubscriberConfig, IngestWorker, IngestWorkerConfig, IngestionServiceConfig};
use mongodb::bson::doc;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, Image};
use testcontainers_modules::mongo::Mongo;
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const RAW_DB: &str = "raw_messages";
const METERING_DB: &str = "metering";

/// Mosquitto 1.6 accepts anonymous clients on 1883 without a config file
#[derive(Debug, Clone)]
struct Mosquitto {
    ports: Vec<ContainerPort>,
}

impl Default for Mosquitto {
    fn default() -> Self {
        Self {
            ports: vec![ContainerPort::Tcp(1883)],
        }
    }
}

impl Image for Mosquitto {
    fn name(&self) -> &str {
        "eclipse-mosquitto"
    }

    fn tag(&self) -> &str {
        "1.6"
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        // Just wait a few seconds for the broker to start
        vec![WaitFor::seconds(3)]
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &self.ports
    }
}

/// Directory with a fixed device list
struct StaticDirectory(Vec<String>);

#[async_trait]
impl DeviceDirectory for StaticDirectory {
    async fn fetch_device_codes(&self) -> DomainResult<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Signals when a write starts, then holds it before passing it on
struct SlowSink {
    inner: MongoDocumentRepository,
    started: Arc<Notify>,
    delay: Duration,
}

#[async_trait]
impl DocumentSink for SlowSink {
    async fn insert_one(&self, input: InsertDocumentInput) -> DomainResult<()> {
        self.started.notify_one();
        sleep(self.delay).await;
        self.inner.insert_one(input).await
    }
}

fn worker_config(broker_host: &str, broker_port: u16, client_id: &str) -> IngestWorkerConfig {
    IngestWorkerConfig {
        bus: BusSubscriberConfig {
            host: broker_host.to_string(),
            port: broker_port,
            client_id: client_id.to_string(),
            topic_filter: "#".to_string(),
            tls_enabled: false,
            reconnect_delay_secs: 1,
            drain_timeout_secs: 5,
            ..Default::default()
        },
        ingestion: IngestionServiceConfig {
            raw_database: RAW_DB.to_string(),
            metering_database: METERING_DB.to_string(),
        },
        refresh_interval: Duration::from_secs(1800),
        directory_timeout: Duration::from_secs(5),
    }
}

async fn start_runner(worker: IngestWorker) -> (CancellationToken, tokio::task::JoinHandle<Result<()>>) {
    let token = CancellationToken::new();
    let mut runner = Runner::new()
        .without_signal_handlers()
        .with_cancellation_token(token.clone());
    for (name, process) in worker.into_runner_processes() {
        runner = runner.with_boxed_process(name, process);
    }
    let handle = tokio::spawn(runner.run());

    // Give the subscriber time to connect and subscribe
    sleep(Duration::from_secs(2)).await;
    (token, handle)
}

async fn start_containers() -> Result<(
    ContainerAsync<Mongo>,
    ContainerAsync<Mosquitto>,
    MongoClient,
    String, // broker host
    u16,    // broker port
)> {
    let (mongo, mosquitto) = tokio::join!(Mongo::default().start(), Mosquitto::default().start());
    let mongo = mongo?;
    let mosquitto = mosquitto?;

    let mongo_client = MongoClient::new(&MongoConfig {
        host: mongo.get_host().await?.to_string(),
        port: mongo.get_host_port_ipv4(27017).await?,
        tls_enabled: false,
        ..Default::default()
    })
    .await?;
    mongo_client.ping(Duration::from_secs(30)).await?;

    let broker_host = mosquitto.get_host().await?.to_string();
    let broker_port = mosquitto.get_host_port_ipv4(1883).await?;

    Ok((mongo, mosquitto, mongo_client, broker_host, broker_port))
}

async fn publish(host: &str, port: u16, messages: &[(&str, &[u8])]) -> Result<()> {
    let mut options = MqttOptions::new("integration-publisher", host, port);
    options.set_keep_alive(Duration::from_secs(5));
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    for (topic, payload) in messages {
        client
            .publish(*topic, QoS::ExactlyOnce, false, payload.to_vec())
            .await?;
    }

    // drive the QoS 2 handshake until every publish completes, then disconnect
    let mut acked = 0;
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::PubComp(_)) => {
                acked += 1;
                if acked == messages.len() {
                    client.disconnect().await?;
                }
            }
            Event::Outgoing(Outgoing::Disconnect) => break,
            _ => {}
        }
    }
    Ok(())
}

async fn count(client: &MongoClient, database: &str, collection: &str) -> u64 {
    client
        .collection(database, collection)
        .count_documents(doc! {})
        .await
        .unwrap()
}

#[tokio::test]
async fn test_registered_device_is_stored_and_unknown_device_is_dropped() -> Result<()> {
    let (_mongo, _mosquitto, mongo_client, broker_host, broker_port) = start_containers().await?;

    let directory: Arc<dyn DeviceDirectory> =
        Arc::new(StaticDirectory(vec!["sensor42".to_string()]));
    let sink: Arc<dyn DocumentSink> = Arc::new(MongoDocumentRepository::new(mongo_client.clone()));

    let worker = IngestWorker::new(
        directory,
        sink,
        &BusTlsMaterial::default(),
        worker_config(&broker_host, broker_port, "integration-bridge"),
    )
    .await;
    let (token, runner_handle) = start_runner(worker).await;

    let payload: &[u8] = br#"{"temp":21.5}"#;
    publish(
        &broker_host,
        broker_port,
        &[("sensor42", payload), ("sensor99", payload)],
    )
    .await?;

    // Wait for the accepted message to land in both databases
    let mut stored = false;
    for _ in 0..40 {
        if count(&mongo_client, RAW_DB, "sensor42").await == 1
            && count(&mongo_client, METERING_DB, "sensor42").await == 1
        {
            stored = true;
            break;
        }
        sleep(Duration::from_millis(250)).await;
    }
    assert!(stored, "message on sensor42 was not stored in both databases");

    let raw = mongo_client
        .collection(RAW_DB, "sensor42")
        .find_one(doc! {})
        .await?
        .expect("raw document");
    assert_eq!(raw.get_f64("temp")?, 21.5);

    let metering = mongo_client
        .collection(METERING_DB, "sensor42")
        .find_one(doc! {})
        .await?
        .expect("metering document");
    assert_eq!(metering.get_str("topic")?, "sensor42");
    assert_eq!(metering.get_i64("dataSize")?, payload.len() as i64);
    assert!(metering.get_datetime("timestamp").is_ok());

    // Both messages were published before the check, so sensor99 had its chance
    assert_eq!(count(&mongo_client, RAW_DB, "sensor99").await, 0);
    assert_eq!(count(&mongo_client, METERING_DB, "sensor99").await, 0);

    token.cancel();
    let result = tokio::time::timeout(Duration::from_secs(15), runner_handle).await??;
    assert!(result.is_ok());

    Ok(())
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_write() -> Result<()> {
    let (_mongo, _mosquitto, mongo_client, broker_host, broker_port) = start_containers().await?;

    let started = Arc::new(Notify::new());
    let directory: Arc<dyn DeviceDirectory> =
        Arc::new(StaticDirectory(vec!["sensor42".to_string()]));
    let sink: Arc<dyn DocumentSink> = Arc::new(SlowSink {
        inner: MongoDocumentRepository::new(mongo_client.clone()),
        started: started.clone(),
        delay: Duration::from_secs(2),
    });

    let worker = IngestWorker::new(
        directory,
        sink,
        &BusTlsMaterial::default(),
        worker_config(&broker_host, broker_port, "integration-bridge-drain"),
    )
    .await;
    let (token, runner_handle) = start_runner(worker).await;

    publish(
        &broker_host,
        broker_port,
        &[("sensor42", br#"{"temp":21.5}"#.as_slice())],
    )
    .await?;

    // cancel while the write is held in the sink
    tokio::time::timeout(Duration::from_secs(10), started.notified()).await?;
    token.cancel();
    let result = tokio::time::timeout(Duration::from_secs(15), runner_handle).await??;
    assert!(result.is_ok());

    assert_eq!(count(&mongo_client, RAW_DB, "sensor42").await, 1);
    assert_eq!(count(&mongo_client, METERING_DB, "sensor42").await, 1);

    Ok(())
}
