use crate::domain::{
    DeviceRegistryCache, DeviceRegistryRefresher, IngestionService, IngestionServiceConfig,
};
use crate::mqtt::{BusSubscriber, BusSubscriberConfig};
use bridge_runner::AppProcess;
use common::domain::{DeviceAuthorizer, DeviceDirectory, DocumentSink};
use common::BusTlsMaterial;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct IngestWorkerConfig {
    pub bus: BusSubscriberConfig,
    pub ingestion: IngestionServiceConfig,
    pub refresh_interval: Duration,
    pub directory_timeout: Duration,
}

/// Wires the registry cache, ingestion pipeline and bus subscriber together
pub struct IngestWorker {
    registry: Arc<DeviceRegistryCache>,
    subscriber: BusSubscriber,
    refresh_interval: Duration,
}

impl IngestWorker {
    /// Performs the initial registry fetch before the bus is touched.
    ///
    /// A failed initial fetch is not fatal: the bridge starts with an empty
    /// registry, rejects everything, and picks the devices up on the next
    /// scheduled refresh.
    pub async fn new(
        directory: Arc<dyn DeviceDirectory>,
        sink: Arc<dyn DocumentSink>,
        bus_tls: &BusTlsMaterial,
        config: IngestWorkerConfig,
    ) -> Self {
        debug!("initializing ingest worker");

        let registry = Arc::new(DeviceRegistryCache::new(directory, config.directory_timeout));
        match registry.refresh().await {
            Ok(device_count) => info!(device_count, "initial device registry loaded"),
            Err(e) => warn!(
                error = %e,
                "initial device registry fetch failed, all messages are rejected until the next refresh"
            ),
        }

        let authorizer: Arc<dyn DeviceAuthorizer> = registry.clone();
        let service = Arc::new(IngestionService::new(authorizer, sink, config.ingestion));
        let subscriber = BusSubscriber::new(config.bus, bus_tls, service);

        Self {
            registry,
            subscriber,
            refresh_interval: config.refresh_interval,
        }
    }

    pub fn registry(&self) -> Arc<DeviceRegistryCache> {
        Arc::clone(&self.registry)
    }

    /// Split into the long-lived processes the runner supervises
    pub fn into_runner_processes(self) -> Vec<(&'static str, AppProcess)> {
        let refresher = DeviceRegistryRefresher::new(self.registry, self.refresh_interval);
        let subscriber = self.subscriber;

        let refresher_process: AppProcess =
            Box::new(move |ctx| Box::pin(async move { refresher.run(ctx).await }));
        let subscriber_process: AppProcess =
            Box::new(move |ctx| Box::pin(async move { subscriber.run(ctx).await }));

        vec![
            ("device_registry_refresher", refresher_process),
            ("mqtt_subscriber", subscriber_process),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{DomainError, MockDeviceDirectory, MockDocumentSink};

    fn config() -> IngestWorkerConfig {
        IngestWorkerConfig {
            bus: BusSubscriberConfig {
                host: "127.0.0.1".to_string(),
                port: 1883,
                tls_enabled: false,
                ..Default::default()
            },
            ingestion: IngestionServiceConfig::default(),
            refresh_interval: Duration::from_secs(1800),
            directory_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_new_loads_registry_before_subscribing() {
        let mut directory = MockDeviceDirectory::new();
        directory
            .expect_fetch_device_codes()
            .times(1)
            .returning(|| Ok(vec!["sensor42".to_string()]));

        let worker = IngestWorker::new(
            Arc::new(directory),
            Arc::new(MockDocumentSink::new()),
            &BusTlsMaterial::default(),
            config(),
        )
        .await;

        assert!(worker.registry().is_authorized("sensor42"));
        let names: Vec<_> = worker
            .into_runner_processes()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["device_registry_refresher", "mqtt_subscriber"]);
    }

    #[tokio::test]
    async fn test_initial_fetch_failure_is_not_fatal() {
        let mut directory = MockDeviceDirectory::new();
        directory
            .expect_fetch_device_codes()
            .times(1)
            .returning(|| Err(DomainError::DirectoryFetchError("HTTP 502".to_string())));

        let worker = IngestWorker::new(
            Arc::new(directory),
            Arc::new(MockDocumentSink::new()),
            &BusTlsMaterial::default(),
            config(),
        )
        .await;

        assert!(worker.registry().snapshot().is_empty());
        assert!(!worker.registry().is_authorized("sensor42"));
    }
}
