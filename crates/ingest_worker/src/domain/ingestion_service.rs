use common::domain::{
    DeviceAuthorizer, DocumentSink, DomainError, DomainResult, IngestDocument, IngestEvent, InsertDocumentInput,
    MeteringRecord,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub const DEFAULT_RAW_DATABASE: &str =
    "CSIR_IoT_(Water_Service_Delivery_Measurement_and_Monitoring)";
pub const DEFAULT_METERING_DATABASE: &str = "CSIR_IoT_Calculator";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionServiceConfig {
    /// Database receiving the decoded payloads
    pub raw_database: String,
    /// Database receiving the size accounting records
    pub metering_database: String,
}

impl Default for IngestionServiceConfig {
    fn default() -> Self {
        Self {
            raw_database: DEFAULT_RAW_DATABASE.to_string(),
            metering_database: DEFAULT_METERING_DATABASE.to_string(),
        }
    }
}

/// What happened to one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Topic is not a registered device code; nothing written
    Unauthorized,
    /// Payload is not JSON; nothing written
    MalformedPayload,
    /// Both writes were attempted
    Attempted {
        raw_stored: bool,
        metering_stored: bool,
    },
}

/// Domain service that turns bus messages into stored documents
///
/// Flow:
/// 1. Check the topic against the device registry
/// 2. Decode the payload as JSON
/// 3. Insert the decoded payload into the raw database
/// 4. Insert a metering record into the metering database
///
/// Steps 3 and 4 are independent: one failing never skips or undoes the other.
pub struct IngestionService {
    authorizer: Arc<dyn DeviceAuthorizer>,
    sink: Arc<dyn DocumentSink>,
    config: IngestionServiceConfig,
}

impl IngestionService {
    pub fn new(
        authorizer: Arc<dyn DeviceAuthorizer>,
        sink: Arc<dyn DocumentSink>,
        config: IngestionServiceConfig,
    ) -> Self {
        Self {
            authorizer,
            sink,
            config,
        }
    }

    #[instrument(skip_all, fields(topic = %event.topic, payload_size = event.payload.len()))]
    pub async fn handle(&self, event: IngestEvent) -> IngestOutcome {
        if !self.authorizer.is_authorized(&event.topic) {
            info!(
                topic = %event.topic,
                "topic is not a registered device code, ignoring message"
            );
            return IngestOutcome::Unauthorized;
        }

        let parsed = serde_json::from_slice::<serde_json::Value>(&event.payload)
            .map_err(DomainError::from);
        let document = match parsed {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    error = %e,
                    payload = %event.payload_lossy(),
                    "invalid JSON payload, dropping message"
                );
                return IngestOutcome::MalformedPayload;
            }
        };

        let metering = MeteringRecord::from(&event);

        let raw_input = InsertDocumentInput {
            database: self.config.raw_database.clone(),
            collection: event.topic.clone(),
            document: IngestDocument::Raw(document),
        };
        let metering_input = InsertDocumentInput {
            database: self.config.metering_database.clone(),
            collection: event.topic.clone(),
            document: IngestDocument::Metering(metering),
        };

        let (raw_result, metering_result) = tokio::join!(
            self.sink.insert_one(raw_input),
            self.sink.insert_one(metering_input)
        );

        IngestOutcome::Attempted {
            raw_stored: log_insert(&self.config.raw_database, &event, raw_result),
            metering_stored: log_insert(&self.config.metering_database, &event, metering_result),
        }
    }
}

fn log_insert(database: &str, event: &IngestEvent, result: DomainResult<()>) -> bool {
    match result {
        Ok(()) => {
            info!(database, collection = %event.topic, "inserted document");
            true
        }
        Err(e) => {
            error!(database, collection = %event.topic, error = %e, "error inserting document");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{MockDeviceAuthorizer, MockDocumentSink};
    use serde_json::json;

    fn authorizer_allowing(codes: &'static [&'static str]) -> Arc<dyn DeviceAuthorizer> {
        let mut authorizer = MockDeviceAuthorizer::new();
        authorizer
            .expect_is_authorized()
            .returning(move |code| codes.contains(&code));
        Arc::new(authorizer)
    }

    fn service(authorizer: Arc<dyn DeviceAuthorizer>, sink: MockDocumentSink) -> IngestionService {
        IngestionService::new(authorizer, Arc::new(sink), IngestionServiceConfig::default())
    }

    #[tokio::test]
    async fn test_unauthorized_topic_writes_nothing() {
        let mut sink = MockDocumentSink::new();
        sink.expect_insert_one().times(0);
        let service = service(authorizer_allowing(&["sensor42"]), sink);

        let outcome = service
            .handle(IngestEvent::new("sensor99", br#"{"temp":21.5}"#.to_vec()))
            .await;

        assert_eq!(outcome, IngestOutcome::Unauthorized);
    }

    #[tokio::test]
    async fn test_malformed_payload_writes_nothing() {
        let mut sink = MockDocumentSink::new();
        sink.expect_insert_one().times(0);
        let service = service(authorizer_allowing(&["sensor42"]), sink);

        let outcome = service
            .handle(IngestEvent::new("sensor42", b"{\"temp\":".to_vec()))
            .await;

        assert_eq!(outcome, IngestOutcome::MalformedPayload);
    }

    #[tokio::test]
    async fn test_non_utf8_payload_is_malformed() {
        let mut sink = MockDocumentSink::new();
        sink.expect_insert_one().times(0);
        let service = service(authorizer_allowing(&["sensor42"]), sink);

        let outcome = service
            .handle(IngestEvent::new("sensor42", vec![0xff, 0xfe]))
            .await;

        assert_eq!(outcome, IngestOutcome::MalformedPayload);
    }

    #[tokio::test]
    async fn test_authorized_message_writes_raw_and_metering() {
        let payload = br#"{"temp":21.5}"#.to_vec();
        let payload_len = payload.len() as u64;
        let event = IngestEvent::new("sensor42", payload);
        let received_at = event.received_at;

        let mut sink = MockDocumentSink::new();
        sink.expect_insert_one()
            .withf(|input: &InsertDocumentInput| {
                input.database == DEFAULT_RAW_DATABASE
                    && input.collection == "sensor42"
                    && input.document == IngestDocument::Raw(json!({"temp": 21.5}))
            })
            .times(1)
            .returning(|_| Ok(()));
        sink.expect_insert_one()
            .withf(move |input: &InsertDocumentInput| {
                input.database == DEFAULT_METERING_DATABASE
                    && input.collection == "sensor42"
                    && input.document
                        == IngestDocument::Metering(MeteringRecord {
                            topic: "sensor42".to_string(),
                            data_size: payload_len,
                            timestamp: received_at,
                        })
            })
            .times(1)
            .returning(|_| Ok(()));
        let service = service(authorizer_allowing(&["sensor42"]), sink);

        let outcome = service.handle(event).await;

        assert_eq!(
            outcome,
            IngestOutcome::Attempted {
                raw_stored: true,
                metering_stored: true
            }
        );
    }

    #[tokio::test]
    async fn test_raw_failure_does_not_skip_metering() {
        let mut sink = MockDocumentSink::new();
        sink.expect_insert_one()
            .withf(|input: &InsertDocumentInput| input.database == DEFAULT_RAW_DATABASE)
            .times(1)
            .returning(|_| Err(DomainError::StorageError("write concern timeout".to_string())));
        sink.expect_insert_one()
            .withf(|input: &InsertDocumentInput| input.database == DEFAULT_METERING_DATABASE)
            .times(1)
            .returning(|_| Ok(()));
        let service = service(authorizer_allowing(&["sensor42"]), sink);

        let outcome = service
            .handle(IngestEvent::new("sensor42", br#"{"temp":21.5}"#.to_vec()))
            .await;

        assert_eq!(
            outcome,
            IngestOutcome::Attempted {
                raw_stored: false,
                metering_stored: true
            }
        );
    }

    #[tokio::test]
    async fn test_metering_failure_keeps_raw_write() {
        let mut sink = MockDocumentSink::new();
        sink.expect_insert_one()
            .withf(|input: &InsertDocumentInput| input.database == DEFAULT_RAW_DATABASE)
            .times(1)
            .returning(|_| Ok(()));
        sink.expect_insert_one()
            .withf(|input: &InsertDocumentInput| input.database == DEFAULT_METERING_DATABASE)
            .times(1)
            .returning(|_| Err(DomainError::StorageError("pool exhausted".to_string())));
        let service = service(authorizer_allowing(&["sensor42"]), sink);

        let outcome = service
            .handle(IngestEvent::new("sensor42", br#"{"temp":21.5}"#.to_vec()))
            .await;

        assert_eq!(
            outcome,
            IngestOutcome::Attempted {
                raw_stored: true,
                metering_stored: false
            }
        );
    }

    #[tokio::test]
    async fn test_both_failures_still_count_as_attempted() {
        let mut sink = MockDocumentSink::new();
        sink.expect_insert_one()
            .times(2)
            .returning(|_| Err(DomainError::StorageError("not primary".to_string())));
        let service = service(authorizer_allowing(&["sensor42"]), sink);

        let outcome = service
            .handle(IngestEvent::new("sensor42", br#"{"temp":21.5}"#.to_vec()))
            .await;

        assert_eq!(
            outcome,
            IngestOutcome::Attempted {
                raw_stored: false,
                metering_stored: false
            }
        );
    }

    #[tokio::test]
    async fn test_custom_database_names_are_used() {
        let mut sink = MockDocumentSink::new();
        sink.expect_insert_one()
            .withf(|input: &InsertDocumentInput| {
                (input.database == "raw" || input.database == "meter")
                    && input.collection == "dev-1"
            })
            .times(2)
            .returning(|_| Ok(()));
        let service = IngestionService::new(
            authorizer_allowing(&["dev-1"]),
            Arc::new(sink),
            IngestionServiceConfig {
                raw_database: "raw".to_string(),
                metering_database: "meter".to_string(),
            },
        );

        let outcome = service
            .handle(IngestEvent::new("dev-1", b"[1,2,3]".to_vec()))
            .await;

        assert!(matches!(outcome, IngestOutcome::Attempted { .. }));
    }
}
