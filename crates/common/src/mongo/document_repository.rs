use crate::domain::{DocumentSink, DomainError, DomainResult, IngestDocument, InsertDocumentInput, MeteringRecord};
use crate::mongo::MongoClient;
use async_trait::async_trait;
use mongodb::bson::{self, doc, Document};
use tracing::{debug, instrument};

/// Convert a domain document into the BSON stored in MongoDB
pub fn to_bson_document(document: &IngestDocument) -> DomainResult<Document> {
    match document {
        IngestDocument::Raw(serde_json::Value::Object(map)) => bson::to_document(map)
            .map_err(|e| DomainError::InvalidDocument(e.to_string())),
        IngestDocument::Raw(other) => Err(DomainError::InvalidDocument(format!(
            "top-level document must be a JSON object, got {}",
            json_kind(other)
        ))),
        IngestDocument::Metering(record) => Ok(metering_document(record)),
    }
}

fn metering_document(record: &MeteringRecord) -> Document {
    doc! {
        "topic": &record.topic,
        "dataSize": record.data_size as i64,
        "timestamp": bson::DateTime::from_millis(record.timestamp.timestamp_millis()),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// MongoDB implementation of DocumentSink
#[derive(Clone)]
pub struct MongoDocumentRepository {
    client: MongoClient,
}

impl MongoDocumentRepository {
    pub fn new(client: MongoClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentSink for MongoDocumentRepository {
    #[instrument(skip(self, input), fields(database = %input.database, collection = %input.collection))]
    async fn insert_one(&self, input: InsertDocumentInput) -> DomainResult<()> {
        let document = to_bson_document(&input.document)?;

        let result = self
            .client
            .collection(&input.database, &input.collection)
            .insert_one(document)
            .await
            .map_err(|e| DomainError::StorageError(e.to_string()))?;

        debug!(inserted_id = %result.inserted_id, "document inserted");
        Ok(())
    }
}
