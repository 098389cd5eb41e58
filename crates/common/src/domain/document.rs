use crate::domain::envelope::MeteringRecord;
use crate::domain::result::DomainResult;
use async_trait::async_trait;

/// Document body handed to the storage sink
#[derive(Debug, Clone, PartialEq)]
pub enum IngestDocument {
    /// Decoded device payload, stored unmodified
    Raw(serde_json::Value),
    /// Size accounting derived from the message
    Metering(MeteringRecord),
}

/// Input for a single-document insert
#[derive(Debug, Clone, PartialEq)]
pub struct InsertDocumentInput {
    pub database: String,
    pub collection: String,
    pub document: IngestDocument,
}

/// Storage sink for ingested documents
/// Infrastructure layer (MongoDB) implements this trait
///
/// Collections are created on first insert. Inserts are independent of
/// each other; no transaction spans two calls.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn insert_one(&self, input: InsertDocumentInput) -> DomainResult<()>;
}
