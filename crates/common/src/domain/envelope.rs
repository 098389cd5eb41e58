use chrono::{DateTime, Utc};

/// A single message delivered by the bus, before authorization or parsing.
///
/// The topic doubles as the device code of the publishing device.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestEvent {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl IngestEvent {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Payload rendered for log output; invalid UTF-8 is replaced, not rejected.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Size accounting for one accepted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeteringRecord {
    pub topic: String,
    pub data_size: u64,
    pub timestamp: DateTime<Utc>,
}

impl From<&IngestEvent> for MeteringRecord {
    fn from(event: &IngestEvent) -> Self {
        Self {
            topic: event.topic.clone(),
            data_size: event.payload.len() as u64,
            timestamp: event.received_at,
        }
    }
}
