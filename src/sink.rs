use chrono::Utc;
use log::warn;
use serde::Serialize;
use serde_json::{Map, Value};

/// Structured record delivered to the observability sink. Field names match
/// the player-event console format consumed downstream.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EventRecord {
    #[serde(rename = "player-event")]
    pub kind: String,

    /// Epoch milliseconds at record creation
    #[serde(rename = "event-time")]
    pub timestamp: i64,

    #[serde(rename = "ad-id", skip_serializing_if = "Option::is_none")]
    pub ad_id: Option<String>,

    #[serde(rename = "creative-id", skip_serializing_if = "Option::is_none")]
    pub creative_id: Option<String>,

    /// Event-specific payload
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
}

impl EventRecord {
    pub fn new(kind: &str) -> Self {
        EventRecord {
            kind: kind.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            ad_id: None,
            creative_id: None,
            payload: Map::new(),
        }
    }

    pub fn with_payload(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}

/// Destination for structured tracking events; delivery is best-effort and
/// local, the transport behind it is not this crate's concern
pub trait EventSink: Send + Sync {
    fn emit(&self, record: EventRecord);
}

/// Prints one JSON object per record to stdout
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, record: EventRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("failed to serialize event record: {e}"),
        }
    }
}
