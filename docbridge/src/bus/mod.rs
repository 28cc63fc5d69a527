//! Local event bus
//!
//! Events are published over a Unix Domain Socket as newline-delimited JSON.
//! The listener hands each event to the processor registered for its topic and
//! answers with the processed event as the acknowledgement.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub mod client;
pub mod codec;
pub mod listener;
pub mod messages;

pub use client::BusClient;
pub use messages::{BusMessage, BusResponse};

/// Header key used for processing errors
pub const ERROR_HEADER: &str = "Error";

/// Get the default socket path for the bus
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("docbridge")
        .join("bus.sock")
}

/// A message travelling on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Single-entry maps such as `{"Error": "..."}`, in the order they were added
    #[serde(default)]
    pub headers: Vec<BTreeMap<String, String>>,
}

impl Event {
    /// New event with a fresh time-ordered id
    pub fn new(topic: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            topic: topic.into(),
            payload,
            headers: Vec::new(),
        }
    }

    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let mut header = BTreeMap::new();
        header.insert(key.into(), value.into());
        self.headers.push(header);
    }

    /// Attach an error header
    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(id = %self.id, topic = %self.topic, %message, "add_error: called");
        self.add_header(ERROR_HEADER, message);
    }

    /// Every error header value, oldest first
    pub fn errors(&self) -> Vec<&str> {
        self.headers
            .iter()
            .filter_map(|h| h.get(ERROR_HEADER).map(String::as_str))
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.headers.iter().any(|h| h.contains_key(ERROR_HEADER))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn get_object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.payload.get(key).and_then(Value::as_object)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.payload.insert(key.into(), value);
    }
}

/// Something that handles events published on one topic
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process the event in place; failures are recorded as error headers
    async fn process(&self, event: &mut Event);
}

/// Topic to processor table
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor for a topic, replacing any previous one
    pub fn register_processor(&mut self, name: impl Into<String>, processor: Arc<dyn Processor>) {
        let name = name.into();
        debug!(%name, "register_processor: called");
        if self.processors.insert(name.clone(), processor).is_some() {
            warn!(%name, "Replaced existing processor");
        }
    }

    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }

    /// Run the processor for the event's topic once and return the event as acknowledged
    pub async fn dispatch(&self, mut event: Event) -> Event {
        debug!(id = %event.id, topic = %event.topic, "dispatch: called");
        match self.processors.get(&event.topic) {
            Some(processor) => processor.process(&mut event).await,
            None => {
                warn!(topic = %event.topic, "No processor registered for topic");
                let message = format!("no processor for topic {}", event.topic);
                event.add_error(message);
            }
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Processor for Upper {
        async fn process(&self, event: &mut Event) {
            match event.get_str("text").map(str::to_uppercase) {
                Some(text) => event.set("text", json!(text)),
                None => event.add_error("need text"),
            }
        }
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_socket_path_ends_with_bus_sock() {
        let path = get_socket_path();
        assert!(path.ends_with("docbridge/bus.sock"));
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = Event::new("db::find", Map::new());
        let b = Event::new("db::find", Map::new());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_error_headers_serialize_as_single_entry_maps() {
        let mut event = Event::new("db::insert", Map::new());
        event.add_error("first");
        event.add_error("second");

        assert_eq!(event.errors(), vec!["first", "second"]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["headers"], json!([{ "Error": "first" }, { "Error": "second" }]));
    }

    #[test]
    fn test_event_deserialize_defaults() {
        let event: Event = serde_json::from_str(r#"{"id":"1","topic":"db::find"}"#).unwrap();
        assert!(event.payload.is_empty());
        assert!(!event.has_errors());
    }

    #[tokio::test]
    async fn test_dispatch_runs_registered_processor() {
        let mut registry = ProcessorRegistry::new();
        registry.register_processor("text::upper", Arc::new(Upper));

        let event = registry
            .dispatch(Event::new("text::upper", payload(json!({ "text": "abc" }))))
            .await;
        assert_eq!(event.get_str("text"), Some("ABC"));
        assert!(!event.has_errors());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_topic_acknowledges_with_error() {
        let registry = ProcessorRegistry::new();
        let event = registry.dispatch(Event::new("nope::nothing", Map::new())).await;
        assert_eq!(event.errors(), vec!["no processor for topic nope::nothing"]);
    }
}
