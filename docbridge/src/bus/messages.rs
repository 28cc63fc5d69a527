//! Bus wire messages
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use serde::{Deserialize, Serialize};

use super::Event;

/// Messages from publishers to the listener
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum BusMessage {
    /// Publish an event and wait for its acknowledgement
    Publish { event: Event },

    /// Ping to check if the listener is alive
    Ping,
}

/// Responses from the listener
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum BusResponse {
    /// The processed event
    Ack { event: Event },

    /// Pong response to ping
    Pong { version: String },

    /// The request could not be handled
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_ping_serialize() {
        let json = serde_json::to_string(&BusMessage::Ping).unwrap();
        assert_eq!(json, r#"{"type":"Ping"}"#);
    }

    #[test]
    fn test_publish_deserialize() {
        let json = r#"{"type":"Publish","event":{"id":"e-1","topic":"db::find","payload":{"db":"shop"},"headers":[]}}"#;
        let msg: BusMessage = serde_json::from_str(json).unwrap();
        match msg {
            BusMessage::Publish { event } => {
                assert_eq!(event.id, "e-1");
                assert_eq!(event.topic, "db::find");
                assert_eq!(event.get_str("db"), Some("shop"));
            }
            _ => panic!("Expected Publish"),
        }
    }

    #[test]
    fn test_ack_serialize() {
        let mut event = Event::new("db::remove", Map::new());
        event.id = "e-2".to_string();
        let json = serde_json::to_string(&BusResponse::Ack { event }).unwrap();
        assert_eq!(
            json,
            r#"{"type":"Ack","event":{"id":"e-2","topic":"db::remove","payload":{},"headers":[]}}"#
        );
    }

    #[test]
    fn test_error_deserialize() {
        let json = r#"{"type":"Error","message":"bad request"}"#;
        let response: BusResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            response,
            BusResponse::Error {
                message: "bad request".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_type_fails() {
        let result: Result<BusMessage, _> = serde_json::from_str(r#"{"type":"Shutdown"}"#);
        assert!(result.is_err());
    }
}
