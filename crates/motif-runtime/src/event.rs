//! Event records of the per-user event log

use motif_core::{Properties, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn default_cardinality() -> u64 {
    1
}

/// One line of the event log.
///
/// Timestamps are unix seconds. `cardinality` is the dedup weight: a line
/// with cardinality `n` stands for `n` consecutive occurrences of the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "uid")]
    pub user_id: String,
    #[serde(rename = "ujt", default)]
    pub user_join_time: i64,
    /// Event name (Arc<str> so pattern indices can share it cheaply)
    #[serde(rename = "en")]
    pub event_name: Arc<str>,
    #[serde(rename = "et")]
    pub timestamp: i64,
    #[serde(rename = "ecd", default = "default_cardinality")]
    pub cardinality: u64,
    #[serde(rename = "epr", default)]
    pub event_properties: Properties,
    #[serde(rename = "upr", default)]
    pub user_properties: Properties,
}

impl Event {
    pub fn new(user_id: impl Into<String>, event_name: impl Into<Arc<str>>, timestamp: i64) -> Self {
        Self {
            user_id: user_id.into(),
            user_join_time: 0,
            event_name: event_name.into(),
            timestamp,
            cardinality: 1,
            event_properties: Properties::default(),
            user_properties: Properties::default(),
        }
    }

    pub fn with_join_time(mut self, ts: i64) -> Self {
        self.user_join_time = ts;
        self
    }

    pub fn with_cardinality(mut self, cardinality: u64) -> Self {
        self.cardinality = cardinality.max(1);
        self
    }

    pub fn with_event_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.event_properties.insert(key.into(), value.into());
        self
    }

    pub fn with_user_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.user_properties.insert(key.into(), value.into());
        self
    }

    /// Seconds elapsed since the user joined.
    pub fn since_join(&self) -> i64 {
        self.timestamp - self.user_join_time
    }

    /// Encode as a single log line (no trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_short_field_names() {
        let line = r#"{"uid":"u1","ujt":100,"en":"signup","et":160,"ecd":2,"epr":{"plan":"pro"},"upr":{"age":31}}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        assert_eq!(event.user_id, "u1");
        assert_eq!(&*event.event_name, "signup");
        assert_eq!(event.cardinality, 2);
        assert_eq!(event.since_join(), 60);
        assert_eq!(event.event_properties.get("plan"), Some(&Value::Str("pro".into())));
        assert_eq!(event.user_properties.get("age"), Some(&Value::Int(31)));
    }

    #[test]
    fn test_decode_defaults() {
        let event: Event = serde_json::from_str(r#"{"uid":"u1","en":"view","et":5}"#).unwrap();
        assert_eq!(event.cardinality, 1);
        assert_eq!(event.user_join_time, 0);
        assert!(event.event_properties.is_empty());
        assert!(event.user_properties.is_empty());
    }

    #[test]
    fn test_builder_and_line_encoding() {
        let event = Event::new("u9", "pay", 42)
            .with_join_time(2)
            .with_cardinality(0)
            .with_event_property("amount", 12.5)
            .with_user_property("country", "DE");
        assert_eq!(event.cardinality, 1);

        let decoded: Event = serde_json::from_str(&event.to_line()).unwrap();
        assert_eq!(decoded, event);
    }
}
