// =============================================================================
// Event — the single unit of communication on the bus
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// An immutable fact published on the event bus.
///
/// `event_id` is freshly generated per instance and unique across a process
/// run. `data` is an opaque, JSON-serialisable key→value mapping — an empty
/// map is legal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub subject: String,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
}

impl Event {
    /// Construct a new event with a fresh UUID and the current wall-clock
    /// timestamp.
    pub fn new(subject: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            subject: subject.into(),
            data,
            timestamp: Utc::now(),
            source: None,
        }
    }

    /// Same as [`Event::new`] but tags the event with a module `source`.
    pub fn with_source(
        subject: impl Into<String>,
        data: Map<String, Value>,
        source: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(subject, data);
        event.source = Some(source.into());
        event
    }

    /// Convenience constructor from any `Serialize` payload. Panics only if
    /// the value does not serialise to a JSON object, which would be a
    /// programmer error at the call site.
    pub fn from_payload(subject: impl Into<String>, payload: impl Serialize) -> Self {
        let value = serde_json::to_value(payload).expect("event payload must serialise");
        let data = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self::new(subject, data)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_unique() {
        let a = Event::new("x", Map::new());
        let b = Event::new("x", Map::new());
        assert_ne!(a.event_id, b.event_id);
        assert!(!a.event_id.is_empty());
    }

    #[test]
    fn empty_data_is_legal() {
        let e = Event::new("order.created", Map::new());
        assert_eq!(e.subject, "order.created");
        assert!(e.data.is_empty());
    }
}
