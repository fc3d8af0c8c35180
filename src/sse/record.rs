use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_EVENT_TYPE: &str = "message";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventRecord {
    pub id: Option<String>,
    #[serde(rename = "event")]
    pub event_type: Option<String>,
    pub data: Option<String>,
    #[serde(rename = "retry")]
    pub retry_ms: Option<u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub raw_fields: BTreeMap<String, Vec<String>>,
}

impl EventRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_retry_ms(mut self, retry_ms: u64) -> Self {
        self.retry_ms = Some(retry_ms);
        self
    }

    // `id`, `event` and `retry` keep their last value; `data` lines join with `\n`.
    pub(crate) fn from_fields(raw_fields: BTreeMap<String, Vec<String>>) -> Option<Self> {
        if raw_fields.is_empty() {
            return None;
        }
        let last = |name: &str| {
            raw_fields
                .get(name)
                .and_then(|values| values.last())
                .cloned()
        };
        let id = last("id");
        let event_type = last("event");
        let retry_ms = last("retry").and_then(|value| value.trim().parse::<u64>().ok());
        let data = raw_fields.get("data").map(|values| values.join("\n"));
        Some(Self {
            id,
            event_type,
            data,
            retry_ms,
            raw_fields,
        })
    }

    pub fn event_type(&self) -> &str {
        self.event_type.as_deref().unwrap_or(DEFAULT_EVENT_TYPE)
    }

    pub fn data(&self) -> &str {
        self.data.as_deref().unwrap_or_default()
    }

    pub fn is_keep_alive(&self) -> bool {
        self.data
            .as_deref()
            .is_none_or(|data| data.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::EventRecord;

    #[test]
    fn default_event_type_is_message() {
        let record = EventRecord::message("hello");
        assert_eq!(record.event_type(), "message");
        assert_eq!(record.with_event_type("update").event_type(), "update");
    }

    #[test]
    fn blank_or_missing_data_is_keep_alive() {
        assert!(EventRecord::new().is_keep_alive());
        assert!(EventRecord::message("  \n").is_keep_alive());
        assert!(EventRecord::new().with_retry_ms(5000).is_keep_alive());
        assert!(!EventRecord::message("x").is_keep_alive());
    }

    #[test]
    fn records_deserialize_from_fixture_json() {
        let record: EventRecord =
            serde_json::from_str(r#"{"id":"7","event":"tick","data":"42","retry":1500}"#)
                .expect("fixture should deserialize");
        assert_eq!(record.id.as_deref(), Some("7"));
        assert_eq!(record.event_type(), "tick");
        assert_eq!(record.retry_ms, Some(1500));
    }
}
