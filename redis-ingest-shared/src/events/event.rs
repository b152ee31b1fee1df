/// Structured event produced by the input
///
/// An event is a JSON object of fields plus a timestamp and tags. Events
/// decoded from Redis also record where they came from (key, data type and,
/// for pub/sub, the channel and pattern), kept apart from the payload fields
/// so a payload can never clobber them.
///
/// # Output format
///
/// ```json
/// {
///   "@timestamp": "2025-01-04T12:00:00Z",
///   "message": "hello",
///   "tags": ["redis"],
///   "@metadata": {
///     "redis_key": "alerts.*",
///     "redis_data_type": "pattern_channel",
///     "redis_channel": "alerts.east",
///     "redis_pattern": "alerts.*"
///   }
/// }
/// ```

use crate::config::{DataType, InputConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// Where an event was read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Origin {
    /// Configured key (list name, channel or pattern)
    #[serde(rename = "redis_key")]
    pub key: String,

    #[serde(rename = "redis_data_type")]
    pub data_type: DataType,

    /// Channel the message was published on
    #[serde(rename = "redis_channel", skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Pattern that matched the channel
    #[serde(rename = "redis_pattern", skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl Origin {
    /// Origin for an item popped from a list
    pub fn list(key: impl Into<String>) -> Self {
        Origin {
            key: key.into(),
            data_type: DataType::List,
            channel: None,
            pattern: None,
        }
    }

    /// Origin for a pub/sub message
    pub fn pubsub(
        key: impl Into<String>,
        data_type: DataType,
        channel: impl Into<String>,
        pattern: Option<String>,
    ) -> Self {
        Origin {
            key: key.into(),
            data_type,
            channel: Some(channel.into()),
            pattern,
        }
    }
}

/// A decoded event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event time (`@timestamp`)
    pub timestamp: DateTime<Utc>,

    /// Payload fields
    pub fields: Map<String, JsonValue>,

    /// Tags, without duplicates
    pub tags: Vec<String>,

    /// Source of the event, stamped by the decoder
    pub origin: Option<Origin>,
}

impl Event {
    /// Creates an event stamped with the current time
    pub fn new(fields: Map<String, JsonValue>) -> Self {
        Event::with_timestamp(fields, Utc::now())
    }

    pub fn with_timestamp(fields: Map<String, JsonValue>, timestamp: DateTime<Utc>) -> Self {
        Event {
            timestamp,
            fields,
            tags: Vec::new(),
            origin: None,
        }
    }

    /// Creates an event with a single `message` field
    pub fn message(message: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("message".to_string(), JsonValue::String(message.into()));
        Event::new(fields)
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<JsonValue>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Adds a tag unless already present
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    /// Renders the event as one JSON object
    pub fn to_json(&self) -> JsonValue {
        let mut object = self.fields.clone();
        object.insert(
            "@timestamp".to_string(),
            JsonValue::String(self.timestamp.to_rfc3339()),
        );

        if !self.tags.is_empty() {
            object.insert(
                "tags".to_string(),
                JsonValue::Array(self.tags.iter().cloned().map(JsonValue::String).collect()),
            );
        }

        if let Some(origin) = &self.origin {
            if let Ok(metadata) = serde_json::to_value(origin) {
                object.insert("@metadata".to_string(), metadata);
            }
        }

        JsonValue::Object(object)
    }
}

/// Common fields applied to every decoded event
#[derive(Debug, Clone, Default)]
pub struct Decoration {
    /// `type` value for events that don't carry one
    pub event_type: Option<String>,

    /// Tags to append
    pub tags: Vec<String>,

    /// Fields to add when absent
    pub add_field: HashMap<String, String>,
}

impl Decoration {
    pub fn from_config(config: &InputConfig) -> Self {
        Decoration {
            event_type: config.event_type.clone(),
            tags: config.tags.clone(),
            add_field: config.add_field.clone(),
        }
    }

    /// Decorates the event in place; existing fields always win
    pub fn apply(&self, event: &mut Event) {
        if let Some(event_type) = &self.event_type {
            if !event.fields.contains_key("type") {
                event.set("type", event_type.clone());
            }
        }

        for tag in &self.tags {
            event.add_tag(tag.clone());
        }

        for (field, value) in &self.add_field {
            if !event.fields.contains_key(field) {
                event.set(field.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_tag_skips_duplicates() {
        let mut event = Event::message("hi");
        event.add_tag("redis");
        event.add_tag("redis");
        assert_eq!(event.tags, vec!["redis".to_string()]);
    }

    #[test]
    fn test_decoration_does_not_override() {
        let mut event = Event::message("hi");
        event.set("type", "original");
        event.set("env", "prod");

        let decoration = Decoration {
            event_type: Some("redis".to_string()),
            tags: vec!["a".to_string(), "b".to_string()],
            add_field: HashMap::from([
                ("env".to_string(), "dev".to_string()),
                ("region".to_string(), "eu".to_string()),
            ]),
        };
        decoration.apply(&mut event);

        assert_eq!(event.get("type"), Some(&json!("original")));
        assert_eq!(event.get("env"), Some(&json!("prod")));
        assert_eq!(event.get("region"), Some(&json!("eu")));
        assert_eq!(event.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_decoration_sets_missing_type() {
        let mut event = Event::message("hi");
        let decoration = Decoration {
            event_type: Some("redis".to_string()),
            ..Default::default()
        };
        decoration.apply(&mut event);
        assert_eq!(event.get("type"), Some(&json!("redis")));
    }

    #[test]
    fn test_to_json_includes_origin_as_metadata() {
        let mut event = Event::message("hi");
        event.add_tag("redis");
        event.origin = Some(Origin::pubsub(
            "alerts.*",
            DataType::PatternChannel,
            "alerts.east",
            Some("alerts.*".to_string()),
        ));

        let json = event.to_json();
        assert_eq!(json["message"], "hi");
        assert_eq!(json["tags"], json!(["redis"]));
        assert_eq!(json["@metadata"]["redis_channel"], "alerts.east");
        assert_eq!(json["@metadata"]["redis_data_type"], "pattern_channel");
        assert!(json["@timestamp"].is_string());
    }

    #[test]
    fn test_list_origin_has_no_channel() {
        let mut event = Event::message("hi");
        event.origin = Some(Origin::list("logstash"));

        let json = event.to_json();
        assert_eq!(json["@metadata"]["redis_key"], "logstash");
        assert!(json["@metadata"].get("redis_channel").is_none());
    }
}
