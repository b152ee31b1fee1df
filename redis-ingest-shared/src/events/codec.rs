/// Payload codecs
///
/// A codec turns one raw payload into zero or more [`Event`]s. Codecs are pure
/// and stateless; error handling (log and drop) belongs to the caller.
///
/// # Codecs
///
/// - **json** (default): an object is one event, an array of objects is one
///   event per element. `@timestamp` (RFC 3339) sets the event time and a
///   `tags` array becomes the event's tags.
/// - **plain**: the UTF-8 payload becomes the `message` field.

use crate::config::CodecKind;
use crate::events::event::Event;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;

/// Decode errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Payload isn't valid JSON
    #[error("Invalid JSON payload")]
    Json(#[from] serde_json::Error),

    /// Payload isn't valid UTF-8
    #[error("Invalid UTF-8 payload")]
    Utf8(#[from] std::str::Utf8Error),

    /// Valid JSON that isn't an object or an array of objects
    #[error("Unexpected payload shape: {0}")]
    UnexpectedShape(String),

    /// `@timestamp` couldn't be parsed
    #[error("Invalid @timestamp {value:?}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Byte payload to events
pub trait Codec: Send + Sync {
    /// Codec name for logs
    fn name(&self) -> &'static str;

    /// Decodes one payload
    fn decode(&self, payload: &[u8]) -> Result<Vec<Event>, CodecError>;
}

/// Returns the codec for a configured kind
pub fn codec_for(kind: CodecKind) -> Arc<dyn Codec> {
    match kind {
        CodecKind::Json => Arc::new(JsonCodec),
        CodecKind::Plain => Arc::new(PlainCodec),
    }
}

/// JSON object (or array of objects) codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<Event>, CodecError> {
        match serde_json::from_slice::<JsonValue>(payload)? {
            JsonValue::Object(fields) => Ok(vec![event_from_object(fields)?]),
            JsonValue::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    JsonValue::Object(fields) => event_from_object(fields),
                    other => Err(CodecError::UnexpectedShape(format!(
                        "array element is {}, expected an object",
                        json_kind(&other)
                    ))),
                })
                .collect(),
            other => Err(CodecError::UnexpectedShape(format!(
                "payload is {}, expected an object",
                json_kind(&other)
            ))),
        }
    }
}

fn event_from_object(mut fields: Map<String, JsonValue>) -> Result<Event, CodecError> {
    let timestamp = match fields.remove("@timestamp") {
        Some(JsonValue::String(value)) => DateTime::parse_from_rfc3339(&value)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|source| CodecError::Timestamp { value, source })?,
        Some(other) => {
            return Err(CodecError::UnexpectedShape(format!(
                "@timestamp is {}, expected a string",
                json_kind(&other)
            )))
        }
        None => Utc::now(),
    };

    let tags = match fields.remove("tags") {
        Some(JsonValue::Array(values)) if values.iter().all(JsonValue::is_string) => values
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(other) => {
            // Not a list of strings; keep it as an ordinary field
            fields.insert("tags".to_string(), other);
            Vec::new()
        }
        None => Vec::new(),
    };

    let mut event = Event::with_timestamp(fields, timestamp);
    for tag in tags {
        event.add_tag(tag);
    }
    Ok(event)
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// One `message` field per payload
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCodec;

impl Codec for PlainCodec {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<Event>, CodecError> {
        let text = std::str::from_utf8(payload)?;
        Ok(vec![Event::message(text)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::error::Error as _;

    #[test]
    fn test_json_object_is_one_event() {
        let events = JsonCodec.decode(br#"{"message":"hello","level":"info"}"#).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get("message"), Some(&json!("hello")));
        assert_eq!(events[0].get("level"), Some(&json!("info")));
    }

    #[test]
    fn test_json_array_is_many_events() {
        let events = JsonCodec.decode(br#"[{"n":1},{"n":2},{"n":3}]"#).unwrap();
        let ns: Vec<_> = events.iter().map(|e| e.get("n").cloned()).collect();
        assert_eq!(ns, vec![Some(json!(1)), Some(json!(2)), Some(json!(3))]);
    }

    #[test]
    fn test_json_empty_array_is_no_events() {
        assert!(JsonCodec.decode(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_json_timestamp_and_tags_are_lifted() {
        let events = JsonCodec
            .decode(br#"{"@timestamp":"2025-01-04T12:00:00Z","tags":["a","b"],"m":1}"#)
            .unwrap();
        let event = &events[0];

        assert_eq!(event.timestamp.to_rfc3339(), "2025-01-04T12:00:00+00:00");
        assert_eq!(event.tags, vec!["a".to_string(), "b".to_string()]);
        assert!(event.get("@timestamp").is_none());
        assert!(event.get("tags").is_none());
    }

    #[test]
    fn test_json_non_string_tags_stay_a_field() {
        let events = JsonCodec.decode(br#"{"tags":{"k":"v"}}"#).unwrap();
        assert!(events[0].tags.is_empty());
        assert_eq!(events[0].get("tags"), Some(&json!({"k": "v"})));
    }

    #[test]
    fn test_json_malformed_is_error() {
        let err = JsonCodec.decode(b"{not json").unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn test_json_scalar_is_error() {
        let err = JsonCodec.decode(b"42").unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedShape(_)));
    }

    #[test]
    fn test_json_bad_timestamp_has_source() {
        let err = JsonCodec.decode(br#"{"@timestamp":"yesterday"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Timestamp { .. }));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_plain_codec() {
        let events = PlainCodec.decode(b"hello world").unwrap();
        assert_eq!(events[0].get("message"), Some(&json!("hello world")));
    }

    #[test]
    fn test_plain_codec_rejects_invalid_utf8() {
        let err = PlainCodec.decode(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, CodecError::Utf8(_)));
        assert_eq!(err.to_string(), "Invalid UTF-8 payload");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_codec_for() {
        assert_eq!(codec_for(CodecKind::Json).name(), "json");
        assert_eq!(codec_for(CodecKind::Plain).name(), "plain");
    }
}
