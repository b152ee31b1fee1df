/// Events and payload codecs
///
/// This module provides the event model emitted by the input and the codecs
/// that turn raw Redis payloads into events:
/// - [`Event`] and its [`Origin`] metadata
/// - [`Decoration`] (`type`, `tags`, `add_field`) applied to every event
/// - [`Codec`] implementations for JSON and plain text
///
/// # Example
///
/// ```no_run
/// use redis_ingest_shared::config::CodecKind;
/// use redis_ingest_shared::events::{codec_for, Origin};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let codec = codec_for(CodecKind::Json);
/// let mut events = codec.decode(br#"{"message":"hello"}"#)?;
///
/// for event in &mut events {
///     event.origin = Some(Origin::list("logstash"));
///     println!("{}", event.to_json());
/// }
/// # Ok(())
/// # }
/// ```

pub mod codec;
pub mod event;

// Re-export common types
pub use codec::{codec_for, Codec, CodecError, JsonCodec, PlainCodec};
pub use event::{Decoration, Event, Origin};
