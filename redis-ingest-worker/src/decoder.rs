/// Event decoder adapter and output queue
///
/// Listeners hand every raw payload to [`EventDecoder::queue_event`], which
/// runs the configured codec, decorates and stamps each resulting event and
/// appends it to the [`OutputQueue`].
///
/// A payload that fails to decode is logged and dropped; the listener keeps
/// going. The only error surfaced to the caller is a closed output queue,
/// which means nobody is consuming events anymore.
///
/// # Example
///
/// ```no_run
/// use redis_ingest_worker::decoder::{output_queue, EventDecoder};
/// use redis_ingest_shared::config::{DataType, InputConfig};
/// use redis_ingest_shared::events::Origin;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = InputConfig::new("logstash", DataType::List);
/// let (queue, mut events) = output_queue();
/// let decoder = EventDecoder::from_config(&config, queue);
///
/// decoder.queue_event(br#"{"message":"hello"}"#, &Origin::list("logstash"))?;
///
/// let event = events.recv().await.unwrap();
/// println!("{}", event.to_json());
/// # Ok(())
/// # }
/// ```

use redis_ingest_shared::config::InputConfig;
use redis_ingest_shared::events::{codec_for, Codec, Decoration, Event, Origin};
use std::error::Error as StdError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The consumer side of the output queue is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Output queue closed")]
pub struct QueueClosed;

/// Producer handle for the shared output queue
///
/// Unbounded: pushing never blocks. Clones feed the same queue.
#[derive(Debug, Clone)]
pub struct OutputQueue {
    tx: mpsc::UnboundedSender<Event>,
}

impl OutputQueue {
    /// Appends an event
    ///
    /// # Errors
    ///
    /// Returns `QueueClosed` if the receiver was dropped.
    pub fn push(&self, event: Event) -> Result<(), QueueClosed> {
        self.tx.send(event).map_err(|_| QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Creates the output queue
pub fn output_queue() -> (OutputQueue, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutputQueue { tx }, rx)
}

/// Count of payloads dropped because they failed to decode
///
/// Shared by every clone of the decoder that created it.
#[derive(Debug, Clone, Default)]
pub struct DecodeFailures(Arc<AtomicU64>);

impl DecodeFailures {
    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decodes payloads and feeds the output queue
#[derive(Clone)]
pub struct EventDecoder {
    codec: Arc<dyn Codec>,
    decoration: Decoration,
    queue: OutputQueue,
    failures: DecodeFailures,
}

impl EventDecoder {
    /// Creates a decoder
    ///
    /// # Arguments
    ///
    /// * `codec` - Payload codec
    /// * `decoration` - Fields and tags applied to every event
    /// * `queue` - Destination for decoded events
    pub fn new(codec: Arc<dyn Codec>, decoration: Decoration, queue: OutputQueue) -> Self {
        EventDecoder {
            codec,
            decoration,
            queue,
            failures: DecodeFailures::default(),
        }
    }

    /// Creates a decoder with the configured codec and decoration
    pub fn from_config(config: &InputConfig, queue: OutputQueue) -> Self {
        EventDecoder::new(
            codec_for(config.codec),
            Decoration::from_config(config),
            queue,
        )
    }

    /// Decodes one payload and enqueues the resulting events
    ///
    /// Returns the number of events enqueued; a payload that fails to decode
    /// is logged, counted and yields `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns `QueueClosed` if the output queue has no consumer.
    pub fn queue_event(&self, payload: &[u8], origin: &Origin) -> Result<usize, QueueClosed> {
        let events = match self.codec.decode(payload) {
            Ok(events) => events,
            Err(e) => {
                self.failures.record();
                tracing::error!(
                    codec = self.codec.name(),
                    key = %origin.key,
                    channel = origin.channel.as_deref(),
                    payload = %String::from_utf8_lossy(payload),
                    error = %e,
                    cause = %source_chain(&e),
                    "Failed to decode Redis payload, dropping it"
                );
                return Ok(0);
            }
        };

        let mut queued = 0;
        for mut event in events {
            self.decoration.apply(&mut event);
            event.origin = Some(origin.clone());
            self.queue.push(event)?;
            queued += 1;
        }

        Ok(queued)
    }

    /// Shared counter of dropped payloads
    pub fn failures(&self) -> DecodeFailures {
        self.failures.clone()
    }
}

/// Renders `err`'s causes as `a: b: c`
fn source_chain(err: &dyn StdError) -> String {
    let mut causes = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    causes.join(": ")
}
