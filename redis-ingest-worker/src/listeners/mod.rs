/// Consumption strategies
///
/// One [`Listener`] per [`DataType`], chosen once when the worker starts:
///
/// | mode | listener | Redis commands |
/// |---|---|---|
/// | `list` | [`ListListener`] | `BLPOP`, then `EVALSHA` of the batch script |
/// | `channel` | [`ChannelListener`] | `SUBSCRIBE` / `UNSUBSCRIBE` |
/// | `pattern_channel` | [`PatternListener`] | `PSUBSCRIBE` / `PUNSUBSCRIBE` |
///
/// # Listener Contract
///
/// A listener:
/// 1. Uses the connection held by the [`ConnectionManager`]; it never connects
/// 2. Hands every payload to the [`EventDecoder`]
/// 3. Returns `Ok(())` when it has done one unit of work or was told to stop
/// 4. Returns broker errors unchanged so the supervisor can classify them
///
/// # Example
///
/// ```no_run
/// use redis_ingest_worker::listeners::listener_for;
/// use redis_ingest_shared::config::DataType;
///
/// let listener = listener_for(DataType::PatternChannel);
/// assert_eq!(listener.mode(), DataType::PatternChannel);
/// ```

mod channel;
mod list;
mod pattern;
mod subscription;

pub use channel::ChannelListener;
pub use list::{ListListener, MAX_SCRIPT_RELOADS};
pub use pattern::PatternListener;

use crate::decoder::{EventDecoder, QueueClosed};
use async_trait::async_trait;
use redis_ingest_shared::config::{DataType, InputConfig};
use redis_ingest_shared::redis::{BrokerError, ConnectionManager};
use tokio_util::sync::CancellationToken;

/// Listener errors
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Broker failure, classified for the supervisor
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Nobody consumes the output queue anymore
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),
}

/// Everything a listener needs besides the connection
#[derive(Clone)]
pub struct ListenerContext {
    /// List name, channel name or channel pattern
    pub key: String,

    /// Items fetched per round trip in list mode
    pub batch_count: usize,

    /// Payload sink
    pub decoder: EventDecoder,

    /// Cancelled when the input stops
    pub shutdown: CancellationToken,
}

impl ListenerContext {
    pub fn new(config: &InputConfig, decoder: EventDecoder, shutdown: CancellationToken) -> Self {
        ListenerContext {
            key: config.key.clone(),
            batch_count: config.batch_count,
            decoder,
            shutdown,
        }
    }
}

/// A consumption strategy
#[async_trait]
pub trait Listener: Send + Sync {
    /// Mode this listener implements
    fn mode(&self) -> DataType;

    /// Runs the strategy against the live connection
    ///
    /// List mode returns after one pop (and batch); channel modes block for
    /// the lifetime of the subscription.
    async fn run(
        &self,
        manager: &mut ConnectionManager,
        context: &ListenerContext,
    ) -> Result<(), ListenerError>;
}

/// Returns the listener for a mode
pub fn listener_for(data_type: DataType) -> Box<dyn Listener> {
    match data_type {
        DataType::List => Box::new(ListListener),
        DataType::Channel => Box::new(ChannelListener),
        DataType::PatternChannel => Box::new(PatternListener),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_for_each_mode() {
        for mode in [DataType::List, DataType::Channel, DataType::PatternChannel] {
            assert_eq!(listener_for(mode).mode(), mode);
        }
    }

    #[test]
    fn test_broker_error_converts() {
        let err: ListenerError = BrokerError::connection("reset").into();
        assert!(matches!(err, ListenerError::Broker(BrokerError::Connection(_))));
        assert_eq!(err.to_string(), "Redis connection error: reset");
    }
}
