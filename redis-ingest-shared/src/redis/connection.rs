/// Broker connection seam
///
/// Everything the listeners need from Redis goes through [`BrokerConnection`],
/// so the supervisor and strategies can run against a real server
/// ([`RedisConnector`](super::client::RedisConnector)) or the in-memory broker
/// ([`MemoryBroker`](super::memory::MemoryBroker)) without change.
///
/// # Error taxonomy
///
/// | variant | meaning | handled by |
/// |---|---|---|
/// | `Connection` | unreachable, refused, dropped, timed out | supervisor reconnects |
/// | `ScriptMissing` | `NOSCRIPT`, server forgot the batch script | list listener reloads |
/// | `Capability` | server has no `SCRIPT` command | supervisor stops cleanly |
/// | `Command` | anything else | propagated to the caller |

use crate::redis::script::ScriptHandle;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use thiserror::Error;

/// Broker errors, already classified for the retry state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Broker unreachable or connection lost mid-operation
    #[error("Redis connection error: {0}")]
    Connection(String),

    /// Server no longer knows the batch script (restarted or flushed)
    #[error("Redis batch script missing: {0}")]
    ScriptMissing(String),

    /// Server lacks scripting support entirely (older than 2.6)
    #[error("Redis scripting unsupported: {0}")]
    Capability(String),

    /// Any other command failure
    #[error("Redis command error: {0}")]
    Command(String),
}

impl BrokerError {
    pub fn connection(msg: impl Into<String>) -> Self {
        BrokerError::Connection(msg.into())
    }

    pub fn command(msg: impl Into<String>) -> Self {
        BrokerError::Command(msg.into())
    }

    /// Whether reconnecting may fix this error
    pub fn is_connection(&self) -> bool {
        matches!(self, BrokerError::Connection(_))
    }
}

/// Subscription target for the pub/sub strategies
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionTarget {
    /// Exact channel name (SUBSCRIBE)
    Channel(String),

    /// Glob pattern (PSUBSCRIBE)
    Pattern(String),
}

impl SubscriptionTarget {
    /// Channel name or pattern
    pub fn name(&self) -> &str {
        match self {
            SubscriptionTarget::Channel(name) | SubscriptionTarget::Pattern(name) => name,
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, SubscriptionTarget::Pattern(_))
    }
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTarget::Channel(name) => write!(f, "channel {}", name),
            SubscriptionTarget::Pattern(pattern) => write!(f, "pattern {}", pattern),
        }
    }
}

/// A message delivered to a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    /// Channel the message was published on
    pub channel: String,

    /// Pattern that matched, for pattern subscriptions
    pub pattern: Option<String>,

    /// Raw payload, not yet decoded
    pub payload: Bytes,
}

/// Stream of messages for an active subscription
///
/// The stream ends (`None`) when the connection is lost.
pub type MessageStream<'a> = BoxStream<'a, PubSubMessage>;

/// A live session to the broker
///
/// Owned by exactly one worker; never shared.
#[async_trait]
pub trait BrokerConnection: Send {
    /// `BLPOP key 0`: blocks until an item is available
    ///
    /// `Ok(None)` means the server answered without an item.
    async fn blpop(&mut self, key: &str) -> Result<Option<Bytes>, BrokerError>;

    /// `SCRIPT LOAD body`
    async fn script_load(&mut self, body: &str) -> Result<ScriptHandle, BrokerError>;

    /// `EVALSHA handle 1 key count`
    async fn evalsha(
        &mut self,
        handle: &ScriptHandle,
        key: &str,
        count: usize,
    ) -> Result<Vec<Bytes>, BrokerError>;

    /// `SUBSCRIBE` or `PSUBSCRIBE` and return the message stream
    ///
    /// Returns the number of active subscriptions alongside the stream.
    async fn subscribe<'a>(
        &'a mut self,
        target: &SubscriptionTarget,
    ) -> Result<(usize, MessageStream<'a>), BrokerError>;

    /// `UNSUBSCRIBE` or `PUNSUBSCRIBE`
    ///
    /// Returns the number of subscriptions still active.
    async fn unsubscribe(&mut self, target: &SubscriptionTarget) -> Result<usize, BrokerError>;

    /// Releases the connection; no command is sent
    async fn close(&mut self);
}

/// Opens broker connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Connection` if the broker can't be reached
    /// within the configured timeout.
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError>;

    /// Human readable address for logs (credentials removed)
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_target_name() {
        let channel = SubscriptionTarget::Channel("alerts".to_string());
        let pattern = SubscriptionTarget::Pattern("alerts.*".to_string());

        assert_eq!(channel.name(), "alerts");
        assert_eq!(pattern.name(), "alerts.*");
        assert!(!channel.is_pattern());
        assert!(pattern.is_pattern());
        assert_eq!(pattern.to_string(), "pattern alerts.*");
    }

    #[test]
    fn test_is_connection() {
        assert!(BrokerError::connection("reset").is_connection());
        assert!(!BrokerError::command("WRONGTYPE").is_connection());
        assert!(!BrokerError::ScriptMissing("NOSCRIPT".into()).is_connection());
    }
}
