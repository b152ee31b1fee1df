/// Redis implementation of the broker seam
///
/// This module provides the production connector:
/// - Connection setup from host/port/db/password with a connect timeout
/// - Classification of `redis::RedisError` into [`BrokerError`]
/// - A single owned connection that switches into subscriber mode on demand
///
/// Unlike a pooled `ConnectionManager`, each worker owns one plain async
/// connection: `BLPOP 0` and `SUBSCRIBE` hold the connection for as long as
/// they block, and reconnects are driven explicitly by the supervisor.
///
/// # Example
///
/// ```no_run
/// use redis_ingest_shared::config::{DataType, InputConfig};
/// use redis_ingest_shared::redis::{Connector, RedisConnector};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = InputConfig::new("logstash", DataType::List);
/// let connector = RedisConnector::from_config(&config)?;
///
/// let mut conn = connector.connect().await?;
/// let item = conn.blpop("logstash").await?;
/// println!("popped: {:?}", item);
/// # Ok(())
/// # }
/// ```

use crate::config::InputConfig;
use crate::redis::connection::{
    BrokerConnection, BrokerError, Connector, MessageStream, PubSubMessage, SubscriptionTarget,
};
use crate::redis::script::ScriptHandle;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::{aio, Client, ConnectionAddr, ConnectionInfo, ErrorKind, RedisConnectionInfo, RedisError};
use std::time::Duration;

impl From<RedisError> for BrokerError {
    fn from(err: RedisError) -> Self {
        if err.kind() == ErrorKind::NoScriptError {
            BrokerError::ScriptMissing(err.to_string())
        } else if is_connection_failure(&err) {
            BrokerError::Connection(err.to_string())
        } else {
            BrokerError::Command(err.to_string())
        }
    }
}

fn is_connection_failure(err: &RedisError) -> bool {
    err.kind() == ErrorKind::IoError
        || err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
}

/// Classifies a failed `SCRIPT LOAD`
///
/// Servers older than 2.6 answer `ERR unknown command 'script'`.
fn script_load_error(err: RedisError) -> BrokerError {
    if err.kind() == ErrorKind::ResponseError
        && err.to_string().to_ascii_lowercase().contains("unknown command")
    {
        BrokerError::Capability(err.to_string())
    } else {
        BrokerError::from(err)
    }
}

/// Opens connections to a Redis server
#[derive(Clone)]
pub struct RedisConnector {
    client: Client,
    connect_timeout: Duration,
    address: String,
}

impl RedisConnector {
    /// Creates a connector from the input configuration
    ///
    /// No network I/O happens until [`Connector::connect`].
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Command` if the connection parameters are rejected.
    pub fn from_config(config: &InputConfig) -> Result<Self, BrokerError> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
            redis: RedisConnectionInfo {
                db: config.db,
                password: config.password.as_ref().map(|p| p.expose().to_string()),
                ..Default::default()
            },
        };

        let client = Client::open(info)
            .map_err(|e| BrokerError::command(format!("Invalid Redis settings: {}", e)))?;

        Ok(Self {
            client,
            connect_timeout: config.connect_timeout(),
            address: describe_address(config),
        })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        let conn = tokio::time::timeout(self.connect_timeout, self.client.get_async_connection())
            .await
            .map_err(|_| {
                BrokerError::connection(format!(
                    "connect to {} timed out after {:?}",
                    self.address, self.connect_timeout
                ))
            })??;

        tracing::info!(address = %self.address, "Connected to Redis");

        Ok(Box::new(RedisConnection::new(conn)))
    }

    fn describe(&self) -> String {
        self.address.clone()
    }
}

/// `redis://host:port/db`, never including credentials
fn describe_address(config: &InputConfig) -> String {
    let auth = if config.password.is_some() { "***@" } else { "" };
    format!("redis://{}{}:{}/{}", auth, config.host, config.port, config.db)
}

enum Link {
    Commands(aio::Connection),
    Subscribed(aio::PubSub),
    Closed,
}

/// A single Redis connection owned by one worker
pub struct RedisConnection {
    link: Link,
    subscriptions: usize,
}

impl RedisConnection {
    fn new(conn: aio::Connection) -> Self {
        Self {
            link: Link::Commands(conn),
            subscriptions: 0,
        }
    }

    fn commands(&mut self) -> Result<&mut aio::Connection, BrokerError> {
        match &mut self.link {
            Link::Commands(conn) => Ok(conn),
            Link::Subscribed(_) => Err(BrokerError::command(
                "connection is in subscriber mode",
            )),
            Link::Closed => Err(BrokerError::connection("connection closed")),
        }
    }

    /// Switches into subscriber mode on first use
    fn enter_pubsub(&mut self) -> Result<(), BrokerError> {
        match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Commands(conn) => {
                self.link = Link::Subscribed(conn.into_pubsub());
                Ok(())
            }
            Link::Subscribed(pubsub) => {
                self.link = Link::Subscribed(pubsub);
                Ok(())
            }
            Link::Closed => Err(BrokerError::connection("connection closed")),
        }
    }

    fn pubsub(&mut self) -> Result<&mut aio::PubSub, BrokerError> {
        match &mut self.link {
            Link::Subscribed(pubsub) => Ok(pubsub),
            Link::Commands(_) => Err(BrokerError::command("connection is not subscribed")),
            Link::Closed => Err(BrokerError::connection("connection closed")),
        }
    }
}

#[async_trait]
impl BrokerConnection for RedisConnection {
    async fn blpop(&mut self, key: &str) -> Result<Option<Bytes>, BrokerError> {
        let conn = self.commands()?;

        // BLPOP replies with [key, item]; only the item matters
        let reply: Option<(Vec<u8>, Vec<u8>)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(0)
            .query_async(conn)
            .await?;

        Ok(reply.map(|(_, item)| Bytes::from(item)))
    }

    async fn script_load(&mut self, body: &str) -> Result<ScriptHandle, BrokerError> {
        let conn = self.commands()?;

        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(body)
            .query_async(conn)
            .await
            .map_err(script_load_error)?;

        Ok(ScriptHandle::new(sha))
    }

    async fn evalsha(
        &mut self,
        handle: &ScriptHandle,
        key: &str,
        count: usize,
    ) -> Result<Vec<Bytes>, BrokerError> {
        let conn = self.commands()?;

        let items: Vec<Vec<u8>> = redis::cmd("EVALSHA")
            .arg(handle.as_str())
            .arg(1)
            .arg(key)
            .arg(count)
            .query_async(conn)
            .await?;

        Ok(items.into_iter().map(Bytes::from).collect())
    }

    async fn subscribe<'a>(
        &'a mut self,
        target: &SubscriptionTarget,
    ) -> Result<(usize, MessageStream<'a>), BrokerError> {
        self.enter_pubsub()?;

        {
            let pubsub = self.pubsub()?;
            match target {
                SubscriptionTarget::Channel(channel) => pubsub.subscribe(channel.as_str()).await?,
                SubscriptionTarget::Pattern(pattern) => pubsub.psubscribe(pattern.as_str()).await?,
            }
        }
        self.subscriptions += 1;
        let count = self.subscriptions;

        let pubsub = self.pubsub()?;
        let stream = pubsub
            .on_message()
            .map(|msg| PubSubMessage {
                channel: msg.get_channel_name().to_string(),
                pattern: if msg.from_pattern() {
                    msg.get_pattern::<String>().ok()
                } else {
                    None
                },
                payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
            })
            .boxed();

        Ok((count, stream))
    }

    async fn unsubscribe(&mut self, target: &SubscriptionTarget) -> Result<usize, BrokerError> {
        let pubsub = self.pubsub()?;
        match target {
            SubscriptionTarget::Channel(channel) => pubsub.unsubscribe(channel.as_str()).await?,
            SubscriptionTarget::Pattern(pattern) => pubsub.punsubscribe(pattern.as_str()).await?,
        }

        self.subscriptions = self.subscriptions.saturating_sub(1);
        Ok(self.subscriptions)
    }

    async fn close(&mut self) {
        self.link = Link::Closed;
        self.subscriptions = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataType, Password};

    #[test]
    fn test_noscript_is_script_missing() {
        let err = RedisError::from((ErrorKind::NoScriptError, "No matching script"));
        assert!(matches!(BrokerError::from(err), BrokerError::ScriptMissing(_)));
    }

    #[test]
    fn test_io_error_is_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = RedisError::from(io);
        assert!(BrokerError::from(err).is_connection());
    }

    #[test]
    fn test_refused_is_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = RedisError::from(io);
        assert!(BrokerError::from(err).is_connection());
    }

    fn unknown_command(detail: &str) -> RedisError {
        RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            detail.to_string(),
        ))
    }

    #[test]
    fn test_unknown_script_command_on_load_is_capability() {
        let err = script_load_error(unknown_command("unknown command 'script'"));
        assert!(matches!(err, BrokerError::Capability(_)));
    }

    #[test]
    fn test_other_load_failure_keeps_its_class() {
        let err = script_load_error(RedisError::from((
            ErrorKind::TypeError,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        )));
        assert!(matches!(err, BrokerError::Command(_)));
    }

    #[test]
    fn test_unknown_command_outside_load_is_command() {
        let err = BrokerError::from(unknown_command("unknown command 'script'"));
        assert!(matches!(err, BrokerError::Command(_)));

        let err = BrokerError::from(unknown_command(
            "unknown command 'BLPOP', with args beginning with: 'script-events' '0' ",
        ));
        assert!(matches!(err, BrokerError::Command(_)));
    }

    #[test]
    fn test_other_response_is_command() {
        let err = RedisError::from((
            ErrorKind::TypeError,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        ));
        assert!(matches!(BrokerError::from(err), BrokerError::Command(_)));
    }

    #[test]
    fn test_unknown_other_command_is_command() {
        let err = RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            "unknown command 'blpop'".to_string(),
        ));
        assert!(matches!(BrokerError::from(err), BrokerError::Command(_)));
    }

    #[test]
    fn test_describe_hides_password() {
        let mut config = InputConfig::new("logstash", DataType::List);
        config.password = Some(Password::new("hunter2"));
        config.db = 3;

        let connector = RedisConnector::from_config(&config).unwrap();
        let described = connector.describe();

        assert_eq!(described, "redis://***@127.0.0.1:6379/3");
        assert!(!described.contains("hunter2"));
    }

    #[test]
    fn test_describe_without_password() {
        let config = InputConfig::new("logstash", DataType::List);
        let connector = RedisConnector::from_config(&config).unwrap();
        assert_eq!(connector.describe(), "redis://127.0.0.1:6379/0");
    }
}
