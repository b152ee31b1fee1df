/// Redis integration for the input
///
/// This module provides everything the listeners need from the broker:
/// - A connection seam ([`BrokerConnection`], [`Connector`]) with classified errors
/// - The production Redis implementation ([`RedisConnector`])
/// - An in-memory implementation for tests and demos ([`MemoryBroker`])
/// - The connection manager that owns one connection and its batch script handle
/// - The server-side batch pop script
///
/// # Architecture
///
/// ```text
/// ┌────────────────────┐   connect()    ┌───────────────────┐
/// │ ConnectionManager  │ ─────────────> │ Connector         │
/// │  connection        │                │  RedisConnector   │
/// │  script handle     │ <───────────── │  MemoryBroker     │
/// └────────────────────┘ Box<dyn BrokerConnection>
///          │
///          │ BLPOP / EVALSHA / SUBSCRIBE / PSUBSCRIBE
///          ▼
///       Redis
/// ```

pub mod client;
pub mod connection;
pub mod manager;
pub mod memory;
pub mod script;

// Re-export common types for convenience
pub use client::{RedisConnection, RedisConnector};
pub use connection::{
    BrokerConnection, BrokerError, Connector, MessageStream, PubSubMessage, SubscriptionTarget,
};
pub use manager::ConnectionManager;
pub use memory::{glob_match, Fault, MemoryBroker, Op};
pub use script::{ScriptHandle, BATCH_POP_SCRIPT};
