//! # Redis Ingest Worker Library
//!
//! This library consumes events from Redis (lists, channels or channel
//! patterns), decodes them and pushes them into an output queue.
//!
//! ## Modules
//!
//! - `decoder`: Payload decoding and the output queue
//! - `listeners`: List, channel and pattern channel strategies
//! - `supervisor`: Reconnect and shutdown state machine around a listener
//! - `input`: Configured input that spawns and stops workers
//!
//! ## Example
//!
//! ```no_run
//! use redis_ingest_worker::decoder::output_queue;
//! use redis_ingest_worker::input::RedisInput;
//! use redis_ingest_shared::config::{DataType, InputConfig};
//! use redis_ingest_shared::redis::MemoryBroker;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let broker = MemoryBroker::new();
//! broker.push("logstash", [r#"{"message":"hello"}"#]);
//!
//! let input = RedisInput::new(
//!     InputConfig::new("logstash", DataType::List),
//!     Arc::new(broker),
//! );
//! let (queue, mut events) = output_queue();
//! let _workers = input.run(queue);
//!
//! let event = events.recv().await.unwrap();
//! println!("{}", event.to_json());
//! # }
//! ```

pub mod decoder;
pub mod input;
pub mod listeners;
pub mod supervisor;
