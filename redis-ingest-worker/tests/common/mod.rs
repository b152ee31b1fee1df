//! Common test utilities for end-to-end tests
//!
//! This module provides shared infrastructure for the worker tests:
//! - In-memory broker and input setup
//! - Event collection with timeouts
//! - JSON payload helpers

#![allow(dead_code)]

use redis_ingest_shared::config::{DataType, InputConfig};
use redis_ingest_shared::events::Event;
use redis_ingest_shared::redis::MemoryBroker;
use redis_ingest_worker::decoder::output_queue;
use redis_ingest_worker::input::{RedisInput, WorkerSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long a test waits for an expected event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a test waits before concluding no event is coming
pub const QUIET_PERIOD: Duration = Duration::from_millis(100);

/// Running input over an in-memory broker
pub struct TestContext {
    pub broker: MemoryBroker,
    pub input: RedisInput,
    pub workers: WorkerSet,
    pub events: mpsc::UnboundedReceiver<Event>,
}

impl TestContext {
    /// Starts an input with fast reconnects
    pub fn start(config: InputConfig) -> Self {
        let broker = MemoryBroker::new();
        Self::start_with(broker, config)
    }

    /// Starts an input against an existing broker
    pub fn start_with(broker: MemoryBroker, mut config: InputConfig) -> Self {
        config.reconnect_delay_ms = 1;
        config.max_reconnect_delay_ms = 10;

        let input = RedisInput::new(config, Arc::new(broker.clone()));
        let (queue, events) = output_queue();
        let workers = input.run(queue);

        TestContext {
            broker,
            input,
            workers,
            events,
        }
    }

    /// Receives exactly `count` events
    pub async fn recv(&mut self, count: usize) -> Vec<Event> {
        let mut received = Vec::with_capacity(count);
        while received.len() < count {
            match tokio::time::timeout(EVENT_TIMEOUT, self.events.recv()).await {
                Ok(Some(event)) => received.push(event),
                Ok(None) => panic!("output queue closed after {} events", received.len()),
                Err(_) => panic!(
                    "timed out waiting for event {} of {}",
                    received.len() + 1,
                    count
                ),
            }
        }
        received
    }

    /// Asserts nothing else arrives for a short while
    pub async fn assert_quiet(&mut self) {
        if let Ok(Some(event)) = tokio::time::timeout(QUIET_PERIOD, self.events.recv()).await {
            panic!("unexpected event: {}", event.to_json());
        }
    }

    /// Stops the input and waits for its workers
    pub async fn stop(self) -> Vec<redis_ingest_worker::supervisor::StopReason> {
        self.input.stop();
        self.workers
            .shutdown(Duration::from_millis(200))
            .await
            .expect("workers failed")
    }
}

pub fn list_config(key: &str, batch_count: usize) -> InputConfig {
    let mut config = InputConfig::new(key, DataType::List);
    config.batch_count = batch_count;
    config
}

/// `{"n": <n>}` payloads for `range`
pub fn numbered(range: std::ops::Range<u64>) -> Vec<String> {
    range.map(|n| format!(r#"{{"n":{}}}"#, n)).collect()
}

/// The `n` field of each event
pub fn numbers(events: &[Event]) -> Vec<u64> {
    events
        .iter()
        .map(|event| {
            event
                .get("n")
                .and_then(serde_json::Value::as_u64)
                .expect("event without n")
        })
        .collect()
}
