/// Redis input
///
/// Owns the configuration, the connector and the shutdown token for one
/// configured input, and spawns its workers.
///
/// # Workers
///
/// `threads` workers run side by side. Each has its own supervisor,
/// connection and script handle; they share the output queue and the
/// shutdown token.
///
/// # Shutdown
///
/// 1. **Stop**: [`RedisInput::stop`] cancels the token
/// 2. **Drain**: channel workers unsubscribe and return; list workers return
///    once their current pop completes
/// 3. **Abort**: [`WorkerSet::shutdown`] aborts workers still running after
///    the grace period (a list pop can block forever on an idle key)
///
/// # Example
///
/// ```no_run
/// use redis_ingest_worker::decoder::output_queue;
/// use redis_ingest_worker::input::RedisInput;
/// use redis_ingest_shared::config::InputConfig;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = InputConfig::load(None)?;
/// let input = RedisInput::from_config(config)?;
///
/// let (queue, mut events) = output_queue();
/// let workers = input.run(queue);
///
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         println!("{}", event.to_json());
///     }
/// });
///
/// input.stop();
/// workers.shutdown(Duration::from_secs(5)).await?;
/// # Ok(())
/// # }
/// ```

use crate::decoder::{DecodeFailures, EventDecoder, OutputQueue};
use crate::supervisor::{StopReason, Supervisor};
use redis_ingest_shared::config::InputConfig;
use redis_ingest_shared::redis::{BrokerError, Connector, RedisConnector};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Worker failures
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// A worker stopped on an unclassified broker error
    #[error("Worker {worker} failed: {source}")]
    Worker {
        worker: usize,
        #[source]
        source: BrokerError,
    },

    /// A worker panicked
    #[error("Worker {worker} panicked: {source}")]
    Panicked {
        worker: usize,
        #[source]
        source: JoinError,
    },
}

/// A configured Redis input
pub struct RedisInput {
    config: InputConfig,
    connector: Arc<dyn Connector>,
    shutdown: CancellationToken,
}

impl RedisInput {
    /// Creates an input over any connector
    pub fn new(config: InputConfig, connector: Arc<dyn Connector>) -> Self {
        RedisInput {
            config,
            connector,
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates an input backed by a real Redis server
    ///
    /// # Errors
    ///
    /// Returns an error if the connection parameters are invalid. No
    /// connection is attempted here.
    pub fn from_config(config: InputConfig) -> Result<Self, BrokerError> {
        let connector = RedisConnector::from_config(&config)?;
        Ok(RedisInput::new(config, Arc::new(connector)))
    }

    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    /// Token cancelled by [`RedisInput::stop`]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawns `threads` workers feeding `queue`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run(&self, queue: OutputQueue) -> WorkerSet {
        let decoder = EventDecoder::from_config(&self.config, queue);
        let failures = decoder.failures();

        tracing::info!(
            name = %self.config.name,
            key = %self.config.key,
            data_type = %self.config.data_type,
            address = %self.connector.describe(),
            batch_count = self.config.batch_count,
            threads = self.config.threads,
            "Registering Redis input"
        );

        let all_stopped = CancellationToken::new();
        let running = Arc::new(AtomicUsize::new(self.config.threads));

        let handles = (0..self.config.threads)
            .map(|worker| {
                let supervisor = Supervisor::new(
                    &self.config,
                    Arc::clone(&self.connector),
                    decoder.clone(),
                    self.shutdown.clone(),
                );
                let exit = WorkerExit {
                    running: Arc::clone(&running),
                    all_stopped: all_stopped.clone(),
                };
                let span = tracing::info_span!(
                    "redis_input",
                    name = %self.config.name,
                    worker = worker
                );

                let handle = tokio::spawn(
                    async move {
                        let _exit = exit;
                        supervisor.run().await
                    }
                    .instrument(span),
                );
                (worker, handle)
            })
            .collect();

        WorkerSet {
            handles,
            failures,
            all_stopped,
        }
    }

    /// Requests a graceful stop of every worker
    pub fn stop(&self) {
        tracing::info!(key = %self.config.key, "Stopping Redis input");
        self.shutdown.cancel();
    }
}

/// Marks a worker as finished when dropped, even on panic or abort
struct WorkerExit {
    running: Arc<AtomicUsize>,
    all_stopped: CancellationToken,
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        if self.running.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.all_stopped.cancel();
        }
    }
}

/// Handles to the running workers of one input
pub struct WorkerSet {
    handles: Vec<(usize, JoinHandle<Result<StopReason, BrokerError>>)>,
    failures: DecodeFailures,
    all_stopped: CancellationToken,
}

impl WorkerSet {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Payloads dropped so far because they failed to decode
    pub fn decode_failures(&self) -> u64 {
        self.failures.count()
    }

    /// Resolves once every worker has returned
    pub async fn stopped(&self) {
        self.all_stopped.cancelled().await;
    }

    /// Waits up to `grace` for the workers, then aborts the rest
    ///
    /// Aborted workers are reported as [`StopReason::Shutdown`].
    ///
    /// # Errors
    ///
    /// Returns the first worker failure; every worker is still joined or
    /// aborted first.
    pub async fn shutdown(self, grace: Duration) -> Result<Vec<StopReason>, InputError> {
        let deadline = Instant::now() + grace;
        let mut reasons = Vec::with_capacity(self.handles.len());
        let mut first_error = None;

        for (worker, mut handle) in self.handles {
            let joined = match timeout_at(deadline, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(
                        worker,
                        grace_secs = grace.as_secs_f64(),
                        "Worker still running after grace period, aborting"
                    );
                    handle.abort();
                    reasons.push(StopReason::Shutdown);
                    continue;
                }
            };

            match joined {
                Ok(Ok(reason)) => reasons.push(reason),
                Ok(Err(source)) => {
                    reasons.push(StopReason::Failed);
                    first_error.get_or_insert(InputError::Worker { worker, source });
                }
                Err(source) => {
                    reasons.push(StopReason::Failed);
                    first_error.get_or_insert(InputError::Panicked { worker, source });
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(reasons),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::output_queue;
    use redis_ingest_shared::config::DataType;
    use redis_ingest_shared::redis::MemoryBroker;

    fn input(broker: &MemoryBroker, key: &str, data_type: DataType, threads: usize) -> RedisInput {
        let mut config = InputConfig::new(key, data_type);
        config.threads = threads;
        RedisInput::new(config, Arc::new(broker.clone()))
    }

    #[tokio::test]
    async fn test_run_spawns_one_worker_per_thread() {
        let broker = MemoryBroker::new();
        let input = input(&broker, "alerts", DataType::Channel, 3);
        let (queue, _events) = output_queue();

        let workers = input.run(queue);
        assert_eq!(workers.len(), 3);

        broker.wait_for_subscribers(3).await;
        assert_eq!(broker.connects(), 3);

        input.stop();
        let reasons = workers.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(reasons, vec![StopReason::Shutdown; 3]);
    }

    #[tokio::test]
    async fn test_stopped_resolves_when_all_workers_return() {
        let broker = MemoryBroker::new();
        broker.disable_scripting();
        let input = input(&broker, "logstash", DataType::List, 2);
        let (queue, _events) = output_queue();

        let workers = input.run(queue);
        tokio::time::timeout(Duration::from_secs(5), workers.stopped())
            .await
            .unwrap();

        let reasons = workers.shutdown(Duration::ZERO).await.unwrap();
        assert_eq!(reasons, vec![StopReason::Unsupported; 2]);
    }

    #[tokio::test]
    async fn test_blocked_list_worker_is_aborted_after_grace() {
        let broker = MemoryBroker::new();
        let input = input(&broker, "idle", DataType::List, 1);
        let (queue, _events) = output_queue();

        let workers = input.run(queue);
        // Let the worker reach its blocking pop
        tokio::time::sleep(Duration::from_millis(20)).await;

        input.stop();
        let reasons = workers.shutdown(Duration::from_millis(50)).await.unwrap();
        assert_eq!(reasons, vec![StopReason::Shutdown]);
    }
}
