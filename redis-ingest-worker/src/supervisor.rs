/// Listener supervisor
///
/// The outer loop of a worker. It keeps a connection alive, dispatches to the
/// configured [`Listener`] and decides, from the class of each error, whether
/// to reconnect, stop cleanly or give up.
///
/// # State Machine
///
/// ```text
///                 connect failed (backoff)
///                  ┌──────────┐
///                  v          │
///   ┌─────────> Disconnected ─┘
///   │               │ connect ok
///   │ connection    v
///   │ lost       Connected <────────┐
///   │               │ dispatch      │ listener returned
///   │               v               │
///   └────────────  Running ─────────┘
///
///   capability error        -> Stopped(Unsupported)  run() returns Ok
///   other broker error      -> Stopped(Failed)       run() returns Err
///   output queue closed     -> Stopped(QueueClosed)
///   shutdown at loop head   -> Stopped(Shutdown)
/// ```
///
/// Transitions are computed by the pure [`ListenerState::on`]. Once stopped,
/// the supervisor closes its connection locally and sends nothing else to
/// the broker.
///
/// # Reconnect Backoff
///
/// Consecutive connect failures double the pause from `reconnect_delay_ms` up
/// to `max_reconnect_delay_ms`. A successful connect resets it. A connection
/// lost while running pauses for the base delay.
///
/// # Example
///
/// ```no_run
/// use redis_ingest_worker::decoder::{output_queue, EventDecoder};
/// use redis_ingest_worker::supervisor::Supervisor;
/// use redis_ingest_shared::config::{DataType, InputConfig};
/// use redis_ingest_shared::redis::MemoryBroker;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = InputConfig::new("logstash", DataType::List);
/// let (queue, _events) = output_queue();
/// let decoder = EventDecoder::from_config(&config, queue);
///
/// let supervisor = Supervisor::new(
///     &config,
///     Arc::new(MemoryBroker::new()),
///     decoder,
///     CancellationToken::new(),
/// );
/// let reason = supervisor.run().await?;
/// println!("Stopped: {:?}", reason);
/// # Ok(())
/// # }
/// ```

use crate::decoder::EventDecoder;
use crate::listeners::{listener_for, Listener, ListenerContext, ListenerError};
use redis_ingest_shared::config::InputConfig;
use redis_ingest_shared::redis::{BrokerError, ConnectionManager, Connector};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Why a supervisor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested
    Shutdown,

    /// The server can't run the batch script
    Unsupported,

    /// Nobody consumes the output queue
    QueueClosed,

    /// Unclassified broker error; returned to the caller as `Err`
    Failed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StopReason::Shutdown => "shutdown",
            StopReason::Unsupported => "unsupported",
            StopReason::QueueClosed => "queue_closed",
            StopReason::Failed => "failed",
        };
        f.write_str(reason)
    }
}

/// Supervisor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Disconnected,
    Connected,
    Running,
    Stopped(StopReason),
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    ConnectSucceeded,
    ConnectFailed,
    Dispatched,
    ListenerReturned,
    ConnectionLost,
    CapabilityError,
    BrokerFailed,
    QueueClosed,
    ShutdownRequested,
}

impl ListenerState {
    /// Next state after `event`
    ///
    /// `Stopped` is terminal. Events that don't apply to the current state
    /// leave it unchanged.
    pub fn on(self, event: ListenerEvent) -> ListenerState {
        use ListenerEvent as E;
        use ListenerState as S;

        match (self, event) {
            (S::Stopped(reason), _) => S::Stopped(reason),
            (_, E::ShutdownRequested) => S::Stopped(StopReason::Shutdown),

            (S::Disconnected, E::ConnectSucceeded) => S::Connected,
            (S::Disconnected, E::ConnectFailed) => S::Disconnected,
            (S::Connected, E::Dispatched) => S::Running,
            (S::Running, E::ListenerReturned) => S::Connected,
            (S::Running, E::ConnectionLost) => S::Disconnected,

            (S::Running | S::Disconnected, E::CapabilityError) => {
                S::Stopped(StopReason::Unsupported)
            }
            (S::Running | S::Disconnected, E::BrokerFailed) => S::Stopped(StopReason::Failed),
            (S::Running, E::QueueClosed) => S::Stopped(StopReason::QueueClosed),

            (state, _) => state,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ListenerState::Stopped(_))
    }
}

/// Exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff {
            base,
            max: max.max(base),
            current: base,
        }
    }

    /// Delay to wait now; doubles the following one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    pub fn base(&self) -> Duration {
        self.base
    }
}

/// Runs one worker until it stops
pub struct Supervisor {
    manager: ConnectionManager,
    listener: Box<dyn Listener>,
    context: ListenerContext,
    backoff: Backoff,
    state: ListenerState,
}

impl Supervisor {
    /// Creates a supervisor; nothing is connected until [`Supervisor::run`]
    ///
    /// # Arguments
    ///
    /// * `config` - Input configuration (mode, key, batch size, delays)
    /// * `connector` - Opens broker connections
    /// * `decoder` - Destination for payloads
    /// * `shutdown` - Cancelled to stop the worker
    pub fn new(
        config: &InputConfig,
        connector: Arc<dyn Connector>,
        decoder: EventDecoder,
        shutdown: CancellationToken,
    ) -> Self {
        Supervisor {
            manager: ConnectionManager::new(connector, config.uses_batch_script()),
            listener: listener_for(config.data_type),
            context: ListenerContext::new(config, decoder, shutdown),
            backoff: Backoff::new(config.reconnect_delay(), config.max_reconnect_delay()),
            state: ListenerState::Disconnected,
        }
    }

    /// Runs until stopped
    ///
    /// Returns the stop reason, or the unclassified broker error that ended
    /// the loop. The connection is closed either way.
    pub async fn run(mut self) -> Result<StopReason, BrokerError> {
        tracing::info!(
            mode = %self.listener.mode(),
            key = %self.context.key,
            address = %self.manager.describe(),
            "Redis listener starting"
        );

        let outcome = self.run_loop().await;
        self.manager.close().await;

        match &outcome {
            Ok(reason) => tracing::info!(reason = %reason, "Redis listener stopped"),
            Err(e) => tracing::error!(error = %e, "Redis listener failed"),
        }
        outcome
    }

    async fn run_loop(&mut self) -> Result<StopReason, BrokerError> {
        loop {
            if self.context.shutdown.is_cancelled() {
                self.advance(ListenerEvent::ShutdownRequested);
            }

            match self.state {
                ListenerState::Stopped(reason) => return Ok(reason),
                ListenerState::Disconnected => self.connect().await?,
                ListenerState::Connected => self.advance(ListenerEvent::Dispatched),
                ListenerState::Running => self.dispatch().await?,
            }
        }
    }

    async fn connect(&mut self) -> Result<(), BrokerError> {
        match self.manager.connect().await {
            Ok(()) => {
                self.backoff.reset();
                tracing::debug!(address = %self.manager.describe(), "Redis connection ready");
                self.advance(ListenerEvent::ConnectSucceeded);
            }
            Err(BrokerError::Connection(reason)) => {
                let delay = self.backoff.next_delay();
                tracing::warn!(
                    address = %self.manager.describe(),
                    error = %reason,
                    retry_in_ms = delay.as_millis() as u64,
                    "Redis connection failed, retrying"
                );
                self.advance(ListenerEvent::ConnectFailed);
                pause(&self.context.shutdown, delay).await;
            }
            Err(BrokerError::Capability(reason)) => self.unsupported(&reason),
            Err(e) => {
                self.advance(ListenerEvent::BrokerFailed);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self) -> Result<(), BrokerError> {
        match self.listener.run(&mut self.manager, &self.context).await {
            Ok(()) => self.advance(ListenerEvent::ListenerReturned),
            Err(ListenerError::Broker(BrokerError::Connection(reason))) => {
                let delay = self.backoff.base();
                tracing::warn!(
                    address = %self.manager.describe(),
                    error = %reason,
                    retry_in_ms = delay.as_millis() as u64,
                    "Redis connection lost, reconnecting"
                );
                self.manager.disconnect();
                self.advance(ListenerEvent::ConnectionLost);
                pause(&self.context.shutdown, delay).await;
            }
            Err(ListenerError::Broker(BrokerError::Capability(reason))) => {
                self.unsupported(&reason)
            }
            Err(ListenerError::QueueClosed(_)) => {
                tracing::warn!("Output queue closed, stopping Redis listener");
                self.advance(ListenerEvent::QueueClosed);
            }
            Err(ListenerError::Broker(e)) => {
                self.advance(ListenerEvent::BrokerFailed);
                return Err(e);
            }
        }
        Ok(())
    }

    fn unsupported(&mut self, reason: &str) {
        tracing::error!(
            error = %reason,
            "Redis server does not support scripting; batch_count > 1 requires Redis 2.6.0 or newer, please upgrade Redis or set batch_count = 1"
        );
        self.advance(ListenerEvent::CapabilityError);
    }

    fn advance(&mut self, event: ListenerEvent) {
        let next = self.state.on(event);
        if next != self.state {
            tracing::trace!(from = ?self.state, to = ?next, event = ?event, "Listener state change");
        }
        self.state = next;
    }
}

/// Sleeps unless shutdown is requested first
async fn pause(shutdown: &CancellationToken, delay: Duration) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = sleep(delay) => {}
    }
}
