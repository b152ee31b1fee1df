/// In-memory broker for tests and demos
///
/// Implements [`Connector`] and [`BrokerConnection`] with Redis semantics for
/// the handful of commands the input uses:
/// - Lists with a blocking `BLPOP`
/// - `SCRIPT LOAD` / `EVALSHA` for the batch pop script, keyed by SHA1
/// - `SUBSCRIBE` / `PSUBSCRIBE` with Redis glob matching
///
/// `EVALSHA` does not run the Lua body of [`BATCH_POP_SCRIPT`]; it applies the
/// script's contract natively (pop up to N items, no padding). Only the live
/// tests in `tests/redis_integration.rs` exercise the script itself.
///
/// It can also misbehave on demand:
/// - [`MemoryBroker::flush_scripts`] simulates a restart (next `EVALSHA` gets `NOSCRIPT`)
/// - [`MemoryBroker::disable_scripting`] simulates a server older than 2.6
/// - [`MemoryBroker::drop_connections`] severs every open connection
/// - [`MemoryBroker::fail_next`] injects one fault into the next call of an operation
///
/// # Example
///
/// ```no_run
/// use redis_ingest_shared::redis::{Connector, MemoryBroker};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = MemoryBroker::new();
/// broker.push("logstash", ["{\"message\":\"hello\"}"]);
///
/// let mut conn = broker.connect().await?;
/// let item = conn.blpop("logstash").await?;
/// assert!(item.is_some());
/// # Ok(())
/// # }
/// ```

use crate::redis::connection::{
    BrokerConnection, BrokerError, Connector, MessageStream, PubSubMessage, SubscriptionTarget,
};
use crate::redis::script::{ScriptHandle, BATCH_POP_SCRIPT};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Operations faults can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Connect,
    Blpop,
    ScriptLoad,
    Evalsha,
    Subscribe,
}

/// An injected misbehaviour
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail the call with this error
    Error(BrokerError),

    /// Answer `BLPOP` with a nil reply
    EmptyReply,
}

struct Subscriber {
    id: u64,
    connection: u64,
    target: SubscriptionTarget,
    tx: mpsc::UnboundedSender<PubSubMessage>,
}

#[derive(Default)]
struct State {
    lists: HashMap<String, VecDeque<Bytes>>,
    scripts: HashSet<ScriptHandle>,
    scripting_disabled: bool,
    subscribers: Vec<Subscriber>,
    faults: HashMap<Op, VecDeque<Fault>>,
    live_connections: HashSet<u64>,
    next_id: u64,
    connects: usize,
    commands: usize,
    script_loads: usize,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_fault(&mut self, op: Op) -> Option<Fault> {
        self.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }
}

struct Shared {
    state: Mutex<State>,
    list_pushed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory Redis stand-in
///
/// Cloning shares the same broker state.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// Creates an empty broker with scripting enabled
    pub fn new() -> Self {
        MemoryBroker {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                list_pushed: Notify::new(),
            }),
        }
    }

    /// `RPUSH key item...`
    pub fn push<I, T>(&self, key: &str, items: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        {
            let mut state = self.shared.lock();
            let list = state.lists.entry(key.to_string()).or_default();
            list.extend(items.into_iter().map(Into::into));
        }
        self.shared.list_pushed.notify_waiters();
    }

    /// `LLEN key`
    pub fn len(&self, key: &str) -> usize {
        self.shared.lock().lists.get(key).map_or(0, VecDeque::len)
    }

    /// `PUBLISH channel payload`, returns the number of deliveries
    pub fn publish(&self, channel: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let state = self.shared.lock();

        let mut delivered = 0;
        for subscriber in &state.subscribers {
            let pattern = match &subscriber.target {
                SubscriptionTarget::Channel(name) if name == channel => None,
                SubscriptionTarget::Pattern(pattern) if glob_match(pattern, channel) => {
                    Some(pattern.clone())
                }
                _ => continue,
            };

            let message = PubSubMessage {
                channel: channel.to_string(),
                pattern,
                payload: payload.clone(),
            };
            if subscriber.tx.send(message).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Forgets every loaded script, as a restarted server would
    pub fn flush_scripts(&self) {
        self.shared.lock().scripts.clear();
    }

    /// Makes `SCRIPT` an unknown command
    pub fn disable_scripting(&self) {
        let mut state = self.shared.lock();
        state.scripting_disabled = true;
        state.scripts.clear();
    }

    /// Severs every open connection
    ///
    /// Blocked pops fail with a connection error and subscription streams end.
    pub fn drop_connections(&self) {
        {
            let mut state = self.shared.lock();
            state.live_connections.clear();
            state.subscribers.clear();
        }
        self.shared.list_pushed.notify_waiters();
    }

    /// Queues a fault for the next call of `op`
    pub fn fail_next(&self, op: Op, fault: Fault) {
        self.shared
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(fault);
    }

    /// Successful connects so far
    pub fn connects(&self) -> usize {
        self.shared.lock().connects
    }

    /// Commands issued so far (connects and closes excluded)
    pub fn commands(&self) -> usize {
        self.shared.lock().commands
    }

    /// Successful `SCRIPT LOAD` calls so far
    pub fn script_loads(&self) -> usize {
        self.shared.lock().script_loads
    }

    /// Active subscriptions across all connections
    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }

    /// Waits until at least `count` subscriptions are active
    pub async fn wait_for_subscribers(&self, count: usize) {
        while self.subscriber_count() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        let id = {
            let mut state = self.shared.lock();
            if let Some(Fault::Error(err)) = state.take_fault(Op::Connect) {
                return Err(err);
            }
            state.connects += 1;
            let id = state.next_id();
            state.live_connections.insert(id);
            id
        };

        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            id,
            subscriptions: Vec::new(),
        }))
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

/// A connection to a [`MemoryBroker`]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    id: u64,
    subscriptions: Vec<(u64, SubscriptionTarget)>,
}

impl MemoryConnection {
    /// Counts the command and applies any queued fault
    fn begin(&self, state: &mut State, op: Op) -> Result<Option<Fault>, BrokerError> {
        if !state.live_connections.contains(&self.id) {
            return Err(BrokerError::connection("connection reset by peer"));
        }
        state.commands += 1;

        match state.take_fault(op) {
            Some(Fault::Error(err)) => Err(err),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn blpop(&mut self, key: &str) -> Result<Option<Bytes>, BrokerError> {
        {
            let mut state = self.shared.lock();
            if let Some(Fault::EmptyReply) = self.begin(&mut state, Op::Blpop)? {
                return Ok(None);
            }
        }

        loop {
            let pushed = self.shared.list_pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if !state.live_connections.contains(&self.id) {
                    return Err(BrokerError::connection("connection reset by peer"));
                }
                if let Some(item) = state.lists.get_mut(key).and_then(VecDeque::pop_front) {
                    return Ok(Some(item));
                }
            }

            pushed.await;
        }
    }

    async fn script_load(&mut self, body: &str) -> Result<ScriptHandle, BrokerError> {
        let mut state = self.shared.lock();
        self.begin(&mut state, Op::ScriptLoad)?;

        if state.scripting_disabled {
            return Err(BrokerError::Capability(
                "ERR unknown command 'script'".to_string(),
            ));
        }

        let handle = ScriptHandle::digest(body);
        state.scripts.insert(handle.clone());
        state.script_loads += 1;
        Ok(handle)
    }

    async fn evalsha(
        &mut self,
        handle: &ScriptHandle,
        key: &str,
        count: usize,
    ) -> Result<Vec<Bytes>, BrokerError> {
        let mut state = self.shared.lock();
        self.begin(&mut state, Op::Evalsha)?;

        if !state.scripts.contains(handle) {
            return Err(BrokerError::ScriptMissing(
                "NOSCRIPT No matching script. Please use EVAL.".to_string(),
            ));
        }
        if *handle != ScriptHandle::digest(BATCH_POP_SCRIPT) {
            return Err(BrokerError::command(format!(
                "memory broker can't run script {}",
                handle
            )));
        }

        let Some(list) = state.lists.get_mut(key) else {
            return Ok(Vec::new());
        };
        let take = count.min(list.len());
        Ok(list.drain(..take).collect())
    }

    async fn subscribe<'a>(
        &'a mut self,
        target: &SubscriptionTarget,
    ) -> Result<(usize, MessageStream<'a>), BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut state = self.shared.lock();
            self.begin(&mut state, Op::Subscribe)?;

            let id = state.next_id();
            state.subscribers.push(Subscriber {
                id,
                connection: self.id,
                target: target.clone(),
                tx,
            });
            self.subscriptions.push((id, target.clone()));
        }

        let stream = UnboundedReceiverStream::new(rx).boxed();
        Ok((self.subscriptions.len(), stream))
    }

    async fn unsubscribe(&mut self, target: &SubscriptionTarget) -> Result<usize, BrokerError> {
        let mut state = self.shared.lock();
        if !state.live_connections.contains(&self.id) {
            return Err(BrokerError::connection("connection reset by peer"));
        }
        state.commands += 1;

        let removed: Vec<u64> = self
            .subscriptions
            .iter()
            .filter(|(_, t)| t == target)
            .map(|(id, _)| *id)
            .collect();
        self.subscriptions.retain(|(_, t)| t != target);
        state.subscribers.retain(|s| !removed.contains(&s.id));

        Ok(self.subscriptions.len())
    }

    async fn close(&mut self) {
        let mut state = self.shared.lock();
        state.live_connections.remove(&self.id);
        state.subscribers.retain(|s| s.connection != self.id);
        self.subscriptions.clear();
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.live_connections.remove(&self.id);
        state.subscribers.retain(|s| s.connection != self.id);
    }
}

/// Redis-style glob match (`*`, `?`, `[abc]`, `[^a-z]`, `\x`)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    glob_bytes(pattern.as_bytes(), text.as_bytes())
}

fn glob_bytes(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'*') => {
            let rest = &pattern[1..];
            (0..=text.len()).any(|skip| glob_bytes(rest, &text[skip..]))
        }
        Some(b'?') => !text.is_empty() && glob_bytes(&pattern[1..], &text[1..]),
        Some(b'[') => {
            let Some((&c, text_rest)) = text.split_first() else {
                return false;
            };
            let (matched, consumed) = match_class(&pattern[1..], c);
            matched && glob_bytes(&pattern[1 + consumed..], text_rest)
        }
        Some(b'\\') if pattern.len() > 1 => {
            text.first() == Some(&pattern[1]) && glob_bytes(&pattern[2..], &text[1..])
        }
        Some(&literal) => text.first() == Some(&literal) && glob_bytes(&pattern[1..], &text[1..]),
    }
}

/// Matches `c` against a class body (after `[`); returns (matched, bytes consumed)
fn match_class(class: &[u8], c: u8) -> (bool, usize) {
    let negate = class.first() == Some(&b'^');
    let mut i = usize::from(negate);
    let mut matched = false;

    while i < class.len() {
        match class[i] {
            b']' => return (matched != negate, i + 1),
            b'\\' if i + 1 < class.len() => {
                matched |= class[i + 1] == c;
                i += 2;
            }
            lo if i + 2 < class.len() && class[i + 1] == b'-' && class[i + 2] != b']' => {
                let hi = class[i + 2];
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                matched |= (lo..=hi).contains(&c);
                i += 3;
            }
            other => {
                matched |= other == c;
                i += 1;
            }
        }
    }

    // Unterminated class runs to the end of the pattern
    (matched != negate, class.len())
}
