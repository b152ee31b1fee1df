/// Connection manager
///
/// Owns at most one live [`BrokerConnection`] and, in batched list mode, the
/// [`ScriptHandle`] installed on it. The two share a lifetime: dropping the
/// connection drops the handle, and a fresh connection always loads the
/// script again.
///
/// # Example
///
/// ```no_run
/// use redis_ingest_shared::redis::{ConnectionManager, MemoryBroker};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut manager = ConnectionManager::new(Arc::new(MemoryBroker::new()), true);
///
/// manager.ensure_connected().await?;
/// assert!(manager.script().is_some());
/// # Ok(())
/// # }
/// ```

use crate::redis::connection::{BrokerConnection, BrokerError, Connector};
use crate::redis::script::{self, ScriptHandle};
use std::sync::Arc;

/// Lazily (re)creates the broker connection for one worker
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    uses_batch_script: bool,
    connection: Option<Box<dyn BrokerConnection>>,
    script: Option<ScriptHandle>,
}

impl ConnectionManager {
    /// Creates a manager; no connection is opened yet
    ///
    /// # Arguments
    ///
    /// * `connector` - Opens connections
    /// * `uses_batch_script` - Install the batch script on every new connection
    pub fn new(connector: Arc<dyn Connector>, uses_batch_script: bool) -> Self {
        ConnectionManager {
            connector,
            uses_batch_script,
            connection: None,
            script: None,
        }
    }

    /// Opens a new connection, replacing any current one
    ///
    /// # Errors
    ///
    /// - `BrokerError::Connection` if the broker is unreachable
    /// - `BrokerError::Capability` if the batch script can't be installed
    pub async fn connect(&mut self) -> Result<(), BrokerError> {
        self.disconnect();

        let mut connection = self.connector.connect().await?;

        if self.uses_batch_script {
            let handle = script::load(connection.as_mut()).await?;
            self.script = Some(handle);
        }

        self.connection = Some(connection);
        Ok(())
    }

    /// Keeps the current connection, or connects if there is none
    pub async fn ensure_connected(&mut self) -> Result<(), BrokerError> {
        if self.connection.is_none() {
            self.connect().await?;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// The live connection
    ///
    /// # Errors
    ///
    /// `BrokerError::Connection` if not connected.
    pub fn connection(&mut self) -> Result<&mut dyn BrokerConnection, BrokerError> {
        match self.connection.as_mut() {
            Some(connection) => Ok(connection.as_mut()),
            None => Err(BrokerError::connection("not connected")),
        }
    }

    /// Handle of the batch script on the live connection
    pub fn script(&self) -> Option<&ScriptHandle> {
        self.script.as_ref()
    }

    /// Installs the batch script again on the live connection
    pub async fn reload_script(&mut self) -> Result<ScriptHandle, BrokerError> {
        self.script = None;
        let handle = script::load(self.connection()?).await?;
        self.script = Some(handle.clone());
        Ok(handle)
    }

    /// Forgets the connection and its script handle
    ///
    /// Used after a connection error; nothing is sent to the broker.
    pub fn disconnect(&mut self) {
        self.connection = None;
        self.script = None;
    }

    /// Releases the connection on shutdown
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.script = None;
    }

    /// Address of the broker for logs
    pub fn describe(&self) -> String {
        self.connector.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::memory::{Fault, MemoryBroker, Op};

    #[tokio::test]
    async fn test_connect_loads_script_when_batching() {
        let broker = MemoryBroker::new();
        let mut manager = ConnectionManager::new(Arc::new(broker.clone()), true);

        manager.ensure_connected().await.unwrap();

        assert!(manager.is_connected());
        assert!(manager.script().is_some());
        assert_eq!(broker.script_loads(), 1);
    }

    #[tokio::test]
    async fn test_connect_skips_script_without_batching() {
        let broker = MemoryBroker::new();
        let mut manager = ConnectionManager::new(Arc::new(broker.clone()), false);

        manager.ensure_connected().await.unwrap();

        assert!(manager.script().is_none());
        assert_eq!(broker.script_loads(), 0);
    }

    #[tokio::test]
    async fn test_ensure_connected_reuses_live_connection() {
        let broker = MemoryBroker::new();
        let mut manager = ConnectionManager::new(Arc::new(broker.clone()), true);

        manager.ensure_connected().await.unwrap();
        manager.ensure_connected().await.unwrap();

        assert_eq!(broker.connects(), 1);
        assert_eq!(broker.script_loads(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect_gets_new_handle() {
        let broker = MemoryBroker::new();
        let mut manager = ConnectionManager::new(Arc::new(broker.clone()), true);

        manager.ensure_connected().await.unwrap();
        manager.disconnect();
        assert!(manager.script().is_none());
        assert!(manager.connection().is_err());

        manager.ensure_connected().await.unwrap();
        assert_eq!(broker.connects(), 2);
        assert_eq!(broker.script_loads(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_manager_disconnected() {
        let broker = MemoryBroker::new();
        broker.fail_next(
            Op::Connect,
            Fault::Error(BrokerError::connection("connection refused")),
        );
        let mut manager = ConnectionManager::new(Arc::new(broker.clone()), true);

        let err = manager.ensure_connected().await.unwrap_err();
        assert!(err.is_connection());
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_capability_error_on_connect() {
        let broker = MemoryBroker::new();
        broker.disable_scripting();
        let mut manager = ConnectionManager::new(Arc::new(broker.clone()), true);

        let err = manager.ensure_connected().await.unwrap_err();
        assert!(matches!(err, BrokerError::Capability(_)));
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_close_releases_connection() {
        let broker = MemoryBroker::new();
        let mut manager = ConnectionManager::new(Arc::new(broker.clone()), false);

        manager.ensure_connected().await.unwrap();
        manager.close().await;

        assert!(!manager.is_connected());
        assert_eq!(broker.commands(), 0);
    }
}
