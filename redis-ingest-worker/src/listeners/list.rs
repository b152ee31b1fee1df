/// List listener
///
/// One run is one round trip pair:
/// 1. `BLPOP key 0` blocks until an item arrives
/// 2. With `batch_count > 1`, `EVALSHA` pops up to `batch_count - 1` more
///
/// The blocking pop is never cancelled: an item the server already popped
/// would be lost. The supervisor checks for shutdown between runs.

use super::{Listener, ListenerContext, ListenerError};
use async_trait::async_trait;
use bytes::Bytes;
use redis_ingest_shared::config::DataType;
use redis_ingest_shared::events::Origin;
use redis_ingest_shared::redis::{BrokerError, ConnectionManager};

/// Script reloads allowed per batch fetch before `NOSCRIPT` is fatal
pub const MAX_SCRIPT_RELOADS: usize = 3;

/// `BLPOP` plus batch script
#[derive(Debug, Clone, Copy, Default)]
pub struct ListListener;

#[async_trait]
impl Listener for ListListener {
    fn mode(&self) -> DataType {
        DataType::List
    }

    async fn run(
        &self,
        manager: &mut ConnectionManager,
        context: &ListenerContext,
    ) -> Result<(), ListenerError> {
        let key = context.key.as_str();
        let origin = Origin::list(key);

        let Some(item) = manager.connection()?.blpop(key).await? else {
            tracing::debug!(key = %key, "BLPOP returned no item");
            return Ok(());
        };
        context.decoder.queue_event(&item, &origin)?;

        if context.batch_count <= 1 {
            return Ok(());
        }

        let items = fetch_batch(manager, key, context.batch_count - 1).await?;
        for item in items {
            context.decoder.queue_event(&item, &origin)?;
        }

        Ok(())
    }
}

/// Pops up to `count` items with the batch script
///
/// A `NOSCRIPT` reply reloads the script and retries, at most
/// [`MAX_SCRIPT_RELOADS`] times.
async fn fetch_batch(
    manager: &mut ConnectionManager,
    key: &str,
    count: usize,
) -> Result<Vec<Bytes>, BrokerError> {
    let mut reloads = 0;

    loop {
        let handle = match manager.script() {
            Some(handle) => handle.clone(),
            None => manager.reload_script().await?,
        };

        let result = manager.connection()?.evalsha(&handle, key, count).await;
        match result {
            Err(BrokerError::ScriptMissing(reason)) if reloads < MAX_SCRIPT_RELOADS => {
                reloads += 1;
                tracing::warn!(
                    key = %key,
                    sha = %handle,
                    reason = %reason,
                    attempt = reloads,
                    "Batch script missing on server, reloading"
                );
                manager.reload_script().await?;
            }
            result => return result,
        }
    }
}
