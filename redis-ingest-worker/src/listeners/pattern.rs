/// Pattern channel listener (`PSUBSCRIBE`)

use super::{subscription, Listener, ListenerContext, ListenerError};
use async_trait::async_trait;
use redis_ingest_shared::config::DataType;
use redis_ingest_shared::redis::{ConnectionManager, SubscriptionTarget};

/// Receives every message published to a channel matching the configured
/// glob pattern; each event records the channel that matched
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternListener;

#[async_trait]
impl Listener for PatternListener {
    fn mode(&self) -> DataType {
        DataType::PatternChannel
    }

    async fn run(
        &self,
        manager: &mut ConnectionManager,
        context: &ListenerContext,
    ) -> Result<(), ListenerError> {
        let target = SubscriptionTarget::Pattern(context.key.clone());
        subscription::run(manager, context, DataType::PatternChannel, target).await
    }
}
