/// Subscription loop shared by the channel and pattern listeners

use super::{ListenerContext, ListenerError};
use futures::StreamExt;
use redis_ingest_shared::config::DataType;
use redis_ingest_shared::events::Origin;
use redis_ingest_shared::redis::{BrokerError, ConnectionManager, SubscriptionTarget};

/// Subscribes to `target` and decodes messages until shutdown
///
/// On shutdown the subscription is removed before returning. If the message
/// stream ends first, the connection was lost.
pub(super) async fn run(
    manager: &mut ConnectionManager,
    context: &ListenerContext,
    data_type: DataType,
    target: SubscriptionTarget,
) -> Result<(), ListenerError> {
    let kind = if target.is_pattern() { "pattern" } else { "channel" };
    let connection = manager.connection()?;

    let (count, mut messages) = connection.subscribe(&target).await?;
    tracing::info!(
        kind,
        key = %target.name(),
        subscriptions = count,
        "Subscribed"
    );

    let outcome = loop {
        tokio::select! {
            _ = context.shutdown.cancelled() => break Ok(()),
            message = messages.next() => match message {
                Some(message) => {
                    let origin = Origin::pubsub(
                        context.key.as_str(),
                        data_type,
                        message.channel,
                        message.pattern,
                    );
                    if let Err(e) = context.decoder.queue_event(&message.payload, &origin) {
                        break Err(ListenerError::from(e));
                    }
                }
                None => {
                    break Err(ListenerError::from(BrokerError::connection(
                        "subscription stream ended",
                    )))
                }
            },
        }
    };
    drop(messages);
    outcome?;

    let remaining = connection.unsubscribe(&target).await?;
    tracing::info!(
        kind,
        key = %target.name(),
        subscriptions = remaining,
        "Unsubscribed"
    );

    Ok(())
}
