/// Channel listener (`SUBSCRIBE`)

use super::{subscription, Listener, ListenerContext, ListenerError};
use async_trait::async_trait;
use redis_ingest_shared::config::DataType;
use redis_ingest_shared::redis::{ConnectionManager, SubscriptionTarget};

/// Receives every message published to the configured channel
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelListener;

#[async_trait]
impl Listener for ChannelListener {
    fn mode(&self) -> DataType {
        DataType::Channel
    }

    async fn run(
        &self,
        manager: &mut ConnectionManager,
        context: &ListenerContext,
    ) -> Result<(), ListenerError> {
        let target = SubscriptionTarget::Channel(context.key.clone());
        subscription::run(manager, context, DataType::Channel, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{output_queue, EventDecoder};
    use redis_ingest_shared::config::InputConfig;
    use redis_ingest_shared::redis::{BrokerError, MemoryBroker};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_receives_exact_channel_until_shutdown() {
        let broker = MemoryBroker::new();
        let config = InputConfig::new("alerts", DataType::Channel);
        let (queue, mut events) = output_queue();
        let shutdown = CancellationToken::new();
        let context = ListenerContext::new(
            &config,
            EventDecoder::from_config(&config, queue),
            shutdown.clone(),
        );
        let mut manager = ConnectionManager::new(Arc::new(broker.clone()), false);
        manager.ensure_connected().await.unwrap();

        let task = tokio::spawn(async move {
            let result = ChannelListener.run(&mut manager, &context).await;
            (result, manager)
        });

        broker.wait_for_subscribers(1).await;
        assert_eq!(broker.publish("alerts", r#"{"n":1}"#), 1);
        assert_eq!(broker.publish("alerts.east", r#"{"n":2}"#), 0);
        assert_eq!(broker.publish("alerts", r#"{"n":3}"#), 1);

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first.get("n"), Some(&json!(1)));
        assert_eq!(second.get("n"), Some(&json!(3)));

        let origin = first.origin.unwrap();
        assert_eq!(origin.channel.as_deref(), Some("alerts"));
        assert_eq!(origin.pattern, None);

        shutdown.cancel();
        let (result, manager) = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        result.unwrap();
        assert!(manager.is_connected());
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_connection_is_connection_error() {
        let broker = MemoryBroker::new();
        let config = InputConfig::new("alerts", DataType::Channel);
        let (queue, _events) = output_queue();
        let context = ListenerContext::new(
            &config,
            EventDecoder::from_config(&config, queue),
            CancellationToken::new(),
        );
        let mut manager = ConnectionManager::new(Arc::new(broker.clone()), false);
        manager.ensure_connected().await.unwrap();

        let dropper = broker.clone();
        tokio::spawn(async move {
            dropper.wait_for_subscribers(1).await;
            dropper.drop_connections();
        });

        let err = ChannelListener.run(&mut manager, &context).await.unwrap_err();
        assert!(matches!(err, ListenerError::Broker(BrokerError::Connection(_))));
    }
}
