use crate::delivery::Delivery;

use async_trait::async_trait;

/// Processes deliveries from a durable consumer group.
#[async_trait]
pub trait ConsumerHandler
where
    Self: Clone + Send + Sync + 'static,
{
    /// Handles one delivery. The consumer fetches the next delivery only after this returns.
    ///
    /// Handlers own acknowledgement: a delivery that is never acked is redelivered by the
    /// broker once its ack wait expires.
    async fn handle(&self, delivery: Delivery);
}
