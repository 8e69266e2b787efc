//! Abstract interface for the broker the pipeline stages talk through.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Consumer handlers process deliveries from durable consumer groups.
pub mod consumer_handler;

/// Deliveries are acknowledgeable messages handed out by a consumer group.
pub mod delivery;

mod error;

/// Pull consumption that survives idle deadlines by rebinding.
pub mod reconnect;

/// Subscriptions are push-style, fire-and-forget listeners on a subject.
pub mod subscription;

pub use consumer_handler::ConsumerHandler;
pub use delivery::{Acknowledger, BoxError, Delivery};
pub use error::AckError;
pub use reconnect::{Fetched, PullBinding, PullConnector, ReconnectPolicy, consume_with_reconnect};
pub use subscription::{SubscriptionHandle, SubscriptionHandler};

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Marker trait for broker errors.
pub trait PubSubError: Error + Send + Sync + 'static {}

/// A broker offering publish, push subscriptions and durable pull consumption.
#[async_trait]
pub trait PubSub
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the broker.
    type Error: PubSubError;

    /// Publishes a payload on the given subject.
    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), Self::Error>;

    /// Subscribes to a subject. Every message is handed to `handler` on a background task
    /// until the returned handle is unsubscribed or dropped.
    async fn subscribe<X>(
        &self,
        subject: String,
        handler: X,
    ) -> Result<SubscriptionHandle, Self::Error>
    where
        X: SubscriptionHandler;

    /// Consumes the durable consumer `group` on `stream`, awaiting `handler` for each delivery
    /// before fetching the next one.
    ///
    /// Blocks until `shutdown` is cancelled, the broker closes the group, or a non-recoverable
    /// broker error occurs. Idle deadlines are recovered internally and never returned.
    async fn consume<X>(
        &self,
        group: &str,
        stream: &str,
        handler: X,
        shutdown: CancellationToken,
    ) -> Result<(), Self::Error>
    where
        X: ConsumerHandler;
}
