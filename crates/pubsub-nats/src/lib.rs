//! NATS `JetStream` implementation of the pubsub crate.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod consumer;
mod error;

pub use consumer::NatsBinding;
pub use error::Error;

use async_nats::Client;
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::stream::Config as StreamConfig;
use async_trait::async_trait;
use bytes::Bytes;
use fhirhose_pubsub::{
    ConsumerHandler, PubSub, ReconnectPolicy, SubscriptionHandle, SubscriptionHandler,
    consume_with_reconnect,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Options for the NATS broker.
#[derive(Clone, Debug)]
pub struct NatsPubSubOptions {
    /// The NATS client used for publishing and push subscriptions.
    pub client: Client,

    /// Server address. Every durable consumer gets its own connection to it.
    pub url: String,

    /// Deadlines and back-off used by `consume`.
    pub reconnect: ReconnectPolicy,
}

/// A NATS-backed broker.
#[derive(Clone, Debug)]
pub struct NatsPubSub {
    client: Client,
    jetstream_context: JetStreamContext,
    reconnect: ReconnectPolicy,
    url: String,
}

impl NatsPubSub {
    /// Creates a new NATS broker.
    #[must_use]
    pub fn new(
        NatsPubSubOptions {
            client,
            url,
            reconnect,
        }: NatsPubSubOptions,
    ) -> Self {
        let jetstream_context = async_nats::jetstream::new(client.clone());

        Self {
            client,
            jetstream_context,
            reconnect,
            url,
        }
    }

    /// Creates the `JetStream` stream `name` capturing `subjects` if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `Error::Provision` if the stream cannot be created or loaded.
    pub async fn ensure_stream<I, S>(&self, name: &str, subjects: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        let subjects: Vec<String> = subjects.into_iter().map(Into::into).collect();

        self.jetstream_context
            .get_or_create_stream(StreamConfig {
                name: name.to_string(),
                subjects,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Provision {
                what: format!("stream `{name}`"),
                reason: e.to_string(),
            })?;

        info!(stream = %name, "stream ready");

        Ok(())
    }

    /// Creates the durable, explicitly acknowledged pull consumer `group` on `stream` if it
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `Error::GetStream` if the stream is missing or `Error::Provision` if the consumer
    /// cannot be created.
    pub async fn ensure_consumer(
        &self,
        stream: &str,
        group: &str,
        filter_subject: &str,
    ) -> Result<(), Error> {
        let nats_stream = self
            .jetstream_context
            .get_stream(stream)
            .await
            .map_err(|e| Error::GetStream {
                stream: stream.to_string(),
                reason: e.to_string(),
            })?;

        let _: async_nats::jetstream::consumer::Consumer<PullConfig> = nats_stream
            .get_or_create_consumer(
                group,
                PullConfig {
                    durable_name: Some(group.to_string()),
                    filter_subject: filter_subject.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Provision {
                what: format!("consumer `{group}`"),
                reason: e.to_string(),
            })?;

        info!(stream = %stream, consumer = %group, filter = %filter_subject, "consumer ready");

        Ok(())
    }
}

#[async_trait]
impl PubSub for NatsPubSub {
    type Error = Error;

    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), Self::Error> {
        self.client
            .publish(subject, payload)
            .await
            .map_err(|e| Error::Publish(e.kind()))
    }

    async fn subscribe<X>(
        &self,
        subject: String,
        handler: X,
    ) -> Result<SubscriptionHandle, Self::Error>
    where
        X: SubscriptionHandler,
    {
        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        let (handle, mut stop_receiver) = SubscriptionHandle::new();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_receiver.changed() => {
                        subscriber.unsubscribe().await.ok();
                        break;
                    }
                    message = subscriber.next() => {
                        let Some(message) = message else {
                            break;
                        };
                        handler.handle(message.subject.to_string(), message.payload).await;
                    }
                }
            }

            debug!(subject = %subject, "subscription stopped");
        });

        Ok(handle)
    }

    async fn consume<X>(
        &self,
        group: &str,
        stream: &str,
        handler: X,
        shutdown: CancellationToken,
    ) -> Result<(), Self::Error>
    where
        X: ConsumerHandler,
    {
        consume_with_reconnect(self, group, stream, &handler, self.reconnect, &shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use fhirhose_pubsub::Delivery;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use uuid::Uuid;

    #[derive(Clone)]
    struct ForwardingHandler {
        sender: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl ConsumerHandler for ForwardingHandler {
        async fn handle(&self, delivery: Delivery) {
            delivery.ack().await.unwrap();
            self.sender.send(delivery.subject().to_string()).unwrap();
        }
    }

    async fn setup_pubsub(fetch_timeout: Duration) -> NatsPubSub {
        let url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
        let client = async_nats::connect(&url)
            .await
            .expect("Failed to connect to NATS for tests");

        NatsPubSub::new(NatsPubSubOptions {
            client,
            url,
            reconnect: ReconnectPolicy {
                fetch_timeout,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
            },
        })
    }

    #[tokio::test]
    #[ignore = "requires a NATS server with JetStream (NATS_URL)"]
    async fn test_consume_survives_idle_deadline() {
        let pubsub = setup_pubsub(Duration::from_millis(500)).await;
        let prefix = format!("test{}", Uuid::new_v4().simple());
        let stream = format!("{prefix}_stream");
        let group = format!("{prefix}-patient-polled");

        pubsub
            .ensure_stream(&stream, [format!("{prefix}.>")])
            .await
            .unwrap();
        pubsub
            .ensure_consumer(&stream, &group, &format!("{prefix}.patient.polled.>"))
            .await
            .unwrap();

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let consumer = tokio::spawn({
            let pubsub = pubsub.clone();
            let shutdown = shutdown.clone();
            let group = group.clone();
            let stream = stream.clone();
            async move {
                pubsub
                    .consume(&group, &stream, ForwardingHandler { sender }, shutdown)
                    .await
            }
        });

        pubsub
            .publish(format!("{prefix}.patient.polled.a"), Bytes::from("a"))
            .await
            .unwrap();

        // Sit idle past the fetch deadline before publishing again.
        tokio::time::sleep(Duration::from_millis(1500)).await;

        pubsub
            .publish(format!("{prefix}.patient.polled.b"), Bytes::from("b"))
            .await
            .unwrap();

        for expected in ["a", "b"] {
            let subject = timeout(Duration::from_secs(5), receiver.recv())
                .await
                .expect("timed out waiting for delivery")
                .expect("handler dropped");
            assert_eq!(subject, format!("{prefix}.patient.polled.{expected}"));
        }

        shutdown.cancel();
        consumer.await.unwrap().unwrap();

        pubsub.jetstream_context.delete_stream(&stream).await.ok();
    }
}
