use crate::NatsPubSub;
use crate::error::Error;

use async_nats::Client;
use async_nats::jetstream::Message as JetStreamMessage;
use async_nats::jetstream::consumer::Consumer;
use async_nats::jetstream::consumer::pull::{
    Config as PullConfig, MessagesErrorKind, Stream as PullMessages,
};
use async_trait::async_trait;
use fhirhose_pubsub::{Acknowledger, BoxError, Delivery, Fetched, PullBinding, PullConnector};
use futures::StreamExt;
use tracing::debug;

struct NatsAcknowledger {
    message: JetStreamMessage,
}

#[async_trait]
impl Acknowledger for NatsAcknowledger {
    async fn ack(&self) -> Result<(), BoxError> {
        self.message.ack().await
    }
}

/// A durable pull consumer bound on its own NATS connection.
pub struct NatsBinding {
    client: Client,
    messages: PullMessages,
}

#[async_trait]
impl PullBinding for NatsBinding {
    type Error = Error;

    async fn fetch(&mut self) -> Result<Fetched, Self::Error> {
        match self.messages.next().await {
            Some(Ok(message)) => {
                let subject = message.subject.to_string();
                let payload = message.payload.clone();

                Ok(Fetched::Delivery(Delivery::new(
                    subject,
                    payload,
                    NatsAcknowledger { message },
                )))
            }
            Some(Err(e)) if matches!(e.kind(), MessagesErrorKind::MissingHeartbeat) => {
                Ok(Fetched::TimedOut)
            }
            Some(Err(e)) => Err(Error::Messages(e.kind())),
            None => Ok(Fetched::Closed),
        }
    }

    async fn release(self) -> Result<(), Self::Error> {
        let Self { client, messages } = self;
        drop(messages);

        // Pending acks are written on this connection; flush them before it goes away.
        client
            .flush()
            .await
            .map_err(|e| Error::Flush(e.to_string()))
    }
}

#[async_trait]
impl PullConnector for NatsPubSub {
    type Error = Error;

    type Binding = NatsBinding;

    async fn bind(&self, group: &str, stream: &str) -> Result<NatsBinding, Error> {
        // Pull consumers block their connection, so each binding gets its own.
        let client = async_nats::connect(self.url.as_str())
            .await
            .map_err(|e| Error::Connect(e.kind()))?;

        let jetstream_context = async_nats::jetstream::new(client.clone());

        let nats_stream =
            jetstream_context
                .get_stream(stream)
                .await
                .map_err(|e| Error::GetStream {
                    stream: stream.to_string(),
                    reason: e.to_string(),
                })?;

        let nats_consumer: Consumer<PullConfig> =
            nats_stream
                .get_consumer(group)
                .await
                .map_err(|e| Error::GetConsumer {
                    consumer: group.to_string(),
                    stream: stream.to_string(),
                    reason: e.to_string(),
                })?;

        let messages = nats_consumer
            .messages()
            .await
            .map_err(|e| Error::Stream(e.kind()))?;

        debug!(consumer = %group, stream = %stream, "bound consumer on fresh connection");

        Ok(NatsBinding { client, messages })
    }
}
