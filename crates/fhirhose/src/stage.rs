use crate::error::PipelineError;
use crate::message::StreamMessage;
use crate::register::RegisterContext;
use crate::sink::Sinks;
use crate::stream::Stream;
use crate::subject::{Action, LoadClass, consume_group, extract_identifier, publish_subject};

use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use fhirhose_pubsub::{BoxError, ConsumerHandler, Delivery, PubSub};
use tracing::{error, info};

/// A consumer-driven pipeline stage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Consumes polled events, publishes retrieved events.
    Retrieve,

    /// Consumes retrieved events, publishes transformed events.
    Transform,

    /// Consumes transformed events, hands finished records to the upload batcher.
    Upload,
}

impl Stage {
    /// The action this stage consumes.
    #[must_use]
    pub const fn consumes(self) -> Action {
        match self {
            Self::Retrieve => Action::Polled,
            Self::Transform => Action::Retrieved,
            Self::Upload => Action::Transformed,
        }
    }

    /// The action this stage produces.
    #[must_use]
    pub const fn produces(self) -> Action {
        match self {
            Self::Retrieve => Action::Retrieved,
            Self::Transform => Action::Transformed,
            Self::Upload => Action::Uploaded,
        }
    }
}

enum Output {
    Publish(StreamMessage),
    Upload {
        message: StreamMessage,
        should_upload: bool,
    },
}

/// Handles deliveries for one stage of one stream.
#[derive(Clone)]
pub struct StageHandler<P>
where
    P: PubSub,
{
    pubsub: P,
    sinks: Sinks,
    stage: Stage,
    stream: Arc<dyn Stream>,
}

impl<P> Debug for StageHandler<P>
where
    P: PubSub,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageHandler")
            .field("stage", &self.stage)
            .field("stream", &self.stream.name())
            .finish_non_exhaustive()
    }
}

impl<P> StageHandler<P>
where
    P: PubSub,
{
    /// Creates a handler invoking `stage` on `stream`.
    #[must_use]
    pub fn new(pubsub: P, stream: Arc<dyn Stream>, stage: Stage, sinks: Sinks) -> Self {
        Self {
            pubsub,
            sinks,
            stage,
            stream,
        }
    }

    async fn invoke(&self, message: StreamMessage) -> Result<Output, BoxError> {
        match self.stage {
            Stage::Retrieve => self.stream.retrieve(message).await.map(Output::Publish),
            Stage::Transform => self.stream.transform(message).await.map(Output::Publish),
            Stage::Upload => self.stream.upload(message).await.map(|outcome| Output::Upload {
                message: outcome.message,
                should_upload: outcome.should_upload,
            }),
        }
    }

    async fn publish(&self, identifier: &str, message: StreamMessage) {
        let subject = publish_subject(
            identifier,
            &self.stream.name(),
            LoadClass::Default,
            self.stage.produces(),
        );

        let payload = match Bytes::try_from(message) {
            Ok(payload) => payload,
            Err(e) => {
                error!(subject = %subject, error = %e, "can't encode message");
                return;
            }
        };

        if let Err(e) = self.pubsub.publish(subject.clone(), payload).await {
            error!(subject = %subject, error = %e, "can't publish new event");
        }
    }
}

#[async_trait]
impl<P> ConsumerHandler for StageHandler<P>
where
    P: PubSub,
{
    async fn handle(&self, delivery: Delivery) {
        let id = extract_identifier(delivery.subject()).to_string();
        let stream = self.stream.name();

        let message = match StreamMessage::try_from(delivery.payload().clone()) {
            Ok(message) => message,
            Err(e) => {
                error!(stream = %stream, id = %id, error = %e, "can't decode message");
                ack(&delivery).await;
                return;
            }
        };

        let result = self.invoke(message.clone()).await;

        // Acked whatever the outcome, so failing messages are never redelivered.
        ack(&delivery).await;

        let output = match result {
            Ok(output) => output,
            Err(source) => {
                self.sinks
                    .report(PipelineError {
                        stream: Some(stream),
                        action: self.stage.produces(),
                        message: Some(message),
                        source,
                    })
                    .await;
                return;
            }
        };

        match output {
            Output::Publish(updated) => {
                info!(
                    stream = %stream,
                    id = %id,
                    description = %updated.description,
                    "{} item",
                    self.stage.produces()
                );
                self.publish(&message.identifier, updated).await;
            }
            Output::Upload {
                message: updated,
                should_upload,
            } => {
                if should_upload && self.sinks.upload(updated).await {
                    info!(stream = %stream, id = %id, "uploaded item put into upload queue");
                }
            }
        }
    }
}

async fn ack(delivery: &Delivery) {
    if let Err(e) = delivery.ack().await {
        error!(error = %e, "can't acknowledge message");
    }
}

/// Spawns one consumer task for `stage` of `stream` in `load_class`.
pub fn spawn_consumer<P>(
    context: &RegisterContext<P>,
    stream: &Arc<dyn Stream>,
    stage: Stage,
    load_class: LoadClass,
) where
    P: PubSub,
{
    let group = consume_group(&stream.name(), load_class, stage.consumes());
    let broker_stream = context.config.stream_name.clone();
    let handler = StageHandler::new(
        context.pubsub.clone(),
        stream.clone(),
        stage,
        context.sinks.clone(),
    );
    let pubsub = context.pubsub.clone();
    let shutdown = context.shutdown.clone();

    context.task_tracker.spawn(async move {
        info!(consumer = %group, "register consumer");

        if let Err(e) = pubsub
            .consume(&group, &broker_stream, handler, shutdown)
            .await
        {
            error!(consumer = %group, error = %e, "can't consume from consumer");
        }
    });
}
