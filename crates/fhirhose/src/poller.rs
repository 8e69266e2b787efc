use crate::config::Config;
use crate::dedup::deduplicate_identifiers;
use crate::error::PipelineError;
use crate::register::RegisterContext;
use crate::sink::Sinks;
use crate::stream::Stream;
use crate::subject::{Action, LoadClass, publish_subject};

use std::sync::Arc;

use bytes::Bytes;
use fhirhose_pubsub::PubSub;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Polls one stream on the configured interval and publishes what it finds.
pub struct Poller<P>
where
    P: PubSub,
{
    config: Arc<Config>,
    pubsub: P,
    shutdown: CancellationToken,
    sinks: Sinks,
    stream: Arc<dyn Stream>,
}

impl<P> Poller<P>
where
    P: PubSub,
{
    /// Creates a poller for `stream`.
    #[must_use]
    pub fn new(context: &RegisterContext<P>, stream: Arc<dyn Stream>) -> Self {
        Self {
            config: context.config.clone(),
            pubsub: context.pubsub.clone(),
            shutdown: context.shutdown.clone(),
            sinks: context.sinks.clone(),
            stream,
        }
    }

    /// Polls every interval until shutdown. The first poll happens one interval after start.
    pub async fn run(self) {
        let period = self.config.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(stream = %self.stream.name(), interval = ?period, "starting poll");

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.poll_once().await;
        }

        debug!(stream = %self.stream.name(), "poller stopped");
    }

    /// Runs a single poll and publishes the surviving messages.
    pub async fn poll_once(&self) {
        let stream = self.stream.name();

        let outcome = match self.stream.poll().await {
            Ok(outcome) => outcome,
            Err(source) => {
                error!(stream = %stream, error = %source, "poll failed");
                self.sinks
                    .report(PipelineError {
                        stream: Some(stream),
                        action: Action::Polled,
                        message: None,
                        source,
                    })
                    .await;
                return;
            }
        };

        let messages = if self.config.deduplication_enabled {
            deduplicate_identifiers(outcome.messages)
        } else {
            outcome.messages
        };

        let load_class = if outcome.custom_load {
            LoadClass::CustomLoad
        } else {
            LoadClass::Default
        };

        info!(stream = %stream, changes = messages.len(), load_class = %load_class, "polled");

        let throttle = self.config.throttle_delay();

        for message in messages {
            if self.shutdown.is_cancelled() {
                return;
            }

            if message.identifier.is_empty() {
                warn!(
                    stream = %stream,
                    description = %message.description,
                    "skipping polled item without identifier"
                );
                continue;
            }

            let subject =
                publish_subject(&message.identifier, &stream, load_class, Action::Polled);

            info!(
                stream = %stream,
                id = %message.identifier,
                description = %message.description,
                "polled item"
            );

            match Bytes::try_from(message) {
                Ok(payload) => {
                    if let Err(e) = self.pubsub.publish(subject.clone(), payload).await {
                        error!(subject = %subject, error = %e, "can't publish new event");
                    }
                }
                Err(e) => {
                    error!(subject = %subject, error = %e, "can't encode message");
                }
            }

            if let Some(delay) = throttle {
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
