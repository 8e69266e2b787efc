use crate::batch::{UploadBatch, UploadBatcher, UploadHandler};
use crate::config::{Config, UPLOAD_FLUSH_INTERVAL};
use crate::error::{Error, Result};
use crate::forwarder::{ErrorForwarder, ErrorHandler};
use crate::register::{PubSubRegister, Register, RegisterContext};
use crate::sink::{HANDOFF_CAPACITY, Sinks};
use crate::stream::Stream;

use std::collections::HashSet;
use std::sync::Arc;

use fhirhose_pubsub::PubSub;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// Options for creating a new `Client`.
pub struct ClientOptions<P>
where
    P: PubSub,
{
    /// Process-wide tunables.
    pub config: Config,

    /// Receives every stage failure. Without it failures are only logged.
    pub error_handler: Option<Arc<dyn ErrorHandler>>,

    /// Broker the stages talk through.
    pub pubsub: P,

    /// The streams to run. Names must be unique.
    pub streams: Vec<Arc<dyn Stream>>,

    /// Receives batches of finished records. Without it uploads are dropped.
    pub upload_handler: Option<Arc<dyn UploadHandler>>,
}

/// Runs a set of streams through the poll, retrieve, transform and upload stages.
pub struct Client<P>
where
    P: PubSub,
{
    config: Arc<Config>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    pubsub: P,
    register: Arc<dyn Register<P>>,
    shutdown_token: CancellationToken,
    streams: Vec<Arc<dyn Stream>>,
    task_tracker: TaskTracker,
    upload_handler: Option<Arc<dyn UploadHandler>>,
}

impl<P> Client<P>
where
    P: PubSub,
{
    /// Creates a new client.
    #[must_use]
    pub fn new(
        ClientOptions {
            config,
            error_handler,
            pubsub,
            streams,
            upload_handler,
        }: ClientOptions<P>,
    ) -> Self {
        Self {
            config: Arc::new(config.normalized()),
            error_handler,
            pubsub,
            register: Arc::new(PubSubRegister),
            shutdown_token: CancellationToken::new(),
            streams,
            task_tracker: TaskTracker::new(),
            upload_handler,
        }
    }

    /// Replaces the register that spawns the stage tasks.
    #[must_use]
    pub fn with_register<R>(mut self, register: R) -> Self
    where
        R: Register<P>,
    {
        self.register = Arc::new(register);
        self
    }

    /// The normalized configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validates the streams and spawns every stage task on the current runtime. Returns once
    /// they are spawned.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoStreams` or `Error::DuplicateStream` if validation fails, in which case
    /// nothing is spawned, and `Error::AlreadyStarted` on a second call.
    pub fn start(&self) -> Result<()> {
        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        self.validate()?;

        let (error_sender, error_forwarder) = match &self.error_handler {
            Some(handler) => {
                let (sender, receiver) = mpsc::channel(HANDOFF_CAPACITY);
                (
                    Some(sender),
                    Some(ErrorForwarder::new(receiver, handler.clone())),
                )
            }
            None => (None, None),
        };

        let (upload_sender, upload_batcher) = match &self.upload_handler {
            Some(handler) => {
                let (sender, receiver) = mpsc::channel(HANDOFF_CAPACITY);
                let batch = UploadBatch::new(
                    self.config.upload_batch_size,
                    UPLOAD_FLUSH_INTERVAL,
                    Instant::now(),
                );
                (
                    Some(sender),
                    Some(UploadBatcher::new(
                        receiver,
                        handler.clone(),
                        error_sender.clone(),
                        batch,
                    )),
                )
            }
            None => (None, None),
        };

        let context = RegisterContext {
            config: self.config.clone(),
            pubsub: self.pubsub.clone(),
            shutdown: self.shutdown_token.clone(),
            sinks: Sinks::new(error_sender, upload_sender, self.shutdown_token.clone()),
            task_tracker: self.task_tracker.clone(),
        };

        for _ in 0..self.config.worker_amount {
            self.register.transformers(&context, &self.streams);
        }

        for _ in 0..self.config.worker_amount {
            self.register.uploaders(&context, &self.streams);
        }

        for _ in 0..self.config.worker_amount {
            self.register.retrievers(&context, &self.streams);
        }

        if self.config.poll_enabled {
            self.register.pollers(&context, &self.streams);
        }

        if let Some(forwarder) = error_forwarder {
            self.task_tracker.spawn(forwarder.run());
        }

        if let Some(batcher) = upload_batcher {
            self.task_tracker
                .spawn(batcher.run(self.shutdown_token.clone()));
        }

        self.task_tracker.close();

        info!(
            streams = self.streams.len(),
            workers = self.config.worker_amount,
            poll_enabled = self.config.poll_enabled,
            "fhirhose started"
        );

        Ok(())
    }

    /// Cancels every task and waits for them to finish.
    ///
    /// The upload batcher flushes whatever was handed to it, and the error forwarder stops only
    /// after the last stage task and the batcher are gone.
    pub async fn shutdown(&self) {
        info!("fhirhose shutting down...");

        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("fhirhose shutdown");
    }

    /// Waits until every task has finished.
    pub async fn wait(&self) {
        self.task_tracker.wait().await;
    }

    fn validate(&self) -> Result<()> {
        if self.streams.is_empty() {
            return Err(Error::NoStreams);
        }

        let mut registered = HashSet::with_capacity(self.streams.len());

        for stream in &self.streams {
            let name = stream.name();
            if !registered.insert(name.clone()) {
                return Err(Error::DuplicateStream(name));
            }
        }

        Ok(())
    }
}
