use crate::error::PipelineError;
use crate::message::StreamMessage;
use crate::subject::Action;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fhirhose_pubsub::BoxError;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Receives batches of finished records.
#[async_trait]
pub trait UploadHandler
where
    Self: Send + Sync + 'static,
{
    /// Persists one batch. A failure is reported to the error handler and the batch is dropped.
    async fn handle(&self, batch: Vec<StreamMessage>) -> Result<(), BoxError>;
}

#[async_trait]
impl<F> UploadHandler for F
where
    F: Fn(Vec<StreamMessage>) -> Result<(), BoxError> + Send + Sync + 'static,
{
    async fn handle(&self, batch: Vec<StreamMessage>) -> Result<(), BoxError> {
        self(batch)
    }
}

/// Accumulates records until the batch grows past `max_size` or a record arrives more than
/// `interval` after the last flush.
#[derive(Debug)]
pub struct UploadBatch {
    interval: Duration,
    items: Vec<StreamMessage>,
    last_flush: Instant,
    max_size: usize,
}

impl UploadBatch {
    /// Creates an empty batch whose flush clock starts at `now`.
    #[must_use]
    pub const fn new(max_size: usize, interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            items: Vec::new(),
            last_flush: now,
            max_size,
        }
    }

    /// Adds a record, returning the whole batch if it is due.
    pub fn push(&mut self, item: StreamMessage, now: Instant) -> Option<Vec<StreamMessage>> {
        self.items.push(item);

        let oversized = self.items.len() > self.max_size;
        let stale = now.saturating_duration_since(self.last_flush) > self.interval;

        (oversized || stale).then(|| self.take(now))
    }

    /// When a non-empty batch should be flushed even if nothing else arrives.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        (!self.items.is_empty()).then(|| self.last_flush + self.interval)
    }

    /// Empties the batch and restarts the flush clock.
    pub fn take(&mut self, now: Instant) -> Vec<StreamMessage> {
        self.last_flush = now;
        std::mem::take(&mut self.items)
    }

    /// Number of records waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Drains the upload queue into batches and hands each one to the upload handler.
pub(crate) struct UploadBatcher {
    batch: UploadBatch,
    errors: Option<mpsc::Sender<PipelineError>>,
    handler: Arc<dyn UploadHandler>,
    receiver: mpsc::Receiver<StreamMessage>,
}

impl UploadBatcher {
    pub(crate) fn new(
        receiver: mpsc::Receiver<StreamMessage>,
        handler: Arc<dyn UploadHandler>,
        errors: Option<mpsc::Sender<PipelineError>>,
        batch: UploadBatch,
    ) -> Self {
        Self {
            batch,
            errors,
            handler,
            receiver,
        }
    }

    /// Runs until shutdown or until every upload sender is gone, then flushes what is left,
    /// including records still waiting in the queue.
    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let deadline = self.batch.deadline();
            let flush_at = deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep_until(flush_at), if deadline.is_some() => {
                    let batch = self.batch.take(Instant::now());
                    self.flush(batch).await;
                }
                item = self.receiver.recv() => {
                    let Some(item) = item else {
                        break;
                    };

                    if let Some(batch) = self.batch.push(item, Instant::now()) {
                        self.flush(batch).await;
                    }
                }
            }
        }

        // Records in the queue were already acked upstream.
        self.receiver.close();
        while let Ok(item) = self.receiver.try_recv() {
            if let Some(batch) = self.batch.push(item, Instant::now()) {
                self.flush(batch).await;
            }
        }

        if !self.batch.is_empty() {
            let batch = self.batch.take(Instant::now());
            self.flush(batch).await;
        }

        debug!("upload batcher stopped");
    }

    async fn flush(&self, batch: Vec<StreamMessage>) {
        let size = batch.len();
        debug!(size, "flushing upload batch");

        let Err(source) = self.handler.handle(batch).await else {
            return;
        };

        error!(size, error = %source, "upload handler failed");

        let Some(errors) = &self.errors else {
            return;
        };

        let error = PipelineError {
            stream: None,
            action: Action::Uploaded,
            message: None,
            source,
        };

        // The forwarder keeps draining until this sender is dropped.
        if let Err(e) = errors.send(error).await {
            debug!(error = %e.0, "error handler stopped, dropping error");
        }
    }
}
