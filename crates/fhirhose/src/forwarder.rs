use crate::error::PipelineError;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Receives every stage failure, in the order they were reported.
#[async_trait]
pub trait ErrorHandler
where
    Self: Send + Sync + 'static,
{
    /// Handles one failure.
    async fn handle(&self, error: PipelineError);
}

#[async_trait]
impl<F> ErrorHandler for F
where
    F: Fn(PipelineError) + Send + Sync + 'static,
{
    async fn handle(&self, error: PipelineError) {
        self(error);
    }
}

/// Drains the error queue into the error handler.
pub(crate) struct ErrorForwarder {
    handler: Arc<dyn ErrorHandler>,
    receiver: mpsc::Receiver<PipelineError>,
}

impl ErrorForwarder {
    pub(crate) fn new(
        receiver: mpsc::Receiver<PipelineError>,
        handler: Arc<dyn ErrorHandler>,
    ) -> Self {
        Self { handler, receiver }
    }

    /// Runs until every sender is gone. Stage tasks and the upload batcher hold the senders, so
    /// errors they report while shutting down still reach the handler.
    pub(crate) async fn run(mut self) {
        while let Some(error) = self.receiver.recv().await {
            self.handler.handle(error).await;
        }

        debug!("error forwarder stopped");
    }
}
