use crate::error::PipelineError;
use crate::message::StreamMessage;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of the handoff queues. One slot is as close as tokio gets to a rendezvous.
pub const HANDOFF_CAPACITY: usize = 1;

/// Senders into the error and upload handoff queues.
///
/// Each queue only exists when a matching handler was supplied to the client. Sends block while
/// the queue is full and give up once shutdown is requested.
#[derive(Clone, Debug)]
pub struct Sinks {
    errors: Option<mpsc::Sender<PipelineError>>,
    shutdown: CancellationToken,
    uploads: Option<mpsc::Sender<StreamMessage>>,
}

impl Sinks {
    /// Creates sinks from optional queue senders.
    #[must_use]
    pub const fn new(
        errors: Option<mpsc::Sender<PipelineError>>,
        uploads: Option<mpsc::Sender<StreamMessage>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            errors,
            shutdown,
            uploads,
        }
    }

    /// Forwards a stage failure to the error handler, or drops it when there is none.
    pub async fn report(&self, error: PipelineError) {
        let Some(errors) = &self.errors else {
            debug!(error = %error, "no error handler configured, dropping error");
            return;
        };

        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                debug!("shutting down, dropping error");
            }
            result = errors.send(error) => {
                if let Err(e) = result {
                    debug!(error = %e.0, "error handler stopped, dropping error");
                }
            }
        }
    }

    /// Hands a finished record to the upload batcher. Returns whether it was accepted.
    pub async fn upload(&self, message: StreamMessage) -> bool {
        let Some(uploads) = &self.uploads else {
            warn!(id = %message.identifier, "no upload handler configured, dropping record");
            return false;
        };

        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => false,
            result = uploads.send(message) => result.is_ok(),
        }
    }
}
