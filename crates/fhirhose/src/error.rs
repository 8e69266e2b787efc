use crate::message::StreamMessage;
use crate::stream::StreamName;
use crate::subject::Action;

use fhirhose_pubsub::BoxError;
use thiserror::Error;

/// Convenience type alias for results returned by the client.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned when starting a client.
#[derive(Debug, Error)]
pub enum Error {
    /// The client was already started.
    #[error("client already started")]
    AlreadyStarted,

    /// Two streams share a name.
    #[error("duplicate stream found: {0}")]
    DuplicateStream(StreamName),

    /// No streams were supplied.
    #[error("streams can't be empty")]
    NoStreams,
}

/// A failure inside a pipeline stage, handed to the error handler.
#[derive(Debug, Error)]
#[error(
    "{action} failed for {}: {source}",
    .stream.as_ref().map_or("upload handler", StreamName::as_str)
)]
pub struct PipelineError {
    /// The stream the failure happened in. `None` when the upload handler itself failed.
    pub stream: Option<StreamName>,

    /// The stage the failure happened in.
    pub action: Action,

    /// The message being processed, if any.
    pub message: Option<StreamMessage>,

    /// The underlying failure.
    #[source]
    pub source: BoxError,
}
