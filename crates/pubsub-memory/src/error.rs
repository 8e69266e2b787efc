use fhirhose_pubsub::PubSubError;
use thiserror::Error;

/// Errors that can occur in the in-memory broker.
#[derive(Debug, Error)]
pub enum Error {
    /// Subjects used for publishing must be concrete.
    #[error("invalid subject `{0}` - publish subjects must not contain '*', '>' or empty tokens")]
    InvalidSubject(String),

    /// No durable consumer with this name was added to the stream.
    #[error("consumer `{group}` does not exist on stream `{stream}`")]
    UnknownConsumer {
        /// The consumer group that was requested.
        group: String,
        /// The stream it was requested on.
        stream: String,
    },
}

impl PubSubError for Error {}
