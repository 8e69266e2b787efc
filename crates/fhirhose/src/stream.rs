use crate::message::StreamMessage;

use std::fmt::{self, Display};

use async_trait::async_trait;
use fhirhose_pubsub::BoxError;

/// Name of a stream. Unique within a running client and used as a subject token, so it must not
/// contain dots or hyphens.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StreamName(String);

impl StreamName {
    /// Creates a new stream name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for StreamName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Result of polling a stream for new work.
#[derive(Clone, Debug, Default)]
pub struct PollOutcome {
    /// Candidate messages, in the order they should be published.
    pub messages: Vec<StreamMessage>,

    /// Whether the batch came from the bulk load path.
    pub custom_load: bool,
}

/// Result of the upload stage for one message.
#[derive(Clone, Debug)]
pub struct UploadOutcome {
    /// The finished record.
    pub message: StreamMessage,

    /// Whether the record should be handed to the upload handler.
    pub should_upload: bool,
}

/// The business logic of one pipeline.
///
/// The engine never constructs streams. It only calls into them from its stage tasks, possibly
/// from many tasks at once.
#[async_trait]
pub trait Stream
where
    Self: Send + Sync + 'static,
{
    /// The unique name of this stream.
    fn name(&self) -> StreamName;

    /// Looks for new work.
    async fn poll(&self) -> Result<PollOutcome, BoxError>;

    /// Fetches the full record for a polled message.
    async fn retrieve(&self, message: StreamMessage) -> Result<StreamMessage, BoxError>;

    /// Converts a retrieved record into its target shape.
    async fn transform(&self, message: StreamMessage) -> Result<StreamMessage, BoxError>;

    /// Finishes a transformed record.
    async fn upload(&self, message: StreamMessage) -> Result<UploadOutcome, BoxError>;
}
