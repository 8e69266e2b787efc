use fhirhose_pubsub::PubSubError;
use thiserror::Error;

/// Errors that can occur talking to NATS.
#[derive(Debug, Error)]
pub enum Error {
    /// Opening a dedicated consumer connection failed.
    #[error("failed to connect to nats server: {0}")]
    Connect(async_nats::ConnectErrorKind),

    /// Flushing a released consumer connection failed.
    #[error("failed to flush consumer connection: {0}")]
    Flush(String),

    /// Loading the durable consumer failed.
    #[error("failed to load consumer `{consumer}` for stream `{stream}`: {reason}")]
    GetConsumer {
        /// The consumer group name.
        consumer: String,
        /// The stream name.
        stream: String,
        /// The broker-side reason.
        reason: String,
    },

    /// Loading the stream failed.
    #[error("failed to load stream `{stream}`: {reason}")]
    GetStream {
        /// The stream name.
        stream: String,
        /// The broker-side reason.
        reason: String,
    },

    /// The active consumer returned an error other than an idle deadline.
    #[error("unknown error from active consumer: {0}")]
    Messages(async_nats::jetstream::consumer::pull::MessagesErrorKind),

    /// Creating a stream or consumer failed.
    #[error("failed to provision {what}: {reason}")]
    Provision {
        /// What was being provisioned.
        what: String,
        /// The broker-side reason.
        reason: String,
    },

    /// Publish error.
    #[error("failed to publish: {0}")]
    Publish(async_nats::client::PublishErrorKind),

    /// Opening the consumer message stream failed.
    #[error("consumer stream error: {0}")]
    Stream(async_nats::jetstream::consumer::StreamErrorKind),

    /// Subscribing failed.
    #[error("subscribing to topic failed: {0}")]
    Subscribe(String),
}

impl PubSubError for Error {}
