use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Could not connect to NATS.
    #[error("failed to connect to nats: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// Engine startup failed.
    #[error(transparent)]
    Fhirhose(#[from] fhirhose::Error),

    /// Broker provisioning failed.
    #[error(transparent)]
    PubSub(#[from] fhirhose_pubsub_nats::Error),

    /// Could not set global default subscriber.
    #[error("could not set global default subscriber: {0}")]
    SetTracing(#[from] tracing::dispatcher::SetGlobalDefaultError),

    /// Waiting for the shutdown signal failed.
    #[error("failed to listen for shutdown signal: {0}")]
    Signal(std::io::Error),
}
