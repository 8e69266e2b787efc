use crate::delivery::BoxError;

use thiserror::Error;

/// The broker refused or failed to record an acknowledgement.
#[derive(Debug, Error)]
#[error("failed to acknowledge delivery on {subject}: {source}")]
pub struct AckError {
    /// Subject of the delivery being acknowledged.
    pub subject: String,

    /// The broker-side failure.
    #[source]
    pub source: BoxError,
}
