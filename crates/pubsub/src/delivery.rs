use crate::error::AckError;

use std::fmt::{self, Debug};

use async_trait::async_trait;
use bytes::Bytes;

/// Boxed error used where the concrete failure type belongs to someone else.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Acknowledges a delivery to the broker that handed it out.
#[async_trait]
pub trait Acknowledger
where
    Self: Send + Sync + 'static,
{
    /// Tells the broker the delivery must not be redelivered.
    async fn ack(&self) -> Result<(), BoxError>;
}

/// A message handed out by a durable consumer group.
pub struct Delivery {
    subject: String,
    payload: Bytes,
    acknowledger: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Creates a new delivery.
    pub fn new<A>(subject: impl Into<String>, payload: Bytes, acknowledger: A) -> Self
    where
        A: Acknowledger,
    {
        Self {
            subject: subject.into(),
            payload,
            acknowledger: Box::new(acknowledger),
        }
    }

    /// The subject the message was published on.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The raw message payload.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Acknowledges the delivery.
    ///
    /// # Errors
    ///
    /// Returns an `AckError` if the broker could not record the acknowledgement.
    pub async fn ack(&self) -> Result<(), AckError> {
        self.acknowledger.ack().await.map_err(|source| AckError {
            subject: self.subject.clone(),
            source,
        })
    }
}

impl Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}
