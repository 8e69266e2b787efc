use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

/// Processes messages pushed to a subscription.
#[async_trait]
pub trait SubscriptionHandler
where
    Self: Clone + Send + Sync + 'static,
{
    /// Handles a message published on `subject`.
    async fn handle(&self, subject: String, payload: Bytes);
}

/// Keeps a push subscription alive. Dropping it stops delivery.
#[derive(Debug)]
pub struct SubscriptionHandle {
    stop_sender: watch::Sender<()>,
}

impl SubscriptionHandle {
    /// Creates a handle together with the receiver the subscription task should watch.
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<()>) {
        let (stop_sender, stop_receiver) = watch::channel(());
        (Self { stop_sender }, stop_receiver)
    }

    /// Stops the subscription.
    pub fn unsubscribe(self) {
        // Receivers also stop when the sender drops, so a closed channel is fine here.
        self.stop_sender.send(()).ok();
    }
}
