use crate::consumer_handler::ConsumerHandler;
use crate::delivery::Delivery;
use crate::PubSubError;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of a single fetch on a bound consumer.
#[derive(Debug)]
pub enum Fetched {
    /// The next message for this consumer.
    Delivery(Delivery),

    /// The consumer sat idle past its deadline. The binding should be replaced.
    TimedOut,

    /// The broker closed the consumer for good.
    Closed,
}

/// A durable consumer bound on one broker connection.
#[async_trait]
pub trait PullBinding
where
    Self: Send + 'static,
{
    /// The error type for the binding.
    type Error: PubSubError;

    /// Fetches the next message, waiting for as long as the broker allows.
    async fn fetch(&mut self) -> Result<Fetched, Self::Error>;

    /// Releases the binding together with the connection it owns.
    async fn release(self) -> Result<(), Self::Error>;
}

/// Opens fresh bindings to durable consumers.
#[async_trait]
pub trait PullConnector
where
    Self: Send + Sync,
{
    /// The error type for the connector.
    type Error: PubSubError;

    /// The binding type produced by the connector.
    type Binding: PullBinding<Error = Self::Error>;

    /// Opens a connection and binds the durable consumer `group` on `stream`.
    async fn bind(&self, group: &str, stream: &str) -> Result<Self::Binding, Self::Error>;
}

/// Deadlines and back-off for [`consume_with_reconnect`].
#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    /// How long a single fetch may stay idle before the binding is replaced.
    pub fetch_timeout: Duration,

    /// Delay before the first rebind after a timeout.
    pub base_delay: Duration,

    /// Upper bound for the rebind delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(60 * 60),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before rebinding after `consecutive` timeouts in a row (starting at 1).
    #[must_use]
    pub fn backoff(&self, consecutive: u32) -> Duration {
        let exponent = consecutive.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1 << exponent);

        // Add 0-10% jitter
        std::cmp::min(
            delay.mul_f64(fastrand::f64().mul_add(0.1, 1.0)),
            self.max_delay,
        )
    }
}

/// Drives a durable consumer until shutdown, rebinding on a fresh connection whenever a fetch
/// times out.
///
/// Each delivery is handed to `handler` and awaited before the next fetch, so a single call
/// never processes two deliveries concurrently.
///
/// # Errors
///
/// Returns the first fetch, release or bind error that is not an idle timeout.
pub async fn consume_with_reconnect<C, X>(
    connector: &C,
    group: &str,
    stream: &str,
    handler: &X,
    policy: ReconnectPolicy,
    shutdown: &CancellationToken,
) -> Result<(), C::Error>
where
    C: PullConnector,
    X: ConsumerHandler,
{
    let mut binding = connector.bind(group, stream).await?;
    let mut consecutive_timeouts = 0u32;
    let mut reconnects = 0u64;

    info!(consumer = %group, stream = %stream, "consumer bound");

    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => None,
            result = tokio::time::timeout(policy.fetch_timeout, binding.fetch()) => Some(result),
        };

        let Some(result) = next else {
            debug!(consumer = %group, "shutdown requested, releasing consumer");
            binding.release().await?;
            return Ok(());
        };

        let fetched = match result {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => {
                // Flush acks of earlier deliveries before giving up.
                if let Err(release) = binding.release().await {
                    debug!(consumer = %group, error = %release, "can't release failed consumer");
                }
                return Err(e);
            }
            Err(_elapsed) => Fetched::TimedOut,
        };

        match fetched {
            Fetched::Delivery(delivery) => {
                consecutive_timeouts = 0;
                handler.handle(delivery).await;
            }
            Fetched::TimedOut => {
                consecutive_timeouts = consecutive_timeouts.saturating_add(1);
                reconnects += 1;
                let delay = policy.backoff(consecutive_timeouts);

                warn!(
                    consumer = %group,
                    stream = %stream,
                    reconnects,
                    delay = ?delay,
                    "consumer deadline exceeded, rebinding on a fresh connection"
                );

                binding.release().await?;

                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => return Ok(()),
                    () = tokio::time::sleep(delay) => {}
                }

                binding = connector.bind(group, stream).await?;
            }
            Fetched::Closed => {
                info!(consumer = %group, stream = %stream, "consumer closed by broker");
                binding.release().await?;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{Acknowledger, BoxError};

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("scripted broker failure")]
    struct ScriptError;

    impl PubSubError for ScriptError {}

    #[derive(Clone, Debug)]
    enum Step {
        Deliver(&'static str),
        TimeOut,
        Hang,
        Fail,
        Close,
    }

    struct NoopAck;

    #[async_trait]
    impl Acknowledger for NoopAck {
        async fn ack(&self) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedConnector {
        steps: Arc<Mutex<VecDeque<Step>>>,
        binds: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
        fail_bind_after: Option<usize>,
    }

    impl ScriptedConnector {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Arc::new(Mutex::new(steps.into())),
                ..Default::default()
            }
        }
    }

    struct ScriptedBinding {
        steps: Arc<Mutex<VecDeque<Step>>>,
        releases: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PullBinding for ScriptedBinding {
        type Error = ScriptError;

        async fn fetch(&mut self) -> Result<Fetched, ScriptError> {
            let step = self.steps.lock().pop_front();
            match step {
                Some(Step::Deliver(subject)) => Ok(Fetched::Delivery(Delivery::new(
                    subject,
                    Bytes::from_static(b"{}"),
                    NoopAck,
                ))),
                Some(Step::TimeOut) => Ok(Fetched::TimedOut),
                Some(Step::Hang) => std::future::pending().await,
                Some(Step::Fail) => Err(ScriptError),
                Some(Step::Close) | None => Ok(Fetched::Closed),
            }
        }

        async fn release(self) -> Result<(), ScriptError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl PullConnector for ScriptedConnector {
        type Error = ScriptError;
        type Binding = ScriptedBinding;

        async fn bind(&self, _group: &str, _stream: &str) -> Result<ScriptedBinding, ScriptError> {
            let previous = self.binds.fetch_add(1, Ordering::SeqCst);
            if self.fail_bind_after.is_some_and(|limit| previous >= limit) {
                return Err(ScriptError);
            }

            Ok(ScriptedBinding {
                steps: self.steps.clone(),
                releases: self.releases.clone(),
            })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingHandler {
        subjects: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ConsumerHandler for RecordingHandler {
        async fn handle(&self, delivery: Delivery) {
            delivery.ack().await.unwrap();
            self.subjects.lock().push(delivery.subject().to_string());
        }
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            fetch_timeout: Duration::from_millis(50),
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_timeout_rebinds_and_keeps_delivering() {
        let connector = ScriptedConnector::new(vec![
            Step::Deliver("fhirhose.patient.polled.a"),
            Step::TimeOut,
            Step::Deliver("fhirhose.patient.polled.b"),
            Step::TimeOut,
            Step::TimeOut,
            Step::Deliver("fhirhose.patient.polled.c"),
            Step::Close,
        ]);
        let handler = RecordingHandler::default();

        let result = consume_with_reconnect(
            &connector,
            "fhirhose-patient-polled",
            "fhirhose",
            &handler,
            fast_policy(),
            &CancellationToken::new(),
        )
        .await;

        assert_matches!(result, Ok(()));
        assert_eq!(
            *handler.subjects.lock(),
            vec![
                "fhirhose.patient.polled.a",
                "fhirhose.patient.polled.b",
                "fhirhose.patient.polled.c"
            ]
        );
        assert_eq!(connector.binds.load(Ordering::SeqCst), 4);
        assert_eq!(connector.releases.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_idle_fetch_counts_as_timeout() {
        let connector = ScriptedConnector::new(vec![
            Step::Hang,
            Step::Deliver("fhirhose.patient.polled.a"),
            Step::Close,
        ]);
        let handler = RecordingHandler::default();

        let result = consume_with_reconnect(
            &connector,
            "fhirhose-patient-polled",
            "fhirhose",
            &handler,
            fast_policy(),
            &CancellationToken::new(),
        )
        .await;

        assert_matches!(result, Ok(()));
        assert_eq!(handler.subjects.lock().len(), 1);
        assert_eq!(connector.binds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_is_terminal() {
        let connector = ScriptedConnector::new(vec![
            Step::Deliver("fhirhose.patient.polled.a"),
            Step::Fail,
            Step::Deliver("fhirhose.patient.polled.b"),
        ]);
        let handler = RecordingHandler::default();

        let result = consume_with_reconnect(
            &connector,
            "fhirhose-patient-polled",
            "fhirhose",
            &handler,
            fast_policy(),
            &CancellationToken::new(),
        )
        .await;

        assert_matches!(result, Err(ScriptError));
        assert_eq!(handler.subjects.lock().len(), 1);
        assert_eq!(connector.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_rebind_is_terminal() {
        let mut connector = ScriptedConnector::new(vec![Step::TimeOut, Step::Close]);
        connector.fail_bind_after = Some(1);
        let handler = RecordingHandler::default();

        let result = consume_with_reconnect(
            &connector,
            "fhirhose-patient-polled",
            "fhirhose",
            &handler,
            fast_policy(),
            &CancellationToken::new(),
        )
        .await;

        assert_matches!(result, Err(ScriptError));
        assert_eq!(connector.binds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_releases_binding() {
        let connector = ScriptedConnector::new(vec![Step::Hang]);
        let handler = RecordingHandler::default();
        let shutdown = CancellationToken::new();
        let policy = ReconnectPolicy {
            fetch_timeout: Duration::from_secs(60),
            ..fast_policy()
        };

        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            consume_with_reconnect(
                &connector,
                "fhirhose-patient-polled",
                "fhirhose",
                &handler,
                policy,
                &shutdown,
            ),
        )
        .await
        .expect("consume should stop on shutdown");

        assert_matches!(result, Ok(()));
        assert_eq!(connector.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = ReconnectPolicy {
            fetch_timeout: Duration::from_secs(1),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };

        assert!(policy.backoff(1) >= Duration::from_millis(100));
        assert!(policy.backoff(1) <= Duration::from_millis(110));
        assert!(policy.backoff(3) >= Duration::from_millis(400));
        assert_eq!(policy.backoff(10), Duration::from_secs(1));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(1));
    }
}
