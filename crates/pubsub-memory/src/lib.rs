//! In-memory implementation of the pubsub crate.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod subject;

pub use error::Error;

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use fhirhose_pubsub::{
    Acknowledger, BoxError, ConsumerHandler, Delivery, Fetched, PubSub, PullBinding,
    PullConnector, ReconnectPolicy, SubscriptionHandle, SubscriptionHandler,
    consume_with_reconnect,
};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use subject::{is_publishable, subject_matches};

type Envelope = (String, Bytes);

/// Options for the in-memory broker.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryPubSubOptions {
    /// Deadlines and back-off used by `consume`.
    pub reconnect: ReconnectPolicy,
}

/// A durable consumer group: one queue shared by every consumer bound to it.
struct Group {
    stream: String,
    filter: String,
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<Envelope>>,
    acked: AtomicU64,
    active: AtomicUsize,
    binds: AtomicU64,
}

struct Subscriber {
    filter: String,
    sender: mpsc::UnboundedSender<Envelope>,
}

#[derive(Default)]
struct BrokerState {
    groups: Mutex<HashMap<String, Arc<Group>>>,
    published: Mutex<Vec<Envelope>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

/// An in-process broker with durable consumer groups and push subscriptions.
#[derive(Clone, Default)]
pub struct MemoryPubSub {
    options: MemoryPubSubOptions,
    state: Arc<BrokerState>,
}

impl Debug for MemoryPubSub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPubSub")
            .field("options", &self.options)
            .field("groups", &self.state.groups.lock().len())
            .finish_non_exhaustive()
    }
}

impl MemoryPubSub {
    /// Creates a new, empty broker.
    #[must_use]
    pub fn new(options: MemoryPubSubOptions) -> Self {
        Self {
            options,
            state: Arc::default(),
        }
    }

    /// Adds a durable consumer `group` on `stream` receiving every subject matching `filter`.
    ///
    /// Adding a group that already exists keeps the existing one.
    pub fn add_consumer(
        &self,
        stream: impl Into<String>,
        group: impl Into<String>,
        filter: impl Into<String>,
    ) {
        let (sender, receiver) = mpsc::unbounded_channel();

        self.state
            .groups
            .lock()
            .entry(group.into())
            .or_insert_with(|| {
                Arc::new(Group {
                    stream: stream.into(),
                    filter: filter.into(),
                    sender,
                    receiver: AsyncMutex::new(receiver),
                    acked: AtomicU64::new(0),
                    active: AtomicUsize::new(0),
                    binds: AtomicU64::new(0),
                })
            });
    }

    /// Every message published so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.state.published.lock().clone()
    }

    /// Number of acknowledgements recorded for `group`.
    #[must_use]
    pub fn acked(&self, group: &str) -> u64 {
        self.group(group)
            .map_or(0, |group| group.acked.load(Ordering::SeqCst))
    }

    /// Number of consumers currently bound to `group`.
    #[must_use]
    pub fn active_consumers(&self, group: &str) -> usize {
        self.group(group)
            .map_or(0, |group| group.active.load(Ordering::SeqCst))
    }

    /// Number of times a consumer bound to `group`, including rebinds.
    #[must_use]
    pub fn binds(&self, group: &str) -> u64 {
        self.group(group)
            .map_or(0, |group| group.binds.load(Ordering::SeqCst))
    }

    fn group(&self, group: &str) -> Option<Arc<Group>> {
        self.state.groups.lock().get(group).cloned()
    }
}

struct MemoryAcknowledger {
    group: Arc<Group>,
}

#[async_trait]
impl Acknowledger for MemoryAcknowledger {
    async fn ack(&self) -> Result<(), BoxError> {
        self.group.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A consumer bound to a memory group.
pub struct MemoryBinding {
    group: Arc<Group>,
}

impl Drop for MemoryBinding {
    fn drop(&mut self) {
        self.group.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PullBinding for MemoryBinding {
    type Error = Error;

    async fn fetch(&mut self) -> Result<Fetched, Self::Error> {
        let mut receiver = self.group.receiver.lock().await;

        Ok(match receiver.recv().await {
            Some((subject, payload)) => Fetched::Delivery(Delivery::new(
                subject,
                payload,
                MemoryAcknowledger {
                    group: self.group.clone(),
                },
            )),
            None => Fetched::Closed,
        })
    }

    async fn release(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[async_trait]
impl PullConnector for MemoryPubSub {
    type Error = Error;

    type Binding = MemoryBinding;

    async fn bind(&self, group: &str, stream: &str) -> Result<MemoryBinding, Error> {
        let found = self
            .group(group)
            .filter(|found| found.stream == stream)
            .ok_or_else(|| Error::UnknownConsumer {
                group: group.to_string(),
                stream: stream.to_string(),
            })?;

        found.binds.fetch_add(1, Ordering::SeqCst);
        found.active.fetch_add(1, Ordering::SeqCst);

        Ok(MemoryBinding { group: found })
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    type Error = Error;

    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), Self::Error> {
        if !is_publishable(&subject) {
            return Err(Error::InvalidSubject(subject));
        }

        self.state
            .published
            .lock()
            .push((subject.clone(), payload.clone()));

        for group in self.state.groups.lock().values() {
            if subject_matches(&group.filter, &subject) {
                // The group owns its receiver, so the queue never closes.
                group.sender.send((subject.clone(), payload.clone())).ok();
            }
        }

        let mut subscribers = self.state.subscribers.lock();
        subscribers.retain(|subscriber| !subscriber.sender.is_closed());
        for subscriber in subscribers.iter() {
            if subject_matches(&subscriber.filter, &subject) {
                subscriber
                    .sender
                    .send((subject.clone(), payload.clone()))
                    .ok();
            }
        }
        drop(subscribers);

        debug!(subject = %subject, "published");

        Ok(())
    }

    async fn subscribe<X>(
        &self,
        subject: String,
        handler: X,
    ) -> Result<SubscriptionHandle, Self::Error>
    where
        X: SubscriptionHandler,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let (handle, mut stop_receiver) = SubscriptionHandle::new();

        self.state.subscribers.lock().push(Subscriber {
            filter: subject,
            sender,
        });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_receiver.changed() => break,
                    message = receiver.recv() => match message {
                        Some((subject, payload)) => handler.handle(subject, payload).await,
                        None => break,
                    },
                }
            }
        });

        Ok(handle)
    }

    async fn consume<X>(
        &self,
        group: &str,
        stream: &str,
        handler: X,
        shutdown: CancellationToken,
    ) -> Result<(), Self::Error>
    where
        X: ConsumerHandler,
    {
        consume_with_reconnect(
            self,
            group,
            stream,
            &handler,
            self.options.reconnect,
            &shutdown,
        )
        .await
    }
}
