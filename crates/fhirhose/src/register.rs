use crate::config::Config;
use crate::poller::Poller;
use crate::sink::Sinks;
use crate::stage::{Stage, spawn_consumer};
use crate::stream::Stream;
use crate::subject::LoadClass;

use std::sync::Arc;

use fhirhose_pubsub::PubSub;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Everything a register needs to spawn stage tasks.
#[derive(Clone, Debug)]
pub struct RegisterContext<P>
where
    P: PubSub,
{
    /// Normalized configuration.
    pub config: Arc<Config>,

    /// Broker the stage tasks talk through.
    pub pubsub: P,

    /// Cancelled when the client shuts down.
    pub shutdown: CancellationToken,

    /// Error and upload queues.
    pub sinks: Sinks,

    /// Tracks every spawned task.
    pub task_tracker: TaskTracker,
}

/// Spawns the tasks of each stage. Every method returns once its tasks are spawned.
///
/// The client calls `transformers`, `uploaders` and `retrievers` once per worker, in that order,
/// then `pollers` once if polling is enabled. Tasks may clone the context, but the register
/// itself must not keep it, since the error forwarder runs until every clone is dropped.
pub trait Register<P>
where
    Self: Send + Sync + 'static,
    P: PubSub,
{
    /// Spawns retrieve consumers.
    fn retrievers(&self, context: &RegisterContext<P>, streams: &[Arc<dyn Stream>]);

    /// Spawns transform consumers.
    fn transformers(&self, context: &RegisterContext<P>, streams: &[Arc<dyn Stream>]);

    /// Spawns upload consumers.
    fn uploaders(&self, context: &RegisterContext<P>, streams: &[Arc<dyn Stream>]);

    /// Spawns poll loops.
    fn pollers(&self, context: &RegisterContext<P>, streams: &[Arc<dyn Stream>]);
}

/// Spawns one consumer per stream and load class for each call, and one poll loop per stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct PubSubRegister;

impl PubSubRegister {
    fn consumers<P>(context: &RegisterContext<P>, streams: &[Arc<dyn Stream>], stage: Stage)
    where
        P: PubSub,
    {
        for stream in streams {
            for load_class in LoadClass::ALL {
                spawn_consumer(context, stream, stage, load_class);
            }
        }
    }
}

impl<P> Register<P> for PubSubRegister
where
    P: PubSub,
{
    fn retrievers(&self, context: &RegisterContext<P>, streams: &[Arc<dyn Stream>]) {
        Self::consumers(context, streams, Stage::Retrieve);
    }

    fn transformers(&self, context: &RegisterContext<P>, streams: &[Arc<dyn Stream>]) {
        Self::consumers(context, streams, Stage::Transform);
    }

    fn uploaders(&self, context: &RegisterContext<P>, streams: &[Arc<dyn Stream>]) {
        Self::consumers(context, streams, Stage::Upload);
    }

    fn pollers(&self, context: &RegisterContext<P>, streams: &[Arc<dyn Stream>]) {
        for stream in streams {
            let poller = Poller::new(context, stream.clone());
            context.task_tracker.spawn(poller.run());
        }
    }
}
