//! Streaming ETL pipelines over a message broker.
//!
//! Each [`Stream`] supplies the business logic for four ordered stages. A poll loop publishes
//! `polled` events, and durable consumers for the retrieve, transform and upload stages pick
//! them up and republish the result for the next stage. Finished records are batched into an
//! [`UploadHandler`] and stage failures are forwarded to an [`ErrorHandler`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod batch;
mod client;
mod config;
mod dedup;
mod error;
mod forwarder;
mod message;
mod poller;
mod register;
mod sink;
mod stage;
mod stream;
mod subject;

pub use batch::{UploadBatch, UploadHandler};
pub use client::{Client, ClientOptions};
pub use config::{Config, DEFAULT_UPLOAD_BATCH_SIZE, UPLOAD_FLUSH_INTERVAL};
pub use dedup::deduplicate_identifiers;
pub use error::{Error, PipelineError, Result};
pub use forwarder::ErrorHandler;
pub use message::StreamMessage;
pub use poller::Poller;
pub use register::{PubSubRegister, Register, RegisterContext};
pub use sink::{HANDOFF_CAPACITY, Sinks};
pub use stage::{Stage, StageHandler, spawn_consumer};
pub use stream::{PollOutcome, Stream, StreamName, UploadOutcome};
pub use subject::{
    Action, DEFAULT_STREAM_NAME, LoadClass, consume_group, extract_identifier, filter_subject,
    publish_subject,
};

pub use fhirhose_pubsub::BoxError;
