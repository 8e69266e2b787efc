//! Runs synthetic streams through a NATS-backed fhirhose pipeline.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod sink;
mod synthetic;

use error::{Error, Result};
use sink::JsonLinesSink;
use synthetic::SyntheticStream;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fhirhose::{
    Action, Client, ClientOptions, Config, DEFAULT_STREAM_NAME, LoadClass, PipelineError, Stream,
    StreamName, consume_group, filter_subject,
};
use fhirhose_pubsub::ReconnectPolicy;
use fhirhose_pubsub_nats::{NatsPubSub, NatsPubSubOptions};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// NATS server address
    #[arg(long, env = "NATS_URL", default_value = "nats://localhost:4222")]
    nats_url: String,

    /// Names of the synthetic streams to run
    #[arg(
        long,
        env = "FHIRHOSE_STREAMS",
        value_delimiter = ',',
        default_value = "patient,observation"
    )]
    streams: Vec<String>,

    /// Milliseconds between polls
    #[arg(long, env = "FHIRHOSE_POLL_INTERVAL_MS", default_value_t = 5000)]
    poll_interval_ms: u64,

    /// Skip the poll loops and only run the consumers
    #[arg(long, env = "FHIRHOSE_POLL_DISABLED")]
    no_poll: bool,

    /// Drop repeated identifiers within one poll
    #[arg(long, env = "FHIRHOSE_DEDUPLICATION")]
    dedup: bool,

    /// Consumers per stage, stream and load class
    #[arg(long, env = "FHIRHOSE_WORKERS", default_value_t = 3)]
    workers: usize,

    /// Maximum polled publishes per second
    #[arg(long, env = "FHIRHOSE_THROTTLE")]
    throttle: Option<u64>,

    /// Upload batch size
    #[arg(long, env = "FHIRHOSE_UPLOAD_BATCH_SIZE", default_value_t = 50)]
    upload_batch_size: usize,

    /// New records produced per poll
    #[arg(long, env = "FHIRHOSE_RECORDS_PER_POLL", default_value_t = 5)]
    records_per_poll: u64,

    /// Flag every n-th poll as a bulk load (0 never does)
    #[arg(long, env = "FHIRHOSE_CUSTOM_LOAD_EVERY", default_value_t = 0)]
    custom_load_every: u64,

    /// File the uploaded records are appended to
    #[arg(long, env = "FHIRHOSE_OUTPUT", default_value = "fhirhose-uploads.jsonl")]
    output: PathBuf,

    /// Create the JetStream stream and durable consumers before starting
    #[arg(long, env = "FHIRHOSE_PROVISION")]
    provision: bool,

    /// Seconds a consumer may sit idle before it reconnects
    #[arg(long, env = "FHIRHOSE_FETCH_TIMEOUT_SECS", default_value_t = 3600)]
    fetch_timeout_secs: u64,
}

async fn provision(pubsub: &NatsPubSub, streams: &[String]) -> Result<()> {
    pubsub
        .ensure_stream(
            DEFAULT_STREAM_NAME,
            LoadClass::ALL.map(|load_class| format!("{load_class}.>")),
        )
        .await?;

    for stream in streams {
        let stream = StreamName::from(stream.as_str());

        for load_class in LoadClass::ALL {
            for action in [Action::Polled, Action::Retrieved, Action::Transformed] {
                pubsub
                    .ensure_consumer(
                        DEFAULT_STREAM_NAME,
                        &consume_group(&stream, load_class, action),
                        &filter_subject(&stream, load_class, action),
                    )
                    .await?;
            }
        }
    }

    Ok(())
}

#[tokio::main(worker_threads = 8)]
async fn main() -> Result<()> {
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(Level::INFO)
            .finish(),
    )?;

    let args = Args::parse();

    let client = async_nats::connect(&args.nats_url).await?;
    let pubsub = NatsPubSub::new(NatsPubSubOptions {
        client,
        url: args.nats_url.clone(),
        reconnect: ReconnectPolicy {
            fetch_timeout: Duration::from_secs(args.fetch_timeout_secs),
            ..ReconnectPolicy::default()
        },
    });

    if args.provision {
        provision(&pubsub, &args.streams).await?;
    }

    let streams: Vec<Arc<dyn Stream>> = args
        .streams
        .iter()
        .map(|name| {
            Arc::new(SyntheticStream::new(
                name.clone(),
                args.records_per_poll,
                args.custom_load_every,
            )) as Arc<dyn Stream>
        })
        .collect();

    let fhirhose = Client::new(ClientOptions {
        config: Config {
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            deduplication_enabled: args.dedup,
            worker_amount: args.workers,
            throttle_amount: args.throttle,
            upload_batch_size: args.upload_batch_size,
            poll_enabled: !args.no_poll,
            stream_name: DEFAULT_STREAM_NAME.to_string(),
        },
        error_handler: Some(Arc::new(|error: PipelineError| {
            error!(
                stream = ?error.stream,
                action = %error.action,
                id = ?error.message.as_ref().map(|message| message.identifier.clone()),
                error = %error.source,
                "pipeline error"
            );
        })),
        pubsub,
        streams,
        upload_handler: Some(Arc::new(JsonLinesSink::new(args.output.clone()))),
    });

    fhirhose.start()?;

    info!(output = %args.output.display(), "fhirhose demo running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await.map_err(Error::Signal)?;

    fhirhose.shutdown().await;

    Ok(())
}
