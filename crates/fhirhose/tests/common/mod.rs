#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fhirhose::{
    Action, BoxError, DEFAULT_STREAM_NAME, LoadClass, PipelineError, PollOutcome, Stream,
    StreamMessage, StreamName, UploadOutcome, consume_group, filter_subject,
};
use fhirhose_pubsub_memory::MemoryPubSub;
use parking_lot::Mutex;

/// A stream driven by a script of poll results.
///
/// Transform upper-cases the payload. Upload keeps everything whose identifier does not start
/// with `skip`.
#[derive(Default)]
pub struct ScriptedStream {
    pub name: String,
    pub polls: Mutex<VecDeque<Result<PollOutcome, String>>>,
    pub fail_retrieve: HashSet<String>,
    pub fail_transform: HashSet<String>,
    pub fail_upload: HashSet<String>,
    pub retrieved: Mutex<Vec<String>>,
}

impl ScriptedStream {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn failing_retrieve(mut self, identifier: &str) -> Self {
        self.fail_retrieve.insert(identifier.to_string());
        self
    }

    pub fn failing_transform(mut self, identifier: &str) -> Self {
        self.fail_transform.insert(identifier.to_string());
        self
    }

    pub fn failing_upload(mut self, identifier: &str) -> Self {
        self.fail_upload.insert(identifier.to_string());
        self
    }

    pub fn with_poll(self, messages: Vec<StreamMessage>, custom_load: bool) -> Self {
        self.polls.lock().push_back(Ok(PollOutcome {
            messages,
            custom_load,
        }));
        self
    }

    pub fn with_failing_poll(self, reason: &str) -> Self {
        self.polls.lock().push_back(Err(reason.to_string()));
        self
    }
}

#[async_trait]
impl Stream for ScriptedStream {
    fn name(&self) -> StreamName {
        StreamName::new(self.name.clone())
    }

    async fn poll(&self) -> Result<PollOutcome, BoxError> {
        match self.polls.lock().pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(reason)) => Err(reason.into()),
            None => Ok(PollOutcome::default()),
        }
    }

    async fn retrieve(&self, message: StreamMessage) -> Result<StreamMessage, BoxError> {
        self.retrieved.lock().push(message.identifier.clone());

        if self.fail_retrieve.contains(&message.identifier) {
            return Err(format!("can't retrieve {}", message.identifier).into());
        }

        Ok(message.with_description("retrieved"))
    }

    async fn transform(&self, message: StreamMessage) -> Result<StreamMessage, BoxError> {
        if self.fail_transform.contains(&message.identifier) {
            return Err(format!("can't transform {}", message.identifier).into());
        }

        let data = Bytes::from(message.data.to_ascii_uppercase());

        Ok(StreamMessage { data, ..message })
    }

    async fn upload(&self, message: StreamMessage) -> Result<UploadOutcome, BoxError> {
        if self.fail_upload.contains(&message.identifier) {
            return Err(format!("can't upload {}", message.identifier).into());
        }

        let should_upload = !message.identifier.starts_with("skip");

        Ok(UploadOutcome {
            message,
            should_upload,
        })
    }
}

/// Creates every durable consumer group the engine binds for `stream`.
pub fn provision(broker: &MemoryPubSub, stream: &str) {
    let stream = StreamName::from(stream);

    for load_class in LoadClass::ALL {
        for action in [Action::Polled, Action::Retrieved, Action::Transformed] {
            broker.add_consumer(
                DEFAULT_STREAM_NAME,
                consume_group(&stream, load_class, action),
                filter_subject(&stream, load_class, action),
            );
        }
    }
}

pub fn message(identifier: &str, data: &'static str) -> StreamMessage {
    StreamMessage::new(identifier, data)
}

pub fn encode(message: StreamMessage) -> Bytes {
    message.try_into().unwrap()
}

/// Collects everything the error handler receives.
pub fn error_collector() -> (
    Arc<Mutex<Vec<PipelineError>>>,
    impl Fn(PipelineError) + Send + Sync + 'static,
) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let errors = errors.clone();
        move |error: PipelineError| errors.lock().push(error)
    };

    (errors, handler)
}

/// Collects every upload batch.
pub fn upload_collector() -> (
    Arc<Mutex<Vec<Vec<StreamMessage>>>>,
    impl Fn(Vec<StreamMessage>) -> Result<(), BoxError> + Send + Sync + 'static,
) {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let batches = batches.clone();
        move |batch: Vec<StreamMessage>| -> Result<(), BoxError> {
            batches.lock().push(batch);
            Ok(())
        }
    };

    (batches, handler)
}

/// Waits until `check` holds, panicking after a few seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
