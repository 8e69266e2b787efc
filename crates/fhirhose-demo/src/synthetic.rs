use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use fhirhose::{BoxError, PollOutcome, Stream, StreamMessage, StreamName, UploadOutcome};
use serde_json::{Value, json};

/// Generates fake records for one resource type.
///
/// Every poll yields `batch` new identifiers plus a repeat of the first one, and every
/// `custom_load_every`-th poll is flagged as a bulk load.
pub struct SyntheticStream {
    batch: u64,
    custom_load_every: u64,
    name: String,
    next_id: AtomicU64,
    polls: AtomicU64,
}

impl SyntheticStream {
    pub const fn new(name: String, batch: u64, custom_load_every: u64) -> Self {
        Self {
            batch,
            custom_load_every,
            name,
            next_id: AtomicU64::new(1),
            polls: AtomicU64::new(0),
        }
    }

    fn resource_type(&self) -> String {
        let mut chars = self.name.chars();
        chars.next().map_or_else(String::new, |first| {
            first.to_uppercase().chain(chars).collect()
        })
    }
}

fn decode(message: &StreamMessage) -> Result<Value, BoxError> {
    Ok(serde_json::from_slice(&message.data)?)
}

fn encode(message: StreamMessage, value: &Value) -> Result<StreamMessage, BoxError> {
    Ok(StreamMessage {
        data: Bytes::from(serde_json::to_vec(value)?),
        ..message
    })
}

#[async_trait]
impl Stream for SyntheticStream {
    fn name(&self) -> StreamName {
        StreamName::new(self.name.clone())
    }

    async fn poll(&self) -> Result<PollOutcome, BoxError> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        let first = self.next_id.fetch_add(self.batch, Ordering::SeqCst);

        let mut messages: Vec<StreamMessage> = (first..first + self.batch)
            .map(|id| {
                let identifier = format!("{}{id}", self.name);
                let data = json!({ "row": id });
                StreamMessage::new(identifier, data.to_string())
                    .with_description(format!("{} row {id}", self.name))
            })
            .collect();

        if let Some(repeat) = messages.first().cloned() {
            messages.push(repeat);
        }

        Ok(PollOutcome {
            messages,
            custom_load: self.custom_load_every > 0 && poll % self.custom_load_every == 0,
        })
    }

    async fn retrieve(&self, message: StreamMessage) -> Result<StreamMessage, BoxError> {
        let mut record = decode(&message)?;
        let fields = record.as_object_mut().ok_or("record is not a JSON object")?;
        fields.insert("source".to_string(), json!(self.name));
        fields.insert("retrieved".to_string(), json!(true));

        encode(message, &record)
    }

    async fn transform(&self, message: StreamMessage) -> Result<StreamMessage, BoxError> {
        let record = decode(&message)?;
        let resource = json!({
            "resourceType": self.resource_type(),
            "id": message.identifier,
            "meta": { "source": record["source"] },
            "extension": [{ "url": "row", "valueInteger": record["row"] }],
        });

        encode(message, &resource)
    }

    async fn upload(&self, message: StreamMessage) -> Result<UploadOutcome, BoxError> {
        Ok(UploadOutcome {
            message,
            should_upload: true,
        })
    }
}
