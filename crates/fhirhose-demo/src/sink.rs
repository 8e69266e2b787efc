use std::path::PathBuf;

use async_trait::async_trait;
use fhirhose::{BoxError, StreamMessage, UploadHandler};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Appends every uploaded record to a file, one JSON object per line.
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl UploadHandler for JsonLinesSink {
    async fn handle(&self, batch: Vec<StreamMessage>) -> Result<(), BoxError> {
        let mut lines = Vec::new();
        for message in &batch {
            serde_json::to_writer(&mut lines, message)?;
            lines.push(b'\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&lines).await?;
        file.flush().await?;

        info!(size = batch.len(), path = %self.path.display(), "uploaded batch");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use uuid::Uuid;

    #[tokio::test]
    async fn test_appends_json_lines() {
        let path = std::env::temp_dir().join(format!("fhirhose-{}.jsonl", Uuid::new_v4()));
        let sink = JsonLinesSink::new(path.clone());

        sink.handle(vec![StreamMessage::new("a", "1"), StreamMessage::new("b", "2")])
            .await
            .unwrap();
        sink.handle(vec![StreamMessage::new("c", "3")]).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        let identifiers: Vec<String> = written
            .lines()
            .map(|line| {
                let message: StreamMessage = serde_json::from_str(line).unwrap();
                message.identifier
            })
            .collect();
        assert_eq!(identifiers, ["a", "b", "c"]);

        tokio::fs::remove_file(&path).await.ok();
    }
}
