use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The unit of work passed between pipeline stages.
///
/// On the wire this is JSON of the form `{"Identifier": .., "Description": .., "Data": ..}`
/// with `Data` base64 encoded.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamMessage {
    /// Stable identity of the record across all stages.
    pub identifier: String,

    /// Human readable label.
    #[serde(default)]
    pub description: String,

    /// Stage specific payload.
    #[serde(default, with = "base64_data")]
    pub data: Bytes,
}

impl StreamMessage {
    /// Creates a message with an empty description.
    pub fn new(identifier: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            identifier: identifier.into(),
            description: String::new(),
            data: data.into(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl TryFrom<Bytes> for StreamMessage {
    type Error = serde_json::Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        serde_json::from_slice(&bytes)
    }
}

impl TryFrom<StreamMessage> for Bytes {
    type Error = serde_json::Error;

    fn try_from(message: StreamMessage) -> Result<Self, Self::Error> {
        serde_json::to_vec(&message).map(Self::from)
    }
}

mod base64_data {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    // `null` is accepted for producers that encode an absent payload that way.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map_or_else(
                || Ok(Vec::new()),
                |encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom),
            )
            .map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let message = StreamMessage::new("abc123", "hi").with_description("patient abc123");

        let bytes: Bytes = message.clone().try_into().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "Identifier": "abc123",
                "Description": "patient abc123",
                "Data": "aGk=",
            })
        );
        assert_eq!(StreamMessage::try_from(bytes).unwrap(), message);
    }

    #[test]
    fn test_missing_and_null_data() {
        let message =
            StreamMessage::try_from(Bytes::from(r#"{"Identifier":"a","Data":null}"#)).unwrap();
        assert_eq!(message.identifier, "a");
        assert!(message.data.is_empty());
        assert!(message.description.is_empty());

        let message = StreamMessage::try_from(Bytes::from(r#"{"Identifier":"b"}"#)).unwrap();
        assert!(message.data.is_empty());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(StreamMessage::try_from(Bytes::from_static(b"not json")).is_err());
        assert!(
            StreamMessage::try_from(Bytes::from(r#"{"Identifier":"a","Data":"%%%"}"#)).is_err()
        );
    }
}
