//! Bus wire format
//!
//! Every frame is a single text record with fields in fixed order:
//!
//! ```text
//! topic:<topic-name>|type:<plain|json>|created:<unix-seconds>|content:<payload>
//! ```
//!
//! Field order and delimiters are shared with every process on the bus, so
//! topics must not contain `|`. Content may, since it is always last.

use crate::error::{BusError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Plain,
    Json,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Json => "json",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            other => Err(BusError::protocol(format!("unknown message type '{}'", other))),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded bus frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub topic: String,
    pub message_type: MessageType,
    /// Unix seconds at publish time
    pub created: i64,
    pub content: String,
}

impl WireMessage {
    pub fn plain(topic: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            message_type: MessageType::Plain,
            created: chrono::Utc::now().timestamp(),
            content: content.into(),
        }
    }

    /// Already serialized JSON document
    pub fn json_raw(topic: impl Into<String>, json: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            message_type: MessageType::Json,
            created: chrono::Utc::now().timestamp(),
            content: json.into(),
        }
    }

    pub fn json<T: Serialize + ?Sized>(topic: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self::json_raw(topic, serde_json::to_string(value)?))
    }

    pub fn encode(&self) -> Result<Bytes> {
        validate_topic(&self.topic)?;
        Ok(Bytes::from(format!(
            "topic:{}|type:{}|created:{}|content:{}",
            self.topic, self.message_type, self.created, self.content
        )))
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(frame)
            .map_err(|_| BusError::protocol("frame is not valid UTF-8"))?;

        let mut fields = text.splitn(4, '|');
        let topic = field(fields.next(), "topic")?;
        let message_type = MessageType::parse(field(fields.next(), "type")?)?;
        let created = field(fields.next(), "created")?
            .parse::<i64>()
            .map_err(|_| BusError::protocol("created is not a unix timestamp"))?;
        let content = field(fields.next(), "content")?;

        Ok(Self {
            topic: topic.to_string(),
            message_type,
            created,
            content: content.to_string(),
        })
    }

    /// Raw content regardless of type
    pub fn plain_content(&self) -> &str {
        &self.content
    }

    /// JSON document carried by a `type:json` frame
    pub fn json_content(&self) -> Result<&str> {
        match self.message_type {
            MessageType::Json => Ok(&self.content),
            MessageType::Plain => Err(BusError::protocol(format!(
                "payload on topic '{}' is not JSON",
                self.topic
            ))),
        }
    }

    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(self.json_content()?)?)
    }

    pub fn has_topic_prefix(&self, prefix: &str) -> bool {
        self.topic.starts_with(prefix)
    }
}

fn field<'a>(raw: Option<&'a str>, name: &str) -> Result<&'a str> {
    raw.and_then(|f| f.strip_prefix(name))
        .and_then(|f| f.strip_prefix(':'))
        .ok_or_else(|| BusError::protocol(format!("missing '{}' field", name)))
}

pub(crate) fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() || topic.contains('|') {
        return Err(BusError::protocol(format!("invalid topic '{}'", topic)));
    }
    Ok(())
}

/// Frame prefix a directed subscriber registers for `topic`
pub fn subscription_prefix(topic: &str) -> String {
    format!("topic:{}|", topic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_round_trip() {
        let message = WireMessage::plain("peers-heartbeat", "master-1:55655");
        let decoded = WireMessage::decode(&message.encode().unwrap()).unwrap();

        assert_eq!(decoded.topic, "peers-heartbeat");
        assert_eq!(decoded.message_type, MessageType::Plain);
        assert_eq!(decoded.plain_content(), "master-1:55655");
        assert_eq!(decoded.created, message.created);
    }

    #[test]
    fn test_exact_frame_layout() {
        let message = WireMessage {
            topic: "checks-refetch".to_string(),
            message_type: MessageType::Json,
            created: 1_500_000_000,
            content: r#"{"a":1}"#.to_string(),
        };

        assert_eq!(
            &message.encode().unwrap()[..],
            br#"topic:checks-refetch|type:json|created:1500000000|content:{"a":1}"#
        );
    }

    #[test]
    fn test_content_may_contain_delimiters() {
        let frame = b"topic:t|type:plain|created:1|content:a|b:c|d";
        let decoded = WireMessage::decode(frame).unwrap();
        assert_eq!(decoded.content, "a|b:c|d");
    }

    #[test]
    fn test_json_content() {
        let message = WireMessage::json("metric-/free.Swap.Free", &json!({"Value": 0})).unwrap();
        let value: serde_json::Value = message.content_as().unwrap();
        assert_eq!(value["Value"], 0);

        let plain = WireMessage::plain("t", "{}");
        assert!(plain.json_content().is_err());
    }

    #[test]
    fn test_malformed_frames_rejected() {
        for frame in [
            &b"hello"[..],
            b"topic:t|type:xml|created:1|content:x",
            b"topic:t|type:plain|created:soon|content:x",
            b"topic:t|type:plain|created:1",
            b"type:plain|topic:t|created:1|content:x",
            &[0xff, 0xfe],
        ] {
            assert!(WireMessage::decode(frame).is_err(), "{:?}", frame);
        }
    }

    #[test]
    fn test_topic_with_delimiter_rejected() {
        assert!(WireMessage::plain("a|b", "x").encode().is_err());
        assert!(WireMessage::plain("", "x").encode().is_err());
    }

    #[test]
    fn test_subscription_prefix_is_exact_topic() {
        let frame = WireMessage::plain("metric-cpu", "1").encode().unwrap();
        assert!(frame.starts_with(subscription_prefix("metric-cpu").as_bytes()));
        assert!(!frame.starts_with(subscription_prefix("metric-c").as_bytes()));
    }
}
