// Chat message wire model shared by publishers, the relay, and history readers.
use super::{Error, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// An immutable chat message as it travels on the bus and in history replies.
///
/// The channel is carried by the routing key; `chat_name` is informational.
///
/// ```
/// use bunny_common::Message;
/// use chrono::Utc;
///
/// let msg = Message::new("alice", "hi", Utc::now()).expect("message");
/// let bytes = msg.encode().expect("encode");
/// let json: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
/// assert_eq!(json["username"], "alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    #[serde(rename = "username")]
    pub sender: String,
    #[serde(default)]
    pub body: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let sender = sender.into();
        if sender.trim().is_empty() {
            return Err(Error::MalformedPayload("username is empty".to_string()));
        }
        Ok(Self {
            sender,
            body: body.into(),
            timestamp,
            chat_name: None,
        })
    }

    pub fn with_chat_name(mut self, chat_name: impl Into<String>) -> Self {
        self.chat_name = Some(chat_name.into());
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| Error::MalformedPayload(err.to_string()))
    }
}

/// Body of a history reply: the requested channel and its newest messages,
/// oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    pub chat: String,
    pub messages: Vec<Message>,
}

/// A message as decoded from a bus delivery, before the receiver stamps it.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub username: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chat_name: Option<String>,
}

impl InboundMessage {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let inbound: Self = serde_json::from_slice(payload)
            .map_err(|err| Error::MalformedPayload(err.to_string()))?;
        if inbound.username.trim().is_empty() {
            return Err(Error::MalformedPayload("username is empty".to_string()));
        }
        Ok(inbound)
    }

    // Zero-valued timestamps (`0001-01-01T00:00:00Z`) count as absent.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.filter(|ts| ts.year() > 1)
    }

    /// Finish decoding, stamping `received_at` when the publisher sent no time.
    pub fn into_message(self, received_at: DateTime<Utc>) -> Message {
        let timestamp = self.timestamp().unwrap_or(received_at);
        Message {
            sender: self.username,
            body: self.body,
            timestamp,
            chat_name: self.chat_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encode_uses_wire_field_names() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let msg = Message::new("alice", "hello", ts)
            .expect("message")
            .with_chat_name("lobby");
        let json: serde_json::Value =
            serde_json::from_slice(&msg.encode().expect("encode")).expect("json");
        assert_eq!(json["username"], "alice");
        assert_eq!(json["body"], "hello");
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00Z");
        assert_eq!(json["chat_name"], "lobby");
    }

    #[test]
    fn chat_name_is_omitted_when_absent() {
        let msg = Message::new("alice", "", Utc::now()).expect("message");
        let json: serde_json::Value =
            serde_json::from_slice(&msg.encode().expect("encode")).expect("json");
        assert!(json.get("chat_name").is_none());
        assert_eq!(json["body"], "");
    }

    #[test]
    fn empty_sender_is_rejected() {
        assert!(matches!(
            Message::new("  ", "body", Utc::now()),
            Err(Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn decode_keeps_publisher_timestamp() {
        let payload = br#"{"username":"bob","body":"hi","timestamp":"2024-05-01T12:00:00Z"}"#;
        let inbound = InboundMessage::decode(payload).expect("decode");
        let received = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let msg = inbound.into_message(received);
        assert_eq!(msg.sender, "bob");
        assert_eq!(
            msg.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn missing_timestamp_uses_receive_time() {
        let inbound = InboundMessage::decode(br#"{"username":"bob","body":"hi"}"#).expect("decode");
        assert!(inbound.timestamp().is_none());
        let received = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(inbound.into_message(received).timestamp, received);
    }

    #[test]
    fn zero_timestamp_counts_as_missing() {
        let payload = br#"{"username":"bob","body":"hi","timestamp":"0001-01-01T00:00:00Z"}"#;
        let inbound = InboundMessage::decode(payload).expect("decode");
        assert!(inbound.timestamp().is_none());
    }

    #[test]
    fn body_defaults_to_empty() {
        let inbound = InboundMessage::decode(br#"{"username":"bob"}"#).expect("decode");
        assert_eq!(inbound.body, "");
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        for payload in [
            &b"not json"[..],
            br#"{"body":"no user"}"#,
            br#"{"username":"","body":"x"}"#,
            br#"{"username":"bob","timestamp":"yesterday"}"#,
        ] {
            assert!(matches!(
                InboundMessage::decode(payload),
                Err(Error::MalformedPayload(_))
            ));
        }
    }
}
