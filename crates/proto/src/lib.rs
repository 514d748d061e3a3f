use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const PROTOCOL_VERSION: u16 = 1;
pub const MAX_EVENT_LEN: usize = 64 * 1024;

#[derive(Debug)]
pub enum CodecError {
    Malformed,
    UnknownType,
    EventTooLarge,
    Serialization,
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed event envelope"),
            Self::UnknownType => write!(f, "unknown event type"),
            Self::EventTooLarge => write!(f, "event exceeds limits"),
            Self::Serialization => write!(f, "event serialization failure"),
        }
    }
}

impl Error for CodecError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBody {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationBody {
    pub contact: UserBody,
    pub last_message: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactBody {
    pub owner_id: i64,
    pub contact_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeBody {
    pub user_id: i64,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptBody {
    pub message_id: i64,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingBody {
    pub sender_id: i64,
    pub is_typing: bool,
}

/// Events a client may submit over the live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Authenticate { user_id: i64 },
    Message { receiver_id: i64, content: String },
    ReadReceipt { message_id: i64 },
    Typing { receiver_id: i64, is_typing: bool },
}

/// Events the server pushes to live connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    StatusChange(StatusChangeBody),
    Message(MessageBody),
    MessageSent(MessageBody),
    ReadReceipt(ReadReceiptBody),
    Typing(TypingBody),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticatePayload {
    user_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePayload {
    receiver_id: i64,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadReceiptPayload {
    message_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    receiver_id: i64,
    is_typing: bool,
}

/// Decodes one inbound `{type, payload}` envelope into a typed event.
pub fn decode_client_event(raw: &str) -> Result<ClientEvent, CodecError> {
    if raw.len() > MAX_EVENT_LEN {
        return Err(CodecError::EventTooLarge);
    }
    let envelope: Envelope = serde_json::from_str(raw).map_err(|_| CodecError::Malformed)?;
    match envelope.kind.as_str() {
        "authenticate" => {
            let payload: AuthenticatePayload =
                serde_json::from_value(envelope.payload).map_err(|_| CodecError::Malformed)?;
            Ok(ClientEvent::Authenticate {
                user_id: payload.user_id,
            })
        }
        "message" => {
            let payload: MessagePayload =
                serde_json::from_value(envelope.payload).map_err(|_| CodecError::Malformed)?;
            Ok(ClientEvent::Message {
                receiver_id: payload.receiver_id,
                content: payload.content,
            })
        }
        "read_receipt" => {
            let payload: ReadReceiptPayload =
                serde_json::from_value(envelope.payload).map_err(|_| CodecError::Malformed)?;
            Ok(ClientEvent::ReadReceipt {
                message_id: payload.message_id,
            })
        }
        "typing" => {
            let payload: TypingPayload =
                serde_json::from_value(envelope.payload).map_err(|_| CodecError::Malformed)?;
            Ok(ClientEvent::Typing {
                receiver_id: payload.receiver_id,
                is_typing: payload.is_typing,
            })
        }
        _ => Err(CodecError::UnknownType),
    }
}

/// Serializes an outbound event into its `{type, payload}` envelope.
pub fn encode_server_event(event: &ServerEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|_| CodecError::Serialization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn decode_authenticate() {
        let event = decode_client_event(r#"{"type":"authenticate","payload":{"userId":7}}"#)
            .expect("decode");
        assert_eq!(event, ClientEvent::Authenticate { user_id: 7 });
    }

    #[test]
    fn decode_message() {
        let event = decode_client_event(
            r#"{"type":"message","payload":{"receiverId":2,"content":"hi"}}"#,
        )
        .expect("decode");
        assert_eq!(
            event,
            ClientEvent::Message {
                receiver_id: 2,
                content: "hi".to_string(),
            }
        );
    }

    #[test]
    fn decode_typing() {
        let event = decode_client_event(
            r#"{"type":"typing","payload":{"receiverId":4,"isTyping":true}}"#,
        )
        .expect("decode");
        assert_eq!(
            event,
            ClientEvent::Typing {
                receiver_id: 4,
                is_typing: true,
            }
        );
    }

    #[test]
    fn decode_read_receipt() {
        let event = decode_client_event(r#"{"type":"read_receipt","payload":{"messageId":41}}"#)
            .expect("decode");
        assert_eq!(event, ClientEvent::ReadReceipt { message_id: 41 });
    }

    #[test]
    fn unknown_type_is_distinguished() {
        let error = decode_client_event(r#"{"type":"shrug","payload":{}}"#).unwrap_err();
        assert!(matches!(error, CodecError::UnknownType));
    }

    #[test]
    fn malformed_payload_rejected() {
        let error = decode_client_event(r#"{"type":"message","payload":{"receiverId":"nope"}}"#)
            .unwrap_err();
        assert!(matches!(error, CodecError::Malformed));
        let error = decode_client_event("not json at all").unwrap_err();
        assert!(matches!(error, CodecError::Malformed));
    }

    #[test]
    fn oversized_event_rejected() {
        let padding = "x".repeat(MAX_EVENT_LEN);
        let raw = format!(r#"{{"type":"message","payload":{{"content":"{}"}}}}"#, padding);
        let error = decode_client_event(&raw).unwrap_err();
        assert!(matches!(error, CodecError::EventTooLarge));
    }

    #[test]
    fn encode_message_event_uses_wire_names() {
        let event = ServerEvent::Message(MessageBody {
            id: 9,
            sender_id: 1,
            receiver_id: 2,
            content: "hi".to_string(),
            created_at: sample_timestamp(),
            is_read: false,
            read_at: None,
        });
        let encoded = encode_server_event(&event).expect("encode");
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["payload"]["senderId"], 1);
        assert_eq!(value["payload"]["receiverId"], 2);
        assert_eq!(value["payload"]["isRead"], false);
        assert!(value["payload"].get("readAt").is_none());
    }

    #[test]
    fn encode_status_change() {
        let event = ServerEvent::StatusChange(StatusChangeBody {
            user_id: 3,
            is_online: false,
        });
        let encoded = encode_server_event(&event).expect("encode");
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "status_change");
        assert_eq!(value["payload"]["userId"], 3);
        assert_eq!(value["payload"]["isOnline"], false);
    }

    #[test]
    fn server_event_roundtrip() {
        let event = ServerEvent::ReadReceipt(ReadReceiptBody {
            message_id: 41,
            read_at: sample_timestamp(),
        });
        let encoded = encode_server_event(&event).expect("encode");
        let decoded: ServerEvent = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, event);
    }
}
