use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipChange {
    Added,
    Removed,
}

/// One recipient's share of a posted message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationIntent {
    pub recipient_id: Uuid,
    pub sender_id: Uuid,
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub title: String,
    pub preview: String,
}

/// Payload handed to the push/email gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushNotification {
    pub recipient_id: Uuid,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

impl From<NotificationIntent> for PushNotification {
    fn from(intent: NotificationIntent) -> Self {
        PushNotification {
            recipient_id: intent.recipient_id,
            title: intent.title,
            body: intent.preview,
            data: serde_json::json!({
                "kind": "new_message",
                "conversation_id": intent.conversation_id,
                "message_id": intent.message_id,
                "sender_id": intent.sender_id,
            }),
        }
    }
}
