use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::modules::{
    attachment::model::{AttachmentResponse, NewAttachment},
    message::schema::MessageEntity,
    user::model::UserSummary,
};

pub const MAX_CONTENT_CHARS: usize = 4000;
pub const PREVIEW_CHARS: usize = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 30;

#[derive(Debug, Clone)]
pub struct InsertMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub is_system_message: bool,
    pub replied_to_id: Option<Uuid>,
    pub attachments: Vec<NewAttachment>,
}

impl InsertMessage {
    pub fn system(conversation_id: Uuid, actor_id: Uuid, text: String) -> Self {
        InsertMessage {
            conversation_id,
            sender_id: actor_id,
            content: Some(text),
            is_system_message: true,
            replied_to_id: None,
            attachments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    #[serde(default)]
    #[validate(length(max = 10, message = "At most 10 attachments per message"), nested)]
    pub attachments: Vec<NewAttachment>,
    pub replied_to_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EditMessageRequest {
    #[validate(length(min = 1, message = "Content cannot be empty"))]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MessageQueryRequest {
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<i64>,
    /// `seq` of the oldest message the client already has.
    pub cursor: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyPreview {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: Option<String>,
    pub content: Option<String>,
    pub is_removed: bool,
}

impl ReplyPreview {
    pub fn new(target: &MessageEntity, sender: Option<&UserSummary>) -> Self {
        ReplyPreview {
            message_id: target.id,
            sender_id: target.sender_id,
            sender_name: sender.map(|s| s.display_name.clone()),
            content: target.formatted_content().map(|c| truncate_preview(&c, PREVIEW_CHARS)),
            is_removed: target.is_removed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub seq: i64,
    pub sender: Option<UserSummary>,
    pub content: Option<String>,
    pub is_system_message: bool,
    pub is_removed: bool,
    pub is_edited: bool,
    pub reply: Option<ReplyPreview>,
    pub attachments: Vec<AttachmentResponse>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetMessageResponse {
    pub messages: Vec<MessageResponse>,
    pub cursor: Option<i64>,
}

/// Cuts `text` to at most `max_chars` characters, marking the cut with "...".
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}
