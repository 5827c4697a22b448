use sqlx::prelude::FromRow;
use uuid::Uuid;

use crate::modules::attachment::{
    model::{AttachableOwner, OwnerRef},
    schema::OwnerType,
};

pub const REMOVED_PLACEHOLDER: &str = "This message has been removed.";

#[derive(Debug, Clone, FromRow)]
pub struct MessageEntity {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub seq: i64,
    pub content: Option<String>,
    pub is_system_message: bool,
    pub is_removed: bool,
    pub is_edited: bool,
    pub replied_to_id: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl MessageEntity {
    /// Content as shown to readers. Removed messages never leak their text.
    pub fn formatted_content(&self) -> Option<String> {
        if self.is_removed {
            return Some(REMOVED_PLACEHOLDER.to_string());
        }
        self.content.clone()
    }
}

impl AttachableOwner for MessageEntity {
    fn owner_ref(&self) -> OwnerRef {
        OwnerRef { owner_type: OwnerType::Message, owner_id: self.id }
    }
}
