use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    modules::{conversation::schema::MembershipEntity, user::model::UserSummary},
    utils::double_option,
};

pub const RECENT_MEMBERS_LIMIT: usize = 3;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDirectConversation {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateGroupConversation {
    #[validate(length(min = 1, max = 100, message = "Group name must be 1-100 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,
    #[serde(default)]
    #[validate(length(max = 256, message = "A group can start with at most 256 members"))]
    pub member_ids: Vec<Uuid>,
    #[serde(default)]
    pub admin_ids: Vec<Uuid>,
}

/// Partial group update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateGroupConversation {
    #[validate(length(min = 1, max = 100, message = "Group name must be 1-100 characters"))]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub member_ids: Option<Vec<Uuid>>,
    pub admin_ids: Option<Vec<Uuid>>,
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NicknameRequest {
    #[validate(length(min = 1, max = 50, message = "Nickname must be 1-50 characters"))]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewMembership {
    pub user_id: Uuid,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct NewGroupConversation {
    pub owner_id: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub members: Vec<NewMembership>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberResponse {
    pub user: UserSummary,
    pub is_admin: bool,
    pub nickname: Option<String>,
    pub last_read_at: Option<chrono::DateTime<chrono::Utc>>,
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

impl MemberResponse {
    pub fn new(membership: &MembershipEntity, user: UserSummary) -> Self {
        MemberResponse {
            user,
            is_admin: membership.is_admin,
            nickname: membership.nickname.clone(),
            last_read_at: membership.last_read_at,
            joined_at: membership.joined_at,
        }
    }

    pub fn label(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.user.display_name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LastMessagePreview {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub is_system_message: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub name: String,
    pub is_group: bool,
    pub recent_members: Vec<UserSummary>,
    pub last_message: Option<LastMessagePreview>,
    pub unread_count: i64,
    pub last_activity_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    pub id: Uuid,
    pub name: Option<String>,
    pub display_name: String,
    pub description: Option<String>,
    pub is_group: bool,
    pub owner_id: Uuid,
    pub members: Vec<MemberResponse>,
    pub last_activity_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnreadCountResponse {
    pub conversation_id: Uuid,
    pub unread_count: i64,
}

/// Title shown to `viewer`: the group name, the peer's label for direct
/// chats, or up to three member labels for unnamed groups.
pub fn display_name(name: Option<&str>, members: &[MemberResponse], viewer: &Uuid) -> String {
    if let Some(name) = name {
        return name.to_string();
    }

    let others: Vec<&str> = members
        .iter()
        .filter(|m| m.user.id != *viewer)
        .take(RECENT_MEMBERS_LIMIT)
        .map(|m| m.label())
        .collect();

    if others.is_empty() {
        "Only you".to_string()
    } else {
        others.join(", ")
    }
}
