use sqlx::prelude::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct ConversationEntity {
    pub id: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_group: bool,
    pub owner_id: Uuid,
    pub direct_key: Option<String>,
    pub last_message_seq: i64,
    pub last_activity_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MembershipEntity {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub is_admin: bool,
    pub nickname: Option<String>,
    pub last_read_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_read_seq: i64,
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

/// Canonical key of an unordered user pair; backs the unique index that
/// keeps one direct conversation per pair.
pub fn direct_key(user_a: &Uuid, user_b: &Uuid) -> String {
    let (low, high) = if user_a <= user_b { (user_a, user_b) } else { (user_b, user_a) };
    format!("{low}:{high}")
}

/// Who takes over a group when its owner leaves: the longest-standing admin,
/// else the longest-standing member. `members` must be ordered by join time.
pub fn next_owner(members: &[MembershipEntity], leaving: &Uuid) -> Option<Uuid> {
    let mut remaining = members.iter().filter(|m| m.user_id != *leaving);
    let first = remaining.clone().next().map(|m| m.user_id);
    remaining.find(|m| m.is_admin).map(|m| m.user_id).or(first)
}
