use serde::{Deserialize, Serialize};
use sqlx::prelude::{FromRow, Type};
use uuid::Uuid;

/// Entity kinds that can carry attachments. Only messages live in this
/// service; the other tags are shared with the rest of the platform.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Type, Serialize, Deserialize)]
#[sqlx(type_name = "attachment_owner", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    Message,
    Post,
    Comment,
    Rating,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Type, Serialize, Deserialize)]
#[sqlx(type_name = "attachment_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
}

#[derive(Debug, Clone, FromRow)]
pub struct AttachmentEntity {
    pub id: Uuid,
    pub owner_type: OwnerType,
    pub owner_id: Uuid,
    pub kind: AttachmentKind,
    pub url: String,
}
