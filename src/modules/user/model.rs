use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::modules::user::schema::UserEntity;

/// Public face of a user inside conversations.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl From<UserEntity> for UserSummary {
    fn from(entity: UserEntity) -> Self {
        UserSummary {
            id: entity.id,
            username: entity.username,
            display_name: entity.display_name,
            avatar_url: entity.avatar_url,
        }
    }
}
