use uuid::Uuid;

use crate::{
    api::error,
    modules::conversation::{
        model::{NewGroupConversation, NewMembership},
        schema::{ConversationEntity, MembershipEntity},
    },
};

#[async_trait::async_trait]
pub trait ConversationRepository {
    async fn find_by_id(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Option<ConversationEntity>, error::SystemError>;

    async fn find_direct(
        &self,
        direct_key: &str,
    ) -> Result<Option<ConversationEntity>, error::SystemError>;

    /// Creates the direct conversation together with both memberships.
    /// Fails with `SystemError::Conflict` when the pair already has one.
    async fn create_direct(
        &self,
        creator_id: &Uuid,
        peer_id: &Uuid,
    ) -> Result<ConversationEntity, error::SystemError>;

    async fn create_group(
        &self,
        group: &NewGroupConversation,
    ) -> Result<ConversationEntity, error::SystemError>;

    async fn update_details(
        &self,
        conversation_id: &Uuid,
        name: Option<&str>,
        description: Option<Option<&str>>,
    ) -> Result<ConversationEntity, error::SystemError>;

    /// Makes `owner_id` owner and admin. Returns false, changing nothing,
    /// when they are not a member.
    async fn transfer_owner(
        &self,
        conversation_id: &Uuid,
        owner_id: &Uuid,
    ) -> Result<bool, error::SystemError>;

    /// Conversations of `user_id`, most recent activity first.
    async fn find_by_member(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<ConversationEntity>, error::SystemError>;
}

#[async_trait::async_trait]
pub trait MembershipRepository {
    async fn find(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<MembershipEntity>, error::SystemError>;

    /// Members ordered by join time, oldest first.
    async fn find_by_conversation(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Vec<MembershipEntity>, error::SystemError>;

    async fn find_by_conversations(
        &self,
        conversation_ids: &[Uuid],
    ) -> Result<Vec<MembershipEntity>, error::SystemError>;

    /// Returns false when the user was already a member.
    async fn add(
        &self,
        conversation_id: &Uuid,
        membership: &NewMembership,
    ) -> Result<bool, error::SystemError>;

    /// Returns false when the user was not a member. Removing the owner is
    /// an `InvalidOperation`.
    async fn remove(&self, conversation_id: &Uuid, user_id: &Uuid)
        -> Result<bool, error::SystemError>;

    /// Drops `user_id` from the group and, when they owned it, hands
    /// ownership to `next_owner`. Serialised per conversation; the last
    /// member cannot leave. Returns the new owner, if ownership moved.
    async fn leave(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<Uuid>, error::SystemError>;

    async fn set_admin(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        is_admin: bool,
    ) -> Result<bool, error::SystemError>;

    async fn set_nickname(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        nickname: Option<&str>,
    ) -> Result<bool, error::SystemError>;

    /// Advances the read cursor to `up_to_seq`, or to the conversation's
    /// latest message when `None`. The cursor never moves backwards.
    async fn mark_read(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        up_to_seq: Option<i64>,
    ) -> Result<Option<MembershipEntity>, error::SystemError>;
}
