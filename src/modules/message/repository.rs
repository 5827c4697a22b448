use uuid::Uuid;

use crate::{
    api::error,
    modules::message::{model::InsertMessage, schema::MessageEntity},
};

#[async_trait::async_trait]
pub trait MessageRepository {
    /// Appends a message, with its attachments, after every message already
    /// in the conversation and bumps the conversation's last activity. All or
    /// nothing.
    async fn create(&self, message: &InsertMessage) -> Result<MessageEntity, error::SystemError>;

    async fn find_by_id(&self, message_id: &Uuid)
        -> Result<Option<MessageEntity>, error::SystemError>;

    async fn find_by_ids(&self, message_ids: &[Uuid])
        -> Result<Vec<MessageEntity>, error::SystemError>;

    /// Up to `limit` messages with `seq < before`, newest first.
    async fn find_page(
        &self,
        conversation_id: &Uuid,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<MessageEntity>, error::SystemError>;

    /// Newest message of each conversation that has one.
    async fn find_latest(
        &self,
        conversation_ids: &[Uuid],
    ) -> Result<Vec<MessageEntity>, error::SystemError>;

    async fn update_content(
        &self,
        message_id: &Uuid,
        content: &str,
    ) -> Result<Option<MessageEntity>, error::SystemError>;

    /// Flags the message removed, clears its content and drops its
    /// attachments. Already removed messages are returned unchanged.
    async fn soft_delete(&self, message_id: &Uuid)
        -> Result<Option<MessageEntity>, error::SystemError>;

    /// Messages with `seq > after_seq`.
    async fn count_after(&self, conversation_id: &Uuid, after_seq: i64)
        -> Result<i64, error::SystemError>;
}
