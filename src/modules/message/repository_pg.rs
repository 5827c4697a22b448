use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        attachment::{
            model::AttachableOwner,
            repository_pg::{delete_attachments, insert_attachments},
        },
        message::{model::InsertMessage, repository::MessageRepository, schema::MessageEntity},
    },
};

#[derive(Clone)]
pub struct MessageRepositoryPg {
    pool: sqlx::PgPool,
}

impl MessageRepositoryPg {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for MessageRepositoryPg {
    async fn create(&self, message: &InsertMessage) -> Result<MessageEntity, error::SystemError> {
        let mut tx = self.pool.begin().await?;

        // row lock on the conversation serialises concurrent posts, so seq
        // follows commit order
        let seq = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE conversations
            SET last_message_seq = last_message_seq + 1,
                last_activity_at = clock_timestamp()
            WHERE id = $1
            RETURNING last_message_seq
            "#,
        )
        .bind(message.conversation_id)
        .fetch_optional(tx.as_mut())
        .await?
        .ok_or_else(|| error::SystemError::not_found("Conversation not found"))?;

        let created = sqlx::query_as::<_, MessageEntity>(
            r#"
            INSERT INTO messages
                (id, conversation_id, sender_id, seq, content, is_system_message, replied_to_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(seq)
        .bind(&message.content)
        .bind(message.is_system_message)
        .bind(message.replied_to_id)
        .fetch_one(tx.as_mut())
        .await?;

        if !message.attachments.is_empty() {
            insert_attachments(tx.as_mut(), &created.owner_ref(), &message.attachments).await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn find_by_id(
        &self,
        message_id: &Uuid,
    ) -> Result<Option<MessageEntity>, error::SystemError> {
        let message = sqlx::query_as::<_, MessageEntity>("SELECT * FROM messages WHERE id = $1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(message)
    }

    async fn find_by_ids(
        &self,
        message_ids: &[Uuid],
    ) -> Result<Vec<MessageEntity>, error::SystemError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        let messages =
            sqlx::query_as::<_, MessageEntity>("SELECT * FROM messages WHERE id = ANY($1)")
                .bind(message_ids)
                .fetch_all(&self.pool)
                .await?;

        Ok(messages)
    }

    async fn find_page(
        &self,
        conversation_id: &Uuid,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<MessageEntity>, error::SystemError> {
        // served by the (conversation_id, seq) unique index
        let messages = sqlx::query_as::<_, MessageEntity>(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1
            AND ($2::bigint IS NULL OR seq < $2)
            ORDER BY seq DESC
            LIMIT $3
            "#,
        )
        .bind(conversation_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn find_latest(
        &self,
        conversation_ids: &[Uuid],
    ) -> Result<Vec<MessageEntity>, error::SystemError> {
        if conversation_ids.is_empty() {
            return Ok(Vec::new());
        }

        let messages = sqlx::query_as::<_, MessageEntity>(
            r#"
            SELECT DISTINCT ON (conversation_id) *
            FROM messages
            WHERE conversation_id = ANY($1)
            ORDER BY conversation_id, seq DESC
            "#,
        )
        .bind(conversation_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn update_content(
        &self,
        message_id: &Uuid,
        content: &str,
    ) -> Result<Option<MessageEntity>, error::SystemError> {
        let message = sqlx::query_as::<_, MessageEntity>(
            r#"
            UPDATE messages
            SET content = $2,
                is_edited = TRUE,
                updated_at = clock_timestamp()
            WHERE id = $1
            AND NOT is_removed
            AND NOT is_system_message
            RETURNING *
            "#,
        )
        .bind(message_id)
        .bind(content)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn soft_delete(
        &self,
        message_id: &Uuid,
    ) -> Result<Option<MessageEntity>, error::SystemError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query_as::<_, MessageEntity>(
            r#"
            UPDATE messages
            SET is_removed = TRUE,
                content = NULL,
                updated_at = clock_timestamp()
            WHERE id = $1
            AND NOT is_removed
            RETURNING *
            "#,
        )
        .bind(message_id)
        .fetch_optional(tx.as_mut())
        .await?;

        let Some(message) = removed else {
            tx.rollback().await?;
            return self.find_by_id(message_id).await;
        };

        let dropped = delete_attachments(&message.owner_ref(), tx.as_mut()).await?;
        tx.commit().await?;

        log::info!("Message {} removed, {} attachments dropped", message.id, dropped);
        Ok(Some(message))
    }

    async fn count_after(
        &self,
        conversation_id: &Uuid,
        after_seq: i64,
    ) -> Result<i64, error::SystemError> {
        // range scan on the (conversation_id, seq) unique index
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM messages
            WHERE conversation_id = $1
            AND seq > $2
            "#,
        )
        .bind(conversation_id)
        .bind(after_seq)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
