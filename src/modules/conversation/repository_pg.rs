use uuid::Uuid;

use crate::modules::conversation::model::{NewGroupConversation, NewMembership};
use crate::modules::conversation::repository::{ConversationRepository, MembershipRepository};
use crate::modules::conversation::schema::{
    direct_key, next_owner, ConversationEntity, MembershipEntity,
};
use crate::api::error;

/// Row-locks the conversation until the transaction ends. Membership writes
/// that can change the owner or the member count go through this.
async fn lock_conversation(
    conn: &mut sqlx::PgConnection,
    conversation_id: &Uuid,
) -> Result<ConversationEntity, error::SystemError> {
    sqlx::query_as::<_, ConversationEntity>("SELECT * FROM conversations WHERE id = $1 FOR UPDATE")
        .bind(conversation_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| error::SystemError::not_found("Conversation not found"))
}

async fn promote_owner(
    conn: &mut sqlx::PgConnection,
    conversation_id: &Uuid,
    owner_id: &Uuid,
) -> Result<bool, error::SystemError> {
    let promoted = sqlx::query(
        "UPDATE memberships SET is_admin = TRUE WHERE conversation_id = $1 AND user_id = $2",
    )
    .bind(conversation_id)
    .bind(owner_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if promoted == 0 {
        return Ok(false);
    }

    sqlx::query("UPDATE conversations SET owner_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(conversation_id)
        .bind(owner_id)
        .execute(&mut *conn)
        .await?;

    Ok(true)
}

async fn insert_membership<'e, E>(
    conversation_id: &Uuid,
    membership: &NewMembership,
    tx: E,
) -> Result<bool, error::SystemError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let rows = sqlx::query(
        r#"
        INSERT INTO memberships (conversation_id, user_id, is_admin)
        VALUES ($1, $2, $3)
        ON CONFLICT (conversation_id, user_id) DO NOTHING
        "#,
    )
    .bind(conversation_id)
    .bind(membership.user_id)
    .bind(membership.is_admin)
    .execute(tx)
    .await?
    .rows_affected();

    Ok(rows > 0)
}

#[derive(Clone)]
pub struct ConversationPgRepository {
    pool: sqlx::PgPool,
}

impl ConversationPgRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for ConversationPgRepository {
    async fn find_by_id(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Option<ConversationEntity>, error::SystemError> {
        let conversation =
            sqlx::query_as::<_, ConversationEntity>("SELECT * FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(conversation)
    }

    async fn find_direct(
        &self,
        direct_key: &str,
    ) -> Result<Option<ConversationEntity>, error::SystemError> {
        let conversation = sqlx::query_as::<_, ConversationEntity>(
            "SELECT * FROM conversations WHERE direct_key = $1 AND NOT is_group",
        )
        .bind(direct_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn create_direct(
        &self,
        creator_id: &Uuid,
        peer_id: &Uuid,
    ) -> Result<ConversationEntity, error::SystemError> {
        let mut tx = self.pool.begin().await?;

        // a concurrent insert for the same pair waits on the unique index and
        // then returns no row
        let conversation = sqlx::query_as::<_, ConversationEntity>(
            r#"
            INSERT INTO conversations (id, is_group, owner_id, direct_key)
            VALUES ($1, FALSE, $2, $3)
            ON CONFLICT (direct_key) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(creator_id)
        .bind(direct_key(creator_id, peer_id))
        .fetch_optional(tx.as_mut())
        .await?
        .ok_or_else(error::SystemError::conflict)?;

        insert_membership(
            &conversation.id,
            &NewMembership { user_id: *creator_id, is_admin: true },
            tx.as_mut(),
        )
        .await?;
        insert_membership(
            &conversation.id,
            &NewMembership { user_id: *peer_id, is_admin: false },
            tx.as_mut(),
        )
        .await?;

        tx.commit().await?;
        Ok(conversation)
    }

    async fn create_group(
        &self,
        group: &NewGroupConversation,
    ) -> Result<ConversationEntity, error::SystemError> {
        let mut tx = self.pool.begin().await?;

        let conversation = sqlx::query_as::<_, ConversationEntity>(
            r#"
            INSERT INTO conversations (id, name, description, is_group, owner_id)
            VALUES ($1, $2, $3, TRUE, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.owner_id)
        .fetch_one(tx.as_mut())
        .await?;

        for membership in &group.members {
            insert_membership(&conversation.id, membership, tx.as_mut()).await?;
        }

        tx.commit().await?;
        Ok(conversation)
    }

    async fn update_details(
        &self,
        conversation_id: &Uuid,
        name: Option<&str>,
        description: Option<Option<&str>>,
    ) -> Result<ConversationEntity, error::SystemError> {
        let conversation = sqlx::query_as::<_, ConversationEntity>(
            r#"
            UPDATE conversations
            SET
                name        = COALESCE($2, name),
                description = CASE WHEN $3::boolean THEN $4 ELSE description END,
                updated_at  = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(conversation_id)
        .bind(name)
        .bind(description.is_some())
        .bind(description.flatten())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| error::SystemError::not_found("Conversation not found"))?;

        Ok(conversation)
    }

    async fn transfer_owner(
        &self,
        conversation_id: &Uuid,
        owner_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        let mut tx = self.pool.begin().await?;
        lock_conversation(tx.as_mut(), conversation_id).await?;

        if !promote_owner(tx.as_mut(), conversation_id, owner_id).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn find_by_member(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<ConversationEntity>, error::SystemError> {
        let conversations = sqlx::query_as::<_, ConversationEntity>(
            r#"
            SELECT c.*
            FROM conversations c
            JOIN memberships m
                ON m.conversation_id = c.id
            AND m.user_id = $1
            ORDER BY c.last_activity_at DESC, c.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(conversations)
    }
}

#[derive(Clone)]
pub struct MembershipPgRepository {
    pool: sqlx::PgPool,
}

impl MembershipPgRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MembershipRepository for MembershipPgRepository {
    async fn find(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<MembershipEntity>, error::SystemError> {
        let membership = sqlx::query_as::<_, MembershipEntity>(
            "SELECT * FROM memberships WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(membership)
    }

    async fn find_by_conversation(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Vec<MembershipEntity>, error::SystemError> {
        self.find_by_conversations(&[*conversation_id]).await
    }

    async fn find_by_conversations(
        &self,
        conversation_ids: &[Uuid],
    ) -> Result<Vec<MembershipEntity>, error::SystemError> {
        let memberships = sqlx::query_as::<_, MembershipEntity>(
            r#"
            SELECT *
            FROM memberships
            WHERE conversation_id = ANY($1)
            ORDER BY joined_at, user_id
            "#,
        )
        .bind(conversation_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(memberships)
    }

    async fn add(
        &self,
        conversation_id: &Uuid,
        membership: &NewMembership,
    ) -> Result<bool, error::SystemError> {
        insert_membership(conversation_id, membership, &self.pool).await
    }

    async fn remove(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        let mut tx = self.pool.begin().await?;

        // an owner who just left may have handed the group to this user
        let conversation = lock_conversation(tx.as_mut(), conversation_id).await?;
        if conversation.owner_id == *user_id {
            return Err(error::SystemError::invalid_operation(
                "The group owner cannot be removed",
            ));
        }

        let rows = sqlx::query("DELETE FROM memberships WHERE conversation_id = $1 AND user_id = $2")
            .bind(conversation_id)
            .bind(user_id)
            .execute(tx.as_mut())
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(rows > 0)
    }

    async fn leave(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<Uuid>, error::SystemError> {
        let mut tx = self.pool.begin().await?;
        let conversation = lock_conversation(tx.as_mut(), conversation_id).await?;

        let members = sqlx::query_as::<_, MembershipEntity>(
            r#"
            SELECT * FROM memberships
            WHERE conversation_id = $1
            ORDER BY joined_at, user_id
            "#,
        )
        .bind(conversation_id)
        .fetch_all(tx.as_mut())
        .await?;

        if !members.iter().any(|m| m.user_id == *user_id) {
            return Err(error::SystemError::forbidden("You are not a member of this conversation"));
        }
        if members.len() <= 1 {
            return Err(error::SystemError::invalid_operation(
                "The last member cannot leave the group",
            ));
        }

        sqlx::query("DELETE FROM memberships WHERE conversation_id = $1 AND user_id = $2")
            .bind(conversation_id)
            .bind(user_id)
            .execute(tx.as_mut())
            .await?;

        let mut new_owner = None;
        if conversation.owner_id == *user_id {
            let successor = next_owner(&members, user_id)
                .ok_or_else(|| error::SystemError::internal("Group has no remaining members"))?;
            if !promote_owner(tx.as_mut(), conversation_id, &successor).await? {
                return Err(error::SystemError::internal("Successor vanished during handoff"));
            }
            new_owner = Some(successor);
        }

        tx.commit().await?;
        Ok(new_owner)
    }

    async fn set_admin(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        is_admin: bool,
    ) -> Result<bool, error::SystemError> {
        let rows = sqlx::query(
            r#"
            UPDATE memberships
            SET is_admin = $3
            WHERE conversation_id = $1
            AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(is_admin)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    async fn set_nickname(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        nickname: Option<&str>,
    ) -> Result<bool, error::SystemError> {
        let rows = sqlx::query(
            r#"
            UPDATE memberships
            SET nickname = $3
            WHERE conversation_id = $1
            AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(nickname)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    async fn mark_read(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        up_to_seq: Option<i64>,
    ) -> Result<Option<MembershipEntity>, error::SystemError> {
        // last_message_seq only ever holds committed messages: it is bumped in
        // the same transaction as the insert
        let membership = sqlx::query_as::<_, MembershipEntity>(
            r#"
            UPDATE memberships m
            SET last_read_at = clock_timestamp(),
                last_read_seq = GREATEST(
                    m.last_read_seq,
                    LEAST(COALESCE($3::bigint, c.last_message_seq), c.last_message_seq)
                )
            FROM conversations c
            WHERE c.id = m.conversation_id
            AND m.conversation_id = $1
            AND m.user_id = $2
            RETURNING m.*
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(up_to_seq)
        .fetch_optional(&self.pool)
        .await?;

        Ok(membership)
    }
}
