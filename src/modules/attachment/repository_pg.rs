use uuid::Uuid;

use crate::{
    api::error,
    modules::attachment::{
        model::{NewAttachment, OwnerRef},
        repository::AttachmentRepository,
        schema::{AttachmentEntity, OwnerType},
    },
};

/// Inserts attachments for `owner` on the caller's connection, so they
/// commit or roll back with the owner row.
pub async fn insert_attachments(
    conn: &mut sqlx::PgConnection,
    owner: &OwnerRef,
    attachments: &[NewAttachment],
) -> Result<Vec<AttachmentEntity>, error::SystemError> {
    let mut created = Vec::with_capacity(attachments.len());

    for attachment in attachments {
        let entity = sqlx::query_as::<_, AttachmentEntity>(
            r#"
            INSERT INTO attachments (id, owner_type, owner_id, kind, url)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(owner.owner_type)
        .bind(owner.owner_id)
        .bind(attachment.kind)
        .bind(&attachment.url)
        .fetch_one(&mut *conn)
        .await?;

        created.push(entity);
    }

    Ok(created)
}

pub async fn delete_attachments<'e, E>(owner: &OwnerRef, tx: E) -> Result<u64, error::SystemError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let rows = sqlx::query("DELETE FROM attachments WHERE owner_type = $1 AND owner_id = $2")
        .bind(owner.owner_type)
        .bind(owner.owner_id)
        .execute(tx)
        .await?
        .rows_affected();

    Ok(rows)
}

#[derive(Clone)]
pub struct AttachmentPgRepository {
    pool: sqlx::PgPool,
}

impl AttachmentPgRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AttachmentRepository for AttachmentPgRepository {
    async fn find_by_owners(
        &self,
        owner_type: OwnerType,
        owner_ids: &[Uuid],
    ) -> Result<Vec<AttachmentEntity>, error::SystemError> {
        if owner_ids.is_empty() {
            return Ok(Vec::new());
        }

        let attachments = sqlx::query_as::<_, AttachmentEntity>(
            r#"
            SELECT * FROM attachments
            WHERE owner_type = $1
            AND owner_id = ANY($2)
            ORDER BY created_at, id
            "#,
        )
        .bind(owner_type)
        .bind(owner_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(attachments)
    }
}
