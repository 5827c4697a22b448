use crate::{
    api::error,
    modules::attachment::schema::{AttachmentEntity, OwnerType},
};
use uuid::Uuid;

#[async_trait::async_trait]
pub trait AttachmentRepository {
    async fn find_by_owners(
        &self,
        owner_type: OwnerType,
        owner_ids: &[Uuid],
    ) -> Result<Vec<AttachmentEntity>, error::SystemError>;
}
