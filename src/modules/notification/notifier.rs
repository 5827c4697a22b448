use crate::{api::error, modules::notification::model::PushNotification};

/// Outbound push/email collaborator. Delivery is best effort.
#[async_trait::async_trait]
pub trait Notifier {
    async fn notify(&self, notification: &PushNotification) -> Result<(), error::SystemError>;
}
