use crate::{
    api::error,
    configs::RedisQueue,
    modules::notification::{model::PushNotification, notifier::Notifier},
};

/// Queues notifications on a Redis list drained by the push/email gateway.
pub struct RedisNotifier {
    queue: RedisQueue,
    key: String,
}

impl RedisNotifier {
    pub fn new(queue: RedisQueue, key: impl Into<String>) -> Self {
        Self { queue, key: key.into() }
    }
}

#[async_trait::async_trait]
impl Notifier for RedisNotifier {
    async fn notify(&self, notification: &PushNotification) -> Result<(), error::SystemError> {
        self.queue.push(&self.key, notification).await
    }
}
