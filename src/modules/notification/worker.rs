use actix::prelude::*;
use std::{sync::Arc, time::Duration};

use crate::modules::notification::{model::PushNotification, notifier::Notifier};

#[derive(Message)]
#[rtype(result = "()")]
pub struct Deliver(pub PushNotification);

/// Talks to the notifier off the request path. Failures end here.
pub struct NotificationWorker {
    notifier: Arc<dyn Notifier + Send + Sync>,
    timeout: Duration,
}

impl NotificationWorker {
    pub fn new(notifier: Arc<dyn Notifier + Send + Sync>, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }
}

impl Actor for NotificationWorker {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Notification worker started");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Notification worker stopped");
    }
}

impl Handler<Deliver> for NotificationWorker {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Context<Self>) {
        let notifier = self.notifier.clone();
        let timeout = self.timeout;
        let notification = msg.0;

        let delivery = async move {
            let recipient = notification.recipient_id;
            match tokio::time::timeout(timeout, notifier.notify(&notification)).await {
                Ok(Ok(())) => tracing::debug!("Notification delivered to {}", recipient),
                Ok(Err(e)) => {
                    tracing::warn!("Notification to {} failed: {:?}", recipient, e)
                }
                Err(_) => tracing::warn!(
                    "Notification to {} timed out after {:?}",
                    recipient,
                    timeout
                ),
            }
        };

        ctx.spawn(delivery.into_actor(self));
    }
}
