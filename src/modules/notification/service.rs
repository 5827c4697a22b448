use actix::{Actor, Addr};
use std::{collections::HashSet, sync::Arc, time::Duration};
use uuid::Uuid;

use crate::modules::{
    message::{
        model::{truncate_preview, PREVIEW_CHARS},
        schema::MessageEntity,
    },
    notification::{
        model::{MembershipChange, NotificationIntent, PushNotification},
        notifier::Notifier,
        worker::{Deliver, NotificationWorker},
    },
};

const ATTACHMENT_PREVIEW: &str = "Sent an attachment";

/// Turns conversation events into notifications and hands them to the
/// background worker. Never fails the caller.
#[derive(Clone)]
pub struct NotificationDispatcher {
    worker: Addr<NotificationWorker>,
}

impl NotificationDispatcher {
    pub fn start(notifier: Arc<dyn Notifier + Send + Sync>, timeout: Duration) -> Self {
        let worker = NotificationWorker::new(notifier, timeout).start();
        Self { worker }
    }

    /// Emits one intent per member except the sender. Returns how many were
    /// handed to the worker.
    pub fn on_message_posted(
        &self,
        message: &MessageEntity,
        title: &str,
        member_ids: &[Uuid],
    ) -> usize {
        let intents = message_intents(message, title, member_ids);
        let count = intents.len();

        for intent in intents {
            self.worker.do_send(Deliver(intent.into()));
        }

        log::debug!("Message {} fanned out to {} recipients", message.id, count);
        count
    }

    /// Tells the affected user about an add or removal done by someone else.
    pub fn on_membership_changed(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        affected_user_id: Uuid,
        change: MembershipChange,
        conversation_title: &str,
    ) -> bool {
        let Some(notification) = membership_notification(
            conversation_id,
            actor_id,
            affected_user_id,
            change,
            conversation_title,
        ) else {
            return false;
        };

        self.worker.do_send(Deliver(notification));
        true
    }
}

pub fn message_intents(
    message: &MessageEntity,
    title: &str,
    member_ids: &[Uuid],
) -> Vec<NotificationIntent> {
    let preview = message
        .formatted_content()
        .filter(|c| !c.trim().is_empty())
        .map(|c| truncate_preview(&c, PREVIEW_CHARS))
        .unwrap_or_else(|| ATTACHMENT_PREVIEW.to_string());

    let mut seen = HashSet::new();
    member_ids
        .iter()
        .filter(|id| **id != message.sender_id && seen.insert(**id))
        .map(|recipient_id| NotificationIntent {
            recipient_id: *recipient_id,
            sender_id: message.sender_id,
            conversation_id: message.conversation_id,
            message_id: message.id,
            title: title.to_string(),
            preview: preview.clone(),
        })
        .collect()
}

pub fn membership_notification(
    conversation_id: Uuid,
    actor_id: Uuid,
    affected_user_id: Uuid,
    change: MembershipChange,
    conversation_title: &str,
) -> Option<PushNotification> {
    if actor_id == affected_user_id {
        return None;
    }

    let body = match change {
        MembershipChange::Added => format!("You were added to {conversation_title}"),
        MembershipChange::Removed => format!("You were removed from {conversation_title}"),
    };

    Some(PushNotification {
        recipient_id: affected_user_id,
        title: conversation_title.to_string(),
        body,
        data: serde_json::json!({
            "kind": "membership_changed",
            "change": change,
            "conversation_id": conversation_id,
            "actor_id": actor_id,
        }),
    })
}
