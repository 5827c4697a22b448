use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        attachment::{
            model::AttachmentResponse, repository::AttachmentRepository, schema::OwnerType,
        },
        conversation::{
            repository::{ConversationRepository, MembershipRepository},
            schema::ConversationEntity,
            service::load_membership,
        },
        message::{
            model::{
                GetMessageResponse, InsertMessage, MessageQueryRequest, MessageResponse,
                ReplyPreview, SendMessageRequest, DEFAULT_PAGE_SIZE, MAX_CONTENT_CHARS,
            },
            repository::MessageRepository,
            schema::MessageEntity,
        },
        notification::service::NotificationDispatcher,
        user::{model::UserSummary, repository::UserRepository},
    },
};

#[derive(Clone)]
pub struct MessageService<C, M, S, A, U>
where
    C: ConversationRepository + Send + Sync + 'static,
    M: MembershipRepository + Send + Sync + 'static,
    S: MessageRepository + Send + Sync + 'static,
    A: AttachmentRepository + Send + Sync + 'static,
    U: UserRepository + Send + Sync + 'static,
{
    conversation_repo: Arc<C>,
    membership_repo: Arc<M>,
    message_repo: Arc<S>,
    attachment_repo: Arc<A>,
    user_repo: Arc<U>,
    dispatcher: NotificationDispatcher,
}

impl<C, M, S, A, U> MessageService<C, M, S, A, U>
where
    C: ConversationRepository + Send + Sync + 'static,
    M: MembershipRepository + Send + Sync + 'static,
    S: MessageRepository + Send + Sync + 'static,
    A: AttachmentRepository + Send + Sync + 'static,
    U: UserRepository + Send + Sync + 'static,
{
    pub fn with_dependencies(
        conversation_repo: Arc<C>,
        membership_repo: Arc<M>,
        message_repo: Arc<S>,
        attachment_repo: Arc<A>,
        user_repo: Arc<U>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        MessageService {
            conversation_repo,
            membership_repo,
            message_repo,
            attachment_repo,
            user_repo,
            dispatcher,
        }
    }

    /// Appends a message. A reply to a reply is stored against the parent of
    /// its target, so threads never grow deeper than one level. The message
    /// and its attachments are stored together, and recipients are notified
    /// as soon as they are.
    pub async fn post_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        request: SendMessageRequest,
    ) -> Result<MessageResponse, error::SystemError> {
        let content = request.content.filter(|c| !c.trim().is_empty());

        if content.is_none() && request.attachments.is_empty() {
            return Err(error::SystemError::bad_request(
                "Message must have content or attachments",
            ));
        }
        if content.as_ref().is_some_and(|c| c.chars().count() > MAX_CONTENT_CHARS) {
            return Err(error::SystemError::bad_request(
                "Message must be at most 4000 characters",
            ));
        }

        let (conversation, _) = load_membership(
            self.conversation_repo.as_ref(),
            self.membership_repo.as_ref(),
            &conversation_id,
            &sender_id,
        )
        .await?;

        let replied_to_id = match request.replied_to_id {
            Some(target_id) => {
                let target = self
                    .message_repo
                    .find_by_id(&target_id)
                    .await?
                    .filter(|m| m.conversation_id == conversation_id)
                    .ok_or_else(|| {
                        error::SystemError::bad_request("Reply target not found in conversation")
                    })?;
                Some(target.replied_to_id.unwrap_or(target.id))
            }
            None => None,
        };

        let members = self.membership_repo.find_by_conversation(&conversation_id).await?;
        let member_ids: Vec<Uuid> = members.iter().map(|m| m.user_id).collect();
        let sender_name = self
            .user_repo
            .find_by_id(&sender_id)
            .await?
            .map(|u| u.display_name)
            .unwrap_or_default();

        let message = self
            .message_repo
            .create(&InsertMessage {
                conversation_id,
                sender_id,
                content,
                is_system_message: false,
                replied_to_id,
                attachments: request.attachments,
            })
            .await?;

        log::debug!("Message {} stored at seq {} in {}", message.id, message.seq, conversation_id);

        self.dispatcher.on_message_posted(
            &message,
            &notification_title(&conversation, &sender_name),
            &member_ids,
        );

        self.project(vec![message])
            .await?
            .pop()
            .ok_or_else(|| error::SystemError::internal("Stored message could not be projected"))
    }

    pub async fn edit_message(
        &self,
        message_id: Uuid,
        editor_id: Uuid,
        content: String,
    ) -> Result<MessageResponse, error::SystemError> {
        let message = self.find_own(&message_id, &editor_id).await?;

        if message.is_system_message || message.is_removed {
            return Err(error::SystemError::invalid_operation("This message cannot be edited"));
        }
        if content.trim().is_empty() {
            return Err(error::SystemError::bad_request("Content cannot be empty"));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(error::SystemError::bad_request(
                "Message must be at most 4000 characters",
            ));
        }

        let updated = self
            .message_repo
            .update_content(&message_id, &content)
            .await?
            .ok_or_else(|| error::SystemError::invalid_operation("This message cannot be edited"))?;

        self.project(vec![updated])
            .await?
            .pop()
            .ok_or_else(|| error::SystemError::internal("Edited message could not be projected"))
    }

    /// Idempotent: removing a removed message returns it unchanged.
    pub async fn soft_delete(
        &self,
        message_id: Uuid,
        requester_id: Uuid,
    ) -> Result<MessageResponse, error::SystemError> {
        let message = self.find_own(&message_id, &requester_id).await?;

        if message.is_system_message {
            return Err(error::SystemError::invalid_operation(
                "System messages cannot be removed",
            ));
        }

        let removed = self
            .message_repo
            .soft_delete(&message_id)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Message not found"))?;

        self.project(vec![removed])
            .await?
            .pop()
            .ok_or_else(|| error::SystemError::internal("Removed message could not be projected"))
    }

    /// Newest page first; each page is returned oldest first. Moves the
    /// requester's read cursor up to the newest message returned.
    pub async fn list_messages(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
        query: MessageQueryRequest,
    ) -> Result<GetMessageResponse, error::SystemError> {
        load_membership(
            self.conversation_repo.as_ref(),
            self.membership_repo.as_ref(),
            &conversation_id,
            &requester_id,
        )
        .await?;

        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 100);

        let mut messages =
            self.message_repo.find_page(&conversation_id, query.cursor, limit + 1).await?;

        let has_more = messages.len() > limit as usize;
        messages.truncate(limit as usize);
        messages.reverse();

        let cursor = if has_more { messages.first().map(|m| m.seq) } else { None };
        let newest_seen = messages.last().map_or(0, |m| m.seq);

        self.membership_repo.mark_read(&conversation_id, &requester_id, Some(newest_seen)).await?;

        Ok(GetMessageResponse { messages: self.project(messages).await?, cursor })
    }

    async fn find_own(
        &self,
        message_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<MessageEntity, error::SystemError> {
        let message = self
            .message_repo
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Message not found"))?;

        // removed members lose access to their old messages too
        load_membership(
            self.conversation_repo.as_ref(),
            self.membership_repo.as_ref(),
            &message.conversation_id,
            user_id,
        )
        .await?;

        if message.sender_id != *user_id {
            return Err(error::SystemError::forbidden("Only the sender can change this message"));
        }

        Ok(message)
    }

    /// Resolves senders, reply previews and attachment variants in batches.
    async fn project(
        &self,
        messages: Vec<MessageEntity>,
    ) -> Result<Vec<MessageResponse>, error::SystemError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let reply_ids: Vec<Uuid> =
            unique(messages.iter().filter_map(|m| m.replied_to_id)).into_iter().collect();
        let replies: HashMap<Uuid, MessageEntity> = if reply_ids.is_empty() {
            HashMap::new()
        } else {
            self.message_repo
                .find_by_ids(&reply_ids)
                .await?
                .into_iter()
                .map(|m| (m.id, m))
                .collect()
        };

        let sender_ids: Vec<Uuid> = unique(
            messages.iter().map(|m| m.sender_id).chain(replies.values().map(|m| m.sender_id)),
        )
        .into_iter()
        .collect();
        let senders: HashMap<Uuid, UserSummary> = self
            .user_repo
            .find_by_ids(&sender_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, UserSummary::from(u)))
            .collect();

        let message_ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        let mut attachments = self
            .attachment_repo
            .find_by_owners(OwnerType::Message, &message_ids)
            .await?
            .into_iter()
            .fold(HashMap::<Uuid, Vec<AttachmentResponse>>::new(), |mut acc, attachment| {
                acc.entry(attachment.owner_id).or_default().push(attachment.into());
                acc
            });

        let responses = messages
            .into_iter()
            .map(|m| {
                let reply = m.replied_to_id.and_then(|id| replies.get(&id)).map(|target| {
                    ReplyPreview::new(target, senders.get(&target.sender_id))
                });

                MessageResponse {
                    id: m.id,
                    conversation_id: m.conversation_id,
                    seq: m.seq,
                    sender: senders.get(&m.sender_id).cloned(),
                    content: m.formatted_content(),
                    is_system_message: m.is_system_message,
                    is_removed: m.is_removed,
                    is_edited: m.is_edited,
                    reply,
                    attachments: attachments.remove(&m.id).unwrap_or_default(),
                    created_at: m.created_at,
                    updated_at: m.updated_at,
                }
            })
            .collect();

        Ok(responses)
    }
}

fn notification_title(conversation: &ConversationEntity, sender_name: &str) -> String {
    match (&conversation.name, conversation.is_group) {
        (Some(name), true) => format!("{sender_name} in {name}"),
        _ => sender_name.to_string(),
    }
}

fn unique(ids: impl IntoIterator<Item = Uuid>) -> HashSet<Uuid> {
    ids.into_iter().collect()
}
