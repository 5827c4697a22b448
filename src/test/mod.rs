//! In-memory stand-ins for the Postgres repositories and the notifier.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        attachment::{
            model::AttachableOwner,
            repository::AttachmentRepository,
            schema::{AttachmentEntity, OwnerType},
        },
        conversation::{
            model::{NewGroupConversation, NewMembership},
            repository::{ConversationRepository, MembershipRepository},
            schema::{direct_key, next_owner, ConversationEntity, MembershipEntity},
            service::ConversationService,
        },
        message::{
            model::InsertMessage, repository::MessageRepository, schema::MessageEntity,
            service::MessageService,
        },
        notification::{
            model::PushNotification, notifier::Notifier, service::NotificationDispatcher,
        },
        user::{repository::UserRepository, schema::UserEntity},
    },
};

type Timestamp = chrono::DateTime<chrono::Utc>;

#[derive(Default)]
struct State {
    ticks: i64,
    users: Vec<UserEntity>,
    conversations: Vec<ConversationEntity>,
    memberships: Vec<MembershipEntity>,
    messages: Vec<MessageEntity>,
    attachments: Vec<AttachmentEntity>,
    fail_attachment_writes: bool,
    fail_attachment_reads: bool,
}

/// Every repository trait over one mutex. Timestamps come from a clock that
/// advances a millisecond per write, so ordering never ties.
pub struct MemoryStore {
    epoch: Timestamp,
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self { epoch: chrono::Utc::now(), state: Mutex::new(State::default()) }
    }
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn tick(&self, state: &mut State) -> Timestamp {
        state.ticks += 1;
        self.epoch + chrono::Duration::milliseconds(state.ticks)
    }

    pub fn add_user(&self, display_name: &str) -> Uuid {
        let id = Uuid::now_v7();
        self.lock().users.push(UserEntity {
            id,
            username: display_name.to_lowercase(),
            display_name: display_name.to_string(),
            avatar_url: None,
            deleted_at: None,
        });
        id
    }

    pub fn delete_user(&self, user_id: &Uuid) {
        let mut state = self.lock();
        let now = self.tick(&mut state);
        if let Some(user) = state.users.iter_mut().find(|u| u.id == *user_id) {
            user.deleted_at = Some(now);
        }
    }

    /// Message inserts that carry attachments fail from now on.
    pub fn fail_attachment_writes(&self) {
        self.lock().fail_attachment_writes = true;
    }

    pub fn fail_attachment_reads(&self) {
        self.lock().fail_attachment_reads = true;
    }

    pub fn members_of(&self, conversation_id: &Uuid) -> Vec<Uuid> {
        self.lock()
            .memberships
            .iter()
            .filter(|m| m.conversation_id == *conversation_id)
            .map(|m| m.user_id)
            .collect()
    }

    pub fn conversation_count(&self) -> usize {
        self.lock().conversations.len()
    }

    pub fn messages_in(&self, conversation_id: &Uuid) -> Vec<MessageEntity> {
        let mut messages: Vec<MessageEntity> = self
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == *conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.seq);
        messages
    }

    pub fn attachments_of(&self, owner_id: &Uuid) -> usize {
        self.lock().attachments.iter().filter(|a| a.owner_id == *owner_id).count()
    }

    fn push_membership(&self, state: &mut State, conversation_id: Uuid, new: &NewMembership) {
        let joined_at = self.tick(state);
        state.memberships.push(MembershipEntity {
            conversation_id,
            user_id: new.user_id,
            is_admin: new.is_admin,
            nickname: None,
            last_read_at: None,
            last_read_seq: 0,
            joined_at,
        });
    }

    fn push_conversation(
        &self,
        state: &mut State,
        owner_id: Uuid,
        is_group: bool,
        name: Option<String>,
        description: Option<String>,
        direct_key: Option<String>,
    ) -> ConversationEntity {
        let now = self.tick(state);
        let conversation = ConversationEntity {
            id: Uuid::now_v7(),
            name,
            description,
            is_group,
            owner_id,
            direct_key,
            last_message_seq: 0,
            last_activity_at: now,
            created_at: now,
            updated_at: now,
        };
        state.conversations.push(conversation.clone());
        conversation
    }
}

fn promote_owner(state: &mut State, conversation_id: &Uuid, owner_id: &Uuid) -> bool {
    let Some(member) = state
        .memberships
        .iter_mut()
        .find(|m| m.conversation_id == *conversation_id && m.user_id == *owner_id)
    else {
        return false;
    };
    member.is_admin = true;

    if let Some(conversation) = state.conversations.iter_mut().find(|c| c.id == *conversation_id)
    {
        conversation.owner_id = *owner_id;
    }
    true
}

#[async_trait::async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_id(&self, id: &Uuid) -> Result<Option<UserEntity>, error::SystemError> {
        Ok(self.lock().users.iter().find(|u| u.id == *id && u.deleted_at.is_none()).cloned())
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<UserEntity>, error::SystemError> {
        Ok(self
            .lock()
            .users
            .iter()
            .filter(|u| ids.contains(&u.id) && u.deleted_at.is_none())
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl ConversationRepository for MemoryStore {
    async fn find_by_id(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Option<ConversationEntity>, error::SystemError> {
        Ok(self.lock().conversations.iter().find(|c| c.id == *conversation_id).cloned())
    }

    async fn find_direct(
        &self,
        direct_key: &str,
    ) -> Result<Option<ConversationEntity>, error::SystemError> {
        // let concurrent callers interleave between lookup and insert
        tokio::task::yield_now().await;
        Ok(self
            .lock()
            .conversations
            .iter()
            .find(|c| c.direct_key.as_deref() == Some(direct_key))
            .cloned())
    }

    async fn create_direct(
        &self,
        creator_id: &Uuid,
        peer_id: &Uuid,
    ) -> Result<ConversationEntity, error::SystemError> {
        let key = direct_key(creator_id, peer_id);
        let mut state = self.lock();

        if state.conversations.iter().any(|c| c.direct_key.as_deref() == Some(key.as_str())) {
            return Err(error::SystemError::conflict());
        }

        let conversation =
            self.push_conversation(&mut state, *creator_id, false, None, None, Some(key));
        self.push_membership(
            &mut state,
            conversation.id,
            &NewMembership { user_id: *creator_id, is_admin: true },
        );
        self.push_membership(
            &mut state,
            conversation.id,
            &NewMembership { user_id: *peer_id, is_admin: false },
        );

        Ok(conversation)
    }

    async fn create_group(
        &self,
        group: &NewGroupConversation,
    ) -> Result<ConversationEntity, error::SystemError> {
        let mut state = self.lock();

        let conversation = self.push_conversation(
            &mut state,
            group.owner_id,
            true,
            group.name.clone(),
            group.description.clone(),
            None,
        );
        for member in &group.members {
            self.push_membership(&mut state, conversation.id, member);
        }

        Ok(conversation)
    }

    async fn update_details(
        &self,
        conversation_id: &Uuid,
        name: Option<&str>,
        description: Option<Option<&str>>,
    ) -> Result<ConversationEntity, error::SystemError> {
        let mut state = self.lock();
        let now = self.tick(&mut state);

        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == *conversation_id)
            .ok_or_else(|| error::SystemError::not_found("Conversation not found"))?;

        if let Some(name) = name {
            conversation.name = Some(name.to_string());
        }
        if let Some(description) = description {
            conversation.description = description.map(str::to_string);
        }
        conversation.updated_at = now;

        Ok(conversation.clone())
    }

    async fn transfer_owner(
        &self,
        conversation_id: &Uuid,
        owner_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        let mut state = self.lock();
        Ok(promote_owner(&mut state, conversation_id, owner_id))
    }

    async fn find_by_member(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<ConversationEntity>, error::SystemError> {
        let state = self.lock();
        let ids: HashSet<Uuid> = state
            .memberships
            .iter()
            .filter(|m| m.user_id == *user_id)
            .map(|m| m.conversation_id)
            .collect();

        let mut conversations: Vec<ConversationEntity> =
            state.conversations.iter().filter(|c| ids.contains(&c.id)).cloned().collect();
        conversations.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));

        Ok(conversations)
    }
}

#[async_trait::async_trait]
impl MembershipRepository for MemoryStore {
    async fn find(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<MembershipEntity>, error::SystemError> {
        Ok(self
            .lock()
            .memberships
            .iter()
            .find(|m| m.conversation_id == *conversation_id && m.user_id == *user_id)
            .cloned())
    }

    async fn find_by_conversation(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Vec<MembershipEntity>, error::SystemError> {
        let mut members: Vec<MembershipEntity> = self
            .lock()
            .memberships
            .iter()
            .filter(|m| m.conversation_id == *conversation_id)
            .cloned()
            .collect();
        members.sort_by_key(|m| m.joined_at);
        Ok(members)
    }

    async fn find_by_conversations(
        &self,
        conversation_ids: &[Uuid],
    ) -> Result<Vec<MembershipEntity>, error::SystemError> {
        Ok(self
            .lock()
            .memberships
            .iter()
            .filter(|m| conversation_ids.contains(&m.conversation_id))
            .cloned()
            .collect())
    }

    async fn add(
        &self,
        conversation_id: &Uuid,
        membership: &NewMembership,
    ) -> Result<bool, error::SystemError> {
        let mut state = self.lock();
        if state
            .memberships
            .iter()
            .any(|m| m.conversation_id == *conversation_id && m.user_id == membership.user_id)
        {
            return Ok(false);
        }
        self.push_membership(&mut state, *conversation_id, membership);
        Ok(true)
    }

    async fn remove(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        let mut state = self.lock();
        if state.conversations.iter().any(|c| c.id == *conversation_id && c.owner_id == *user_id) {
            return Err(error::SystemError::invalid_operation(
                "The group owner cannot be removed",
            ));
        }
        let before = state.memberships.len();
        state
            .memberships
            .retain(|m| !(m.conversation_id == *conversation_id && m.user_id == *user_id));
        Ok(state.memberships.len() < before)
    }

    async fn leave(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<Uuid>, error::SystemError> {
        // let concurrent leaves pass their membership checks first
        tokio::task::yield_now().await;
        let mut state = self.lock();

        let owner_id = state
            .conversations
            .iter()
            .find(|c| c.id == *conversation_id)
            .map(|c| c.owner_id)
            .ok_or_else(|| error::SystemError::not_found("Conversation not found"))?;

        let mut members: Vec<MembershipEntity> = state
            .memberships
            .iter()
            .filter(|m| m.conversation_id == *conversation_id)
            .cloned()
            .collect();
        members.sort_by_key(|m| m.joined_at);

        if !members.iter().any(|m| m.user_id == *user_id) {
            return Err(error::SystemError::forbidden("You are not a member of this conversation"));
        }
        if members.len() <= 1 {
            return Err(error::SystemError::invalid_operation(
                "The last member cannot leave the group",
            ));
        }

        state
            .memberships
            .retain(|m| !(m.conversation_id == *conversation_id && m.user_id == *user_id));

        if owner_id != *user_id {
            return Ok(None);
        }
        let successor = next_owner(&members, user_id)
            .ok_or_else(|| error::SystemError::internal("Group has no remaining members"))?;
        promote_owner(&mut state, conversation_id, &successor);
        Ok(Some(successor))
    }

    async fn set_admin(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        is_admin: bool,
    ) -> Result<bool, error::SystemError> {
        let mut state = self.lock();
        let membership = state
            .memberships
            .iter_mut()
            .find(|m| m.conversation_id == *conversation_id && m.user_id == *user_id);
        Ok(membership.map(|m| m.is_admin = is_admin).is_some())
    }

    async fn set_nickname(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        nickname: Option<&str>,
    ) -> Result<bool, error::SystemError> {
        let mut state = self.lock();
        let membership = state
            .memberships
            .iter_mut()
            .find(|m| m.conversation_id == *conversation_id && m.user_id == *user_id);
        Ok(membership.map(|m| m.nickname = nickname.map(str::to_string)).is_some())
    }

    async fn mark_read(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        up_to_seq: Option<i64>,
    ) -> Result<Option<MembershipEntity>, error::SystemError> {
        let mut state = self.lock();
        let now = self.tick(&mut state);
        let latest = state
            .conversations
            .iter()
            .find(|c| c.id == *conversation_id)
            .map_or(0, |c| c.last_message_seq);
        let target = up_to_seq.map_or(latest, |seq| seq.min(latest));

        let membership = state
            .memberships
            .iter_mut()
            .find(|m| m.conversation_id == *conversation_id && m.user_id == *user_id);
        Ok(membership.map(|m| {
            m.last_read_at = Some(now);
            m.last_read_seq = m.last_read_seq.max(target);
            m.clone()
        }))
    }
}

#[async_trait::async_trait]
impl MessageRepository for MemoryStore {
    async fn create(&self, message: &InsertMessage) -> Result<MessageEntity, error::SystemError> {
        let mut state = self.lock();
        if state.fail_attachment_writes && !message.attachments.is_empty() {
            return Err(error::SystemError::internal("attachment insert failed"));
        }
        let now = self.tick(&mut state);

        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
            .ok_or_else(|| error::SystemError::not_found("Conversation not found"))?;
        conversation.last_message_seq += 1;
        conversation.last_activity_at = now;
        let seq = conversation.last_message_seq;

        let entity = MessageEntity {
            id: Uuid::now_v7(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            seq,
            content: message.content.clone(),
            is_system_message: message.is_system_message,
            is_removed: false,
            is_edited: false,
            replied_to_id: message.replied_to_id,
            created_at: now,
            updated_at: now,
        };
        state.messages.push(entity.clone());

        let owner = entity.owner_ref();
        for attachment in &message.attachments {
            state.attachments.push(AttachmentEntity {
                id: Uuid::now_v7(),
                owner_type: owner.owner_type,
                owner_id: owner.owner_id,
                kind: attachment.kind,
                url: attachment.url.clone(),
            });
        }

        Ok(entity)
    }

    async fn find_by_id(
        &self,
        message_id: &Uuid,
    ) -> Result<Option<MessageEntity>, error::SystemError> {
        Ok(self.lock().messages.iter().find(|m| m.id == *message_id).cloned())
    }

    async fn find_by_ids(
        &self,
        message_ids: &[Uuid],
    ) -> Result<Vec<MessageEntity>, error::SystemError> {
        Ok(self.lock().messages.iter().filter(|m| message_ids.contains(&m.id)).cloned().collect())
    }

    async fn find_page(
        &self,
        conversation_id: &Uuid,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<MessageEntity>, error::SystemError> {
        let mut page: Vec<MessageEntity> = self
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == *conversation_id)
            .filter(|m| before.map_or(true, |seq| m.seq < seq))
            .cloned()
            .collect();
        page.sort_by(|a, b| b.seq.cmp(&a.seq));
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }

    async fn find_latest(
        &self,
        conversation_ids: &[Uuid],
    ) -> Result<Vec<MessageEntity>, error::SystemError> {
        let state = self.lock();
        let mut latest: HashMap<Uuid, &MessageEntity> = HashMap::new();
        for message in state.messages.iter().filter(|m| conversation_ids.contains(&m.conversation_id))
        {
            let entry = latest.entry(message.conversation_id).or_insert(message);
            if message.seq > entry.seq {
                *entry = message;
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn update_content(
        &self,
        message_id: &Uuid,
        content: &str,
    ) -> Result<Option<MessageEntity>, error::SystemError> {
        let mut state = self.lock();
        let now = self.tick(&mut state);
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == *message_id && !m.is_removed && !m.is_system_message);
        Ok(message.map(|m| {
            m.content = Some(content.to_string());
            m.is_edited = true;
            m.updated_at = now;
            m.clone()
        }))
    }

    async fn soft_delete(
        &self,
        message_id: &Uuid,
    ) -> Result<Option<MessageEntity>, error::SystemError> {
        let mut state = self.lock();
        let now = self.tick(&mut state);
        let Some(message) = state.messages.iter_mut().find(|m| m.id == *message_id) else {
            return Ok(None);
        };
        if !message.is_removed {
            message.is_removed = true;
            message.content = None;
            message.updated_at = now;
        }
        let message = message.clone();

        let owner = message.owner_ref();
        state
            .attachments
            .retain(|a| !(a.owner_type == owner.owner_type && a.owner_id == owner.owner_id));
        Ok(Some(message))
    }

    async fn count_after(
        &self,
        conversation_id: &Uuid,
        after_seq: i64,
    ) -> Result<i64, error::SystemError> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == *conversation_id && m.seq > after_seq)
            .count() as i64)
    }
}

#[async_trait::async_trait]
impl AttachmentRepository for MemoryStore {
    async fn find_by_owners(
        &self,
        owner_type: OwnerType,
        owner_ids: &[Uuid],
    ) -> Result<Vec<AttachmentEntity>, error::SystemError> {
        let state = self.lock();
        if state.fail_attachment_reads {
            return Err(error::SystemError::internal("attachment lookup failed"));
        }
        Ok(state
            .attachments
            .iter()
            .filter(|a| a.owner_type == owner_type && owner_ids.contains(&a.owner_id))
            .cloned()
            .collect())
    }
}

/// Keeps every notification it is handed; fails for chosen recipients.
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<PushNotification>>,
    failing: Mutex<HashSet<Uuid>>,
}

impl RecordingNotifier {
    pub fn fail_for(&self, recipient_id: Uuid) {
        self.failing.lock().unwrap().insert(recipient_id);
    }

    pub fn delivered(&self) -> Vec<PushNotification> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_to(&self, recipient_id: &Uuid) -> Vec<PushNotification> {
        self.delivered().into_iter().filter(|n| n.recipient_id == *recipient_id).collect()
    }

    /// Polls until at least `count` notifications arrived or a second passed.
    pub async fn wait_for(&self, count: usize) -> Vec<PushNotification> {
        for _ in 0..100 {
            if self.delivered.lock().unwrap().len() >= count {
                break;
            }
            actix_web::rt::time::sleep(Duration::from_millis(10)).await;
        }
        self.delivered()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &PushNotification) -> Result<(), error::SystemError> {
        if self.failing.lock().unwrap().contains(&notification.recipient_id) {
            return Err(error::SystemError::internal("notifier unavailable"));
        }
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub type TestConversationService =
    ConversationService<MemoryStore, MemoryStore, MemoryStore, MemoryStore>;
pub type TestMessageService =
    MessageService<MemoryStore, MemoryStore, MemoryStore, MemoryStore, MemoryStore>;

/// Both services wired to one store. Must be built inside a running system.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub conversations: TestConversationService,
    pub messages: TestMessageService,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::start(notifier.clone(), Duration::from_secs(1));

        let conversations = ConversationService::with_dependencies(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            dispatcher.clone(),
        );
        let messages = MessageService::with_dependencies(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            dispatcher,
        );

        Harness { store, notifier, conversations, messages }
    }
}

pub fn message_fixture(sender_id: Uuid, content: Option<&str>) -> MessageEntity {
    let now = chrono::Utc::now();
    MessageEntity {
        id: Uuid::now_v7(),
        conversation_id: Uuid::now_v7(),
        sender_id,
        seq: 1,
        content: content.map(str::to_string),
        is_system_message: false,
        is_removed: false,
        is_edited: false,
        replied_to_id: None,
        created_at: now,
        updated_at: now,
    }
}
