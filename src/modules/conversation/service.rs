use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        conversation::{
            model::{
                display_name, ConversationDetail, ConversationSummary, CreateGroupConversation,
                LastMessagePreview, MemberResponse, NewGroupConversation, NewMembership,
                UpdateGroupConversation, RECENT_MEMBERS_LIMIT,
            },
            repository::{ConversationRepository, MembershipRepository},
            schema::{direct_key, ConversationEntity, MembershipEntity},
        },
        message::{
            model::{truncate_preview, InsertMessage, PREVIEW_CHARS},
            repository::MessageRepository,
        },
        notification::{model::MembershipChange, service::NotificationDispatcher},
        user::{model::UserSummary, repository::UserRepository},
    },
};

const UNKNOWN_MEMBER: &str = "A former member";

/// Loads a conversation together with `user_id`'s membership in it.
/// `NotFound` for an unknown conversation, `Forbidden` for non-members.
pub async fn load_membership<C, M>(
    conversation_repo: &C,
    membership_repo: &M,
    conversation_id: &Uuid,
    user_id: &Uuid,
) -> Result<(ConversationEntity, MembershipEntity), error::SystemError>
where
    C: ConversationRepository + Send + Sync + ?Sized,
    M: MembershipRepository + Send + Sync + ?Sized,
{
    let conversation = conversation_repo
        .find_by_id(conversation_id)
        .await?
        .ok_or_else(|| error::SystemError::not_found("Conversation not found"))?;

    let membership = membership_repo
        .find(conversation_id, user_id)
        .await?
        .ok_or_else(|| error::SystemError::forbidden("You are not a member of this conversation"))?;

    Ok((conversation, membership))
}

/// Title used in notifications about a group.
pub fn group_title(conversation: &ConversationEntity) -> String {
    conversation.name.clone().unwrap_or_else(|| "a group conversation".to_string())
}

#[derive(Clone)]
pub struct ConversationService<C, M, S, U>
where
    C: ConversationRepository + Send + Sync + 'static,
    M: MembershipRepository + Send + Sync + 'static,
    S: MessageRepository + Send + Sync + 'static,
    U: UserRepository + Send + Sync + 'static,
{
    conversation_repo: Arc<C>,
    membership_repo: Arc<M>,
    message_repo: Arc<S>,
    user_repo: Arc<U>,
    dispatcher: NotificationDispatcher,
}

impl<C, M, S, U> ConversationService<C, M, S, U>
where
    C: ConversationRepository + Send + Sync + 'static,
    M: MembershipRepository + Send + Sync + 'static,
    S: MessageRepository + Send + Sync + 'static,
    U: UserRepository + Send + Sync + 'static,
{
    pub fn with_dependencies(
        conversation_repo: Arc<C>,
        membership_repo: Arc<M>,
        message_repo: Arc<S>,
        user_repo: Arc<U>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        ConversationService {
            conversation_repo,
            membership_repo,
            message_repo,
            user_repo,
            dispatcher,
        }
    }

    pub async fn get_or_create_direct(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
    ) -> Result<ConversationDetail, error::SystemError> {
        if user_id == peer_id {
            return Err(error::SystemError::bad_request(
                "Cannot start a conversation with yourself",
            ));
        }

        self.user_repo
            .find_by_id(&peer_id)
            .await?
            .ok_or_else(|| error::SystemError::not_found("User not found"))?;

        let key = direct_key(&user_id, &peer_id);

        let conversation = match self.conversation_repo.find_direct(&key).await? {
            Some(conversation) => conversation,
            None => match self.conversation_repo.create_direct(&user_id, &peer_id).await {
                Ok(conversation) => {
                    log::info!("Direct conversation {} created for {}", conversation.id, key);
                    conversation
                }
                // another request created the pair first
                Err(error::SystemError::Conflict(_)) => {
                    self.conversation_repo.find_direct(&key).await?.ok_or_else(|| {
                        error::SystemError::internal("Direct conversation missing after conflict")
                    })?
                }
                Err(e) => return Err(e),
            },
        };

        self.detail(&conversation, &user_id).await
    }

    pub async fn create_group(
        &self,
        creator_id: Uuid,
        request: CreateGroupConversation,
    ) -> Result<ConversationDetail, error::SystemError> {
        let creator = self.summary_of(&creator_id).await?;

        let candidates: Vec<Uuid> = dedup(request.member_ids.iter().copied())
            .into_iter()
            .filter(|id| *id != creator_id)
            .collect();
        let known = self.user_repo.find_by_ids(&candidates).await?;
        let known_ids: HashSet<Uuid> = known.iter().map(|u| u.id).collect();
        let admin_ids: HashSet<Uuid> = request.admin_ids.iter().copied().collect();

        let mut members = vec![NewMembership { user_id: creator_id, is_admin: true }];
        members.extend(
            candidates
                .iter()
                .filter(|id| known_ids.contains(id))
                .map(|id| NewMembership { user_id: *id, is_admin: admin_ids.contains(id) }),
        );

        if known_ids.len() < candidates.len() {
            log::debug!(
                "Skipped {} unknown users while creating a group",
                candidates.len() - known_ids.len()
            );
        }

        let conversation = self
            .conversation_repo
            .create_group(&NewGroupConversation {
                owner_id: creator_id,
                name: request.name,
                description: request.description,
                members,
            })
            .await?;

        self.append_system(
            &conversation,
            creator_id,
            format!("{} created the group", creator.display_name),
        )
        .await?;

        let title = group_title(&conversation);
        for user_id in known_ids {
            self.dispatcher.on_membership_changed(
                conversation.id,
                creator_id,
                user_id,
                MembershipChange::Added,
                &title,
            );
        }

        log::info!("Group conversation {} created by {}", conversation.id, creator_id);
        self.detail(&conversation, &creator_id).await
    }

    /// Applies, in order: metadata, member diff, admin flags, owner transfer.
    /// Unknown user ids are skipped rather than rejected.
    pub async fn update_group(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
        request: UpdateGroupConversation,
    ) -> Result<ConversationDetail, error::SystemError> {
        let (mut conversation, requester) = load_membership(
            self.conversation_repo.as_ref(),
            self.membership_repo.as_ref(),
            &conversation_id,
            &requester_id,
        )
        .await?;

        if !requester.is_admin {
            return Err(error::SystemError::forbidden("Only admins can update the group"));
        }
        if !conversation.is_group {
            return Err(error::SystemError::invalid_operation(
                "Direct conversations cannot be updated",
            ));
        }
        let transfer_to = request.owner_id.filter(|id| *id != conversation.owner_id);
        if transfer_to.is_some() && conversation.owner_id != requester_id {
            return Err(error::SystemError::forbidden("Only the owner can transfer ownership"));
        }

        let actor = self.summary_of(&requester_id).await?;

        if request.name.is_some() || request.description.is_some() {
            let previous_name = conversation.name.clone();
            conversation = self
                .conversation_repo
                .update_details(
                    &conversation_id,
                    request.name.as_deref(),
                    request.description.as_ref().map(|d| d.as_deref()),
                )
                .await?;

            if let Some(name) = request.name.as_deref().filter(|n| previous_name.as_deref() != Some(*n)) {
                self.append_system(
                    &conversation,
                    requester_id,
                    format!("{} renamed the group to {}", actor.display_name, name),
                )
                .await?;
            }
        }

        if let Some(member_ids) = &request.member_ids {
            self.apply_member_diff(&conversation, requester_id, member_ids).await?;
        }

        if let Some(admin_ids) = &request.admin_ids {
            let mut admins: HashSet<Uuid> = admin_ids.iter().copied().collect();
            admins.insert(conversation.owner_id);

            for member in self.membership_repo.find_by_conversation(&conversation_id).await? {
                let should_be_admin = admins.contains(&member.user_id);
                if member.is_admin != should_be_admin {
                    self.membership_repo
                        .set_admin(&conversation_id, &member.user_id, should_be_admin)
                        .await?;
                }
            }
        }

        if let Some(new_owner) = transfer_to {
            if self.conversation_repo.transfer_owner(&conversation_id, &new_owner).await? {
                conversation.owner_id = new_owner;
                log::info!("Ownership of {} transferred to {}", conversation_id, new_owner);
            } else {
                log::debug!("Skipped ownership transfer of {} to non-member", conversation_id);
            }
        }

        self.detail(&conversation, &requester_id).await
    }

    async fn apply_member_diff(
        &self,
        conversation: &ConversationEntity,
        actor_id: Uuid,
        member_ids: &[Uuid],
    ) -> Result<(), error::SystemError> {
        let current = self.membership_repo.find_by_conversation(&conversation.id).await?;
        let current_ids: HashSet<Uuid> = current.iter().map(|m| m.user_id).collect();

        let mut wanted: HashSet<Uuid> = member_ids.iter().copied().collect();
        wanted.insert(conversation.owner_id);

        let removed: Vec<Uuid> =
            current.iter().map(|m| m.user_id).filter(|id| !wanted.contains(id)).collect();
        let added: Vec<Uuid> = dedup(member_ids.iter().copied())
            .into_iter()
            .filter(|id| !current_ids.contains(id))
            .collect();

        let involved: Vec<Uuid> = removed.iter().chain(added.iter()).copied().collect();
        let users = self.summaries_of(&involved).await?;
        let title = group_title(conversation);

        for user_id in removed {
            if !self.membership_repo.remove(&conversation.id, &user_id).await? {
                continue;
            }
            self.append_system(
                conversation,
                actor_id,
                format!("{} was removed", name_of(&users, &user_id)),
            )
            .await?;
            self.dispatcher.on_membership_changed(
                conversation.id,
                actor_id,
                user_id,
                MembershipChange::Removed,
                &title,
            );
        }

        for user_id in added {
            let Some(user) = users.get(&user_id) else {
                log::debug!("Skipped unknown user {} in group update", user_id);
                continue;
            };
            let membership = NewMembership { user_id, is_admin: false };
            if !self.membership_repo.add(&conversation.id, &membership).await? {
                continue;
            }
            self.append_system(conversation, actor_id, format!("{} was added", user.display_name))
                .await?;
            self.dispatcher.on_membership_changed(
                conversation.id,
                actor_id,
                user_id,
                MembershipChange::Added,
                &title,
            );
        }

        Ok(())
    }

    pub async fn add_member(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
    ) -> Result<ConversationDetail, error::SystemError> {
        let conversation = self.require_group_admin(&conversation_id, &actor_id).await?;

        let user: UserSummary = self
            .user_repo
            .find_by_id(&user_id)
            .await?
            .ok_or_else(|| error::SystemError::not_found("User not found"))?
            .into();

        let added = self
            .membership_repo
            .add(&conversation_id, &NewMembership { user_id, is_admin: false })
            .await?;

        if added {
            self.append_system(&conversation, actor_id, format!("{} was added", user.display_name))
                .await?;
            self.dispatcher.on_membership_changed(
                conversation_id,
                actor_id,
                user_id,
                MembershipChange::Added,
                &group_title(&conversation),
            );
            log::info!("User {} added to {} by {}", user_id, conversation_id, actor_id);
        }

        self.detail(&conversation, &actor_id).await
    }

    pub async fn remove_member(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
    ) -> Result<ConversationDetail, error::SystemError> {
        let conversation = self.require_group_admin(&conversation_id, &actor_id).await?;

        if conversation.owner_id == user_id {
            return Err(error::SystemError::invalid_operation(
                "The group owner cannot be removed",
            ));
        }

        // deleted accounts keep their membership rows, so look the member up
        // rather than the user
        let not_member =
            || error::SystemError::not_found("User is not a member of this conversation");
        self.membership_repo.find(&conversation_id, &user_id).await?.ok_or_else(not_member)?;
        let users = self.summaries_of(&[user_id]).await?;

        if !self.membership_repo.remove(&conversation_id, &user_id).await? {
            return Err(not_member());
        }

        self.append_system(
            &conversation,
            actor_id,
            format!("{} was removed", name_of(&users, &user_id)),
        )
        .await?;
        self.dispatcher.on_membership_changed(
            conversation_id,
            actor_id,
            user_id,
            MembershipChange::Removed,
            &group_title(&conversation),
        );
        log::info!("User {} removed from {} by {}", user_id, conversation_id, actor_id);

        self.detail(&conversation, &actor_id).await
    }

    /// Removes `user_id` from a group. An owner who leaves hands the group to
    /// the longest-standing admin, or the longest-standing member.
    pub async fn leave(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), error::SystemError> {
        let (conversation, _) = load_membership(
            self.conversation_repo.as_ref(),
            self.membership_repo.as_ref(),
            &conversation_id,
            &user_id,
        )
        .await?;

        if !conversation.is_group {
            return Err(error::SystemError::invalid_operation(
                "Direct conversations cannot be left",
            ));
        }

        let leaver = self.summaries_of(&[user_id]).await?;

        if let Some(successor) = self.membership_repo.leave(&conversation_id, &user_id).await? {
            log::info!("Ownership of {} passed to {}", conversation_id, successor);
        }

        self.append_system(
            &conversation,
            user_id,
            format!("{} left the group", name_of(&leaver, &user_id)),
        )
        .await?;

        Ok(())
    }

    pub async fn set_nickname(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        nickname: Option<String>,
    ) -> Result<MemberResponse, error::SystemError> {
        load_membership(
            self.conversation_repo.as_ref(),
            self.membership_repo.as_ref(),
            &conversation_id,
            &user_id,
        )
        .await?;

        let nickname = nickname.as_deref().map(str::trim).filter(|n| !n.is_empty());
        self.membership_repo.set_nickname(&conversation_id, &user_id, nickname).await?;

        let membership = self
            .membership_repo
            .find(&conversation_id, &user_id)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Membership not found"))?;

        Ok(MemberResponse::new(&membership, self.summary_of(&user_id).await?))
    }

    pub async fn get_conversation(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> Result<ConversationDetail, error::SystemError> {
        let (conversation, _) = load_membership(
            self.conversation_repo.as_ref(),
            self.membership_repo.as_ref(),
            &conversation_id,
            &requester_id,
        )
        .await?;

        self.detail(&conversation, &requester_id).await
    }

    pub async fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, error::SystemError> {
        let conversations = self.conversation_repo.find_by_member(&user_id).await?;
        if conversations.is_empty() {
            return Ok(Vec::new());
        }

        let conversation_ids: Vec<Uuid> = conversations.iter().map(|c| c.id).collect();

        let memberships = self.membership_repo.find_by_conversations(&conversation_ids).await?;
        let latest = self.message_repo.find_latest(&conversation_ids).await?;

        let user_ids = dedup(memberships.iter().map(|m| m.user_id));
        let users = self.summaries_of(&user_ids).await?;

        let mut members_by_conversation = memberships.into_iter().fold(
            HashMap::<Uuid, Vec<MembershipEntity>>::new(),
            |mut acc, membership| {
                acc.entry(membership.conversation_id).or_default().push(membership);
                acc
            },
        );
        let mut latest_by_conversation: HashMap<Uuid, _> =
            latest.into_iter().map(|m| (m.conversation_id, m)).collect();

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let mut memberships =
                members_by_conversation.remove(&conversation.id).unwrap_or_default();
            memberships.sort_by_key(|m| m.joined_at);

            let last_read_seq =
                memberships.iter().find(|m| m.user_id == user_id).map_or(0, |m| m.last_read_seq);
            let unread_count =
                self.message_repo.count_after(&conversation.id, last_read_seq).await?;

            let members: Vec<MemberResponse> = memberships
                .iter()
                .filter_map(|m| users.get(&m.user_id).map(|u| MemberResponse::new(m, u.clone())))
                .collect();

            let recent_members = members
                .iter()
                .rev()
                .filter(|m| m.user.id != user_id)
                .take(RECENT_MEMBERS_LIMIT)
                .map(|m| m.user.clone())
                .collect();

            let last_message =
                latest_by_conversation.remove(&conversation.id).map(|m| LastMessagePreview {
                    message_id: m.id,
                    sender_id: m.sender_id,
                    content: m.formatted_content().map(|c| truncate_preview(&c, PREVIEW_CHARS)),
                    is_system_message: m.is_system_message,
                    created_at: m.created_at,
                });

            summaries.push(ConversationSummary {
                id: conversation.id,
                name: display_name(conversation.name.as_deref(), &members, &user_id),
                is_group: conversation.is_group,
                recent_members,
                last_message,
                unread_count,
                last_activity_at: conversation.last_activity_at,
            });
        }

        Ok(summaries)
    }

    /// Marks everything posted so far as read.
    pub async fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), error::SystemError> {
        load_membership(
            self.conversation_repo.as_ref(),
            self.membership_repo.as_ref(),
            &conversation_id,
            &user_id,
        )
        .await?;

        self.membership_repo
            .mark_read(&conversation_id, &user_id, None)
            .await?
            .ok_or_else(|| error::SystemError::forbidden("You are not a member of this conversation"))?;

        Ok(())
    }

    pub async fn unread_count(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<i64, error::SystemError> {
        let (_, membership) = load_membership(
            self.conversation_repo.as_ref(),
            self.membership_repo.as_ref(),
            &conversation_id,
            &user_id,
        )
        .await?;

        self.message_repo.count_after(&conversation_id, membership.last_read_seq).await
    }

    async fn require_group_admin(
        &self,
        conversation_id: &Uuid,
        actor_id: &Uuid,
    ) -> Result<ConversationEntity, error::SystemError> {
        let (conversation, actor) = load_membership(
            self.conversation_repo.as_ref(),
            self.membership_repo.as_ref(),
            conversation_id,
            actor_id,
        )
        .await?;

        if !actor.is_admin {
            return Err(error::SystemError::forbidden("Only admins can manage members"));
        }
        if !conversation.is_group {
            return Err(error::SystemError::invalid_operation(
                "Direct conversations have fixed members",
            ));
        }

        Ok(conversation)
    }

    async fn append_system(
        &self,
        conversation: &ConversationEntity,
        actor_id: Uuid,
        text: String,
    ) -> Result<(), error::SystemError> {
        self.message_repo.create(&InsertMessage::system(conversation.id, actor_id, text)).await?;
        Ok(())
    }

    async fn detail(
        &self,
        conversation: &ConversationEntity,
        viewer_id: &Uuid,
    ) -> Result<ConversationDetail, error::SystemError> {
        // re-read: membership changes may have moved the owner
        let conversation = self
            .conversation_repo
            .find_by_id(&conversation.id)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Conversation not found"))?;

        let memberships = self.membership_repo.find_by_conversation(&conversation.id).await?;
        let user_ids: Vec<Uuid> = memberships.iter().map(|m| m.user_id).collect();
        let users = self.summaries_of(&user_ids).await?;

        let members: Vec<MemberResponse> = memberships
            .iter()
            .filter_map(|m| users.get(&m.user_id).map(|u| MemberResponse::new(m, u.clone())))
            .collect();

        Ok(ConversationDetail {
            id: conversation.id,
            display_name: display_name(conversation.name.as_deref(), &members, viewer_id),
            name: conversation.name,
            description: conversation.description,
            is_group: conversation.is_group,
            owner_id: conversation.owner_id,
            members,
            last_activity_at: conversation.last_activity_at,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        })
    }

    async fn summary_of(&self, user_id: &Uuid) -> Result<UserSummary, error::SystemError> {
        let user = self
            .user_repo
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| error::SystemError::not_found("User not found"))?;
        Ok(user.into())
    }

    async fn summaries_of(
        &self,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, UserSummary>, error::SystemError> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let users = self.user_repo.find_by_ids(user_ids).await?;
        Ok(users.into_iter().map(|u| (u.id, UserSummary::from(u))).collect())
    }
}

fn name_of<'a>(users: &'a HashMap<Uuid, UserSummary>, user_id: &Uuid) -> &'a str {
    users.get(user_id).map(|u| u.display_name.as_str()).unwrap_or(UNKNOWN_MEMBER)
}

fn dedup(ids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
