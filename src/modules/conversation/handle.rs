use actix_web::{delete, get, patch, post, web, HttpRequest};
use uuid::Uuid;

use crate::{
    api::{error, success},
    middlewares::get_claims,
    modules::{
        conversation::{
            model::{
                AddMemberRequest, ConversationDetail, ConversationSummary,
                CreateDirectConversation, CreateGroupConversation, MemberResponse,
                NicknameRequest, UnreadCountResponse, UpdateGroupConversation,
            },
            repository_pg::{ConversationPgRepository, MembershipPgRepository},
            service::ConversationService,
        },
        message::repository_pg::MessageRepositoryPg,
        user::repository_pg::UserRepositoryPg,
    },
    utils::ValidatedJson,
};

pub type ConversationSvc = ConversationService<
    ConversationPgRepository,
    MembershipPgRepository,
    MessageRepositoryPg,
    UserRepositoryPg,
>;

#[get("")]
pub async fn get_conversations(
    conversation_svc: web::Data<ConversationSvc>,
    req: HttpRequest,
) -> Result<success::Success<Vec<ConversationSummary>>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let conversations = conversation_svc.list_conversations(user_id).await?;

    Ok(success::Success::ok(Some(conversations)).message("Successfully retrieved conversations"))
}

#[post("/direct")]
pub async fn create_direct_conversation(
    conversation_svc: web::Data<ConversationSvc>,
    body: ValidatedJson<CreateDirectConversation>,
    req: HttpRequest,
) -> Result<success::Success<ConversationDetail>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let conversation = conversation_svc.get_or_create_direct(user_id, body.0.user_id).await?;

    Ok(success::Success::ok(Some(conversation)).message("Successfully opened conversation"))
}

#[post("/group")]
pub async fn create_group_conversation(
    conversation_svc: web::Data<ConversationSvc>,
    body: ValidatedJson<CreateGroupConversation>,
    req: HttpRequest,
) -> Result<success::Success<ConversationDetail>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let conversation = conversation_svc.create_group(user_id, body.0).await?;

    Ok(success::Success::created(Some(conversation)).message("Successfully created group"))
}

#[get("/{conversation_id}")]
pub async fn get_conversation(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<ConversationDetail>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let conversation = conversation_svc.get_conversation(*conversation_id, user_id).await?;

    Ok(success::Success::ok(Some(conversation)))
}

#[patch("/{conversation_id}")]
pub async fn update_group_conversation(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<Uuid>,
    body: ValidatedJson<UpdateGroupConversation>,
    req: HttpRequest,
) -> Result<success::Success<ConversationDetail>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let conversation =
        conversation_svc.update_group(*conversation_id, user_id, body.0).await?;

    Ok(success::Success::ok(Some(conversation)).message("Successfully updated group"))
}

#[post("/{conversation_id}/members")]
pub async fn add_member(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<Uuid>,
    body: ValidatedJson<AddMemberRequest>,
    req: HttpRequest,
) -> Result<success::Success<ConversationDetail>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let conversation =
        conversation_svc.add_member(*conversation_id, user_id, body.0.user_id).await?;

    Ok(success::Success::ok(Some(conversation)).message("Successfully added member"))
}

#[delete("/{conversation_id}/members/{user_id}")]
pub async fn remove_member(
    conversation_svc: web::Data<ConversationSvc>,
    path: web::Path<(Uuid, Uuid)>,
    req: HttpRequest,
) -> Result<success::Success<ConversationDetail>, error::Error> {
    let actor_id = get_claims(&req)?.sub;
    let (conversation_id, user_id) = path.into_inner();

    let conversation = conversation_svc.remove_member(conversation_id, actor_id, user_id).await?;

    Ok(success::Success::ok(Some(conversation)).message("Successfully removed member"))
}

#[post("/{conversation_id}/leave")]
pub async fn leave_conversation(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<()>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    conversation_svc.leave(*conversation_id, user_id).await?;

    Ok(success::Success::no_content())
}

#[patch("/{conversation_id}/nickname")]
pub async fn set_nickname(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<Uuid>,
    body: ValidatedJson<NicknameRequest>,
    req: HttpRequest,
) -> Result<success::Success<MemberResponse>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let member = conversation_svc.set_nickname(*conversation_id, user_id, body.0.nickname).await?;

    Ok(success::Success::ok(Some(member)).message("Successfully updated nickname"))
}

#[post("/{conversation_id}/read")]
pub async fn mark_read(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<()>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    conversation_svc.mark_read(*conversation_id, user_id).await?;

    Ok(success::Success::no_content())
}

#[get("/{conversation_id}/unread")]
pub async fn get_unread_count(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<UnreadCountResponse>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let unread_count = conversation_svc.unread_count(*conversation_id, user_id).await?;

    Ok(success::Success::ok(Some(UnreadCountResponse {
        conversation_id: *conversation_id,
        unread_count,
    })))
}
