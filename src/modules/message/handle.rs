use actix_web::{delete, get, patch, post, web, HttpRequest};
use uuid::Uuid;

use crate::{
    api::{error, success},
    middlewares::get_claims,
    modules::{
        attachment::repository_pg::AttachmentPgRepository,
        conversation::repository_pg::{ConversationPgRepository, MembershipPgRepository},
        message::{
            model::{
                EditMessageRequest, GetMessageResponse, MessageQueryRequest, MessageResponse,
                SendMessageRequest,
            },
            repository_pg::MessageRepositoryPg,
            service::MessageService,
        },
        user::repository_pg::UserRepositoryPg,
    },
    utils::{ValidatedJson, ValidatedQuery},
};

pub type MessageSvc = MessageService<
    ConversationPgRepository,
    MembershipPgRepository,
    MessageRepositoryPg,
    AttachmentPgRepository,
    UserRepositoryPg,
>;

#[get("/{conversation_id}/messages")]
pub async fn get_messages(
    message_svc: web::Data<MessageSvc>,
    conversation_id: web::Path<Uuid>,
    query: ValidatedQuery<MessageQueryRequest>,
    req: HttpRequest,
) -> Result<success::Success<GetMessageResponse>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let messages = message_svc.list_messages(*conversation_id, user_id, query.0).await?;

    Ok(success::Success::ok(Some(messages)).message("Successfully retrieved messages"))
}

#[post("/{conversation_id}/messages")]
pub async fn send_message(
    message_svc: web::Data<MessageSvc>,
    conversation_id: web::Path<Uuid>,
    body: ValidatedJson<SendMessageRequest>,
    req: HttpRequest,
) -> Result<success::Success<MessageResponse>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let message = message_svc.post_message(*conversation_id, user_id, body.0).await?;

    Ok(success::Success::created(Some(message)).message("Send message successfully"))
}

#[patch("/{message_id}")]
pub async fn edit_message(
    message_svc: web::Data<MessageSvc>,
    message_id: web::Path<Uuid>,
    body: ValidatedJson<EditMessageRequest>,
    req: HttpRequest,
) -> Result<success::Success<MessageResponse>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let message = message_svc.edit_message(*message_id, user_id, body.0.content).await?;

    Ok(success::Success::ok(Some(message)).message("Edit message successfully"))
}

#[delete("/{message_id}")]
pub async fn delete_message(
    message_svc: web::Data<MessageSvc>,
    message_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<MessageResponse>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let message = message_svc.soft_delete(*message_id, user_id).await?;

    Ok(success::Success::ok(Some(message)).message("Remove message successfully"))
}
