use actix_web::web::{scope, ServiceConfig};

use crate::modules::{conversation::handle::*, message::handle as message_handle};

pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(
        scope("/conversations")
            .service(get_conversations)
            .service(create_direct_conversation)
            .service(create_group_conversation)
            .service(get_conversation)
            .service(update_group_conversation)
            .service(add_member)
            .service(remove_member)
            .service(leave_conversation)
            .service(set_nickname)
            .service(mark_read)
            .service(get_unread_count)
            .service(message_handle::get_messages)
            .service(message_handle::send_message),
    );
}
