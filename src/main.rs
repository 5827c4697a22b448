use actix_cors::Cors;
use actix_web::{
    self,
    middleware::{from_fn, Logger},
    web, App, HttpServer,
};
use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use crate::{
    configs::{connect_database, RedisQueue},
    middlewares::authentication,
    modules::{
        attachment::repository_pg::AttachmentPgRepository,
        conversation::{
            repository_pg::{ConversationPgRepository, MembershipPgRepository},
            service::ConversationService,
        },
        media::{model::UploadConfig, service::MediaService, storage::LocalMediaStorage},
        message::{repository_pg::MessageRepositoryPg, service::MessageService},
        notification::{notifier_redis::RedisNotifier, service::NotificationDispatcher},
        user::repository_pg::UserRepositoryPg,
    },
};

mod api;
mod configs;
mod constants;
mod middlewares;
mod modules;
#[cfg(test)]
mod test;
mod utils;

pub static ENV: LazyLock<constants::Env> = LazyLock::new(|| {
    dotenvy::dotenv().ok();
    env_logger::init();
    log::info!("Environment variables loaded from .env file");
    constants::Env::default()
});

#[actix_web::get("/")]
async fn health_check(db_pool: web::Data<sqlx::PgPool>) -> &'static str {
    match sqlx::query("SELECT 1").execute(db_pool.get_ref()).await {
        Ok(_) => "Server is running",
        Err(e) => {
            log::warn!("Health check could not reach the database: {e}");
            "Server is running without database"
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let db_pool =
        connect_database().await.map_err(|_| std::io::Error::other("Database connection error"))?;

    let redis_queue =
        RedisQueue::new().await.map_err(|_| std::io::Error::other("Redis connection error"))?;

    let conversation_repo = Arc::new(ConversationPgRepository::new(db_pool.clone()));
    let membership_repo = Arc::new(MembershipPgRepository::new(db_pool.clone()));
    let message_repo = Arc::new(MessageRepositoryPg::new(db_pool.clone()));
    let attachment_repo = Arc::new(AttachmentPgRepository::new(db_pool.clone()));
    let user_repo = Arc::new(UserRepositoryPg::new(db_pool.clone()));

    let dispatcher = NotificationDispatcher::start(
        Arc::new(RedisNotifier::new(redis_queue, ENV.notification_queue.as_str())),
        Duration::from_secs(ENV.notifier_timeout_secs),
    );

    let conversation_service = ConversationService::with_dependencies(
        conversation_repo.clone(),
        membership_repo.clone(),
        message_repo.clone(),
        user_repo.clone(),
        dispatcher.clone(),
    );
    let message_service = MessageService::with_dependencies(
        conversation_repo,
        membership_repo,
        message_repo,
        attachment_repo,
        user_repo,
        dispatcher,
    );

    let upload_config = UploadConfig::from_env();
    let media_service = MediaService::new(
        Arc::new(LocalMediaStorage::new(&upload_config.upload_dir, &upload_config.base_url)),
        upload_config,
    );

    log::info!("Starting server at http://{}:{}", ENV.ip.as_str(), ENV.port);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&ENV.frontend_url)
            .allowed_methods(vec!["GET", "POST", "PATCH", "DELETE"])
            .allow_any_header()
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(conversation_service.clone()))
            .app_data(web::Data::new(message_service.clone()))
            .app_data(web::Data::new(media_service.clone()))
            .app_data(web::Data::new(db_pool.clone()))
            .service(health_check)
            .service(
                web::scope("/api")
                    .wrap(from_fn(authentication))
                    .configure(modules::conversation::route::configure)
                    .configure(modules::message::route::configure)
                    .configure(modules::media::route::configure),
            )
    })
    .bind((ENV.ip.as_str(), ENV.port))?
    .workers(2)
    .run()
    .await
}
