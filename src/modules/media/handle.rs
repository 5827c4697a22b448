use actix_multipart::Multipart;
use actix_web::{post, web, HttpRequest};
use futures_util::TryStreamExt;

use crate::{
    api::{error, success},
    middlewares::get_claims,
    modules::media::{model::MediaUploadResponse, service::MediaService, storage::LocalMediaStorage},
};

pub type MediaSvc = MediaService<LocalMediaStorage>;

#[post("/upload")]
pub async fn upload_media(
    media_svc: web::Data<MediaSvc>,
    mut payload: Multipart,
    req: HttpRequest,
) -> Result<success::Success<MediaUploadResponse>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| error::Error::bad_request(e.to_string()))?
    else {
        return Err(error::Error::bad_request("No file found in request"));
    };

    let filename = field
        .content_disposition()
        .and_then(|cd| cd.get_filename())
        .ok_or_else(|| error::Error::bad_request("Missing filename"))?
        .to_string();
    let mime_type = field.content_type().map(|m| m.to_string());

    let limit = media_svc.max_file_size();
    let mut bytes = Vec::new();
    while let Some(chunk) =
        field.try_next().await.map_err(|e| error::Error::bad_request(e.to_string()))?
    {
        if bytes.len() + chunk.len() > limit {
            return Err(error::Error::bad_request(format!(
                "File size exceeds maximum allowed size of {limit} bytes"
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    let uploaded = media_svc.upload(&filename, bytes, mime_type, user_id).await?;

    Ok(success::Success::created(Some(uploaded)).message("File uploaded successfully"))
}
