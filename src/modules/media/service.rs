use std::{path::Path, sync::Arc};
use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        attachment::{
            model::{variant_url, Variant},
            schema::AttachmentKind,
        },
        media::{
            model::{MediaUploadResponse, UploadConfig},
            storage::MediaStorage,
        },
    },
};

#[derive(Clone)]
pub struct MediaService<S>
where
    S: MediaStorage + Send + Sync + 'static,
{
    storage: Arc<S>,
    config: UploadConfig,
}

impl<S> MediaService<S>
where
    S: MediaStorage + Send + Sync + 'static,
{
    pub fn new(storage: Arc<S>, config: UploadConfig) -> Self {
        Self { storage, config }
    }

    pub fn max_file_size(&self) -> usize {
        self.config.max_file_size
    }

    /// Stores an image or video. The declared MIME type wins unless it is
    /// missing or generic, in which case it is guessed from the filename.
    pub async fn upload(
        &self,
        original_filename: &str,
        bytes: Vec<u8>,
        declared_mime: Option<String>,
        uploader_id: Uuid,
    ) -> Result<MediaUploadResponse, error::SystemError> {
        if bytes.is_empty() {
            return Err(error::SystemError::bad_request("File is empty"));
        }
        if bytes.len() > self.config.max_file_size {
            return Err(error::SystemError::bad_request(format!(
                "File size exceeds maximum allowed size of {} bytes",
                self.config.max_file_size
            )));
        }

        let mime_type = declared_mime
            .filter(|m| m.as_str() != mime_guess::mime::APPLICATION_OCTET_STREAM.essence_str())
            .or_else(|| mime_guess::from_path(original_filename).first().map(|m| m.to_string()))
            .ok_or_else(|| error::SystemError::bad_request("Unknown file type"))?;

        let kind = media_kind(&mime_type).ok_or_else(|| {
            error::SystemError::bad_request(format!("File type '{mime_type}' is not allowed"))
        })?;

        let folder = match kind {
            AttachmentKind::Image => "images",
            AttachmentKind::Video => "videos",
        };
        let filename = generate_filename(original_filename, &mime_type);

        let url = self.storage.store(&bytes, folder, &filename, &mime_type).await?;
        log::info!("User {} uploaded {} ({} bytes)", uploader_id, url, bytes.len());

        Ok(MediaUploadResponse {
            thumbnail_url: variant_url(&url, kind, Variant::Thumbnail),
            medium_url: variant_url(&url, kind, Variant::Medium),
            url,
            kind,
            mime_type,
            file_size: bytes.len(),
        })
    }
}

fn media_kind(mime_type: &str) -> Option<AttachmentKind> {
    match mime_type.split('/').next() {
        Some("image") => Some(AttachmentKind::Image),
        Some("video") => Some(AttachmentKind::Video),
        _ => None,
    }
}

/// The extension always comes from the validated MIME type. The client's
/// extension is kept only when it is one the type allows.
fn generate_filename(original_filename: &str, mime_type: &str) -> String {
    let allowed = mime_guess::get_mime_extensions_str(mime_type).unwrap_or_default();
    let extension = Path::new(original_filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .filter(|ext| allowed.contains(&ext.as_str()))
        .or_else(|| allowed.first().map(|ext| ext.to_string()));

    let id = Uuid::now_v7();
    match extension {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStorage {
        stored: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait::async_trait]
    impl MediaStorage for MemoryStorage {
        async fn store(
            &self,
            bytes: &[u8],
            folder: &str,
            filename: &str,
            _mime_type: &str,
        ) -> Result<String, error::SystemError> {
            self.stored.lock().unwrap().push((folder.into(), filename.into(), bytes.len()));
            Ok(format!("https://res.cloudinary.com/demo/image/upload/{folder}/{filename}"))
        }
    }

    fn service(max_file_size: usize) -> (MediaService<MemoryStorage>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::default());
        let config = UploadConfig {
            max_file_size,
            upload_dir: "./uploads".into(),
            base_url: "/uploads".into(),
        };
        (MediaService::new(storage.clone(), config), storage)
    }

    #[actix_web::test]
    async fn images_are_stored_with_variants() {
        let (svc, storage) = service(1024);

        let res = svc
            .upload("Kitchen.PNG", vec![1; 10], Some("image/png".into()), Uuid::now_v7())
            .await
            .unwrap();

        assert_eq!(res.kind, AttachmentKind::Image);
        assert!(res.url.ends_with(".png"));
        assert!(res.thumbnail_url.contains("/upload/c_thumb,w_200,h_200/images/"));
        let stored = storage.stored.lock().unwrap();
        assert_eq!(stored[0].0, "images");
        assert_eq!(stored[0].2, 10);
    }

    #[actix_web::test]
    async fn generic_mime_falls_back_to_filename() {
        let (svc, storage) = service(1024);

        let res = svc
            .upload("tour.mp4", vec![1; 10], Some("application/octet-stream".into()), Uuid::now_v7())
            .await
            .unwrap();

        assert_eq!(res.kind, AttachmentKind::Video);
        assert_eq!(res.mime_type, "video/mp4");
        assert_eq!(storage.stored.lock().unwrap()[0].0, "videos");
    }

    #[test]
    fn extension_follows_the_mime_type() {
        assert!(generate_filename("x.html", "image/png").ends_with(".png"));
        assert!(generate_filename("listing.JPG", "image/jpeg").ends_with(".jpg"));
        assert!(generate_filename("noext", "image/png").ends_with(".png"));
    }

    #[actix_web::test]
    async fn disguised_file_is_stored_under_its_real_extension() {
        let (svc, storage) = service(1024);

        let res = svc
            .upload("x.html", vec![1; 10], Some("image/png".into()), Uuid::now_v7())
            .await
            .unwrap();

        assert!(res.url.ends_with(".png"));
        assert!(storage.stored.lock().unwrap()[0].1.ends_with(".png"));
    }

    #[actix_web::test]
    async fn rejects_other_types_and_oversized_files() {
        let (svc, storage) = service(16);

        let err = svc
            .upload("lease.pdf", vec![1; 4], Some("application/pdf".into()), Uuid::now_v7())
            .await
            .unwrap_err();
        assert!(matches!(err, error::SystemError::BadRequest(_)));

        let err = svc
            .upload("big.jpg", vec![1; 17], Some("image/jpeg".into()), Uuid::now_v7())
            .await
            .unwrap_err();
        assert!(matches!(err, error::SystemError::BadRequest(_)));

        let err = svc.upload("empty.jpg", Vec::new(), None, Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, error::SystemError::BadRequest(_)));

        assert!(storage.stored.lock().unwrap().is_empty());
    }
}
