use serde::Serialize;

use crate::{modules::attachment::schema::AttachmentKind, ENV};

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_file_size: usize,
    pub upload_dir: String,
    pub base_url: String,
}

impl UploadConfig {
    pub fn from_env() -> Self {
        Self {
            max_file_size: ENV.max_upload_size,
            upload_dir: ENV.upload_dir.clone(),
            base_url: ENV.media_base_url.clone(),
        }
    }
}

/// Result of an upload. `url` and `kind` go straight into a message's
/// attachment list.
#[derive(Debug, Clone, Serialize)]
pub struct MediaUploadResponse {
    pub url: String,
    pub kind: AttachmentKind,
    pub mime_type: String,
    pub file_size: usize,
    pub thumbnail_url: String,
    pub medium_url: String,
}
