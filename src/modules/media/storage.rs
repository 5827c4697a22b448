use std::path::PathBuf;

use crate::api::error;

/// Where uploaded bytes end up. Returns the public URL of the stored file.
#[async_trait::async_trait]
pub trait MediaStorage {
    async fn store(
        &self,
        bytes: &[u8],
        folder: &str,
        filename: &str,
        mime_type: &str,
    ) -> Result<String, error::SystemError>;
}

/// Writes files under `upload_dir` and serves them from `base_url`.
#[derive(Clone)]
pub struct LocalMediaStorage {
    upload_dir: PathBuf,
    base_url: String,
}

impl LocalMediaStorage {
    pub fn new(upload_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self { upload_dir: upload_dir.into(), base_url: base_url.into() }
    }
}

#[async_trait::async_trait]
impl MediaStorage for LocalMediaStorage {
    async fn store(
        &self,
        bytes: &[u8],
        folder: &str,
        filename: &str,
        _mime_type: &str,
    ) -> Result<String, error::SystemError> {
        let dir = self.upload_dir.join(folder);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(filename), bytes).await?;

        Ok(format!("{}/{}/{}", self.base_url.trim_end_matches('/'), folder, filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn local_storage_writes_under_folder() {
        let root = std::env::temp_dir().join(format!("media-{}", uuid::Uuid::now_v7()));
        let storage = LocalMediaStorage::new(&root, "/uploads/");

        let url = storage.store(b"png bytes", "images", "a.png", "image/png").await.unwrap();

        assert_eq!(url, "/uploads/images/a.png");
        assert_eq!(tokio::fs::read(root.join("images/a.png")).await.unwrap(), b"png bytes");
        tokio::fs::remove_dir_all(&root).await.ok();
    }
}
