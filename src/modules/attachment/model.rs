use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::modules::attachment::schema::{AttachmentEntity, AttachmentKind, OwnerType};

const CDN_HOST: &str = "res.cloudinary.com";
const UPLOAD_SEGMENT: &str = "/upload/";

/// Key of the attachment table: (owner type, owner id).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerRef {
    pub owner_type: OwnerType,
    pub owner_id: Uuid,
}

pub trait AttachableOwner {
    fn owner_ref(&self) -> OwnerRef;
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct NewAttachment {
    pub kind: AttachmentKind,
    #[validate(length(min = 1, max = 2048, message = "Attachment url must be 1-2048 characters"))]
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Thumbnail,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AttachmentResponse {
    pub id: Uuid,
    pub kind: AttachmentKind,
    pub url: String,
    pub thumbnail_url: String,
    pub medium_url: String,
}

impl From<AttachmentEntity> for AttachmentResponse {
    fn from(entity: AttachmentEntity) -> Self {
        AttachmentResponse {
            id: entity.id,
            kind: entity.kind,
            thumbnail_url: variant_url(&entity.url, entity.kind, Variant::Thumbnail),
            medium_url: variant_url(&entity.url, entity.kind, Variant::Medium),
            url: entity.url,
        }
    }
}

/// Derives a resized variant of a CDN asset by injecting a transformation
/// segment after `/upload/`. URLs outside the CDN come back unchanged.
pub fn variant_url(url: &str, kind: AttachmentKind, variant: Variant) -> String {
    if !is_cdn_url(url) {
        return url.to_string();
    }

    let Some(idx) = url.find(UPLOAD_SEGMENT) else {
        return url.to_string();
    };
    let (head, tail) = url.split_at(idx + UPLOAD_SEGMENT.len());

    match (variant, kind) {
        (Variant::Medium, _) => format!("{head}c_limit,w_800/{tail}"),
        (Variant::Thumbnail, AttachmentKind::Image) => {
            format!("{head}c_thumb,w_200,h_200/{tail}")
        }
        // videos get a poster frame
        (Variant::Thumbnail, AttachmentKind::Video) => {
            format!("{head}so_0,c_thumb,w_200,h_200/{}", with_extension(tail, "jpg"))
        }
    }
}

fn is_cdn_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or("");
    rest.split('/').next() == Some(CDN_HOST)
}

fn with_extension(path: &str, ext: &str) -> String {
    let file_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[file_start..].rfind('.') {
        Some(dot) => format!("{}.{ext}", &path[..file_start + dot]),
        None => format!("{path}.{ext}"),
    }
}
