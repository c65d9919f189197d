//! File attachments: client-side checks, upload into the room's storage
//! prefix, and short-lived download links.

use rand::{Rng, distr::Alphanumeric};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    db::Attachment,
    error::{Error, Result, ValidationError},
    platform::{NewAttachment, Platform},
    session::AccessContext,
};

pub const BUCKET: &str = "room-files";
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const DOWNLOAD_TTL: Duration = Duration::seconds(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Docx,
    Xlsx,
}

impl FileKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        use FileKind::*;
        match mime {
            "application/pdf" => Some(Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Some(Docx),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some(Xlsx),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        use FileKind::*;
        match self {
            Pdf => "pdf",
            Docx => "docx",
            Xlsx => "xlsx",
        }
    }
}

/// A file picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

pub fn validate(file: &FileUpload) -> Result<FileKind, ValidationError> {
    let kind = FileKind::from_mime(&file.mime_type)
        .ok_or_else(|| ValidationError::UnsupportedType(file.mime_type.clone()))?;
    if file.size() > MAX_FILE_SIZE {
        return Err(ValidationError::TooLarge(file.size()));
    }
    Ok(kind)
}

/// `{room_id}/{unix_millis}_{random}.{ext}`; the extension comes from the
/// original name when it has one.
pub fn storage_key(room_id: Uuid, filename: &str, kind: FileKind) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let random: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(11)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(kind.extension());

    format!("{room_id}/{millis}_{random}.{ext}")
}

#[derive(Clone)]
pub struct AttachmentTransfer {
    platform: Platform,
}

impl AttachmentTransfer {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Stores the blob, then registers its metadata. A failed registration
    /// removes the blob again.
    pub async fn upload(&self, ctx: &AccessContext, room_id: Uuid, file: &FileUpload) -> Result<Attachment> {
        let kind = validate(file)?;
        let path = storage_key(room_id, &file.name, kind);
        let token = &ctx.access_token;

        self.platform
            .upload_object(token, BUCKET, &path, &file.bytes, &file.mime_type)
            .await?;

        let registered = self
            .platform
            .insert_attachment(
                token,
                NewAttachment {
                    room_id,
                    uploader_id: ctx.user.id,
                    storage_path: &path,
                    filename: &file.name,
                    mime_type: &file.mime_type,
                    size_bytes: file.size() as i64,
                },
            )
            .await;

        match registered {
            Ok(attachment) => {
                info!(id = %attachment.id, %path, size = file.size(), "attachment uploaded");
                Ok(attachment)
            }
            Err(err) => {
                if let Err(cleanup) = self.platform.remove_object(token, BUCKET, &path).await {
                    warn!(%path, "orphaned blob left behind: {cleanup}");
                }
                Err(Error::from(err))
            }
        }
    }

    /// A fresh link, valid for five minutes. Never cached.
    pub async fn download_url(&self, ctx: &AccessContext, attachment: &Attachment) -> Result<String> {
        Ok(self
            .platform
            .create_signed_url(&ctx.access_token, BUCKET, &attachment.storage_path, DOWNLOAD_TTL)
            .await?)
    }
}
