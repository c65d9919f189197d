use tracing::debug;
use uuid::Uuid;

use crate::db::Attachment;

use super::{
    Platform,
    error::{PlatformError, PlatformResult, conflict_on_unique},
    realtime::{Change, Table},
    schema::now,
};

#[derive(Debug, Clone)]
pub struct NewAttachment<'a> {
    pub room_id: Uuid,
    pub uploader_id: Uuid,
    pub storage_path: &'a str,
    pub filename: &'a str,
    pub mime_type: &'a str,
    pub size_bytes: i64,
}

/// The room a storage path belongs to: `{room_id}/{key}`.
fn room_of(path: &str) -> PlatformResult<Uuid> {
    path.split_once('/')
        .and_then(|(room, _)| Uuid::parse_str(room).ok())
        .ok_or_else(|| PlatformError::forbidden("objects must live under a room id"))
}

impl Platform {
    /// Stores a blob under `{room_id}/...`; the caller must be an active member.
    pub async fn upload_object(
        &self,
        access_token: &str,
        bucket: &str,
        path: &str,
        data: &[u8],
        content_type: &str,
    ) -> PlatformResult<()> {
        let caller = self.caller(access_token).await?;
        self.require_room_access(&caller, room_of(path)?).await?;

        self.storage.upload(bucket, path, data, content_type).await
    }

    pub async fn remove_object(&self, access_token: &str, bucket: &str, path: &str) -> PlatformResult<()> {
        let caller = self.caller(access_token).await?;
        self.require_room_access(&caller, room_of(path)?).await?;

        self.storage.remove(bucket, path).await
    }

    /// A download link for an existing object in a room the caller belongs to.
    pub async fn create_signed_url(
        &self,
        access_token: &str,
        bucket: &str,
        path: &str,
        ttl: time::Duration,
    ) -> PlatformResult<String> {
        let caller = self.caller(access_token).await?;
        self.require_room_access(&caller, room_of(path)?).await?;

        if !self.storage.exists(bucket, path).await? {
            return Err(PlatformError::not_found("object"));
        }
        self.storage.create_signed_url(bucket, path, ttl)
    }

    pub async fn insert_attachment(
        &self,
        access_token: &str,
        new: NewAttachment<'_>,
    ) -> PlatformResult<Attachment> {
        let caller = self.caller(access_token).await?;
        if new.uploader_id != caller.id {
            return Err(PlatformError::forbidden("uploader must be the caller"));
        }
        self.require_room_access(&caller, new.room_id).await?;

        let attachment: Attachment = sqlx::query_as(
            "INSERT INTO files (id,room_id,uploader_id,storage_path,filename,mime_type,size_bytes,created_at)
             VALUES (?,?,?,?,?,?,?,?) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(new.room_id)
        .bind(new.uploader_id)
        .bind(new.storage_path)
        .bind(new.filename)
        .bind(new.mime_type)
        .bind(new.size_bytes)
        .bind(now())
        .fetch_one(&self.pool)
        .await
        .map_err(conflict_on_unique("file"))?;

        debug!(id = %attachment.id, path = %attachment.storage_path, "file registered");
        self.realtime.publish(Change::insert(Table::Files, &attachment));
        Ok(attachment)
    }

    pub async fn attachment(&self, access_token: &str, id: Uuid) -> PlatformResult<Attachment> {
        let caller = self.caller(access_token).await?;

        let attachment: Attachment = sqlx::query_as("SELECT * FROM files WHERE id=?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PlatformError::not_found("file"))?;

        self.require_room_access(&caller, attachment.room_id).await?;
        Ok(attachment)
    }
}
