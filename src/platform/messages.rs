use sqlx::FromRow;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::db::{Attachment, MessageRow};

use super::{
    Platform,
    error::{PlatformError, PlatformResult},
    realtime::{Change, Table},
    schema::now,
};

#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: &'a str,
    pub content: Option<&'a str>,
    pub file_id: Option<Uuid>,
}

/// A message with its file's columns left-joined in.
#[derive(Debug, Clone, FromRow)]
pub struct MessageWithFile {
    #[sqlx(flatten)]
    pub message: MessageRow,
    f_room_id: Option<Uuid>,
    f_uploader_id: Option<Uuid>,
    f_storage_path: Option<String>,
    f_filename: Option<String>,
    f_mime_type: Option<String>,
    f_size_bytes: Option<i64>,
    f_created_at: Option<OffsetDateTime>,
}

impl MessageWithFile {
    pub fn into_parts(mut self) -> (MessageRow, Option<Attachment>) {
        let file = self.take_file();
        (self.message, file)
    }

    fn take_file(&mut self) -> Option<Attachment> {
        Some(Attachment {
            id: self.message.file_id?,
            room_id: self.f_room_id?,
            uploader_id: self.f_uploader_id?,
            storage_path: self.f_storage_path.take()?,
            filename: self.f_filename.take()?,
            mime_type: self.f_mime_type.take()?,
            size_bytes: self.f_size_bytes?,
            created_at: self.f_created_at?,
        })
    }
}

impl Platform {
    /// Visible messages of a room, oldest first, with file metadata.
    pub async fn list_messages(
        &self,
        access_token: &str,
        room_id: Uuid,
    ) -> PlatformResult<Vec<MessageWithFile>> {
        let caller = self.caller(access_token).await?;
        self.require_room_access(&caller, room_id).await?;

        Ok(sqlx::query_as(
            "SELECT m.*,
                f.room_id AS f_room_id,
                f.uploader_id AS f_uploader_id,
                f.storage_path AS f_storage_path,
                f.filename AS f_filename,
                f.mime_type AS f_mime_type,
                f.size_bytes AS f_size_bytes,
                f.created_at AS f_created_at
             FROM messages m
             LEFT JOIN files f ON f.id = m.file_id
             WHERE m.room_id=? AND m.deleted_at IS NULL
             ORDER BY m.created_at, m.rowid",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn insert_message(
        &self,
        access_token: &str,
        new: NewMessage<'_>,
    ) -> PlatformResult<MessageRow> {
        let caller = self.caller(access_token).await?;
        if new.sender_id != caller.id {
            return Err(PlatformError::forbidden("sender must be the caller"));
        }
        self.require_room_access(&caller, new.room_id).await?;

        if let Some(file_id) = new.file_id {
            let in_room = sqlx::query("SELECT 1 FROM files WHERE id=? AND room_id=?")
                .bind(file_id)
                .bind(new.room_id)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            if !in_room {
                return Err(PlatformError::not_found("file"));
            }
        }

        let row: MessageRow = sqlx::query_as(
            "INSERT INTO messages (id,room_id,sender_id,sender_username,content,file_id,created_at)
             VALUES (?,?,?,?,?,?,?) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(new.room_id)
        .bind(new.sender_id)
        .bind(new.sender_username)
        .bind(new.content)
        .bind(new.file_id)
        .bind(now())
        .fetch_one(&self.pool)
        .await?;

        debug!(id = %row.id, room = %row.room_id, "message stored");
        self.realtime.publish(Change::insert(Table::Messages, &row));
        Ok(row)
    }

    /// Sender-only. Replaces the text and stamps `edited_at`.
    pub async fn edit_message(
        &self,
        access_token: &str,
        id: Uuid,
        content: &str,
    ) -> PlatformResult<MessageRow> {
        let caller = self.caller(access_token).await?;
        let current = self.own_live_message(&caller, id).await?;

        let row: MessageRow = sqlx::query_as(
            "UPDATE messages SET content=?, edited_at=? WHERE id=? RETURNING *",
        )
        .bind(content)
        .bind(now())
        .bind(current.id)
        .fetch_one(&self.pool)
        .await?;

        self.realtime.publish(Change::update(Table::Messages, &row));
        Ok(row)
    }

    /// Sender-only soft delete. The row stays, stamped with `deleted_at`.
    pub async fn soft_delete_message(&self, access_token: &str, id: Uuid) -> PlatformResult<MessageRow> {
        let caller = self.caller(access_token).await?;
        let current = self.own_live_message(&caller, id).await?;

        let row: MessageRow = sqlx::query_as("UPDATE messages SET deleted_at=? WHERE id=? RETURNING *")
            .bind(now())
            .bind(current.id)
            .fetch_one(&self.pool)
            .await?;

        debug!(id = %row.id, "message deleted");
        self.realtime.publish(Change::update(Table::Messages, &row));
        Ok(row)
    }

    async fn own_live_message(&self, caller: &super::Caller, id: Uuid) -> PlatformResult<MessageRow> {
        let row: MessageRow = sqlx::query_as("SELECT * FROM messages WHERE id=? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PlatformError::not_found("message"))?;

        self.require_room_access(caller, row.room_id).await?;
        if row.sender_id != caller.id {
            return Err(PlatformError::forbidden("only the sender can change a message"));
        }
        Ok(row)
    }
}
