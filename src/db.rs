//! Row types for every table the chat reads or writes.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Active,
    Blocked,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Active => "active",
            Status::Blocked => "blocked",
        }
    }
}

/// One registered person. `id` is the auth user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub status: Status,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,

    // unique: id
    // unique: username
}

impl Profile {
    #[inline]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub room_id: Uuid,
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,

    // unique: room_id, user_id
}

/// Metadata of one uploaded blob. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Attachment {
    pub id: Uuid,
    pub room_id: Uuid,
    pub uploader_id: Uuid,
    pub storage_path: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A `messages` row exactly as stored and as carried by change events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub content: Option<String>,
    pub file_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub edited_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub deleted_at: Option<OffsetDateTime>,
}

impl MessageRow {
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A message's attachment id, with its metadata when it could be joined in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub id: Uuid,
    pub meta: Option<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Attachment(AttachmentRef),
    Both { text: String, attachment: AttachmentRef },
}

impl MessageBody {
    /// `None` when there is neither text nor an attachment.
    pub fn new(content: Option<String>, attachment: Option<AttachmentRef>) -> Option<Self> {
        let content = content.filter(|c| !c.is_empty());
        match (content, attachment) {
            (Some(text), None) => Some(Self::Text(text)),
            (None, Some(attachment)) => Some(Self::Attachment(attachment)),
            (Some(text), Some(attachment)) => Some(Self::Both { text, attachment }),
            (None, None) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) | Self::Both { text, .. } => Some(text),
            Self::Attachment(_) => None,
        }
    }

    pub fn attachment(&self) -> Option<&AttachmentRef> {
        match self {
            Self::Attachment(attachment) | Self::Both { attachment, .. } => Some(attachment),
            Self::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub body: MessageBody,
    pub created_at: OffsetDateTime,
    pub edited_at: Option<OffsetDateTime>,
    pub deleted_at: Option<OffsetDateTime>,
}

#[derive(Debug, thiserror::Error)]
#[error("message {0} has neither content nor an attachment")]
pub struct EmptyBody(pub Uuid);

impl Message {
    pub fn from_row(row: MessageRow, meta: Option<Attachment>) -> Result<Self, EmptyBody> {
        let attachment = row.file_id.map(|id| AttachmentRef {
            id,
            meta: meta.filter(|m| m.id == id),
        });
        let body = MessageBody::new(row.content, attachment).ok_or(EmptyBody(row.id))?;

        Ok(Message {
            id: row.id,
            room_id: row.room_id,
            sender_id: row.sender_id,
            sender_username: row.sender_username,
            body,
            created_at: row.created_at,
            edited_at: row.edited_at,
            deleted_at: row.deleted_at,
        })
    }

    #[inline]
    pub fn content(&self) -> Option<&str> {
        self.body.text()
    }

    #[inline]
    pub fn attachment(&self) -> Option<&AttachmentRef> {
        self.body.attachment()
    }

    #[inline]
    pub fn is_edited(&self) -> bool {
        self.edited_at.is_some()
    }
}

/// Append-only flag on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Report {
    pub id: Uuid,
    pub message_id: Uuid,
    pub reporter_id: Uuid,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
