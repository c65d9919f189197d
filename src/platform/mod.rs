//! The backend the chat talks to: accounts and access tokens, tables guarded
//! by per-caller policies, blob storage and change notifications.
//!
//! Every table operation takes the caller's access token and resolves it to a
//! [`Caller`] before touching data, so the checks below hold no matter what
//! the client side already gated.

mod auth;
mod error;
mod files;
mod messages;
mod profiles;
pub mod realtime;
mod reports;
mod rooms;
pub mod schema;
pub mod storage;

use sqlx::SqlitePool;
use time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::db::{Role, Status};

pub use auth::{AuthSession, AuthUser};
pub use error::{PlatformError, PlatformResult};
pub use messages::{MessageWithFile, NewMessage};
pub use files::NewAttachment;
pub use realtime::{Change, ChangeKind, Channel, Filter, Listen, Realtime, Table};
pub use storage::{Storage, StoredObject};

#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub database_url: String,
    pub public_url: String,
    pub signing_secret: String,
    pub session_ttl: Duration,
    pub bcrypt_cost: u32,
}

impl PlatformConfig {
    /// In-memory database and the cheapest bcrypt cost.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_owned(),
            public_url: "http://localhost:8080".to_owned(),
            signing_secret: "insecure-test-secret".to_owned(),
            session_ttl: Duration::hours(1),
            bcrypt_cost: 4,
        }
    }
}

/// The identity behind an access token, read fresh on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: Uuid,
    pub role: Role,
    pub status: Status,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> PlatformResult<()> {
        if !self.is_admin() {
            return Err(PlatformError::forbidden("admin access required"));
        }
        Ok(())
    }

    pub fn require_active(&self) -> PlatformResult<()> {
        if self.status != Status::Active {
            return Err(PlatformError::forbidden("account is not active"));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Platform {
    pool: SqlitePool,
    realtime: Realtime,
    storage: Storage,
    session_ttl: Duration,
    bcrypt_cost: u32,
}

impl Platform {
    pub async fn connect(config: &PlatformConfig) -> PlatformResult<Self> {
        let pool = schema::connect(&config.database_url).await?;
        let storage = Storage::new(pool.clone(), config.signing_secret.as_bytes(), &config.public_url);
        info!(public_url = %config.public_url, "platform connected");

        Ok(Self {
            pool,
            realtime: Realtime::new(),
            storage,
            session_ttl: config.session_ttl,
            bcrypt_cost: config.bcrypt_cost,
        })
    }

    pub fn realtime(&self) -> &Realtime {
        &self.realtime
    }

    /// Raw storage, without policy checks. Signed links are verified here.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `true` when `user_id` has a membership row for `room_id`.
    pub async fn is_room_member(&self, room_id: Uuid, user_id: Uuid) -> PlatformResult<bool> {
        Ok(
            sqlx::query("SELECT 1 FROM room_members WHERE room_id=? AND user_id=?")
                .bind(room_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?
                .is_some(),
        )
    }

    /// Active status plus membership, the gate for anything inside a room.
    async fn require_room_access(&self, caller: &Caller, room_id: Uuid) -> PlatformResult<()> {
        caller.require_active()?;
        if !self.is_room_member(room_id, caller.id).await? {
            return Err(PlatformError::forbidden("not a member of this room"));
        }
        Ok(())
    }
}
