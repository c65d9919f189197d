use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{Profile, Role, Status};

use super::{
    Caller, Platform,
    error::{PlatformError, PlatformResult, conflict_on_unique},
    realtime::{Change, Table},
    schema::now,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub user: AuthUser,
    pub expires_at: OffsetDateTime,
}

fn new_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Platform {
    /// Creates the account and its pending member profile in one transaction.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
        display_name: &str,
    ) -> PlatformResult<AuthSession> {
        let email = email.trim().to_lowercase();
        let password_hash = bcrypt::hash(password, self.bcrypt_cost)?;
        let id = Uuid::now_v7();
        let created_at = now();

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO auth_users (id,email,password_hash,created_at) VALUES (?,?,?,?)")
            .bind(id)
            .bind(&email)
            .bind(&password_hash)
            .bind(created_at)
            .execute(&mut *tx)
            .await
            .map_err(conflict_on_unique("email"))?;

        let profile: Profile = sqlx::query_as(
            "INSERT INTO profiles (id,username,display_name,role,status,created_at,updated_at)
             VALUES (?,?,?,?,?,?,?) RETURNING *",
        )
        .bind(id)
        .bind(username)
        .bind(display_name)
        .bind(Role::Member)
        .bind(Status::Pending)
        .bind(created_at)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(conflict_on_unique("username"))?;
        tx.commit().await?;

        info!("adding @{username}#{id}");
        self.realtime.publish(Change::insert(Table::Profiles, &profile));

        self.issue_session(AuthUser { id, email }).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> PlatformResult<AuthSession> {
        let email = email.trim().to_lowercase();
        let Some((id, password_hash)): Option<(Uuid, String)> =
            sqlx::query_as("SELECT id,password_hash FROM auth_users WHERE email=?")
                .bind(&email)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Err(PlatformError::InvalidCredentials);
        };

        if !bcrypt::verify(password, &password_hash)? {
            return Err(PlatformError::InvalidCredentials);
        }

        debug!("welcome #{id}");
        self.issue_session(AuthUser { id, email }).await
    }

    pub async fn sign_out(&self, access_token: &str) -> PlatformResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE token=?")
            .bind(access_token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The account behind a live access token.
    pub async fn user(&self, access_token: &str) -> PlatformResult<AuthUser> {
        let Some((id, email, expires_at)): Option<(Uuid, String, OffsetDateTime)> = sqlx::query_as(
            "SELECT u.id,u.email,s.expires_at FROM auth_sessions s
             JOIN auth_users u ON u.id = s.user_id WHERE s.token=?",
        )
        .bind(access_token)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Err(PlatformError::Unauthorized);
        };

        if expires_at <= OffsetDateTime::now_utc() {
            return Err(PlatformError::SessionExpired);
        }
        Ok(AuthUser { id, email })
    }

    /// Resolves a token to the caller's current role and status.
    pub async fn caller(&self, access_token: &str) -> PlatformResult<Caller> {
        let user = self.user(access_token).await?;
        let (role, status): (Role, Status) =
            sqlx::query_as("SELECT role,status FROM profiles WHERE id=?")
                .bind(user.id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(PlatformError::Unauthorized)?;

        Ok(Caller {
            id: user.id,
            role,
            status,
        })
    }

    /// Makes an existing account an active admin. Bypasses policies; meant
    /// for bootstrapping the first administrator.
    pub async fn promote_to_admin(&self, email: &str) -> PlatformResult<Profile> {
        let email = email.trim().to_lowercase();
        let profile: Profile = sqlx::query_as(
            "UPDATE profiles SET role=?, status=?, updated_at=?
             WHERE id = (SELECT id FROM auth_users WHERE email=?) RETURNING *",
        )
        .bind(Role::Admin)
        .bind(Status::Active)
        .bind(now())
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PlatformError::not_found("account"))?;

        info!(username = %profile.username, "promoted to admin");
        self.realtime.publish(Change::update(Table::Profiles, &profile));
        Ok(profile)
    }

    async fn issue_session(&self, user: AuthUser) -> PlatformResult<AuthSession> {
        let access_token = new_token();
        let expires_at = now() + self.session_ttl;

        sqlx::query("INSERT INTO auth_sessions (token,user_id,expires_at) VALUES (?,?,?)")
            .bind(&access_token)
            .bind(user.id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;

        Ok(AuthSession {
            access_token,
            user,
            expires_at,
        })
    }
}
