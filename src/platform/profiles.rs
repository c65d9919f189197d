use tracing::info;
use uuid::Uuid;

use crate::db::{Profile, Status};

use super::{
    Platform,
    error::{PlatformError, PlatformResult},
    realtime::{Change, Table},
    schema::now,
};

impl Platform {
    pub async fn profile(&self, access_token: &str, id: Uuid) -> PlatformResult<Profile> {
        self.caller(access_token).await?;

        sqlx::query_as("SELECT * FROM profiles WHERE id=?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PlatformError::not_found("profile"))
    }

    /// Profiles newest first, optionally only those with `status`.
    pub async fn list_profiles(
        &self,
        access_token: &str,
        status: Option<Status>,
    ) -> PlatformResult<Vec<Profile>> {
        self.caller(access_token).await?;

        let profiles = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT * FROM profiles WHERE status=? ORDER BY created_at DESC, rowid DESC",
                )
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM profiles ORDER BY created_at DESC, rowid DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(profiles)
    }

    /// Updates the caller's own display name and bio. `bio: Some("")` clears it.
    pub async fn update_own_profile(
        &self,
        access_token: &str,
        display_name: Option<&str>,
        bio: Option<&str>,
    ) -> PlatformResult<Profile> {
        let caller = self.caller(access_token).await?;

        let profile: Profile = sqlx::query_as(
            "UPDATE profiles SET
                display_name = COALESCE(?, display_name),
                bio = CASE WHEN ? THEN NULLIF(?, '') ELSE bio END,
                updated_at = ?
             WHERE id=? RETURNING *",
        )
        .bind(display_name)
        .bind(bio.is_some())
        .bind(bio)
        .bind(now())
        .bind(caller.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PlatformError::not_found("profile"))?;

        self.realtime.publish(Change::update(Table::Profiles, &profile));
        Ok(profile)
    }

    /// Admin-only. An admin can never be blocked.
    pub async fn set_profile_status(
        &self,
        access_token: &str,
        id: Uuid,
        status: Status,
    ) -> PlatformResult<Profile> {
        let caller = self.caller(access_token).await?;
        caller.require_admin()?;

        let target: Profile = sqlx::query_as("SELECT * FROM profiles WHERE id=?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PlatformError::not_found("profile"))?;

        if target.is_admin() && status == Status::Blocked {
            return Err(PlatformError::forbidden("admins cannot be blocked"));
        }

        let profile: Profile =
            sqlx::query_as("UPDATE profiles SET status=?, updated_at=? WHERE id=? RETURNING *")
                .bind(status)
                .bind(now())
                .bind(id)
                .fetch_one(&self.pool)
                .await?;

        info!(
            username = %profile.username,
            from = ?target.status,
            to = ?profile.status,
            by = %caller.id,
            "profile status changed"
        );
        self.realtime.publish(Change::update(Table::Profiles, &profile));
        Ok(profile)
    }
}
