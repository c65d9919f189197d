use tracing::info;
use uuid::Uuid;

use crate::db::{Membership, Room};

use super::{
    Platform,
    error::{PlatformError, PlatformResult, conflict_on_unique},
    realtime::{Change, Table},
    schema::now,
};

impl Platform {
    /// Rooms the caller has a membership row for, oldest first. Pending and
    /// blocked callers see none.
    pub async fn list_member_rooms(&self, access_token: &str) -> PlatformResult<Vec<Room>> {
        let caller = self.caller(access_token).await?;
        caller.require_active()?;

        Ok(sqlx::query_as(
            "SELECT r.* FROM rooms r
             JOIN room_members m ON m.room_id = r.id
             WHERE m.user_id=?
             ORDER BY r.created_at, r.rowid",
        )
        .bind(caller.id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Visible to members and admins.
    pub async fn room(&self, access_token: &str, id: Uuid) -> PlatformResult<Room> {
        let caller = self.caller(access_token).await?;

        let room: Room = sqlx::query_as("SELECT * FROM rooms WHERE id=?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PlatformError::not_found("room"))?;

        if !caller.is_admin() && !self.is_room_member(id, caller.id).await? {
            return Err(PlatformError::not_found("room"));
        }
        Ok(room)
    }

    pub async fn list_room_members(
        &self,
        access_token: &str,
        room_id: Uuid,
    ) -> PlatformResult<Vec<Membership>> {
        let caller = self.caller(access_token).await?;
        if !caller.is_admin() && !self.is_room_member(room_id, caller.id).await? {
            return Err(PlatformError::forbidden("not a member of this room"));
        }

        Ok(
            sqlx::query_as("SELECT * FROM room_members WHERE room_id=? ORDER BY joined_at, rowid")
                .bind(room_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Admin-only. The creator joins the new room.
    pub async fn create_room(
        &self,
        access_token: &str,
        name: &str,
        description: Option<&str>,
        is_private: bool,
    ) -> PlatformResult<Room> {
        let caller = self.caller(access_token).await?;
        caller.require_admin()?;

        let created_at = now();
        let mut tx = self.pool.begin().await?;
        let room: Room = sqlx::query_as(
            "INSERT INTO rooms (id,name,description,is_private,created_by,created_at)
             VALUES (?,?,?,?,?,?) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(name)
        .bind(description)
        .bind(is_private)
        .bind(caller.id)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        let membership: Membership = sqlx::query_as(
            "INSERT INTO room_members (room_id,user_id,joined_at) VALUES (?,?,?) RETURNING *",
        )
        .bind(room.id)
        .bind(caller.id)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(room = %room.name, id = %room.id, "room created");
        self.realtime.publish(Change::insert(Table::Rooms, &room));
        self.realtime.publish(Change::insert(Table::RoomMembers, &membership));
        Ok(room)
    }

    /// Admin-only.
    pub async fn add_room_member(
        &self,
        access_token: &str,
        room_id: Uuid,
        user_id: Uuid,
    ) -> PlatformResult<Membership> {
        let caller = self.caller(access_token).await?;
        caller.require_admin()?;

        let room_exists = sqlx::query("SELECT 1 FROM rooms WHERE id=?")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if !room_exists {
            return Err(PlatformError::not_found("room"));
        }
        let user_exists = sqlx::query("SELECT 1 FROM profiles WHERE id=?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if !user_exists {
            return Err(PlatformError::not_found("profile"));
        }

        let membership: Membership = sqlx::query_as(
            "INSERT INTO room_members (room_id,user_id,joined_at) VALUES (?,?,?) RETURNING *",
        )
        .bind(room_id)
        .bind(user_id)
        .bind(now())
        .fetch_one(&self.pool)
        .await
        .map_err(conflict_on_unique("membership"))?;

        info!(room = %room_id, user = %user_id, "member added");
        self.realtime.publish(Change::insert(Table::RoomMembers, &membership));
        Ok(membership)
    }
}
