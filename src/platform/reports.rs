use tracing::info;
use uuid::Uuid;

use crate::db::{MessageRow, Report};

use super::{
    Platform,
    error::{PlatformError, PlatformResult},
    realtime::{Change, Table},
    schema::now,
};

impl Platform {
    /// Flags a message the caller can see. Reports are never updated.
    pub async fn insert_report(
        &self,
        access_token: &str,
        message_id: Uuid,
        reason: &str,
    ) -> PlatformResult<Report> {
        let caller = self.caller(access_token).await?;

        let message: MessageRow = sqlx::query_as("SELECT * FROM messages WHERE id=?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PlatformError::not_found("message"))?;
        self.require_room_access(&caller, message.room_id).await?;

        let report: Report = sqlx::query_as(
            "INSERT INTO reports (id,message_id,reporter_id,reason,created_at) VALUES (?,?,?,?,?) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(message_id)
        .bind(caller.id)
        .bind(reason)
        .bind(now())
        .fetch_one(&self.pool)
        .await?;

        info!(message = %message_id, reporter = %caller.id, "message reported");
        self.realtime.publish(Change::insert(Table::Reports, &report));
        Ok(report)
    }
}
