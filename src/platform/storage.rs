//! Blob storage with signed, time-limited download links.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::SqlitePool;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::{
    error::{PlatformError, PlatformResult, conflict_on_unique},
    schema::now,
};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
    secret: Arc<[u8]>,
    public_url: String,
}

impl Storage {
    pub fn new(pool: SqlitePool, secret: &[u8], public_url: &str) -> Self {
        Self {
            pool,
            secret: Arc::from(secret),
            public_url: public_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Writes a new object. Paths are never overwritten.
    pub async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: &[u8],
        content_type: &str,
    ) -> PlatformResult<()> {
        sqlx::query(
            "INSERT INTO storage_objects (bucket,path,content_type,data,created_at) VALUES (?,?,?,?,?)",
        )
        .bind(bucket)
        .bind(path)
        .bind(content_type)
        .bind(data)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(conflict_on_unique("object"))?;

        debug!(bucket, path, size = data.len(), "object stored");
        Ok(())
    }

    pub async fn remove(&self, bucket: &str, path: &str) -> PlatformResult<()> {
        let result = sqlx::query("DELETE FROM storage_objects WHERE bucket=? AND path=?")
            .bind(bucket)
            .bind(path)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PlatformError::not_found("object"));
        }
        debug!(bucket, path, "object removed");
        Ok(())
    }

    pub async fn exists(&self, bucket: &str, path: &str) -> PlatformResult<bool> {
        Ok(
            sqlx::query("SELECT 1 FROM storage_objects WHERE bucket=? AND path=?")
                .bind(bucket)
                .bind(path)
                .fetch_optional(&self.pool)
                .await?
                .is_some(),
        )
    }

    pub async fn download(&self, bucket: &str, path: &str) -> PlatformResult<StoredObject> {
        let (content_type, data): (String, Vec<u8>) =
            sqlx::query_as("SELECT content_type,data FROM storage_objects WHERE bucket=? AND path=?")
                .bind(bucket)
                .bind(path)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| PlatformError::not_found("object"))?;

        Ok(StoredObject { content_type, data })
    }

    /// A link to `bucket/path` that stops working after `ttl`.
    pub fn create_signed_url(&self, bucket: &str, path: &str, ttl: Duration) -> PlatformResult<String> {
        let expires = (OffsetDateTime::now_utc() + ttl).unix_timestamp();
        let token = hex::encode(self.sign(bucket, path, expires)?);

        Ok(format!(
            "{}/storage/v1/object/sign/{bucket}/{path}?expires={expires}&token={token}",
            self.public_url
        ))
    }

    /// Checks a token produced by [`Storage::create_signed_url`].
    pub fn verify(&self, bucket: &str, path: &str, expires: i64, token: &str) -> PlatformResult<()> {
        if OffsetDateTime::now_utc().unix_timestamp() > expires {
            return Err(PlatformError::BadSignature);
        }

        let signature = hex::decode(token).map_err(|_| PlatformError::BadSignature)?;
        self.mac(bucket, path, expires)?
            .verify_slice(&signature)
            .map_err(|_| PlatformError::BadSignature)
    }

    fn sign(&self, bucket: &str, path: &str, expires: i64) -> PlatformResult<Vec<u8>> {
        Ok(self.mac(bucket, path, expires)?.finalize().into_bytes().to_vec())
    }

    fn mac(&self, bucket: &str, path: &str, expires: i64) -> PlatformResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| PlatformError::Integrity("bad signing secret".to_owned()))?;
        mac.update(format!("{bucket}/{path}:{expires}").as_bytes());
        Ok(mac)
    }
}
