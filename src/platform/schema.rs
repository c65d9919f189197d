use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use time::OffsetDateTime;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS auth_users (
    id BLOB PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS auth_sessions (
    token TEXT PRIMARY KEY,
    user_id BLOB NOT NULL REFERENCES auth_users(id) ON DELETE CASCADE,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profiles (
    id BLOB PRIMARY KEY REFERENCES auth_users(id) ON DELETE CASCADE,
    username TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    bio TEXT,
    avatar_url TEXT,
    role TEXT NOT NULL DEFAULT 'member',
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rooms (
    id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    is_private INTEGER NOT NULL DEFAULT 1,
    created_by BLOB REFERENCES profiles(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS room_members (
    room_id BLOB NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
    user_id BLOB NOT NULL REFERENCES profiles(id),
    joined_at TEXT NOT NULL,
    PRIMARY KEY (room_id, user_id)
);

CREATE TABLE IF NOT EXISTS files (
    id BLOB PRIMARY KEY,
    room_id BLOB NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
    uploader_id BLOB NOT NULL REFERENCES profiles(id),
    storage_path TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0 AND size_bytes <= 10485760),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id BLOB PRIMARY KEY,
    room_id BLOB NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
    sender_id BLOB NOT NULL REFERENCES profiles(id),
    sender_username TEXT NOT NULL,
    content TEXT,
    file_id BLOB REFERENCES files(id),
    created_at TEXT NOT NULL,
    edited_at TEXT,
    deleted_at TEXT,
    CHECK (content IS NOT NULL OR file_id IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS messages_room_created ON messages (room_id, created_at);

CREATE TABLE IF NOT EXISTS reports (
    id BLOB PRIMARY KEY,
    message_id BLOB NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    reporter_id BLOB NOT NULL REFERENCES profiles(id),
    reason TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS storage_objects (
    bucket TEXT NOT NULL,
    path TEXT NOT NULL,
    content_type TEXT NOT NULL,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (bucket, path)
);
"#;

/// Opens the pool and applies the schema.
///
/// `sqlite::memory:` gets a single connection that never expires, otherwise
/// every new connection would see its own empty database.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let in_memory = database_url.contains(":memory:");
    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?
    };

    debug!(in_memory, "applying schema");
    sqlx::raw_sql(SCHEMA).execute(&pool).await?;
    info!("database ready");

    Ok(pool)
}

/// Current time, truncated to whole seconds so stored timestamps sort as text.
pub fn now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(0).unwrap_or(now)
}
