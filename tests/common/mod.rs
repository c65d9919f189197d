#![allow(dead_code)]

use huddle::{
    Notifier, Platform, PlatformConfig, SessionStore,
    db::{Room, Status},
    platform::AuthSession,
};

pub const PASSWORD: &str = "hunter22";

pub async fn platform() -> Platform {
    platform_with(PlatformConfig::in_memory()).await
}

pub async fn platform_with(config: PlatformConfig) -> Platform {
    Platform::connect(&config).await.expect("platform")
}

/// A fresh active admin.
pub async fn admin(platform: &Platform, username: &str) -> AuthSession {
    let email = format!("{username}@example.com");
    let session = platform
        .sign_up(&email, PASSWORD, username, username)
        .await
        .expect("sign up");
    platform.promote_to_admin(&email).await.expect("promote");
    session
}

/// A member the admin has already approved.
pub async fn member(platform: &Platform, admin: &AuthSession, username: &str) -> AuthSession {
    let session = platform
        .sign_up(&format!("{username}@example.com"), PASSWORD, username, username)
        .await
        .expect("sign up");
    platform
        .set_profile_status(&admin.access_token, session.user.id, Status::Active)
        .await
        .expect("approve");
    session
}

pub async fn room(platform: &Platform, admin: &AuthSession, name: &str, members: &[&AuthSession]) -> Room {
    let room = platform
        .create_room(&admin.access_token, name, None, true)
        .await
        .expect("room");
    for member in members {
        platform
            .add_room_member(&admin.access_token, room.id, member.user.id)
            .await
            .expect("membership");
    }
    room
}

/// A session store signed in as `username`.
pub async fn signed_in(platform: &Platform, username: &str) -> SessionStore {
    let store = SessionStore::new(platform.clone(), Notifier::new());
    store
        .sign_in(&format!("{username}@example.com"), PASSWORD)
        .await
        .expect("sign in");
    store
}
