mod gate;
pub mod validate;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    db::Profile,
    error::{AuthError, Error, Result},
    notify::Notifier,
    platform::{AuthSession, AuthUser, Platform},
};

pub use gate::{Access, Redirect, Route, resolve};

/// Identity, token and profile of the signed-in user. Handed to every
/// component that acts on the user's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessContext {
    pub user: AuthUser,
    pub access_token: String,
    pub profile: Profile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Anonymous,
    SignedIn(AccessContext),
}

impl SessionState {
    pub fn context(&self) -> Option<&AccessContext> {
        match self {
            SessionState::SignedIn(ctx) => Some(ctx),
            SessionState::Anonymous => None,
        }
    }

    pub fn access(&self) -> Access {
        match self {
            SessionState::Anonymous => Access::Anonymous,
            SessionState::SignedIn(ctx) => ctx.profile.status.into(),
        }
    }
}

/// `None` fields are left as they are; `bio: Some("")` clears the bio.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

/// The one place that owns the current session. Dependents watch it.
pub struct SessionStore {
    platform: Platform,
    notices: Notifier,
    state: watch::Sender<SessionState>,
}

impl SessionStore {
    pub fn new(platform: Platform, notices: Notifier) -> Self {
        Self {
            platform,
            notices,
            state: watch::Sender::new(SessionState::Anonymous),
        }
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn context(&self) -> Option<AccessContext> {
        self.state.borrow().context().cloned()
    }

    pub fn access(&self) -> Access {
        self.state.borrow().access()
    }

    /// Grants the context a protected route needs, or says where to go instead.
    pub fn gate(&self, route: Route) -> Result<AccessContext, Redirect> {
        let state = self.state.borrow();
        let role = state.context().map(|ctx| ctx.profile.role).unwrap_or_default();
        let shown = resolve(state.access(), role, route);

        match state.context() {
            Some(ctx) if shown == route && route.is_protected() => Ok(ctx.clone()),
            _ => Err(Redirect(shown)),
        }
    }

    /// Resumes a session from a stored access token.
    pub async fn restore(&self, access_token: &str) -> Result<AccessContext> {
        let result = async {
            let user = self.platform.user(access_token).await?;
            let profile = self.platform.profile(access_token, user.id).await?;
            Ok::<_, Error>(AccessContext {
                user,
                access_token: access_token.to_owned(),
                profile,
            })
        }
        .await;

        match result {
            Ok(ctx) => {
                self.state.send_replace(SessionState::SignedIn(ctx.clone()));
                Ok(ctx)
            }
            Err(err) => {
                warn!("stored session not usable: {err}");
                self.state.send_replace(SessionState::Anonymous);
                Err(err)
            }
        }
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
        display_name: &str,
    ) -> Result<AccessContext> {
        validate::email(email)?;
        validate::password(password)?;
        validate::username(username)?;
        let display_name = validate::display_name(display_name)?;

        let result = async {
            let session = self
                .platform
                .sign_up(email, password, username, display_name)
                .await?;
            self.enter(session).await
        }
        .await;

        match result {
            Ok(ctx) => {
                info!(username, "signed up, awaiting approval");
                self.notices.info(
                    "Account created",
                    "Your account is waiting for admin approval.",
                );
                Ok(ctx)
            }
            Err(err) => {
                self.notices.failure("Sign up failed", &err.to_string(), &err);
                Err(err)
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AccessContext> {
        let result = async {
            let session = self.platform.sign_in(email, password).await?;
            self.enter(session).await
        }
        .await;

        match result {
            Ok(ctx) => {
                info!(username = %ctx.profile.username, status = ?ctx.profile.status, "signed in");
                Ok(ctx)
            }
            Err(err) => {
                self.notices.failure("Sign in failed", &err.to_string(), &err);
                Err(err)
            }
        }
    }

    /// Always ends anonymous, even if the token could not be revoked.
    pub async fn sign_out(&self) {
        let previous = self.state.send_replace(SessionState::Anonymous);
        if let SessionState::SignedIn(ctx) = previous {
            if let Err(err) = self.platform.sign_out(&ctx.access_token).await {
                warn!("could not revoke token: {err}");
            }
            info!(username = %ctx.profile.username, "signed out");
        }
    }

    /// Changes display name and bio. The username never changes.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile> {
        let display_name = update
            .display_name
            .as_deref()
            .map(validate::display_name)
            .transpose()?;
        if let Some(bio) = &update.bio {
            validate::bio(bio)?;
        }
        let ctx = self.context().ok_or(AuthError::NotSignedIn)?;

        let result = self
            .platform
            .update_own_profile(&ctx.access_token, display_name, update.bio.as_deref())
            .await
            .map_err(Error::from);

        match result {
            Ok(profile) => {
                self.replace_profile(profile.clone());
                self.notices.info("Profile updated", "Your changes have been saved.");
                Ok(profile)
            }
            Err(err) => {
                self.notices.failure("Update failed", "Could not update your profile.", &err);
                Err(err)
            }
        }
    }

    /// Re-reads the profile, picking up moderation decisions.
    pub async fn refresh(&self) -> Result<Access> {
        let Some(ctx) = self.context() else {
            return Ok(Access::Anonymous);
        };

        match self.platform.profile(&ctx.access_token, ctx.user.id).await {
            Ok(profile) => {
                self.replace_profile(profile);
                Ok(self.access())
            }
            Err(err) => {
                let err = Error::from(err);
                if matches!(err, Error::Auth(_)) {
                    warn!("session no longer valid: {err}");
                    self.state.send_replace(SessionState::Anonymous);
                }
                Err(err)
            }
        }
    }

    async fn enter(&self, session: AuthSession) -> Result<AccessContext> {
        let profile = self
            .platform
            .profile(&session.access_token, session.user.id)
            .await?;
        let ctx = AccessContext {
            user: session.user,
            access_token: session.access_token,
            profile,
        };
        self.state.send_replace(SessionState::SignedIn(ctx.clone()));
        Ok(ctx)
    }

    fn replace_profile(&self, profile: Profile) {
        self.state.send_if_modified(|state| match state {
            SessionState::SignedIn(ctx) if ctx.user.id == profile.id => {
                let changed = ctx.profile != profile;
                ctx.profile = profile;
                changed
            }
            _ => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Role, Status};
    use crate::error::ValidationError;
    use crate::platform::testing;

    async fn store() -> (Platform, SessionStore) {
        let platform = testing::platform().await;
        let store = SessionStore::new(platform.clone(), Notifier::new());
        (platform, store)
    }

    #[tokio::test]
    async fn sign_up_lands_in_pending() {
        let (_, store) = store().await;
        let mut watcher = store.watch();

        let ctx = store.sign_up("ada@x.io", "hunter22", "ada", " Ada ").await.unwrap();
        assert_eq!(ctx.profile.display_name, "Ada");
        assert_eq!(ctx.profile.status, Status::Pending);
        assert_eq!(ctx.profile.role, Role::Member);

        // observable before the call returned
        assert!(watcher.has_changed().unwrap());
        assert_eq!(watcher.borrow_and_update().access(), Access::Pending);
        assert_eq!(store.gate(Route::Chat), Err(Redirect(Route::AwaitingApproval)));
    }

    #[tokio::test]
    async fn invalid_sign_up_never_reaches_the_platform() {
        let (platform, store) = store().await;

        let err = store.sign_up("ada@x.io", "hunter22", "a d", "Ada").await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::Username)));

        let err = store.sign_up("ada@x.io", "123", "ada", "Ada").await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::Password)));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM auth_users")
            .fetch_one(platform.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn taken_username_is_a_conflict() {
        let (_, store) = store().await;
        store.sign_up("ada@x.io", "hunter22", "ada", "Ada").await.unwrap();
        store.sign_out().await;

        let err = store.sign_up("other@x.io", "hunter22", "ada", "Ada").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.access(), Access::Anonymous);
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let (_, store) = store().await;
        store.sign_up("ada@x.io", "hunter22", "ada", "Ada").await.unwrap();
        store.sign_out().await;

        let err = store.sign_in("ada@x.io", "nope-nope").await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::InvalidCredentials)));
        assert_eq!(store.access(), Access::Anonymous);
    }

    #[tokio::test]
    async fn refresh_picks_up_approval() {
        let (platform, store) = store().await;
        let root = testing::user(&platform, "root", Role::Admin, Status::Active).await;
        let ctx = store.sign_up("ada@x.io", "hunter22", "ada", "Ada").await.unwrap();

        platform
            .set_profile_status(&root.access_token, ctx.user.id, Status::Active)
            .await
            .unwrap();
        assert_eq!(store.refresh().await.unwrap(), Access::Active);
        assert!(store.gate(Route::Chat).is_ok());
        assert_eq!(store.gate(Route::Admin), Err(Redirect(Route::Chat)));
    }

    #[tokio::test]
    async fn sign_out_revokes_the_token() {
        let (platform, store) = store().await;
        let ctx = store.sign_up("ada@x.io", "hunter22", "ada", "Ada").await.unwrap();

        store.sign_out().await;
        assert_eq!(store.state(), SessionState::Anonymous);
        assert!(platform.caller(&ctx.access_token).await.is_err());
        assert_eq!(store.gate(Route::Settings), Err(Redirect(Route::Auth)));
    }

    #[tokio::test]
    async fn update_profile_keeps_username() {
        let (_, store) = store().await;
        store.sign_up("ada@x.io", "hunter22", "ada", "Ada").await.unwrap();

        let profile = store
            .update_profile(ProfileUpdate {
                display_name: Some("Countess".to_owned()),
                bio: Some("engines".to_owned()),
            })
            .await
            .unwrap();
        assert_eq!(profile.username, "ada");
        assert_eq!(store.context().unwrap().profile.display_name, "Countess");

        let err = store
            .update_profile(ProfileUpdate {
                bio: Some("x".repeat(501)),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::Bio)));
    }

    #[tokio::test]
    async fn restore_with_a_dead_token_stays_anonymous() {
        let (platform, store) = store().await;
        let session = platform.sign_up("ada@x.io", "hunter22", "ada", "Ada").await.unwrap();

        let ctx = store.restore(&session.access_token).await.unwrap();
        assert_eq!(ctx.profile.username, "ada");

        store.sign_out().await;
        assert!(store.restore(&session.access_token).await.is_err());
        assert_eq!(store.access(), Access::Anonymous);
    }
}
