use std::sync::Mutex;

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    db::{Membership, Profile, Room, Status},
    error::{Error, Result, ValidationError},
    notify::Notifier,
    platform::Platform,
    session::{AccessContext, Route, SessionStore},
};

/// A status an admin can move someone to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Block,
}

impl From<Verdict> for Status {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Approve => Status::Active,
            Verdict::Block => Status::Blocked,
        }
    }
}

/// The controls shown next to a profile row. Admin rows get none.
pub fn controls_for(profile: &Profile) -> &'static [Verdict] {
    if profile.is_admin() {
        return &[];
    }
    match profile.status {
        Status::Pending => &[Verdict::Approve, Verdict::Block],
        Status::Active => &[Verdict::Block],
        Status::Blocked => &[Verdict::Approve],
    }
}

#[derive(Debug, Clone, Default)]
struct Lists {
    pending: Vec<Profile>,
    all: Vec<Profile>,
}

impl Lists {
    /// Folds one written row into both lists. Verdicts never yield `Pending`,
    /// so a row can only leave the pending list here.
    fn apply(&mut self, profile: &Profile) {
        if let Some(row) = self.all.iter_mut().find(|p| p.id == profile.id) {
            *row = profile.clone();
        }
        self.pending.retain(|p| p.id != profile.id);
    }
}

pub struct ModerationConsole {
    platform: Platform,
    ctx: AccessContext,
    notices: Notifier,
    lists: Mutex<Lists>,
}

impl ModerationConsole {
    /// Only an active admin gets a console; everyone else is turned away
    /// before anything is fetched.
    pub async fn open(platform: Platform, session: &SessionStore, notices: Notifier) -> Result<Self> {
        let ctx = session
            .gate(Route::Admin)
            .map_err(|redirect| Error::Forbidden(format!("admin access required, {redirect}")))?;

        let console = Self {
            platform,
            ctx,
            notices,
            lists: Mutex::new(Lists::default()),
        };
        console.refresh().await?;
        info!(admin = %console.ctx.profile.username, "moderation console opened");
        Ok(console)
    }

    /// Pending identities, newest first.
    pub fn pending(&self) -> Vec<Profile> {
        self.lists.lock().map(|l| l.pending.clone()).unwrap_or_default()
    }

    /// Every identity, newest first.
    pub fn all(&self) -> Vec<Profile> {
        self.lists.lock().map(|l| l.all.clone()).unwrap_or_default()
    }

    pub async fn list_pending(&self) -> Result<Vec<Profile>> {
        Ok(self
            .platform
            .list_profiles(&self.ctx.access_token, Some(Status::Pending))
            .await?)
    }

    pub async fn list_all(&self) -> Result<Vec<Profile>> {
        Ok(self.platform.list_profiles(&self.ctx.access_token, None).await?)
    }

    /// Refetches both lists. On failure the previous lists stay.
    pub async fn refresh(&self) -> Result<()> {
        let result = async {
            let pending = self.list_pending().await?;
            let all = self.list_all().await?;
            Ok::<_, Error>(Lists { pending, all })
        }
        .await;

        match result {
            Ok(lists) => {
                if let Ok(mut current) = self.lists.lock() {
                    *current = lists;
                }
                Ok(())
            }
            Err(err) => {
                self.notices.failure("Error", "Failed to load users", &err);
                Err(err)
            }
        }
    }

    pub async fn set_status(&self, id: Uuid, verdict: Verdict) -> Result<Profile> {
        let status = Status::from(verdict);
        let result = self
            .platform
            .set_profile_status(&self.ctx.access_token, id, status)
            .await
            .map_err(Error::from);

        match result {
            Ok(profile) => {
                info!(user = %profile.username, ?status, "status changed");
                self.notices.info(
                    "User updated",
                    format!("{} is now {}", profile.username, status.as_str()),
                );
                if let Ok(mut lists) = self.lists.lock() {
                    lists.apply(&profile);
                }
                // the refetch picks up changes made by other admins
                if let Err(err) = self.refresh().await {
                    warn!(user = %profile.username, "lists not refetched after status change: {err}");
                }
                Ok(profile)
            }
            Err(err) => {
                self.notices.failure("Error", "Failed to update user status", &err);
                Err(err)
            }
        }
    }

    /// The creator joins the new room.
    pub async fn create_room(&self, name: &str, description: Option<&str>, is_private: bool) -> Result<Room> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::RoomName.into());
        }
        let description = description.map(str::trim).filter(|d| !d.is_empty());

        let result = self
            .platform
            .create_room(&self.ctx.access_token, name, description, is_private)
            .await
            .map_err(Error::from);

        match result {
            Ok(room) => {
                self.notices.info("Room created", format!("#{} is ready", room.name));
                Ok(room)
            }
            Err(err) => {
                self.notices.failure("Error", "Failed to create room", &err);
                Err(err)
            }
        }
    }

    pub async fn add_member(&self, room_id: Uuid, user_id: Uuid) -> Result<Membership> {
        let result = self
            .platform
            .add_room_member(&self.ctx.access_token, room_id, user_id)
            .await
            .map_err(Error::from);

        if let Err(err) = &result {
            self.notices.failure("Error", "Failed to add member", err);
        }
        result
    }
}
