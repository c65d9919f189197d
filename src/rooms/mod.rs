use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::{
    db::Room,
    error::{Error, Result},
    notify::Notifier,
    platform::{Listen, Platform, Table},
    session::{Access, SessionState, SessionStore},
    subscription::Subscription,
};

/// The rooms the signed-in identity is a member of.
///
/// Any room or membership change anywhere triggers a full re-fetch; changes
/// are not checked for relevance first.
pub struct RoomDirectory {
    inner: Directory,
    live: Mutex<Option<Subscription>>,
}

#[derive(Clone)]
struct Directory {
    platform: Platform,
    session: watch::Receiver<SessionState>,
    notices: Notifier,
    rooms: Arc<watch::Sender<Vec<Room>>>,
}

impl Directory {
    async fn fetch(&self) -> Result<Vec<Room>> {
        // only active identities have rooms to show
        let token = {
            let state = self.session.borrow();
            match (state.context(), state.access()) {
                (Some(ctx), Access::Active) => Some(ctx.access_token.clone()),
                _ => None,
            }
        };
        let Some(token) = token else {
            self.rooms.send_replace(Vec::new());
            return Ok(Vec::new());
        };

        match self.platform.list_member_rooms(&token).await {
            Ok(rooms) => {
                debug!(count = rooms.len(), "rooms fetched");
                self.rooms.send_replace(rooms.clone());
                Ok(rooms)
            }
            Err(err) => {
                let err = Error::from(err);
                self.rooms.send_replace(Vec::new());
                self.notices.failure("Error", "Failed to load rooms", &err);
                Err(err)
            }
        }
    }
}

impl RoomDirectory {
    pub fn new(platform: Platform, session: &SessionStore, notices: Notifier) -> Self {
        Self {
            inner: Directory {
                platform,
                session: session.watch(),
                notices,
                rooms: Arc::new(watch::Sender::new(Vec::new())),
            },
            live: Mutex::new(None),
        }
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.inner.rooms.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Room>> {
        self.inner.rooms.subscribe()
    }

    /// Fetches the member rooms, oldest first. On failure the list is emptied
    /// rather than left stale; nothing is retried.
    pub async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.inner.fetch().await
    }

    /// Fetches once, then keeps the list current until [`RoomDirectory::stop`].
    /// Without a session there is nothing to follow and nothing is subscribed.
    pub async fn start(&self) -> Result<Vec<Room>> {
        let signed_in = self.inner.session.borrow().context().is_some();
        if !signed_in {
            return self.list_rooms().await;
        }

        let already_live = self.live.lock().map(|live| live.is_some()).unwrap_or(false);
        if !already_live {
            let subscription = self.listen();
            if let Ok(mut live) = self.live.lock() {
                *live = Some(subscription);
            }
            info!("room directory live");
        }
        self.list_rooms().await
    }

    pub async fn stop(&self) {
        let subscription = self.live.lock().ok().and_then(|mut live| live.take());
        if let Some(subscription) = subscription {
            subscription.cancel().await;
        }
    }

    fn listen(&self) -> Subscription {
        let inner = self.inner.clone();
        let mut session = inner.session.clone();
        let mut channel = inner
            .platform
            .realtime()
            .channel("rooms-changes")
            .on(Listen::table(Table::Rooms))
            .on(Listen::table(Table::RoomMembers))
            .subscribe();

        Subscription::spawn(async move {
            loop {
                tokio::select! {
                    change = channel.recv() => {
                        let Some(change) = change else { break };
                        debug!(table = %change.table, event = ?change.event, "room change, refetching");
                    }
                    changed = session.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let _ = inner.fetch().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::db::{Role, Status};
    use crate::platform::testing;

    async fn until<T>(rx: &mut watch::Receiver<T>, pred: impl Fn(&T) -> bool) {
        timeout(Duration::from_secs(5), rx.wait_for(|v| pred(v)))
            .await
            .expect("timed out")
            .expect("sender dropped");
    }

    #[tokio::test]
    async fn no_session_means_no_rooms() {
        let platform = testing::platform().await;
        let store = SessionStore::new(platform.clone(), Notifier::new());
        let directory = RoomDirectory::new(platform.clone(), &store, Notifier::new());

        assert!(directory.start().await.unwrap().is_empty());
        assert_eq!(platform.realtime().open_channels(), 0);
    }

    #[tokio::test]
    async fn membership_changes_refresh_the_list() {
        let platform = testing::platform().await;
        let root = testing::user(&platform, "root", Role::Admin, Status::Active).await;
        let ada = testing::user(&platform, "ada", Role::Member, Status::Active).await;
        let store = SessionStore::new(platform.clone(), Notifier::new());
        store.sign_in("ada@example.com", "hunter22").await.unwrap();
        let directory = RoomDirectory::new(platform.clone(), &store, Notifier::new());

        assert!(directory.start().await.unwrap().is_empty());
        let mut rooms = directory.watch();

        let general = platform.create_room(&root.access_token, "general", None, true).await.unwrap();
        platform.add_room_member(&root.access_token, general.id, ada.user.id).await.unwrap();

        until(&mut rooms, |r| r.len() == 1).await;
        assert_eq!(directory.rooms()[0].name, "general");

        store.sign_out().await;
        until(&mut rooms, |r| r.is_empty()).await;

        directory.stop().await;
        assert_eq!(platform.realtime().open_channels(), 0);
    }

    #[tokio::test]
    async fn pending_sign_ups_see_no_rooms_and_no_errors() {
        let platform = testing::platform().await;
        let store = SessionStore::new(platform.clone(), Notifier::new());
        store.sign_up("ada@x.io", "hunter22", "ada", "Ada").await.unwrap();
        let notices = Notifier::new();
        let mut toasts = notices.subscribe();
        let directory = RoomDirectory::new(platform.clone(), &store, notices);

        assert!(directory.list_rooms().await.unwrap().is_empty());
        assert!(toasts.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_fetch_clears_the_list() {
        let platform = testing::platform().await;
        let root = testing::user(&platform, "root", Role::Admin, Status::Active).await;
        let store = SessionStore::new(platform.clone(), Notifier::new());
        let notices = Notifier::new();
        let mut toasts = notices.subscribe();
        let ctx = store.sign_in("root@example.com", "hunter22").await.unwrap();
        platform.create_room(&root.access_token, "general", None, true).await.unwrap();

        let directory = RoomDirectory::new(platform.clone(), &store, notices);
        assert_eq!(directory.list_rooms().await.unwrap().len(), 1);

        // token revoked behind the store's back
        platform.sign_out(&ctx.access_token).await.unwrap();
        assert!(directory.list_rooms().await.is_err());
        assert!(directory.rooms().is_empty());
        assert_eq!(toasts.recv().await.unwrap().description, "Failed to load rooms");
    }
}
