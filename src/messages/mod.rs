mod live;

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    attachments::{self, AttachmentTransfer, FileUpload},
    db::{Attachment, Message, MessageRow, Report},
    error::{AuthError, Error, Result, ValidationError},
    notify::Notifier,
    platform::{Change, ChangeKind, Filter, Listen, NewMessage, Platform, Table},
    session::{AccessContext, SessionState, SessionStore},
    subscription::Subscription,
};

/// The history of the open room, kept current by the live feed.
///
/// Nothing is inserted optimistically: the list only changes through a load
/// or a change event.
pub struct MessageStream {
    shared: Arc<Shared>,
    transfer: AttachmentTransfer,
    scope: Mutex<Option<Scope>>,
}

struct Scope {
    room_id: Uuid,
    epoch: u64,
    live: Subscription,
}

struct Shared {
    platform: Platform,
    session: watch::Receiver<SessionState>,
    notices: Notifier,
    messages: watch::Sender<Vec<Message>>,
    /// Bumped on every scope change; results carry the epoch they were
    /// issued under.
    epoch: AtomicU64,
}

impl Shared {
    fn context(&self) -> Result<AccessContext> {
        self.session
            .borrow()
            .context()
            .cloned()
            .ok_or(Error::Auth(AuthError::NotSignedIn))
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    async fn load(&self, room_id: Uuid, epoch: u64) -> Result<Vec<Message>> {
        let result = async {
            let ctx = self.context()?;
            Ok::<_, Error>(self.platform.list_messages(&ctx.access_token, room_id).await?)
        }
        .await;

        let rows = match result {
            Ok(rows) => rows,
            Err(err) => {
                if self.is_current(epoch) {
                    self.notices.failure("Error", "Failed to load messages", &err);
                }
                return Err(err);
            }
        };

        let messages: Vec<Message> = rows
            .into_iter()
            .filter_map(|row| {
                let (row, meta) = row.into_parts();
                Message::from_row(row, meta)
                    .map_err(|err| warn!("skipping row: {err}"))
                    .ok()
            })
            .collect();

        // the feed may have delivered rows committed after the snapshot
        let mut merged = None;
        self.messages.send_if_modified(|list| {
            if !self.is_current(epoch) {
                return false;
            }
            *list = live::merge(messages.clone(), list);
            merged = Some(list.clone());
            true
        });

        match merged {
            Some(list) => {
                debug!(room = %room_id, count = list.len(), "messages loaded");
                Ok(list)
            }
            None => {
                debug!(room = %room_id, "stale load discarded");
                Ok(messages)
            }
        }
    }

    /// Retires the scope issued under `epoch` and empties the list. Returns
    /// `false` if another scope already replaced it.
    fn release(&self, epoch: u64) -> bool {
        self.messages.send_if_modified(|list| {
            let released = self
                .epoch
                .compare_exchange(epoch, epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if released {
                list.clear();
            }
            released
        })
    }

    async fn apply(&self, change: Change, epoch: u64) {
        let Some(new) = change.new else { return };
        let row: MessageRow = match serde_json::from_value(new) {
            Ok(row) => row,
            Err(err) => {
                warn!("unreadable message change: {err}");
                return;
            }
        };

        match change.event {
            ChangeKind::Insert => self.apply_insert(row, epoch).await,
            ChangeKind::Update => {
                let id = row.id;
                if self.messages.send_if_modified(|list| self.is_current(epoch) && live::replace(list, row)) {
                    debug!(%id, "message updated");
                }
            }
            ChangeKind::Delete => {}
        }
    }

    async fn apply_insert(&self, row: MessageRow, epoch: u64) {
        let known = live::contains(&self.messages.borrow(), row.id);
        if known || row.is_deleted() {
            return;
        }

        let meta = match row.file_id {
            Some(file_id) => self.attachment(file_id).await,
            None => None,
        };
        let message = match Message::from_row(row, meta) {
            Ok(message) => message,
            Err(err) => {
                warn!("{err}");
                return;
            }
        };

        let id = message.id;
        if self.messages.send_if_modified(|list| self.is_current(epoch) && live::append(list, message)) {
            debug!(%id, "message appended");
        }
    }

    async fn attachment(&self, file_id: Uuid) -> Option<Attachment> {
        let ctx = self.context().ok()?;
        self.platform
            .attachment(&ctx.access_token, file_id)
            .await
            .map_err(|err| warn!(%file_id, "attachment metadata unavailable: {err}"))
            .ok()
    }

    /// Non-validation failures become a destructive notice.
    fn surface<T>(&self, result: Result<T>, description: &str) -> Result<T> {
        if let Err(err) = &result {
            if !err.is_validation() {
                self.notices.failure("Error", description, err);
            }
        }
        result
    }
}

impl MessageStream {
    pub fn new(platform: Platform, session: &SessionStore, notices: Notifier) -> Self {
        Self {
            transfer: AttachmentTransfer::new(platform.clone()),
            shared: Arc::new(Shared {
                platform,
                session: session.watch(),
                notices,
                messages: watch::Sender::new(Vec::new()),
                epoch: AtomicU64::new(0),
            }),
            scope: Mutex::new(None),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.messages.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Message>> {
        self.shared.messages.subscribe()
    }

    /// The open room. A scope whose session ended no longer counts.
    pub async fn active_room(&self) -> Option<Uuid> {
        self.current_scope().await.map(|(room_id, _)| room_id)
    }

    async fn current_scope(&self) -> Option<(Uuid, u64)> {
        self.scope
            .lock()
            .await
            .as_ref()
            .filter(|scope| self.shared.is_current(scope.epoch))
            .map(|scope| (scope.room_id, scope.epoch))
    }

    /// Makes `room_id` the active room and loads its history. The previous
    /// room's live feed is released before the new one is opened. Opening the
    /// room that is already open does nothing.
    ///
    /// The room stays open for the identity that opened it. Signing out, or
    /// signing in as someone else, empties the list and releases the feed.
    pub async fn open(&self, room_id: Uuid) -> Result<Vec<Message>> {
        let owner = self.shared.context()?.user.id;
        let epoch = {
            let mut scope = self.scope.lock().await;
            if scope
                .as_ref()
                .is_some_and(|s| s.room_id == room_id && self.shared.is_current(s.epoch))
            {
                return Ok(self.messages());
            }
            if let Some(previous) = scope.take() {
                previous.live.cancel().await;
            }

            let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.messages.send_replace(Vec::new());
            *scope = Some(Scope {
                room_id,
                epoch,
                live: self.listen(room_id, epoch, owner),
            });
            epoch
        };
        info!(room = %room_id, "room opened");

        let loaded = self.shared.load(room_id, epoch).await;
        if matches!(loaded, Err(Error::Forbidden(_) | Error::Auth(_))) {
            // the in-process feed is not access-checked; a refused room must not stay live
            let refused = self.scope.lock().await.take_if(|s| s.epoch == epoch);
            if let Some(refused) = refused {
                self.shared.release(epoch);
                refused.live.cancel().await;
                debug!(room = %room_id, "refused room released");
            }
        }
        loaded
    }

    pub async fn close(&self) {
        let previous = self.scope.lock().await.take();
        if let Some(previous) = previous {
            self.shared.epoch.fetch_add(1, Ordering::SeqCst);
            previous.live.cancel().await;
            self.shared.messages.send_replace(Vec::new());
            info!(room = %previous.room_id, "room closed");
        }
    }

    /// Reloads the active room. The result is dropped if the room changed in
    /// the meantime.
    pub async fn load(&self) -> Result<Vec<Message>> {
        let (room_id, epoch) = self.current_scope().await.ok_or(ValidationError::NoActiveRoom)?;
        self.shared.load(room_id, epoch).await
    }

    /// Posts to the active room. Content is trimmed; at least one of text and
    /// attachment is required.
    pub async fn send(&self, content: Option<&str>, attachment_id: Option<Uuid>) -> Result<Message> {
        let content = content.map(str::trim).filter(|c| !c.is_empty());
        if content.is_none() && attachment_id.is_none() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let room_id = self.active_room().await.ok_or(ValidationError::NoActiveRoom)?;

        let result = async {
            let ctx = self.shared.context()?;
            let row = self
                .shared
                .platform
                .insert_message(
                    &ctx.access_token,
                    NewMessage {
                        room_id,
                        sender_id: ctx.user.id,
                        sender_username: &ctx.profile.username,
                        content,
                        file_id: attachment_id,
                    },
                )
                .await?;
            Ok::<_, Error>(Message::from_row(row, None)?)
        }
        .await;

        self.shared.surface(result, "Failed to send message")
    }

    /// Uploads into the active room without posting anything.
    pub async fn upload_file(&self, file: &FileUpload) -> Result<Attachment> {
        attachments::validate(file)?;
        let room_id = self.active_room().await.ok_or(ValidationError::NoActiveRoom)?;

        let result = async {
            let ctx = self.shared.context()?;
            self.transfer.upload(&ctx, room_id, file).await
        }
        .await;

        self.shared.surface(result, "Failed to upload file")
    }

    pub async fn send_with_file(&self, content: Option<&str>, file: &FileUpload) -> Result<Message> {
        let attachment = self.upload_file(file).await?;
        self.send(content, Some(attachment.id)).await
    }

    pub async fn download_url(&self, attachment: &Attachment) -> Result<String> {
        let result = async {
            let ctx = self.shared.context()?;
            self.transfer.download_url(&ctx, attachment).await
        }
        .await;

        self.shared.surface(result, "Failed to download file")
    }

    pub async fn edit(&self, message_id: Uuid, content: &str) -> Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let result = async {
            let ctx = self.shared.context()?;
            self.shared
                .platform
                .edit_message(&ctx.access_token, message_id, content)
                .await?;
            Ok::<_, Error>(())
        }
        .await;

        self.shared.surface(result, "Failed to edit message")
    }

    pub async fn delete(&self, message_id: Uuid) -> Result<()> {
        let result = async {
            let ctx = self.shared.context()?;
            self.shared
                .platform
                .soft_delete_message(&ctx.access_token, message_id)
                .await?;
            Ok::<_, Error>(())
        }
        .await;

        self.shared.surface(result, "Failed to delete message")
    }

    pub async fn report(&self, message_id: Uuid, reason: &str) -> Result<Report> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::EmptyReason.into());
        }

        let result = async {
            let ctx = self.shared.context()?;
            Ok::<_, Error>(self
                .shared
                .platform
                .insert_report(&ctx.access_token, message_id, reason)
                .await?)
        }
        .await;

        if result.is_ok() {
            self.shared.notices.info("Reported", "Thanks, an admin will take a look.");
        }
        self.shared.surface(result, "Failed to report message")
    }

    fn listen(&self, room_id: Uuid, epoch: u64, owner: Uuid) -> Subscription {
        let shared = self.shared.clone();
        let mut session = shared.session.clone();
        let in_room = || Filter::eq("room_id", room_id);
        let mut channel = shared
            .platform
            .realtime()
            .channel(format!("messages-{room_id}"))
            .on(Listen::table(Table::Messages).event(ChangeKind::Insert).filter(in_room()))
            .on(Listen::table(Table::Messages).event(ChangeKind::Update).filter(in_room()))
            .subscribe();

        Subscription::spawn(async move {
            loop {
                tokio::select! {
                    change = channel.recv() => {
                        let Some(change) = change else { break };
                        shared.apply(change, epoch).await;
                    }
                    changed = session.changed() => {
                        let same_user = changed.is_ok()
                            && session.borrow().context().is_some_and(|ctx| ctx.user.id == owner);
                        if !same_user {
                            if shared.release(epoch) {
                                info!(room = %room_id, "session changed, room released");
                            }
                            break;
                        }
                    }
                }
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
    use crate::platform::{AuthSession, testing};

    struct Fixture {
        platform: Platform,
        root: AuthSession,
        store: SessionStore,
        stream: MessageStream,
        room: Uuid,
    }

    async fn fixture() -> Fixture {
        let platform = testing::platform().await;
        let root = testing::user(&platform, "root", Role::Admin, Status::Active).await;
        let ada = testing::user(&platform, "ada", Role::Member, Status::Active).await;
        let room = platform.create_room(&root.access_token, "general", None, true).await.unwrap();
        platform.add_room_member(&root.access_token, room.id, ada.user.id).await.unwrap();

        let store = SessionStore::new(platform.clone(), Notifier::new());
        store.sign_in("ada@example.com", "hunter22").await.unwrap();
        let stream = MessageStream::new(platform.clone(), &store, Notifier::new());

        Fixture {
            platform,
            root,
            store,
            stream,
            room: room.id,
        }
    }

    async fn until(rx: &mut watch::Receiver<Vec<Message>>, pred: impl Fn(&Vec<Message>) -> bool) {
        timeout(Duration::from_secs(5), rx.wait_for(|v| pred(v)))
            .await
            .expect("timed out")
            .expect("sender dropped");
    }

    #[tokio::test]
    async fn sent_message_shows_up_through_the_feed() {
        let f = fixture().await;
        f.stream.open(f.room).await.unwrap();
        let mut rx = f.stream.watch();

        let sent = f.stream.send(Some("  hello  "), None).await.unwrap();
        assert_eq!(sent.content(), Some("hello"));
        assert_eq!(sent.sender_username, "ada");

        until(&mut rx, |list| list.len() == 1).await;
        assert_eq!(f.stream.messages()[0].id, sent.id);

        let loaded = f.stream.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content(), Some("hello"));
    }

    #[tokio::test]
    async fn empty_send_is_rejected_before_the_platform() {
        let f = fixture().await;
        f.stream.open(f.room).await.unwrap();

        let err = f.stream.send(Some("   "), None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyMessage)));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(f.platform.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn send_without_a_room_fails() {
        let f = fixture().await;
        let err = f.stream.send(Some("hi"), None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::NoActiveRoom)));
    }

    #[tokio::test]
    async fn reopening_the_same_room_keeps_one_channel() {
        let f = fixture().await;
        let realtime = f.platform.realtime().clone();

        f.stream.open(f.room).await.unwrap();
        f.stream.open(f.room).await.unwrap();
        assert_eq!(realtime.open_channels(), 1);
        assert_eq!(realtime.released_channels(), 0);

        let other = f
            .platform
            .create_room(&f.root.access_token, "random", None, true)
            .await
            .unwrap();
        let ctx = f.store.context().unwrap();
        f.platform
            .add_room_member(&f.root.access_token, other.id, ctx.user.id)
            .await
            .unwrap();

        f.stream.open(other.id).await.unwrap();
        assert_eq!(realtime.open_channels(), 1);
        assert_eq!(realtime.released_channels(), 1);

        f.stream.close().await;
        assert_eq!(realtime.open_channels(), 0);
        assert_eq!(realtime.released_channels(), 2);
        assert_eq!(f.stream.active_room().await, None);
    }

    #[tokio::test]
    async fn other_rooms_do_not_leak_in() {
        let f = fixture().await;
        let other = f
            .platform
            .create_room(&f.root.access_token, "random", None, true)
            .await
            .unwrap();
        f.stream.open(f.room).await.unwrap();
        let mut rx = f.stream.watch();

        f.platform
            .insert_message(
                &f.root.access_token,
                NewMessage {
                    room_id: other.id,
                    sender_id: f.root.user.id,
                    sender_username: "root",
                    content: Some("elsewhere"),
                    file_id: None,
                },
            )
            .await
            .unwrap();
        f.stream.send(Some("here"), None).await.unwrap();

        until(&mut rx, |list| !list.is_empty()).await;
        let contents: Vec<_> = f.stream.messages().iter().map(|m| m.content().map(str::to_owned)).collect();
        assert_eq!(contents, [Some("here".to_owned())]);
    }

    #[tokio::test]
    async fn edits_and_deletes_arrive_live() {
        let f = fixture().await;
        f.stream.open(f.room).await.unwrap();
        let mut rx = f.stream.watch();

        let first = f.stream.send(Some("frist"), None).await.unwrap();
        let second = f.stream.send(Some("second"), None).await.unwrap();
        until(&mut rx, |list| list.len() == 2).await;

        f.stream.edit(first.id, "first").await.unwrap();
        until(&mut rx, |list| list[0].is_edited()).await;
        assert_eq!(f.stream.messages()[0].content(), Some("first"));

        f.stream.delete(second.id).await.unwrap();
        until(&mut rx, |list| list.len() == 1).await;
        assert_eq!(f.stream.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_loads_are_discarded() {
        let f = fixture().await;
        let other = f
            .platform
            .create_room(&f.root.access_token, "random", None, true)
            .await
            .unwrap();
        let ctx = f.store.context().unwrap();
        f.platform
            .add_room_member(&f.root.access_token, other.id, ctx.user.id)
            .await
            .unwrap();

        f.stream.open(f.room).await.unwrap();
        f.stream.send(Some("in general"), None).await.unwrap();
        let stale_epoch = f.shared_epoch();

        f.stream.open(other.id).await.unwrap();
        let late = f.stream.shared.load(f.room, stale_epoch).await.unwrap();
        assert_eq!(late.len(), 1);
        assert!(f.stream.messages().is_empty());
    }

    #[tokio::test]
    async fn signing_out_empties_the_room_and_releases_the_feed() {
        let f = fixture().await;
        let realtime = f.platform.realtime().clone();
        f.stream.open(f.room).await.unwrap();
        let mut rx = f.stream.watch();
        f.stream.send(Some("before"), None).await.unwrap();
        until(&mut rx, |list| list.len() == 1).await;

        f.store.sign_out().await;
        until(&mut rx, |list| list.is_empty()).await;
        timeout(Duration::from_secs(5), async {
            while realtime.open_channels() != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("channel still open");
        assert_eq!(f.stream.active_room().await, None);
        assert!(matches!(
            f.stream.load().await,
            Err(Error::Validation(ValidationError::NoActiveRoom))
        ));

        f.platform
            .insert_message(
                &f.root.access_token,
                NewMessage {
                    room_id: f.room,
                    sender_id: f.root.user.id,
                    sender_username: "root",
                    content: Some("after"),
                    file_id: None,
                },
            )
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(f.stream.messages().is_empty());

        // the same room opens afresh for the next session
        f.store.sign_in("ada@example.com", "hunter22").await.unwrap();
        let reloaded = f.stream.open(f.room).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(realtime.open_channels(), 1);
    }

    #[tokio::test]
    async fn another_identity_does_not_inherit_the_room() {
        let f = fixture().await;
        f.stream.open(f.room).await.unwrap();
        let mut rx = f.stream.watch();
        f.stream.send(Some("ada only"), None).await.unwrap();
        until(&mut rx, |list| list.len() == 1).await;

        testing::user(&f.platform, "bob", Role::Member, Status::Active).await;
        f.store.sign_in("bob@example.com", "hunter22").await.unwrap();
        until(&mut rx, |list| list.is_empty()).await;
        assert_eq!(f.stream.active_room().await, None);

        // bob is no member, so the room does not open for him either
        assert!(matches!(f.stream.open(f.room).await, Err(Error::Forbidden(_))));
        assert_eq!(f.stream.active_room().await, None);
        assert_eq!(f.platform.realtime().open_channels(), 0);
    }

    #[tokio::test]
    async fn a_reload_keeps_messages_the_feed_delivered_meanwhile() {
        let f = fixture().await;
        f.stream.open(f.room).await.unwrap();
        let mut rx = f.stream.watch();
        let stored = f.stream.send(Some("stored"), None).await.unwrap();
        until(&mut rx, |list| list.len() == 1).await;

        // committed after the reload's snapshot was taken
        let late = Message::from_row(
            MessageRow {
                id: Uuid::now_v7(),
                room_id: f.room,
                sender_id: f.root.user.id,
                sender_username: "root".to_owned(),
                content: Some("late".to_owned()),
                file_id: None,
                created_at: time::OffsetDateTime::now_utc(),
                edited_at: None,
                deleted_at: None,
            },
            None,
        )
        .unwrap();
        f.stream.shared.messages.send_modify(|list| list.push(late.clone()));

        let ids: Vec<_> = f.stream.load().await.unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, [stored.id, late.id]);
        let listed: Vec<_> = f.stream.messages().iter().map(|m| m.id).collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn reports_need_a_reason() {
        let f = fixture().await;
        f.stream.open(f.room).await.unwrap();
        let sent = f.stream.send(Some("spam"), None).await.unwrap();

        let err = f.stream.report(sent.id, "  ").await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyReason)));

        let report = f.stream.report(sent.id, "advertising").await.unwrap();
        assert_eq!(report.message_id, sent.id);
    }

    #[tokio::test]
    async fn failed_send_raises_a_notice() {
        let f = fixture().await;
        let notices = Notifier::new();
        let mut toasts = notices.subscribe();
        let stream = MessageStream::new(f.platform.clone(), &f.store, notices);
        stream.open(f.room).await.unwrap();

        // membership revoked behind the client's back
        sqlx::query("DELETE FROM room_members WHERE user_id=?")
            .bind(f.store.context().unwrap().user.id)
            .execute(f.platform.pool())
            .await
            .unwrap();

        let err = stream.send(Some("hello?"), None).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert_eq!(toasts.recv().await.unwrap().description, "Failed to send message");
        assert!(stream.messages().is_empty());
    }

    impl Fixture {
        fn shared_epoch(&self) -> u64 {
            self.stream.shared.epoch.load(Ordering::SeqCst)
        }
    }
}
