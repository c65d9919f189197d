//! Change notifications for table writes.
//!
//! Every write the platform performs is published once on a broadcast bus.
//! A [`Channel`] listens to a set of tables, optionally narrowed to one event
//! kind and one column-equality filter, and only yields matching changes.
//! Dropping the channel unsubscribes it.

use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    Rooms,
    RoomMembers,
    Messages,
    Files,
    Reports,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        use Table::*;
        match self {
            Profiles => "profiles",
            Rooms => "rooms",
            RoomMembers => "room_members",
            Messages => "messages",
            Files => "files",
            Reports => "reports",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Table::*;
        Ok(match s {
            "profiles" => Profiles,
            "rooms" => Rooms,
            "room_members" => RoomMembers,
            "messages" => Messages,
            "files" => Files,
            "reports" => Reports,
            _ => return Err(format!("unknown table {s}")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row change. `new` is absent for deletes, `old` for inserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub table: Table,
    pub event: ChangeKind,
    pub new: Option<Value>,
    pub old: Option<Value>,
}

impl Change {
    pub fn insert<T: Serialize>(table: Table, row: &T) -> Self {
        Self {
            table,
            event: ChangeKind::Insert,
            new: serde_json::to_value(row).ok(),
            old: None,
        }
    }

    pub fn update<T: Serialize>(table: Table, new: &T) -> Self {
        Self {
            table,
            event: ChangeKind::Update,
            new: serde_json::to_value(new).ok(),
            old: None,
        }
    }

    pub fn delete<T: Serialize>(table: Table, old: &T) -> Self {
        Self {
            table,
            event: ChangeKind::Delete,
            new: None,
            old: serde_json::to_value(old).ok(),
        }
    }

    /// The row snapshot a filter is evaluated against.
    pub fn record(&self) -> Option<&Value> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// `column = value` on the changed row.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Serialize) -> Self {
        Self {
            column: column.into(),
            value: serde_json::to_value(value).unwrap_or(Value::Null),
        }
    }
}

/// What a channel listens to. `event: None` means every kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Listen {
    pub table: Table,
    pub event: Option<ChangeKind>,
    pub filter: Option<Filter>,
}

impl Listen {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            event: None,
            filter: None,
        }
    }

    pub fn event(mut self, event: ChangeKind) -> Self {
        self.event = Some(event);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn matches(&self, change: &Change) -> bool {
        if change.table != self.table {
            return false;
        }
        if self.event.is_some_and(|event| event != change.event) {
            return false;
        }
        match &self.filter {
            None => true,
            Some(Filter { column, value }) => change
                .record()
                .and_then(|row| row.get(column))
                .is_some_and(|v| v == value),
        }
    }
}

/// In-process change bus. Cheap to clone.
#[derive(Clone)]
pub struct Realtime {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<Change>,
    opened: AtomicUsize,
    released: AtomicUsize,
}

impl Realtime {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                tx: broadcast::channel(capacity).0,
                opened: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }),
        }
    }

    /// Publish a change. No-op if nobody listens.
    pub fn publish(&self, change: Change) {
        debug!(table = %change.table, event = ?change.event, "publish");
        let _ = self.inner.tx.send(change);
    }

    pub fn channel(&self, name: impl Into<String>) -> ChannelBuilder {
        ChannelBuilder {
            hub: self.clone(),
            name: name.into(),
            listens: Vec::new(),
        }
    }

    /// Channels subscribed and not yet released.
    pub fn open_channels(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst) - self.inner.released.load(Ordering::SeqCst)
    }

    /// Channels released since the hub was created.
    pub fn released_channels(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }
}

impl Default for Realtime {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ChannelBuilder {
    hub: Realtime,
    name: String,
    listens: Vec<Listen>,
}

impl ChannelBuilder {
    pub fn on(mut self, listen: Listen) -> Self {
        self.listens.push(listen);
        self
    }

    pub fn subscribe(self) -> Channel {
        let rx = self.hub.inner.tx.subscribe();
        self.hub.inner.opened.fetch_add(1, Ordering::SeqCst);
        debug!(channel = %self.name, "channel subscribed");

        Channel {
            name: self.name,
            listens: self.listens,
            rx,
            hub: self.hub,
        }
    }
}

pub struct Channel {
    name: String,
    listens: Vec<Listen>,
    rx: broadcast::Receiver<Change>,
    hub: Realtime,
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next matching change, or `None` once the hub is gone.
    ///
    /// A lagging receiver skips what it missed; delivery is best effort.
    pub async fn recv(&mut self) -> Option<Change> {
        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    if self.listens.iter().any(|l| l.matches(&change)) {
                        return Some(change);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(channel = %self.name, missed, "channel lagged, changes dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.hub.inner.released.fetch_add(1, Ordering::SeqCst);
        debug!(channel = %self.name, "channel removed");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn message_change(event: ChangeKind, room: &str) -> Change {
        Change {
            table: Table::Messages,
            event,
            new: Some(json!({ "id": "m", "room_id": room })),
            old: None,
        }
    }

    #[tokio::test]
    async fn filtered_channel_only_sees_its_room() {
        let hub = Realtime::new();
        let mut channel = hub
            .channel("messages-a")
            .on(Listen::table(Table::Messages)
                .event(ChangeKind::Insert)
                .filter(Filter::eq("room_id", "a")))
            .subscribe();

        hub.publish(message_change(ChangeKind::Insert, "b"));
        hub.publish(message_change(ChangeKind::Update, "a"));
        hub.publish(message_change(ChangeKind::Insert, "a"));

        let change = channel.recv().await.unwrap();
        assert_eq!(change.event, ChangeKind::Insert);
        assert_eq!(change.record().unwrap()["room_id"], "a");
    }

    #[tokio::test]
    async fn channel_listens_to_several_tables() {
        let hub = Realtime::new();
        let mut channel = hub
            .channel("rooms-changes")
            .on(Listen::table(Table::Rooms))
            .on(Listen::table(Table::RoomMembers))
            .subscribe();

        hub.publish(Change::insert(Table::Messages, &json!({})));
        hub.publish(Change::delete(Table::RoomMembers, &json!({ "room_id": "a" })));

        let change = channel.recv().await.unwrap();
        assert_eq!(change.table, Table::RoomMembers);
        assert_eq!(change.event, ChangeKind::Delete);
    }

    #[test]
    fn dropping_a_channel_releases_it() {
        let hub = Realtime::new();
        let first = hub.channel("one").subscribe();
        let second = hub.channel("two").subscribe();
        assert_eq!(hub.open_channels(), 2);

        drop(first);
        assert_eq!(hub.open_channels(), 1);
        assert_eq!(hub.released_channels(), 1);

        drop(second);
        assert_eq!(hub.open_channels(), 0);
    }

    #[test]
    fn table_names_round_trip_through_from_str() {
        for table in [Table::Profiles, Table::RoomMembers, Table::Messages] {
            assert_eq!(table.as_str().parse::<Table>().unwrap(), table);
        }
        assert!("users".parse::<Table>().is_err());
    }
}
