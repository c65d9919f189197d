use uuid::Uuid;

use crate::db::{Message, MessageRow};

/// Appends at the tail in arrival order. Returns `false` for an id that is
/// already listed.
pub(crate) fn append(messages: &mut Vec<Message>, message: Message) -> bool {
    if contains(messages, message.id) {
        return false;
    }
    messages.push(message);
    true
}

/// Applies an updated row in place. A row with `deleted_at` set is removed
/// instead. Joined attachment metadata survives the replacement.
pub(crate) fn replace(messages: &mut Vec<Message>, row: MessageRow) -> bool {
    let Some(pos) = messages.iter().position(|m| m.id == row.id) else {
        return false;
    };
    if row.is_deleted() {
        messages.remove(pos);
        return true;
    }

    let meta = messages[pos].attachment().and_then(|a| a.meta.clone());
    match Message::from_row(row, meta) {
        Ok(updated) => {
            let changed = messages[pos] != updated;
            messages[pos] = updated;
            changed
        }
        Err(_) => {
            messages.remove(pos);
            true
        }
    }
}

/// A fresh snapshot followed by whatever the feed delivered that the
/// snapshot does not have yet, in arrival order.
pub(crate) fn merge(mut snapshot: Vec<Message>, current: &[Message]) -> Vec<Message> {
    let late: Vec<Message> = current
        .iter()
        .filter(|m| !contains(&snapshot, m.id))
        .cloned()
        .collect();
    snapshot.extend(late);
    snapshot
}

pub(crate) fn contains(messages: &[Message], id: Uuid) -> bool {
    messages.iter().any(|m| m.id == id)
}
