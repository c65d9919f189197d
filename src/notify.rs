//! Transient user-visible notices ("toasts").

use tokio::sync::broadcast;
use tracing::error;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Default,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub variant: Variant,
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(32).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn info(&self, title: &str, description: impl Into<String>) {
        self.push(title, description.into(), Variant::Default);
    }

    /// Logs `err` and shows a destructive notice. Validation errors are
    /// reported inline by the caller and never reach here.
    pub fn failure(&self, title: &str, description: &str, err: &Error) {
        error!("{title}: {err}");
        self.push(title, description.to_owned(), Variant::Destructive);
    }

    fn push(&self, title: &str, description: String, variant: Variant) {
        let _ = self.tx.send(Notice {
            title: title.to_owned(),
            description,
            variant,
        });
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
