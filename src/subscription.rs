use std::future::Future;

use tokio::task::JoinHandle;

/// A running live-update listener. Dropping it stops the listener, which in
/// turn drops (and so unsubscribes) the channel it owns.
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn spawn<F>(listener: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(listener)),
        }
    }

    /// Stops the listener and waits until its channel is released.
    pub async fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}
