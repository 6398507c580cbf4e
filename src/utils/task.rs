//! Cancellable background tasks.
//!
//! Reconnection loops, the traceroute ticker, the proxy listener and the outbound
//! pacer all run as a [`ScheduledTask`]: a spawned future paired with a
//! cancellation token. Dropping the handle cancels the task.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct ScheduledTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Spawn `f` with a fresh cancellation token.
    pub fn spawn<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_with_token(name, CancellationToken::new(), f)
    }

    /// Spawn `f` under an existing token, e.g. a child of a service-wide token.
    pub fn spawn_with_token<F, Fut>(name: &'static str, cancel: CancellationToken, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(f(cancel.clone()));
        debug!(task = name, "Scheduled task started");
        Self {
            name,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Cancel and wait up to `grace` for the task to finish, aborting it otherwise.
    pub async fn shutdown(mut self, grace: Duration) {
        self.cancel.cancel();
        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(_) => debug!(task = self.name, "Scheduled task stopped"),
                Err(_) => {
                    warn!(task = self.name, "Task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_cancels_loop() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();

        let task = ScheduledTask::spawn("test-loop", move |cancel| async move {
            cancel.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });

        task.shutdown(Duration::from_secs(1)).await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_drop_cancels_token() {
        let task = ScheduledTask::spawn("dropped", |cancel| async move {
            cancel.cancelled().await;
        });
        let token = task.token();
        drop(task);
        assert!(token.is_cancelled());
    }
}
