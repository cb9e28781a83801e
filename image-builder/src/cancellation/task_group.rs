//! Structured task group for fanning out stage work.

use super::CancellationToken;
use crate::errors::{ImageBuilderError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};

/// A group of related tasks sharing a cancellation token.
///
/// The first task to fail records its error and cancels the token, so work
/// that has not started yet can bail out. A cancellation error recorded
/// first is replaced by the first real failure. Tasks already running are never
/// interrupted: [`TaskGroup::wait`] drains every task before returning.
pub struct TaskGroup {
    cancel_token: Arc<CancellationToken>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    first_error: Arc<Mutex<Option<ImageBuilderError>>>,
}

impl TaskGroup {
    /// Creates a group with its own token.
    #[must_use]
    pub fn new() -> Self {
        Self::with_token(Arc::new(CancellationToken::new()))
    }

    /// Creates a group sharing `token` with other groups.
    #[must_use]
    pub fn with_token(token: Arc<CancellationToken>) -> Self {
        Self {
            cancel_token: token,
            handles: Mutex::new(Vec::new()),
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Spawns a task in the group, in the current tracing span.
    pub fn spawn<Fut>(&self, name: &str, task: Fut)
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let token = Arc::clone(&self.cancel_token);
        let first_error = Arc::clone(&self.first_error);
        let name = name.to_string();

        let handle = tokio::spawn(
            async move {
                if let Err(err) = task.await {
                    record_failure(&first_error, &token, &name, err);
                }
            }
            .in_current_span(),
        );

        self.handles.lock().push(handle);
    }

    /// Waits for all tasks and returns the first error.
    ///
    /// # Errors
    ///
    /// Returns the error of the first task that failed, or an internal
    /// error if a task panicked.
    pub async fn wait(self) -> Result<()> {
        let handles = std::mem::take(&mut *self.handles.lock());

        for handle in handles {
            if let Err(join_error) = handle.await {
                record_failure(
                    &self.first_error,
                    &self.cancel_token,
                    "task",
                    ImageBuilderError::Internal(format!("Task join error: {join_error}")),
                );
            }
        }

        match self.first_error.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Returns the number of spawned tasks not yet awaited.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }
}

fn record_failure(
    first_error: &Mutex<Option<ImageBuilderError>>,
    token: &CancellationToken,
    name: &str,
    err: ImageBuilderError,
) {
    let mut slot = first_error.lock();
    let replaces = match slot.as_ref() {
        None => true,
        Some(current) => current.is_cancellation() && !err.is_cancellation(),
    };
    if replaces {
        token.cancel(format!("'{name}' failed: {err}"));
        *slot = Some(err);
    } else {
        debug!(task = %name, error = %err, "Dropping error of a task failing after the first one");
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("task_count", &self.task_count())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_group_success() {
        let group = TaskGroup::new();

        group.spawn("task1", async { Ok(()) });
        group.spawn("task2", async { Ok(()) });
        assert_eq!(group.task_count(), 2);

        assert!(group.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_task_group_with_error_cancels_token() {
        let group = TaskGroup::new();
        let token = Arc::clone(group.cancel_token());

        group.spawn("success", async { Ok(()) });
        group.spawn("failure", async {
            Err(ImageBuilderError::Internal("boom".to_string()))
        });

        let err = group.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "Internal error: boom");
        assert!(token.is_cancelled());
        assert!(token.reason().unwrap().contains("'failure' failed"));
    }

    #[tokio::test]
    async fn test_first_error_wins() {
        let group = TaskGroup::new();

        group.spawn("fast", async {
            Err(ImageBuilderError::Internal("first".to_string()))
        });
        group.spawn("slow", async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(ImageBuilderError::Internal("second".to_string()))
        });

        let err = group.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "Internal error: first");
    }

    #[tokio::test]
    async fn test_running_tasks_are_drained() {
        let group = TaskGroup::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&finished);
        group.spawn("slow", async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        group.spawn("failure", async {
            Err(ImageBuilderError::Internal("boom".to_string()))
        });

        assert!(group.wait().await.is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_started_work_sees_cancellation() {
        let token = Arc::new(CancellationToken::new());
        let group = TaskGroup::with_token(Arc::clone(&token));

        group.spawn("failure", async {
            Err(ImageBuilderError::Internal("boom".to_string()))
        });
        let late = Arc::clone(&token);
        group.spawn("late", async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            late.check()
        });

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, ImageBuilderError::Internal(_)));
    }

    #[tokio::test]
    async fn test_real_failure_replaces_cancellation() {
        let token = Arc::new(CancellationToken::new());
        token.cancel("sibling failed");
        let group = TaskGroup::with_token(Arc::clone(&token));

        let early = Arc::clone(&token);
        group.spawn("cancelled", async move { early.check() });
        group.spawn("failure", async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(ImageBuilderError::Internal("boom".to_string()))
        });

        let err = group.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "Internal error: boom");
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let group = TaskGroup::new();
        let explode = true;
        group.spawn("panics", async move {
            assert!(!explode, "intentional");
            Ok(())
        });

        let err = group.wait().await.unwrap_err();
        assert!(err.to_string().contains("Task join error"));
    }
}
