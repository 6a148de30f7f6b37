//! Supervised background tasks.
//!
//! Work that must not hold a request open (container stabilization, bridge
//! readiness) runs on a detached tokio task. The spawner gets a
//! [`TaskHandle`] that reports how the task ended, so callers that care
//! (tests, the CLI) can await completion instead of sleeping.

use std::future::Future;

use {
    tokio::sync::watch,
    tracing::{Instrument, error, info_span},
};

/// Final state of a supervised task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed(String),
    /// The task panicked or was aborted before reporting.
    Lost,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Handle to a supervised task. Cloneable; every clone observes the same outcome.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    name: String,
    rx: watch::Receiver<Option<TaskOutcome>>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Outcome if the task already finished.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.rx.borrow().clone()
    }

    /// Wait until the task reports.
    pub async fn wait(mut self) -> TaskOutcome {
        loop {
            if let Some(outcome) = self.rx.borrow_and_update().clone() {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone().unwrap_or(TaskOutcome::Lost);
            }
        }
    }

    /// A handle that is already complete. Used when there was nothing to run.
    pub fn completed(name: impl Into<String>, outcome: TaskOutcome) -> Self {
        let (_tx, rx) = watch::channel(Some(outcome));
        Self {
            name: name.into(),
            rx,
        }
    }
}

/// Spawn `fut` on the runtime and report its result through the returned handle.
///
/// A panic inside the task is caught by the join and reported as
/// [`TaskOutcome::Lost`].
pub fn spawn_supervised<F, E>(name: impl Into<String>, fut: F) -> TaskHandle
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let name = name.into();
    let (tx, rx) = watch::channel(None);
    let span = info_span!("task", name = %name);
    let inner = tokio::spawn(fut.instrument(span));
    let task_name = name.clone();
    tokio::spawn(async move {
        let outcome = match inner.await {
            Ok(Ok(())) => TaskOutcome::Succeeded,
            Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
            Err(join) => {
                error!(task = %task_name, error = %join, "supervised task lost");
                TaskOutcome::Lost
            },
        };
        let _ = tx.send(Some(outcome));
    });
    TaskHandle { name, rx }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_success() {
        let handle = spawn_supervised("ok", async { Ok::<(), String>(()) });
        assert_eq!(handle.wait().await, TaskOutcome::Succeeded);
    }

    #[tokio::test]
    async fn reports_failure_message() {
        let handle = spawn_supervised("bad", async { Err::<(), _>("bridge never came up") });
        assert_eq!(
            handle.wait().await,
            TaskOutcome::Failed("bridge never came up".into())
        );
    }

    #[tokio::test]
    async fn reports_panic_as_lost() {
        let handle = spawn_supervised("panics", async {
            if true {
                panic!("boom");
            }
            Ok::<(), String>(())
        });
        assert_eq!(handle.wait().await, TaskOutcome::Lost);
    }

    #[tokio::test]
    async fn clones_observe_same_outcome() {
        let handle = spawn_supervised("shared", async { Ok::<(), String>(()) });
        let other = handle.clone();
        assert!(handle.wait().await.is_success());
        assert!(other.wait().await.is_success());
    }

    #[tokio::test]
    async fn completed_handle_is_immediate() {
        let handle = TaskHandle::completed("noop", TaskOutcome::Succeeded);
        assert_eq!(handle.outcome(), Some(TaskOutcome::Succeeded));
        assert_eq!(handle.name(), "noop");
    }
}
