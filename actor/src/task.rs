// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Tasks
//!
//! The `task` module provides [`TaskHandle`], a clonable handle over one task spawned on the
//! tokio runtime. Unlike a `JoinHandle`, any number of clones can wait for the task, query
//! whether it is done or cancelled, and compare it with other handles. Actors rely on this: the
//! caller of `stop` and the parent's supervisor both wait on the same main-loop task.
//!
//! Cancelling a task drops its body at the current suspension point. The outcome is published
//! only after the body has been dropped, so once [`TaskHandle::wait`] returns
//! [`TaskOutcome::Cancelled`] every destructor of the body has run.
//!

use crate::Error;

use futures::{
    FutureExt,
    stream::{FuturesUnordered, StreamExt},
};
use tokio::{sync::watch, task::Id};
use tokio_util::sync::CancellationToken;

use tracing::{debug, error};

use std::{
    any::Any,
    fmt::Debug,
    future::Future,
    hash::{Hash, Hasher},
    panic::AssertUnwindSafe,
    sync::Arc,
};

/// How a task finished.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The body returned `Ok(())`.
    Completed,
    /// The body returned an error.
    Failed(Error),
    /// The task was cancelled before its body finished.
    Cancelled,
    /// The body panicked. Holds the panic message.
    Panicked(String),
}

impl TaskOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }

    /// True if the body failed or panicked.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failed(_) | TaskOutcome::Panicked(_))
    }

    /// The error behind a failed or panicked task.
    pub fn error(&self) -> Option<Error> {
        match self {
            TaskOutcome::Failed(error) => Some(error.clone()),
            TaskOutcome::Panicked(message) => {
                Some(Error::Functional(format!("panicked: {}", message)))
            }
            TaskOutcome::Completed | TaskOutcome::Cancelled => None,
        }
    }
}

/// Shared handle over a spawned task.
///
/// Handles compare equal when they refer to the same spawned task.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    id: Id,
    name: String,
    token: CancellationToken,
    outcome: watch::Receiver<Option<TaskOutcome>>,
}

impl TaskHandle {
    /// Spawns `future` on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime, like `tokio::spawn`.
    pub fn spawn<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let (sender, outcome) = watch::channel(None);

        let task_token = token.clone();
        let task_name = name.clone();
        let join = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = task_token.cancelled() => TaskOutcome::Cancelled,
                result = AssertUnwindSafe(future).catch_unwind() => match result {
                    Ok(Ok(())) => TaskOutcome::Completed,
                    Ok(Err(error)) => TaskOutcome::Failed(error),
                    Err(panic) => {
                        let message = panic_message(panic);
                        error!("Task {} panicked: {}", task_name, message);
                        TaskOutcome::Panicked(message)
                    }
                },
            };
            debug!("Task {} finished: {:?}.", task_name, outcome);
            sender.send_replace(Some(outcome));
        });

        TaskHandle {
            inner: Arc::new(TaskInner {
                id: join.id(),
                name,
                token,
                outcome,
            }),
        }
    }

    pub fn id(&self) -> Id {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// True once the task finished, whatever the outcome.
    pub fn is_finished(&self) -> bool {
        self.inner.outcome.borrow().is_some()
    }

    /// True if the task finished because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.inner.outcome.borrow(), Some(TaskOutcome::Cancelled))
    }

    /// The outcome, or `None` while the task is still live.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.inner.outcome.borrow().clone()
    }

    /// The error of a failed or panicked task.
    pub fn error(&self) -> Option<Error> {
        self.outcome().and_then(|outcome| outcome.error())
    }

    /// Requests cancellation. Returns `false` when the task already finished.
    pub fn cancel(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        debug!("Cancelling task {}.", self.name());
        self.inner.token.cancel();
        true
    }

    /// Waits for the task to finish.
    pub async fn wait(&self) -> TaskOutcome {
        let mut receiver = self.inner.outcome.clone();
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(TaskOutcome::Cancelled),
            // The runtime dropped the task without running it to the end.
            Err(_) => TaskOutcome::Cancelled,
        };
        outcome
    }

    /// Cancels the task and waits until the cancellation is observed.
    pub async fn cancel_and_wait(&self) -> TaskOutcome {
        self.cancel();
        self.wait().await
    }

    /// True when called from inside this task.
    pub fn is_current(&self) -> bool {
        tokio::task::try_id() == Some(self.inner.id)
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for TaskHandle {}

impl Hash for TaskHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("outcome", &*self.inner.outcome.borrow())
            .finish()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// When [`wait`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// As soon as one task finished.
    FirstCompleted,
    /// As soon as one task failed or panicked, or when all finished.
    FirstException,
    /// When every task finished.
    AllCompleted,
}

/// Waits on a set of tasks and splits them into `(done, pending)`.
///
/// Both vectors keep the order of `tasks`. Tasks that are already finished count as done
/// immediately, and an empty set returns at once.
pub async fn wait<I>(tasks: I, mode: WaitMode) -> (Vec<TaskHandle>, Vec<TaskHandle>)
where
    I: IntoIterator<Item = TaskHandle>,
{
    let tasks: Vec<TaskHandle> = tasks.into_iter().collect();

    let mut finished = tasks.iter().filter(|task| task.is_finished()).cloned();
    let mut satisfied = match mode {
        WaitMode::FirstCompleted => finished.next().is_some(),
        WaitMode::FirstException => {
            finished.any(|task| task.outcome().is_some_and(|o| o.is_failure()))
        }
        WaitMode::AllCompleted => false,
    };

    let mut running: FuturesUnordered<_> = tasks
        .iter()
        .filter(|task| !task.is_finished())
        .cloned()
        .map(|task| async move {
            let outcome = task.wait().await;
            (task, outcome)
        })
        .collect();

    while !satisfied {
        match running.next().await {
            Some((task, outcome)) => {
                debug!("Task {} is done while waiting.", task.name());
                satisfied = match mode {
                    WaitMode::FirstCompleted => true,
                    WaitMode::FirstException => outcome.is_failure(),
                    WaitMode::AllCompleted => false,
                };
            }
            None => break,
        }
    }

    tasks.into_iter().partition(|task| task.is_finished())
}
