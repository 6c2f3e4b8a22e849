// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Task container
//!
//! A [`TaskContainer`] wraps a factory of task bodies and keeps at most one live task built from
//! it. [`TaskContainer::reschedule`] only rearms when necessary: while the current task is
//! running it hands back the same [`TaskHandle`], once it finished it spawns a fresh body.
//!
//! The container stands in for its task wherever a bare handle is expected. It compares equal to
//! the task it wraps (in both directions), so a caller can put `container.reschedule()` into a
//! [`wait`](crate::task::wait) set together with other tasks and later recognise which member
//! completed:
//!
//! ```ignore
//! let ticker = TaskContainer::new("ticker", || async {
//!     tokio::time::sleep(Duration::from_millis(10)).await;
//!     Ok(())
//! });
//! let (done, _pending) = wait([ticker.reschedule(), other], WaitMode::FirstCompleted).await;
//! if done.iter().any(|task| *task == ticker) {
//!     ticker.reschedule();
//! }
//! ```
//!

use crate::{Error, TaskHandle, TaskOutcome};

use futures::{FutureExt, future::BoxFuture};

use tracing::debug;

use std::{
    fmt::Debug,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Mutex, MutexGuard},
};

type TaskFactory =
    Box<dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// Rearmable, cancellable wrapper around a task factory.
pub struct TaskContainer {
    name: String,
    factory: TaskFactory,
    task: Mutex<Option<TaskHandle>>,
}

impl TaskContainer {
    /// Creates a container. Nothing is scheduled until [`reschedule`](Self::reschedule).
    pub fn new<F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(move || factory().boxed()),
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns a task from the factory unless the current one is still live.
    ///
    /// Returns the live task, which is the previous one when no rearm was needed. Does not
    /// suspend; must be called within a tokio runtime.
    pub fn reschedule(&self) -> TaskHandle {
        let mut current = self.lock();
        if let Some(task) = current.as_ref().filter(|task| !task.is_finished()) {
            debug!("Task {} is still live, not rearming.", self.name);
            return task.clone();
        }
        debug!("Rearming task {}.", self.name);
        let task = TaskHandle::spawn(self.name.clone(), (self.factory)());
        *current = Some(task.clone());
        task
    }

    /// The wrapped task, or `None` if the container was never scheduled.
    pub fn task(&self) -> Option<TaskHandle> {
        self.lock().clone()
    }

    /// True while the wrapped task exists and has not finished.
    pub fn is_scheduled(&self) -> bool {
        self.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Requests cancellation of the wrapped task. No-op without a live task.
    pub fn cancel(&self) -> bool {
        self.task().is_some_and(|task| task.cancel())
    }

    /// Cancels the wrapped task and waits until it is finished.
    pub async fn cancel_and_wait(&self) -> Option<TaskOutcome> {
        let task = self.task()?;
        Some(task.cancel_and_wait().await)
    }

    /// Runs `body` with the container and cancels the wrapped task on every exit path.
    ///
    /// When `body` returns or panics, the cancellation is awaited before `scoped` returns (or
    /// resumes the panic), so the task is then both finished and cancelled unless it had already
    /// finished on its own. If the `scoped` future itself is dropped, cancellation is requested
    /// but cannot be awaited.
    pub async fn scoped<'a, F, Fut, T>(&'a self, body: F) -> T
    where
        F: FnOnce(&'a TaskContainer) -> Fut,
        Fut: Future<Output = T> + 'a,
    {
        let guard = CancelGuard(self);
        let result = AssertUnwindSafe(body(self)).catch_unwind().await;
        if let Some(outcome) = self.cancel_and_wait().await {
            debug!("Task {} left its scope: {:?}.", self.name, outcome);
        }
        drop(guard);
        match result {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<TaskHandle>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct CancelGuard<'a>(&'a TaskContainer);

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

impl PartialEq for TaskContainer {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl PartialEq<TaskHandle> for TaskContainer {
    fn eq(&self, other: &TaskHandle) -> bool {
        self.task().is_some_and(|task| task == *other)
    }
}

impl PartialEq<TaskContainer> for TaskHandle {
    fn eq(&self, other: &TaskContainer) -> bool {
        other == self
    }
}

impl Debug for TaskContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContainer")
            .field("name", &self.name)
            .field("task", &self.task())
            .finish()
    }
}
