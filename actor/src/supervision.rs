// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Supervision
//!
//! Opt-in restart policies for children. By default a parent only learns that a child stopped
//! (see [`Actor::handle_child_stopped`](crate::Actor::handle_child_stopped)); a [`Restarter`]
//! turns that notification into a restart of children that failed:
//!
//! ```ignore
//! struct Pool {
//!     restarter: Restarter,
//! }
//!
//! #[async_trait]
//! impl Actor for Pool {
//!     async fn main_loop(&self, ctx: &ActorContext) -> Result<(), Error> {
//!         ctx.register_child(&ActorRef::new("worker", Worker)).await?;
//!         futures::future::pending().await
//!     }
//!
//!     async fn handle_child_stopped(&self, ctx: &ActorContext, child: ActorRef, task: TaskHandle) {
//!         if let Err(error) = self.restarter.on_child_stopped(ctx, &child, &task).await {
//!             tracing::error!("Giving up on {}: {}", child.path(), error);
//!             ctx.stop();
//!         }
//!     }
//! }
//!
//! let pool = Pool {
//!     restarter: Restarter::new(SupervisionStrategy::Retry(Box::new(
//!         FixedIntervalStrategy::new(3, Duration::from_millis(100)),
//!     ))),
//! };
//! ```
//!

use crate::{ActorContext, ActorRef, Error, TaskHandle};

use tracing::{debug, warn};

use std::{
    collections::VecDeque,
    fmt::Debug,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use backoff::backoff::Backoff as InnerBackoff;

/// Trait to define a RetryStrategy. You can use this trait to define your
/// custom retry strategy.
pub trait RetryStrategy: Debug + Send + Sync {
    /// Maximum number of restarts before giving up on a child.
    fn max_retries(&self) -> usize;
    /// Wait duration before restarting.
    fn next_backoff(&mut self) -> Option<Duration>;
}

/// What to do with a child whose main loop failed.
#[derive(Debug)]
pub enum SupervisionStrategy {
    /// Leave the child stopped.
    Stop,
    /// Register the child again, following a RetryStrategy.
    Retry(Box<dyn RetryStrategy>),
}

/// Restarts immediately.
#[derive(Debug, Default)]
pub struct NoIntervalStrategy {
    max_retries: usize,
}

impl NoIntervalStrategy {
    pub fn new(max_retries: usize) -> Self {
        NoIntervalStrategy { max_retries }
    }
}

impl RetryStrategy for NoIntervalStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        None
    }
}

/// Waits a fixed period before every restart.
#[derive(Debug, Default)]
pub struct FixedIntervalStrategy {
    max_retries: usize,
    duration: Duration,
}

impl FixedIntervalStrategy {
    pub fn new(max_retries: usize, duration: Duration) -> Self {
        FixedIntervalStrategy {
            max_retries,
            duration,
        }
    }
}

impl RetryStrategy for FixedIntervalStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        Some(self.duration)
    }
}

/// Waits the given periods in order, one per restart. The number of periods is the retry limit.
#[derive(Debug, Default)]
pub struct CustomIntervalStrategy {
    durations: VecDeque<Duration>,
    max_retries: usize,
}

impl CustomIntervalStrategy {
    pub fn new(durations: VecDeque<Duration>) -> Self {
        Self {
            max_retries: durations.len(),
            durations,
        }
    }
}

impl RetryStrategy for CustomIntervalStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.durations.pop_front()
    }
}

/// Waits an exponentially growing, randomized period before every restart.
#[derive(Debug, Default)]
pub struct ExponentialBackoffStrategy {
    max_retries: usize,
    inner: Arc<Mutex<backoff::ExponentialBackoff>>,
}

impl ExponentialBackoffStrategy {
    pub fn new(max_retries: usize) -> Self {
        ExponentialBackoffStrategy {
            max_retries,
            inner: Arc::new(Mutex::new(backoff::ExponentialBackoff::default())),
        }
    }
}

impl RetryStrategy for ExponentialBackoffStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.inner.lock().ok().and_then(|mut eb| eb.next_backoff())
    }
}

/// Restarts failed children according to a [`SupervisionStrategy`].
///
/// Meant to be called from [`Actor::handle_child_stopped`](crate::Actor::handle_child_stopped).
/// One restarter counts restarts for all the children it is used with.
#[derive(Debug)]
pub struct Restarter {
    strategy: Mutex<SupervisionStrategy>,
    retries: AtomicUsize,
}

impl Restarter {
    pub fn new(strategy: SupervisionStrategy) -> Self {
        Self {
            strategy: Mutex::new(strategy),
            retries: AtomicUsize::new(0),
        }
    }

    /// Restarts performed so far.
    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::SeqCst)
    }

    /// Clears the restart counter.
    pub fn reset(&self) {
        self.retries.store(0, Ordering::SeqCst);
    }

    /// Handles the end of `child`, whose finished main loop is `task`.
    ///
    /// Returns `Ok(true)` if the child was registered again and `Ok(false)` if it completed or
    /// was cancelled, which needs no restart.
    ///
    /// # Errors
    ///
    /// The failure of the child when the strategy is `Stop` or the retries are exhausted, or the
    /// error of registering the child again.
    pub async fn on_child_stopped(
        &self,
        ctx: &ActorContext,
        child: &ActorRef,
        task: &TaskHandle,
    ) -> Result<bool, Error> {
        let Some(failure) = task.error() else {
            debug!("Child {} ended without failure, not restarting.", child.path());
            return Ok(false);
        };

        let backoff = {
            let mut strategy = self
                .strategy
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match &mut *strategy {
                SupervisionStrategy::Stop => {
                    debug!("Child {} failed, strategy is to stop it.", child.path());
                    return Err(failure);
                }
                SupervisionStrategy::Retry(retry) => {
                    // The attempt is reserved before the backoff, children of one restarter
                    // fail concurrently.
                    let max_retries = retry.max_retries();
                    let reserved = self.retries.fetch_update(
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                        |retries| (retries < max_retries).then_some(retries + 1),
                    );
                    if let Err(retries) = reserved {
                        warn!(
                            "Child {} failed after {} restarts: {}",
                            child.path(),
                            retries,
                            failure
                        );
                        return Err(failure);
                    }
                    retry.next_backoff()
                }
            }
        };

        if let Some(backoff) = backoff {
            debug!("Restarting child {} in {:?}.", child.path(), backoff);
            tokio::time::sleep(backoff).await;
        }
        debug!("Restarting child {} ({}): {}", child.path(), self.retries(), failure);
        ctx.register_child(child).await.map(|_| true)
    }
}
