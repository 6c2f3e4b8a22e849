// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Warden actors
//!
//! Supervision trees of long-running asynchronous tasks on top of tokio.
//!
//! ## Overview
//!
//! An actor here is not a mailbox: it is a long-running async routine, its *main loop*, plus a
//! lifecycle around it. Actors form trees. A parent starts children by registering them, stops
//! them when it stops itself, and is told through a hook each time the main loop of one of its
//! children finishes, whether it returned, failed, panicked or was cancelled.
//!
//! Next to actors the crate provides [`TaskContainer`], a small primitive for rearmable and
//! cancellable tasks, and [`TaskHandle`], the shared task handle both are built on.
//!
//! ## Core Components
//!
//! ### Actors
//!
//! - [`Actor`]: the behaviour. Implement `main_loop` and, optionally, the lifecycle hooks
//!   `pre_start`, `pre_stop`, `post_stop` and `handle_child_stopped`.
//! - [`ActorRef`]: a node of the supervision tree. `start`, `stop`, `register_child` and
//!   `scoped` drive the lifecycle; `state`, `is_running`, `children`, `parent` and `path`
//!   observe it.
//! - [`ActorContext`]: what the hooks receive. Gives access to the node running the hook.
//!
//! ### Lifecycle
//!
//! ```text
//! New --start()--> Started --> Running --stop()--> Stopping --> Stopped --start()--> ...
//! ```
//!
//! `stop` is cascading and ordered: the main loop is cancelled and awaited first, then the
//! children are stopped, the most recently registered first, and every parent is notified
//! before `stop` returns.
//!
//! ### Tasks
//!
//! - [`TaskHandle`]: clonable handle over a spawned task with cancellation and multi-waiter
//!   completion. Cancelled bodies are dropped before the outcome is published.
//! - [`TaskContainer`]: a factory of task bodies with at most one live task.
//! - [`wait`]: waits on a set of tasks with a [`WaitMode`].
//!
//! ### Supervision
//!
//! Restarting failed children is opt-in: a [`Restarter`] with a [`SupervisionStrategy`] can be
//! called from `handle_child_stopped`.
//!
//! ## Getting Started
//!
//! ```ignore
//! use actor::{Actor, ActorContext, ActorRef, Error};
//! use async_trait::async_trait;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl Actor for Printer {
//!     async fn main_loop(&self, ctx: &ActorContext) -> Result<(), Error> {
//!         loop {
//!             tracing::info!("{} is alive", ctx.path());
//!             tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!         }
//!     }
//! }
//!
//! let printer = ActorRef::new("printer", Printer);
//! printer
//!     .scoped(|printer| async move {
//!         printer.register_child(&ActorRef::new("other", Printer)).await
//!     })
//!     .await??;
//! ```
//!
//! ## Logging
//!
//! Lifecycle transitions are reported with [`tracing`] at `debug` level, misuse at `warn` and
//! failures at `error`. Install any subscriber to see them.
//!

mod actor;
mod container;
mod error;
mod path;
mod runner;
mod supervision;
mod task;

//
// Actors
//

/// Behaviour of an actor: the main loop and the lifecycle hooks.
pub use actor::Actor;

/// Context handed to the hooks of an actor.
pub use actor::ActorContext;

/// States of the actor lifecycle.
pub use actor::ActorLifecycle;

/// Node of a supervision tree.
pub use actor::ActorRef;

/// Position of an actor in its tree.
pub use path::ActorPath;

//
// Tasks
//

/// Rearmable, cancellable task.
pub use container::TaskContainer;

/// Shared handle over a spawned task, and how it finished.
pub use task::{TaskHandle, TaskOutcome};

/// Waiting on a set of tasks.
pub use task::{WaitMode, wait};

//
// Errors
//

/// Error type of the crate.
pub use error::Error;

//
// Supervision
//

pub use supervision::{
    CustomIntervalStrategy, ExponentialBackoffStrategy, FixedIntervalStrategy,
    NoIntervalStrategy, Restarter, RetryStrategy, SupervisionStrategy,
};
