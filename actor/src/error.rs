// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!

use crate::ActorPath;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for actors and tasks.
///
/// Cancellation is not represented here: a cancelled task is a normal outcome
/// and is reported through [`TaskOutcome::Cancelled`](crate::TaskOutcome).
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The actor was started twice without an intervening stop.
    #[error("Actor {0} is already started.")]
    AlreadyStarted(ActorPath),
    /// The actor is already a child of some actor.
    #[error("Actor {0} is already registered as a child.")]
    AlreadyRegistered(ActorPath),
    /// The operation requires a running actor.
    #[error("Actor {0} is not running.")]
    NotRunning(ActorPath),
    /// The actor main loop never reached the running state.
    #[error("An error occurred while starting the actor: {0}")]
    Start(String),
    /// Error raised by user code running inside a task.
    #[error("Error: {0}")]
    Functional(String),
}
