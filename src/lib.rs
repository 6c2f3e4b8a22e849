// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Facade of the Warden framework.
//! Re-exports the actor supervision trees and the cancellable task primitives of the `actor`
//! crate under one name.

pub use actor::{
    Actor, ActorContext, ActorLifecycle, ActorPath, ActorRef,
    CustomIntervalStrategy, Error as ActorError, ExponentialBackoffStrategy,
    FixedIntervalStrategy, NoIntervalStrategy, Restarter, RetryStrategy,
    SupervisionStrategy, TaskContainer, TaskHandle, TaskOutcome, WaitMode,
    wait,
};
