// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor runner
//!
//! Tasks that execute on behalf of an actor:
//!
//! - **Main loop**: runs `pre_start`, marks the actor `Running` and runs `main_loop`. Its
//!   [`TaskHandle`] is what `stop` cancels and what the parent supervises.
//! - **Supervisor**: spawned by the parent for every registered child. It waits for the main loop
//!   of the child, stops the child, unlinks it from the parent and calls
//!   `handle_child_stopped` on the parent.
//! - **Teardown**: spawned by the first `stop`. Runs `pre_stop`, cancels the main loop, stops the
//!   children, runs `post_stop` and marks the actor `Stopped`. Every `stop` caller waits on it.
//!

use crate::{
    TaskHandle,
    actor::{ActorCell, ActorLifecycle, ActorRef},
};

use futures::FutureExt;
use tokio::sync::watch;

use tracing::{debug, error, warn};

use std::{panic::AssertUnwindSafe, sync::Weak};

tokio::task_local! {
    // Parent on whose behalf the current supervisor task runs.
    static SUPERVISING: Weak<ActorCell>;
}

/// Spawns the main-loop task of `actor`.
pub(crate) fn spawn_main_loop(actor: ActorRef) -> TaskHandle {
    let name = format!("main:{}", actor.path());
    TaskHandle::spawn(name, async move {
        let ctx = actor.context();
        let behaviour = actor.behaviour();
        let path = ctx.path();

        if let Err(error) = behaviour.pre_start(&ctx).await {
            error!("Actor {} failed in pre_start: {}", path, error);
            return Err(error);
        }
        if !actor.mark_running() {
            debug!("Actor {} was stopped before running.", path);
            return Ok(());
        }
        debug!("Running actor {}.", path);

        let result = behaviour.main_loop(&ctx).await;
        match &result {
            Ok(()) => debug!("Main loop of actor {} returned.", path),
            Err(error) => warn!("Main loop of actor {} failed: {}", path, error),
        }
        result
    })
}

/// Spawns the task that supervises `child` on behalf of `parent`.
pub(crate) fn spawn_supervisor(
    parent: Weak<ActorCell>,
    child: ActorRef,
    main_task: TaskHandle,
) -> TaskHandle {
    let name = format!("supervisor:{}", child.path());
    let scope = parent.clone();
    TaskHandle::spawn(name, SUPERVISING.scope(scope, async move {
        let outcome = main_task.wait().await;
        debug!("Child {} ended: {:?}.", child.path(), outcome);
        child.stop().await;

        let Some(parent) = parent.upgrade().map(ActorRef::from_cell) else {
            debug!("Parent of {} is gone, nobody to notify.", child.path());
            return Ok(());
        };
        if !parent.remove_child(&child) {
            return Ok(());
        }
        parent
            .behaviour()
            .handle_child_stopped(&parent.context(), child, main_task)
            .await;
        Ok(())
    }))
}

/// True when the current task supervises a child of `actor` or of one of its descendants.
///
/// The teardown of `actor` waits for such a task, so it must not wait for that teardown.
pub(crate) fn supervises_current(actor: &ActorRef) -> bool {
    let Ok(Some(parent)) = SUPERVISING.try_with(Weak::upgrade) else {
        return false;
    };
    let mut node = Some(ActorRef::from_cell(parent));
    while let Some(current) = node {
        if current == *actor {
            return true;
        }
        node = current.parent();
    }
    false
}

/// Spawns the teardown task of `actor`, which is already `Stopping`.
pub(crate) fn spawn_teardown(actor: ActorRef) -> TaskHandle {
    let name = format!("stop:{}", actor.path());
    TaskHandle::spawn(name, async move {
        let steps = AssertUnwindSafe(actor.teardown()).catch_unwind().await;
        actor.finish_stop();
        if let Err(panic) = steps {
            std::panic::resume_unwind(panic);
        }
        Ok(())
    })
}

/// Waits until the lifecycle satisfies `accept` and returns the state that did.
pub(crate) async fn wait_state<F>(
    mut receiver: watch::Receiver<ActorLifecycle>,
    accept: F,
) -> ActorLifecycle
where
    F: Fn(ActorLifecycle) -> bool,
{
    let state = receiver.wait_for(|state| accept(*state)).await.map(|state| *state);
    match state {
        Ok(state) => state,
        Err(_) => *receiver.borrow(),
    }
}

/// Stops an actor when dropped, unless disarmed.
///
/// The teardown is spawned on the current runtime; outside of a runtime nothing can be done.
pub(crate) struct StopGuard {
    actor: Option<ActorRef>,
}

impl StopGuard {
    pub fn new(actor: ActorRef) -> Self {
        Self { actor: Some(actor) }
    }

    pub fn disarm(mut self) {
        self.actor = None;
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        let Some(actor) = self.actor.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(_) => {
                debug!("Scope of actor {} dropped, stopping it.", actor.path());
                actor.begin_stop();
            }
            Err(_) => {
                error!("Actor {} left its scope outside of a runtime.", actor.path());
            }
        }
    }
}
