// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor
//!
//! The `actor` module provides the `Actor` trait and the `ActorRef` type. The `Actor` trait is the
//! behaviour an implementer writes: a main loop plus optional lifecycle hooks. The `ActorRef` type
//! is the node of the supervision tree that runs that behaviour: it owns the main-loop task, the
//! set of children and the lifecycle state.
//!

use crate::{
    ActorPath, Error, TaskHandle,
    runner::{self, StopGuard},
};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use tracing::{debug, error, warn};

use std::{
    collections::BTreeMap,
    fmt::Debug,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, MutexGuard, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

/// Lifecycle of an actor.
///
/// ```text
/// New --start()--> Started --(main loop runs)--> Running --stop()--> Stopping --> Stopped
///                     ^                                                             |
///                     +--------------------------start()----------------------------+
/// ```
///
/// The main-loop task exists exactly in `Started`, `Running` and `Stopping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorLifecycle {
    /// Created, never started.
    New,
    /// The main-loop task is scheduled but has not run yet.
    Started,
    /// The main loop is running.
    Running,
    /// `stop` is cancelling the main loop and stopping the children.
    Stopping,
    /// Fully stopped. The actor can be started again.
    Stopped,
}

impl ActorLifecycle {
    /// True in the states that own a main-loop task.
    pub fn has_main_task(&self) -> bool {
        matches!(
            self,
            ActorLifecycle::Started
                | ActorLifecycle::Running
                | ActorLifecycle::Stopping
        )
    }
}

/// Behaviour of an actor.
///
/// Only [`main_loop`](Actor::main_loop) is required. Hooks take `&self` because the main loop and
/// the hooks of one actor may run concurrently (a stop arrives while the main loop is suspended);
/// keep mutable state behind atomics or locks.
///
/// # Examples
///
/// ```ignore
/// struct Heartbeat {
///     beats: AtomicUsize,
/// }
///
/// #[async_trait]
/// impl Actor for Heartbeat {
///     async fn main_loop(&self, _ctx: &ActorContext) -> Result<(), Error> {
///         loop {
///             self.beats.fetch_add(1, Ordering::Relaxed);
///             tokio::time::sleep(Duration::from_millis(100)).await;
///         }
///     }
///
///     async fn handle_child_stopped(&self, ctx: &ActorContext, child: ActorRef, task: TaskHandle) {
///         if let Some(error) = task.error() {
///             tracing::warn!("Child {} crashed: {}", child.path(), error);
///             ctx.stop();
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Actor: Send + Sync + 'static {
    /// The actor body.
    ///
    /// Runs inside the main-loop task. Returning, failing or being cancelled at an `.await`
    /// finishes that task; a parent learns about it through
    /// [`handle_child_stopped`](Actor::handle_child_stopped).
    async fn main_loop(&self, ctx: &ActorContext) -> Result<(), Error>;

    /// Runs in the main-loop task before the actor is marked running. An error aborts the start
    /// and is returned by [`ActorRef::start`] as [`Error::Start`].
    async fn pre_start(&self, _ctx: &ActorContext) -> Result<(), Error> {
        Ok(())
    }

    /// Runs once when a stop begins, before the main loop is cancelled.
    async fn pre_stop(&self, _ctx: &ActorContext) {}

    /// Runs once after the main loop and all children are stopped.
    async fn post_stop(&self, _ctx: &ActorContext) {}

    /// Called once each time the main loop of a child finishes, for whatever reason.
    ///
    /// The child is already stopped and removed from the children of this actor, so it can be
    /// registered again from here. `task` is the finished main-loop task of the child; inspect
    /// [`TaskHandle::outcome`] to tell a crash from a cancellation. The default does nothing.
    async fn handle_child_stopped(
        &self,
        _ctx: &ActorContext,
        _child: ActorRef,
        _task: TaskHandle,
    ) {
    }
}

/// Access to the supervision tree from inside the hooks of an actor.
#[derive(Clone)]
pub struct ActorContext {
    myself: ActorRef,
}

impl ActorContext {
    pub(crate) fn new(myself: ActorRef) -> Self {
        Self { myself }
    }

    pub fn path(&self) -> ActorPath {
        self.myself.path()
    }

    /// The actor running this context.
    pub fn myself(&self) -> ActorRef {
        self.myself.clone()
    }

    pub fn parent(&self) -> Option<ActorRef> {
        self.myself.parent()
    }

    pub fn children(&self) -> Vec<ActorRef> {
        self.myself.children()
    }

    /// Registers `child` under this actor. See [`ActorRef::register_child`].
    pub async fn register_child(&self, child: &ActorRef) -> Result<(), Error> {
        self.myself.register_child(child).await
    }

    /// Requests a stop of this actor without waiting for it.
    ///
    /// The stop runs on its own task, so this is safe to call from the main loop, which is
    /// cancelled as part of the stop.
    pub fn stop(&self) {
        debug!("Actor {} requested its own stop.", self.path());
        self.myself.begin_stop();
    }
}

/// Handle on an actor in a supervision tree.
///
/// Cloning the handle does not clone the actor; all clones refer to the same node and compare
/// equal.
#[derive(Clone)]
pub struct ActorRef {
    cell: Arc<ActorCell>,
}

pub(crate) struct ActorCell {
    id: u64,
    name: String,
    path: RwLock<ActorPath>,
    actor: Arc<dyn Actor>,
    lifecycle: watch::Sender<ActorLifecycle>,
    main_task: Mutex<Option<TaskHandle>>,
    teardown: Mutex<Option<TaskHandle>>,
    parent: Mutex<Option<Weak<ActorCell>>>,
    children: Mutex<BTreeMap<u64, ChildEntry>>,
}

struct ChildEntry {
    child: ActorRef,
    supervisor: TaskHandle,
}

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ActorRef {
    /// Wraps `actor` in a new, not yet started node named `name`.
    pub fn new<A: Actor>(name: &str, actor: A) -> Self {
        let (lifecycle, _) = watch::channel(ActorLifecycle::New);
        let path = ActorPath::from(name);
        debug!("Creating actor {}.", path);
        Self {
            cell: Arc::new(ActorCell {
                id: NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed),
                name: path.key(),
                path: RwLock::new(path),
                actor: Arc::new(actor),
                lifecycle,
                main_task: Mutex::new(None),
                teardown: Mutex::new(None),
                parent: Mutex::new(None),
                children: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub(crate) fn from_cell(cell: Arc<ActorCell>) -> Self {
        Self { cell }
    }

    pub(crate) fn downgrade(&self) -> Weak<ActorCell> {
        Arc::downgrade(&self.cell)
    }

    pub(crate) fn behaviour(&self) -> Arc<dyn Actor> {
        self.cell.actor.clone()
    }

    pub(crate) fn context(&self) -> ActorContext {
        ActorContext::new(self.clone())
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Path in the supervision tree: `/name` for a root, `parent_path/name` for a child.
    pub fn path(&self) -> ActorPath {
        self.cell
            .path
            .read()
            .map(|path| path.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn set_path(&self, path: ActorPath) {
        match self.cell.path.write() {
            Ok(mut current) => *current = path,
            Err(poisoned) => *poisoned.into_inner() = path,
        }
    }

    pub fn state(&self) -> ActorLifecycle {
        *self.cell.lifecycle.borrow()
    }

    /// True while the actor owns a main-loop task.
    pub fn is_started(&self) -> bool {
        self.state().has_main_task()
    }

    /// True while the actor is `Running` and its main loop has not finished.
    pub fn is_running(&self) -> bool {
        self.state() == ActorLifecycle::Running
            && self.main_task().is_some_and(|task| !task.is_finished())
    }

    /// The current main-loop task, if any.
    pub fn main_task(&self) -> Option<TaskHandle> {
        lock(&self.cell.main_task).clone()
    }

    /// The supervising actor, if this actor is registered as a child.
    pub fn parent(&self) -> Option<ActorRef> {
        lock(&self.cell.parent)
            .as_ref()
            .and_then(Weak::upgrade)
            .map(ActorRef::from_cell)
    }

    /// Children in registration order.
    pub fn children(&self) -> Vec<ActorRef> {
        lock(&self.cell.children)
            .values()
            .map(|entry| entry.child.clone())
            .collect()
    }

    pub fn has_child(&self, child: &ActorRef) -> bool {
        lock(&self.cell.children).contains_key(&child.cell.id)
    }

    /// Starts the actor.
    ///
    /// Schedules the main-loop task and returns once it runs, i.e. once `pre_start` succeeded
    /// and the state is `Running`. A stopped actor can be started again.
    ///
    /// # Errors
    ///
    /// * [`Error::AlreadyStarted`] if the actor owns a main-loop task already.
    /// * [`Error::Start`] if `pre_start` failed; the actor is `Stopped` afterwards.
    pub async fn start(&self) -> Result<(), Error> {
        let (path, task) = {
            let mut main_task = lock(&self.cell.main_task);
            let claimed = self.cell.lifecycle.send_if_modified(|state| {
                match *state {
                    ActorLifecycle::New | ActorLifecycle::Stopped => {
                        *state = ActorLifecycle::Started;
                        true
                    }
                    _ => false,
                }
            });
            if !claimed {
                let path = self.path();
                warn!("Actor {} is already started.", path);
                return Err(Error::AlreadyStarted(path));
            }
            if self.parent().is_none() {
                self.set_path(ActorPath::from(self.name()));
            }
            let path = self.path();
            debug!("Actor {} is started.", path);
            let task = runner::spawn_main_loop(self.clone());
            *main_task = Some(task.clone());
            (path, task)
        };

        let state = runner::wait_state(self.cell.lifecycle.subscribe(), |state| {
            state != ActorLifecycle::Started
        });
        tokio::select! {
            _ = state => {},
            _ = task.wait() => {},
        }

        match self.state() {
            ActorLifecycle::Running => Ok(()),
            ActorLifecycle::Started => {
                let reason = task
                    .error()
                    .map(|error| error.to_string())
                    .unwrap_or_else(|| "main loop ended before running".to_owned());
                self.abort_start(&task);
                error!("Actor {} failed to start: {}", path, reason);
                Err(Error::Start(reason))
            }
            state => {
                warn!("Actor {} was stopped before running.", path);
                Err(Error::Start(format!("stopped before running ({:?})", state)))
            }
        }
    }

    fn abort_start(&self, task: &TaskHandle) {
        let mut main_task = lock(&self.cell.main_task);
        let aborted = self.cell.lifecycle.send_if_modified(|state| {
            if *state == ActorLifecycle::Started {
                *state = ActorLifecycle::Stopped;
                true
            } else {
                false
            }
        });
        if aborted && main_task.as_ref() == Some(task) {
            *main_task = None;
        }
    }

    pub(crate) fn mark_running(&self) -> bool {
        self.cell.lifecycle.send_if_modified(|state| {
            if *state == ActorLifecycle::Started {
                *state = ActorLifecycle::Running;
                true
            } else {
                false
            }
        })
    }

    /// Stops the actor and, recursively, its children.
    ///
    /// Cancels the main loop and waits for it, stops the children (the most recently registered
    /// first) and waits for their supervisors to deliver `handle_child_stopped`. Returns once the
    /// state is `Stopped`. Stopping an actor that is not started does nothing; a concurrent
    /// caller waits for the first one to finish.
    ///
    /// The teardown runs on its own task, started by the first caller. Dropping a `stop` future
    /// does not interrupt it, and a later `stop` waits for the same teardown.
    ///
    /// Called from a task the teardown itself waits on (the main loop of this actor, its
    /// `pre_stop`/`post_stop` hooks, or the `handle_child_stopped` of this actor or one of its
    /// descendants), this call starts the teardown and returns at once.
    pub async fn stop(&self) {
        let Some(teardown) = self.begin_stop() else {
            debug!("Actor {} is not started, nothing to stop.", self.path());
            return;
        };
        if teardown.is_current()
            || self.main_task().is_some_and(|task| task.is_current())
            || runner::supervises_current(self)
        {
            debug!(
                "Actor {} stopped from a task its teardown waits on, not waiting.",
                self.path()
            );
            return;
        }
        teardown.wait().await;
    }

    /// Moves `Started | Running` to `Stopping` and spawns the teardown. Returns the teardown of
    /// a stop in progress, or `None` when the actor is not started.
    pub(crate) fn begin_stop(&self) -> Option<TaskHandle> {
        let mut teardown = lock(&self.cell.teardown);
        let mut previous = ActorLifecycle::New;
        self.cell.lifecycle.send_if_modified(|state| {
            previous = *state;
            match *state {
                ActorLifecycle::Started | ActorLifecycle::Running => {
                    *state = ActorLifecycle::Stopping;
                    true
                }
                _ => false,
            }
        });
        match previous {
            ActorLifecycle::New | ActorLifecycle::Stopped => None,
            ActorLifecycle::Stopping => teardown.as_ref().cloned(),
            ActorLifecycle::Started | ActorLifecycle::Running => {
                debug!("Stopping actor {}.", self.path());
                let task = runner::spawn_teardown(self.clone());
                *teardown = Some(task.clone());
                Some(task)
            }
        }
    }

    /// Body of the teardown task.
    pub(crate) async fn teardown(&self) {
        let path = self.path();
        let ctx = self.context();
        let actor = self.behaviour();
        actor.pre_stop(&ctx).await;

        if let Some(task) = self.main_task() {
            let outcome = task.cancel_and_wait().await;
            debug!("Main loop of actor {} ended: {:?}.", path, outcome);
        }
        self.stop_children().await;
        actor.post_stop(&ctx).await;
    }

    /// Last step of the teardown, run even if a hook panicked.
    pub(crate) fn finish_stop(&self) {
        let mut teardown = lock(&self.cell.teardown);
        *lock(&self.cell.main_task) = None;
        self.cell.lifecycle.send_replace(ActorLifecycle::Stopped);
        *teardown = None;
        debug!("Actor {} is stopped.", self.path());
    }

    async fn stop_children(&self) {
        let entries: Vec<(ActorRef, TaskHandle)> = lock(&self.cell.children)
            .values()
            .rev()
            .map(|entry| (entry.child.clone(), entry.supervisor.clone()))
            .collect();
        for (child, _) in &entries {
            debug!("Actor {} stops child {}.", self.path(), child.path());
            child.stop().await;
        }
        for (child, supervisor) in &entries {
            debug!("Waiting supervisor of child {}.", child.path());
            supervisor.wait().await;
        }
    }

    /// Starts `child` and places it under the supervision of this actor.
    ///
    /// When this returns `Ok`, the child is running, listed in [`children`](Self::children) and
    /// its [`parent`](Self::parent) is this actor. A supervisor task waits for the main loop of
    /// the child; when it finishes the child is stopped, removed from the children, and
    /// [`Actor::handle_child_stopped`] is called on this actor.
    ///
    /// # Errors
    ///
    /// * [`Error::NotRunning`] if this actor is not running.
    /// * [`Error::AlreadyRegistered`] if `child` already has a parent or is this actor.
    /// * Any error of [`start`](Self::start) on the child, e.g. [`Error::AlreadyStarted`].
    pub async fn register_child(&self, child: &ActorRef) -> Result<(), Error> {
        if self.state() != ActorLifecycle::Running {
            warn!("Actor {} can not register children, it is not running.", self.path());
            return Err(Error::NotRunning(self.path()));
        }
        if self == child {
            return Err(Error::AlreadyRegistered(child.path()));
        }
        child.claim_parent(self)?;
        child.set_path(self.path() / child.name());

        if let Err(error) = child.start().await {
            child.release_parent();
            return Err(error);
        }
        let Some(main_task) = child.main_task() else {
            child.release_parent();
            return Err(Error::Start(format!("{} has no main loop", child.path())));
        };

        {
            let mut children = lock(&self.cell.children);
            if self.state() == ActorLifecycle::Running {
                let supervisor =
                    runner::spawn_supervisor(self.downgrade(), child.clone(), main_task);
                children.insert(
                    child.cell.id,
                    ChildEntry {
                        child: child.clone(),
                        supervisor,
                    },
                );
                debug!("Actor {} registered child {}.", self.path(), child.path());
                return Ok(());
            }
        }

        warn!(
            "Actor {} stopped while registering {}, stopping it.",
            self.path(),
            child.path()
        );
        child.stop().await;
        child.release_parent();
        Err(Error::NotRunning(self.path()))
    }

    fn claim_parent(&self, parent: &ActorRef) -> Result<(), Error> {
        let mut current = lock(&self.cell.parent);
        if current.as_ref().is_some_and(|parent| parent.strong_count() > 0) {
            warn!("Actor {} already has a parent.", self.path());
            return Err(Error::AlreadyRegistered(self.path()));
        }
        *current = Some(parent.downgrade());
        Ok(())
    }

    fn release_parent(&self) {
        *lock(&self.cell.parent) = None;
        self.set_path(ActorPath::from(self.name()));
    }

    /// Removes `child` from the children. Returns `false` if it was not there.
    ///
    /// The child keeps its path until it is started again.
    pub(crate) fn remove_child(&self, child: &ActorRef) -> bool {
        let removed = lock(&self.cell.children).remove(&child.cell.id).is_some();
        if removed {
            debug!("Actor {} removed child {}.", self.path(), child.path());
            *lock(&child.cell.parent) = None;
        }
        removed
    }

    /// Runs `body` between a start and a stop of this actor.
    ///
    /// The actor is stopped on every exit path: when `body` returns (whatever it returns), when
    /// it panics (the panic is resumed after the stop), and when the future of `scoped` is
    /// dropped, in which case the stop is spawned onto the runtime.
    ///
    /// # Errors
    ///
    /// Fails like [`start`](Self::start), without running `body`.
    pub async fn scoped<F, Fut, T>(&self, body: F) -> Result<T, Error>
    where
        F: FnOnce(ActorRef) -> Fut,
        Fut: Future<Output = T>,
    {
        self.start().await?;
        let guard = StopGuard::new(self.clone());
        let result = AssertUnwindSafe(body(self.clone())).catch_unwind().await;
        self.stop().await;
        guard.disarm();
        match result {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for ActorRef {}

impl Debug for ActorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef")
            .field("path", &self.path())
            .field("state", &self.state())
            .finish()
    }
}
