// Integration tests for actor lifecycles and supervision trees

use actor::{
    Actor, ActorContext, ActorLifecycle, ActorPath, ActorRef, Error,
    FixedIntervalStrategy, NoIntervalStrategy, Restarter, SupervisionStrategy, TaskHandle,
    TaskOutcome,
};
use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use tracing_test::traced_test;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

// Runs until stopped. Counts the stops it went through.
#[derive(Default)]
struct Worker {
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl Actor for Worker {
    async fn main_loop(&self, ctx: &ActorContext) -> Result<(), Error> {
        tracing::info!("Worker {} is working.", ctx.path());
        futures::future::pending::<()>().await;
        Ok(())
    }

    async fn pre_stop(&self, _ctx: &ActorContext) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// Main loop returns on its own after `delay`.
struct Finite {
    delay: Duration,
}

#[async_trait]
impl Actor for Finite {
    async fn main_loop(&self, _ctx: &ActorContext) -> Result<(), Error> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

// Main loop fails after a short while.
struct Crashing;

#[async_trait]
impl Actor for Crashing {
    async fn main_loop(&self, _ctx: &ActorContext) -> Result<(), Error> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Err(Error::Functional("crash".to_owned()))
    }
}

// Fails before running.
struct Misconfigured;

#[async_trait]
impl Actor for Misconfigured {
    async fn main_loop(&self, _ctx: &ActorContext) -> Result<(), Error> {
        Ok(())
    }

    async fn pre_start(&self, _ctx: &ActorContext) -> Result<(), Error> {
        Err(Error::Functional("missing setting".to_owned()))
    }
}

// What a parent saw in handle_child_stopped.
#[derive(Debug)]
struct ChildStopped {
    name: String,
    outcome: Option<TaskOutcome>,
    still_listed: bool,
    restart: Option<Result<bool, Error>>,
}

struct Parent {
    events: UnboundedSender<ChildStopped>,
    restarter: Option<Arc<Restarter>>,
}

impl Parent {
    fn new(restarter: Option<Arc<Restarter>>) -> (Self, UnboundedReceiver<ChildStopped>) {
        let (events, receiver) = unbounded_channel();
        (Self { events, restarter }, receiver)
    }
}

#[async_trait]
impl Actor for Parent {
    async fn main_loop(&self, _ctx: &ActorContext) -> Result<(), Error> {
        futures::future::pending::<()>().await;
        Ok(())
    }

    async fn handle_child_stopped(
        &self,
        ctx: &ActorContext,
        child: ActorRef,
        task: TaskHandle,
    ) {
        let still_listed = ctx.children().contains(&child);
        let restart = match &self.restarter {
            Some(restarter) => Some(restarter.on_child_stopped(ctx, &child, &task).await),
            None => None,
        };
        let _ = self.events.send(ChildStopped {
            name: child.name().to_owned(),
            outcome: task.outcome(),
            still_listed,
            restart,
        });
    }
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
}

async fn next_event(receiver: &mut UnboundedReceiver<ChildStopped>) -> ChildStopped {
    tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
#[traced_test]
async fn test_scope_exit_leaves_actor_not_running() {
    let actor = ActorRef::new("worker", Worker::default());

    let inside = actor
        .scoped(|worker| async move { (worker.is_started(), worker.is_running()) })
        .await
        .unwrap();

    assert_eq!(inside, (true, true));
    assert!(!actor.is_running());
    assert!(!actor.is_started());
    assert_eq!(actor.state(), ActorLifecycle::Stopped);
    assert!(actor.main_task().is_none());
    assert!(logs_contain("Worker /worker is working."));
}

#[tokio::test]
#[traced_test]
async fn test_register_child_starts_it() {
    let (behaviour, _events) = Parent::new(None);
    let parent = ActorRef::new("pool", behaviour);
    let child = ActorRef::new("worker", Worker::default());

    parent
        .scoped(|parent| {
            let child = child.clone();
            async move {
                parent.register_child(&child).await.unwrap();

                assert!(child.is_started());
                assert!(child.is_running());
                assert!(parent.children().contains(&child));
                assert!(parent.has_child(&child));
                assert_eq!(child.parent(), Some(parent.clone()));
                assert_eq!(child.path(), ActorPath::from("/pool/worker"));
            }
        })
        .await
        .unwrap();

    assert!(!child.is_running());
    assert_eq!(child.state(), ActorLifecycle::Stopped);
    assert!(parent.children().is_empty());
}

#[tokio::test]
async fn test_scope_exit_stops_every_child_once() {
    let (behaviour, mut events) = Parent::new(None);
    let parent = ActorRef::new("pool", behaviour);
    let stops = Arc::new(AtomicUsize::new(0));
    let children: Vec<ActorRef> = (0..3)
        .map(|index| {
            ActorRef::new(
                &format!("worker-{index}"),
                Worker {
                    stops: stops.clone(),
                },
            )
        })
        .collect();

    parent
        .scoped(|parent| {
            let children = children.clone();
            async move {
                for child in &children {
                    parent.register_child(child).await.unwrap();
                }
                assert_eq!(parent.children(), children);
            }
        })
        .await
        .unwrap();

    assert!(children.iter().all(|child| !child.is_running()));
    assert_eq!(stops.load(Ordering::SeqCst), 3);

    let mut names = Vec::new();
    for _ in 0..3 {
        let event = next_event(&mut events).await;
        assert_eq!(event.outcome, Some(TaskOutcome::Cancelled));
        assert!(!event.still_listed);
        names.push(event.name);
    }
    names.sort();
    assert_eq!(names, vec!["worker-0", "worker-1", "worker-2"]);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_child_stopped_first_is_not_stopped_again() {
    let (behaviour, mut events) = Parent::new(None);
    let parent = ActorRef::new("pool", behaviour);
    let stops = Arc::new(AtomicUsize::new(0));
    let child = ActorRef::new(
        "worker",
        Worker {
            stops: stops.clone(),
        },
    );

    parent.start().await.unwrap();
    parent.register_child(&child).await.unwrap();
    child.stop().await;

    let event = next_event(&mut events).await;
    assert_eq!(event.name, "worker");
    assert_eq!(event.outcome, Some(TaskOutcome::Cancelled));
    eventually(|| !parent.has_child(&child)).await;
    assert!(child.parent().is_none());

    parent.stop().await;
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_hook_fires_once_for_natural_return() {
    let (behaviour, mut events) = Parent::new(None);
    let parent = ActorRef::new("pool", behaviour);
    let child = ActorRef::new(
        "short",
        Finite {
            delay: Duration::from_millis(5),
        },
    );

    parent.start().await.unwrap();
    parent.register_child(&child).await.unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event.name, "short");
    assert_eq!(event.outcome, Some(TaskOutcome::Completed));
    assert!(!event.still_listed);
    assert!(!parent.has_child(&child));
    assert_eq!(child.state(), ActorLifecycle::Stopped);

    parent.stop().await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_child_failure_reaches_parent_hook() {
    let (behaviour, mut events) = Parent::new(None);
    let parent = ActorRef::new("pool", behaviour);
    let child = ActorRef::new("crashing", Crashing);

    parent.start().await.unwrap();
    parent.register_child(&child).await.unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(
        event.outcome,
        Some(TaskOutcome::Failed(Error::Functional("crash".to_owned())))
    );
    assert!(parent.is_running());
    parent.stop().await;
}

#[tokio::test]
async fn test_registration_errors() {
    let (behaviour, _events) = Parent::new(None);
    let parent = ActorRef::new("pool", behaviour);
    let (other_behaviour, _other_events) = Parent::new(None);
    let other = ActorRef::new("other", other_behaviour);
    let child = ActorRef::new("worker", Worker::default());

    assert_eq!(
        parent.register_child(&child).await,
        Err(Error::NotRunning(ActorPath::from("/pool")))
    );
    assert_eq!(child.state(), ActorLifecycle::New);

    parent.start().await.unwrap();
    other.start().await.unwrap();
    parent.register_child(&child).await.unwrap();

    assert_eq!(
        other.register_child(&child).await,
        Err(Error::AlreadyRegistered(ActorPath::from("/pool/worker")))
    );
    assert_eq!(
        parent.register_child(&child).await,
        Err(Error::AlreadyRegistered(ActorPath::from("/pool/worker")))
    );
    assert!(matches!(
        parent.register_child(&parent).await,
        Err(Error::AlreadyRegistered(_))
    ));
    assert!(other.children().is_empty());
    assert_eq!(child.parent(), Some(parent.clone()));

    let loner = ActorRef::new("loner", Worker::default());
    loner.start().await.unwrap();
    assert!(matches!(
        parent.register_child(&loner).await,
        Err(Error::AlreadyStarted(_))
    ));
    assert!(loner.parent().is_none());
    assert_eq!(loner.path(), ActorPath::from("/loner"));

    parent.stop().await;
    other.stop().await;
    loner.stop().await;
}

#[tokio::test]
async fn test_start_twice_fails() {
    let actor = ActorRef::new("worker", Worker::default());
    actor.start().await.unwrap();
    assert_eq!(
        actor.start().await,
        Err(Error::AlreadyStarted(ActorPath::from("/worker")))
    );
    assert!(actor.is_running());
    actor.stop().await;
}

#[tokio::test]
async fn test_restart_after_stop() {
    let stops = Arc::new(AtomicUsize::new(0));
    let actor = ActorRef::new(
        "worker",
        Worker {
            stops: stops.clone(),
        },
    );

    actor.start().await.unwrap();
    let first = actor.main_task().unwrap();
    actor.stop().await;
    actor.stop().await;
    assert!(first.is_cancelled());

    actor.start().await.unwrap();
    let second = actor.main_task().unwrap();
    assert_ne!(first, second);
    assert!(actor.is_running());

    actor.stop().await;
    assert_eq!(stops.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_scope_stops_on_error_value() {
    let actor = ActorRef::new("worker", Worker::default());

    let result = actor
        .scoped(|_| async { Err::<(), Error>(Error::Functional("bad input".to_owned())) })
        .await;

    assert_eq!(result, Ok(Err(Error::Functional("bad input".to_owned()))));
    assert_eq!(actor.state(), ActorLifecycle::Stopped);
}

#[tokio::test]
async fn test_scope_stops_on_panic() {
    let actor = ActorRef::new("worker", Worker::default());
    let scoped = actor.clone();

    let joined = tokio::spawn(async move {
        scoped
            .scoped(|_| async {
                let port: Option<u16> = None;
                port.expect("no port configured");
            })
            .await
    })
    .await;

    assert!(joined.unwrap_err().is_panic());
    assert_eq!(actor.state(), ActorLifecycle::Stopped);
}

#[tokio::test]
async fn test_scope_stops_when_cancelled() {
    let actor = ActorRef::new("worker", Worker::default());
    let scoped = actor.clone();

    let scope = tokio::spawn(async move {
        scoped
            .scoped(|_| futures::future::pending::<()>())
            .await
    });
    eventually(|| actor.is_running()).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    scope.abort();
    assert!(scope.await.unwrap_err().is_cancelled());
    eventually(|| actor.state() == ActorLifecycle::Stopped).await;
}

#[tokio::test]
async fn test_stop_cascades_to_grandchildren() {
    let root = ActorRef::new("root", Worker::default());
    let child = ActorRef::new("child", Worker::default());
    let grandchild = ActorRef::new("grandchild", Worker::default());

    root.start().await.unwrap();
    root.register_child(&child).await.unwrap();
    child.register_child(&grandchild).await.unwrap();
    assert_eq!(grandchild.path(), ActorPath::from("/root/child/grandchild"));
    assert!(grandchild.path().is_descendant_of(&root.path()));

    root.stop().await;
    assert!(!child.is_running());
    assert!(!grandchild.is_running());
    assert_eq!(grandchild.state(), ActorLifecycle::Stopped);
    assert!(child.children().is_empty());
}

#[tokio::test]
async fn test_pre_start_failure() {
    let actor = ActorRef::new("misconfigured", Misconfigured);
    assert_eq!(
        actor.start().await,
        Err(Error::Start("Error: missing setting".to_owned()))
    );
    assert_eq!(actor.state(), ActorLifecycle::Stopped);
    assert!(actor.main_task().is_none());

    let (behaviour, _events) = Parent::new(None);
    let parent = ActorRef::new("pool", behaviour);
    let child = ActorRef::new("misconfigured", Misconfigured);
    parent.start().await.unwrap();
    assert!(matches!(
        parent.register_child(&child).await,
        Err(Error::Start(_))
    ));
    assert!(!parent.has_child(&child));
    assert!(child.parent().is_none());
    parent.stop().await;
}

#[tokio::test]
async fn test_stop_requested_from_main_loop() {
    struct Quitter;

    #[async_trait]
    impl Actor for Quitter {
        async fn main_loop(&self, ctx: &ActorContext) -> Result<(), Error> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctx.stop();
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    let actor = ActorRef::new("quitter", Quitter);
    actor.start().await.unwrap();
    let task = actor.main_task().unwrap();

    eventually(|| actor.state() == ActorLifecycle::Stopped).await;
    assert!(task.is_cancelled());
}

// Takes a while to stop.
struct SlowStop {
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl Actor for SlowStop {
    async fn main_loop(&self, _ctx: &ActorContext) -> Result<(), Error> {
        futures::future::pending::<()>().await;
        Ok(())
    }

    async fn pre_stop(&self, _ctx: &ActorContext) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[tokio::test]
#[traced_test]
async fn test_abandoned_stop_still_completes() {
    let stops = Arc::new(AtomicUsize::new(0));
    let actor = ActorRef::new(
        "slow",
        SlowStop {
            stops: stops.clone(),
        },
    );
    actor.start().await.unwrap();

    assert!(
        tokio::time::timeout(Duration::from_millis(10), actor.stop())
            .await
            .is_err()
    );
    assert_eq!(actor.state(), ActorLifecycle::Stopping);
    tracing::info!("First stop of {} given up.", actor.path());

    tokio::time::timeout(Duration::from_secs(2), actor.stop())
        .await
        .unwrap();
    assert_eq!(actor.state(), ActorLifecycle::Stopped);
    assert!(actor.main_task().is_none());
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert!(logs_contain("First stop of /slow given up."));

    actor.start().await.unwrap();
    actor.stop().await;
    assert_eq!(stops.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_child_stops_its_parent() {
    struct Mutineer;

    #[async_trait]
    impl Actor for Mutineer {
        async fn main_loop(&self, ctx: &ActorContext) -> Result<(), Error> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if let Some(parent) = ctx.parent() {
                parent.stop().await;
            }
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    let (behaviour, mut events) = Parent::new(None);
    let parent = ActorRef::new("captain", behaviour);
    let child = ActorRef::new("mutineer", Mutineer);
    parent.start().await.unwrap();
    parent.register_child(&child).await.unwrap();

    eventually(|| parent.state() == ActorLifecycle::Stopped).await;
    assert!(parent.main_task().is_none());
    assert_eq!(child.state(), ActorLifecycle::Stopped);
    assert!(parent.children().is_empty());

    let event = next_event(&mut events).await;
    assert_eq!(event.name, "mutineer");
    assert_eq!(event.outcome, Some(TaskOutcome::Cancelled));
}

#[tokio::test]
async fn test_stop_during_pre_start_fails_start() {
    struct SlowStart;

    #[async_trait]
    impl Actor for SlowStart {
        async fn main_loop(&self, _ctx: &ActorContext) -> Result<(), Error> {
            futures::future::pending::<()>().await;
            Ok(())
        }

        async fn pre_start(&self, _ctx: &ActorContext) -> Result<(), Error> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }
    }

    let actor = ActorRef::new("slow-start", SlowStart);
    let starting = tokio::spawn({
        let actor = actor.clone();
        async move { actor.start().await }
    });

    eventually(|| actor.state() == ActorLifecycle::Started).await;
    actor.stop().await;

    let started = starting.await.unwrap();
    assert!(matches!(started, Err(Error::Start(_))));
    assert_eq!(actor.state(), ActorLifecycle::Stopped);
    assert!(actor.main_task().is_none());
}

#[tokio::test]
async fn test_restarter_retries_failed_child() {
    let restarter = Arc::new(Restarter::new(SupervisionStrategy::Retry(Box::new(
        NoIntervalStrategy::new(2),
    ))));
    let (behaviour, mut events) = Parent::new(Some(restarter.clone()));
    let parent = ActorRef::new("pool", behaviour);
    let child = ActorRef::new("crashing", Crashing);

    parent.start().await.unwrap();
    parent.register_child(&child).await.unwrap();

    assert_eq!(next_event(&mut events).await.restart, Some(Ok(true)));
    assert_eq!(next_event(&mut events).await.restart, Some(Ok(true)));
    let last = next_event(&mut events).await;
    assert_eq!(
        last.restart,
        Some(Err(Error::Functional("crash".to_owned())))
    );
    assert_eq!(restarter.retries(), 2);
    assert!(!parent.has_child(&child));
    assert_eq!(child.state(), ActorLifecycle::Stopped);

    parent.stop().await;
}

#[tokio::test]
async fn test_restarter_ignores_completed_child() {
    let restarter = Arc::new(Restarter::new(SupervisionStrategy::Retry(Box::new(
        NoIntervalStrategy::new(5),
    ))));
    let (behaviour, mut events) = Parent::new(Some(restarter.clone()));
    let parent = ActorRef::new("pool", behaviour);
    let child = ActorRef::new(
        "short",
        Finite {
            delay: Duration::from_millis(1),
        },
    );

    parent.start().await.unwrap();
    parent.register_child(&child).await.unwrap();

    assert_eq!(next_event(&mut events).await.restart, Some(Ok(false)));
    assert_eq!(restarter.retries(), 0);
    parent.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restarter_limit_shared_by_children() {
    let restarter = Arc::new(Restarter::new(SupervisionStrategy::Retry(Box::new(
        FixedIntervalStrategy::new(1, Duration::from_millis(20)),
    ))));
    let (behaviour, mut events) = Parent::new(Some(restarter.clone()));
    let parent = ActorRef::new("pool", behaviour);
    let first = ActorRef::new("first", Crashing);
    let second = ActorRef::new("second", Crashing);

    parent.start().await.unwrap();
    parent.register_child(&first).await.unwrap();
    parent.register_child(&second).await.unwrap();

    let mut restarted = 0;
    let mut given_up = 0;
    for _ in 0..3 {
        match next_event(&mut events).await.restart {
            Some(Ok(true)) => restarted += 1,
            Some(Err(Error::Functional(reason))) if reason == "crash" => given_up += 1,
            other => panic!("unexpected restart result: {:?}", other),
        }
    }
    assert_eq!(restarted, 1);
    assert_eq!(given_up, 2);
    assert_eq!(restarter.retries(), 1);
    assert!(parent.children().is_empty());

    parent.stop().await;
}
