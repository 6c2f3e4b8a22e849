// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! A pool that supervises a flaky worker and a heartbeat.
//!
//! Run with `RUST_LOG=debug` to follow the lifecycle of every actor.

use actor::{
    Actor, ActorContext, ActorRef, Error, FixedIntervalStrategy, Restarter,
    SupervisionStrategy, TaskContainer, TaskHandle,
};
use async_trait::async_trait;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

struct Flaky {
    runs: AtomicUsize,
}

#[async_trait]
impl Actor for Flaky {
    async fn main_loop(&self, ctx: &ActorContext) -> Result<(), Error> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        info!("{} run {}", ctx.path(), run);
        tokio::time::sleep(Duration::from_millis(200)).await;
        Err(Error::Functional(format!("run {} lost its connection", run)))
    }
}

struct Heartbeat;

#[async_trait]
impl Actor for Heartbeat {
    async fn main_loop(&self, ctx: &ActorContext) -> Result<(), Error> {
        let beat = TaskContainer::new("beat", || async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(())
        });
        beat.scoped(|beat| async move {
            loop {
                if let Some(error) = beat.reschedule().wait().await.error() {
                    return Err::<(), Error>(error);
                }
                info!("{} beats", ctx.path());
            }
        })
        .await
    }
}

struct Pool {
    restarter: Restarter,
}

#[async_trait]
impl Actor for Pool {
    async fn main_loop(&self, ctx: &ActorContext) -> Result<(), Error> {
        ctx.register_child(&ActorRef::new("heartbeat", Heartbeat)).await?;
        ctx.register_child(&ActorRef::new(
            "flaky",
            Flaky {
                runs: AtomicUsize::new(0),
            },
        ))
        .await?;
        futures::future::pending::<()>().await;
        Ok(())
    }

    async fn handle_child_stopped(
        &self,
        ctx: &ActorContext,
        child: ActorRef,
        task: TaskHandle,
    ) {
        if let Err(error) = self.restarter.on_child_stopped(ctx, &child, &task).await {
            warn!("Giving up on {}: {}", child.path(), error);
        }
    }

    async fn post_stop(&self, ctx: &ActorContext) {
        info!("{} stopped after {} restarts", ctx.path(), self.restarter.retries());
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let pool = ActorRef::new(
        "pool",
        Pool {
            restarter: Restarter::new(SupervisionStrategy::Retry(Box::new(
                FixedIntervalStrategy::new(3, Duration::from_millis(100)),
            ))),
        },
    );

    pool.scoped(|pool| async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        info!("{} has {} children", pool.path(), pool.children().len());
    })
    .await
}
