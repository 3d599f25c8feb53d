//! The polling worker: claims pending tasks and drives them to a terminal
//! state with bounded parallelism.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::ServiceContext;
use crate::handlers;

/// How long shutdown waits for in-flight tasks before abandoning them.
const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Run the claim/dispatch loop until `shutdown` fires.
///
/// Each tick claims up to `max_concurrent − in_flight` eligible tasks and
/// spawns one handler per task. The tick ends early when any in-flight task
/// completes, so freed slots refill without waiting out the poll interval.
/// Tasks abandoned at shutdown stay in `running` and are returned to the
/// queue by the stuck-task sweep.
pub async fn run_worker(ctx: Arc<ServiceContext>, shutdown: CancellationToken) {
    let poll_interval = Duration::from_secs(ctx.config.worker_poll_interval_secs);
    let max_concurrent = ctx.config.worker_max_concurrent;
    let mut in_flight: JoinSet<()> = JoinSet::new();

    tracing::info!(max_concurrent, ?poll_interval, "worker started");

    while !shutdown.is_cancelled() {
        let free_slots = max_concurrent.saturating_sub(in_flight.len());
        if free_slots > 0 {
            match bloglens_db::claim_task_batch(&ctx.pool, free_slots as i64).await {
                Ok(tasks) => {
                    for task in tasks {
                        tracing::info!(
                            task_id = task.id,
                            task_type = %task.task_type,
                            attempt = task.attempts,
                            "claimed task"
                        );
                        let ctx = Arc::clone(&ctx);
                        let cancel = shutdown.clone();
                        in_flight.spawn(async move {
                            handlers::dispatch(ctx, task, cancel).await;
                        });
                    }
                }
                Err(e) => tracing::error!(error = %e, "task claim failed"),
            }
        }

        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(poll_interval) => {},
            Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "task handler panicked");
                }
            }
        }
    }

    drain(&mut in_flight).await;
    tracing::info!("worker stopped");
}

/// Wait out in-flight tasks up to the grace period, then abandon the rest.
async fn drain(in_flight: &mut JoinSet<()>) {
    if in_flight.is_empty() {
        return;
    }

    tracing::info!(in_flight = in_flight.len(), "draining in-flight tasks");
    let deadline = tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_SECS));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => {
                tracing::warn!(
                    abandoned = in_flight.len(),
                    "grace period elapsed; abandoning tasks in running state"
                );
                in_flight.abort_all();
                break;
            }
            result = in_flight.join_next() => {
                match result {
                    None => break,
                    Some(Err(e)) => tracing::error!(error = %e, "task handler panicked"),
                    Some(Ok(())) => {}
                }
            }
        }
    }
}
