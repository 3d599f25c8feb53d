//! Per-type task handlers. Handlers translate typed scrape errors into
//! queue transitions; anything unexpected fails the task with retry.

mod ai_analysis;
mod discover;
mod full_scrape;

use std::sync::Arc;

use bloglens_db::TaskRow;
use tokio_util::sync::CancellationToken;

use crate::context::ServiceContext;

/// Route one claimed task to its handler.
///
/// Every path out of a handler leaves the task in a consistent state; a
/// handler error that was not translated into a transition fails the task
/// with retry (internal errors count as transient).
pub async fn dispatch(ctx: Arc<ServiceContext>, task: TaskRow, cancel: CancellationToken) {
    let task_id = task.id;
    let result = match task.task_type() {
        Some(bloglens_db::TaskType::FullScrape) => {
            full_scrape::run(&ctx, &task, &cancel).await
        }
        Some(bloglens_db::TaskType::AiAnalysis) => ai_analysis::run(&ctx, &task).await,
        Some(bloglens_db::TaskType::Discover) => discover::run(&ctx, &task, &cancel).await,
        None => {
            tracing::error!(task_id, task_type = %task.task_type, "unknown task type");
            fail(&ctx, task_id, "unknown task type", false).await;
            return;
        }
    };

    if let Err(e) = result {
        tracing::error!(task_id, error = %e, "task handler failed unexpectedly");
        fail(&ctx, task_id, &e.to_string(), true).await;
    }
}

/// Fail a task, logging (not propagating) transition errors; the task may
/// already have been moved by a maintenance sweep.
async fn fail(ctx: &ServiceContext, task_id: i64, error: &str, retry: bool) {
    if let Err(e) = bloglens_db::mark_task_failed(&ctx.pool, task_id, error, retry).await {
        tracing::error!(task_id, error = %e, "could not mark task failed");
    }
}
