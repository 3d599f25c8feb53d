//! Background job scheduler.
//!
//! Initialises a [`JobScheduler`] at server startup and registers the
//! recurring maintenance and batch-lifecycle jobs. Every job body is a
//! plain async function over the shared context, so tests drive the
//! bodies directly and never need the cron layer.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::batch;
use crate::context::ServiceContext;

/// Tasks stuck in `running` longer than this are returned to the queue.
const STUCK_THRESHOLD_MINUTES: i32 = 30;

/// Submitted ai_analysis tasks older than this are past the provider's
/// 24 h window plus slack, and get requeued.
const STALE_BATCH_HOURS: i32 = 26;

/// How many blogs one embedding backfill pass repairs.
const EMBEDDING_BACKFILL_LIMIT: i64 = 50;

/// Blogs re-enter the scrape queue after this many days.
const UPDATE_FRESHNESS_DAYS: i32 = 60;

/// How many refresh scrapes one daily pass schedules.
const UPDATE_BATCH_LIMIT: i64 = 100;

/// Priority of scheduled refresh scrapes.
const UPDATE_PRIORITY: i16 = 8;

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process — dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(ctx: Arc<ServiceContext>) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register(&scheduler, "0 */15 * * * *", "poll_batches", &ctx, |ctx| async move {
        run_poll_batches(&ctx).await;
    })
    .await?;
    register(&scheduler, "0 */10 * * * *", "recover_tasks", &ctx, |ctx| async move {
        run_recover_tasks(&ctx).await;
    })
    .await?;
    register(&scheduler, "0 0 */2 * * *", "retry_stale_batches", &ctx, |ctx| async move {
        run_retry_stale_batches(&ctx).await;
    })
    .await?;
    register(&scheduler, "0 0 * * * *", "retry_missing_embeddings", &ctx, |ctx| async move {
        run_retry_missing_embeddings(&ctx).await;
    })
    .await?;
    register(&scheduler, "0 0 3 * * *", "schedule_updates", &ctx, |ctx| async move {
        run_schedule_updates(&ctx).await;
    })
    .await?;
    register(&scheduler, "0 0 4 * * SUN", "cleanup", &ctx, |ctx| async move {
        run_cleanup(&ctx).await;
    })
    .await?;

    scheduler.start().await?;
    Ok(scheduler)
}

async fn register<F, Fut>(
    scheduler: &JobScheduler,
    cron: &str,
    name: &'static str,
    ctx: &Arc<ServiceContext>,
    body: F,
) -> Result<(), JobSchedulerError>
where
    F: Fn(Arc<ServiceContext>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let ctx = Arc::clone(ctx);
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let ctx = Arc::clone(&ctx);
        let body = body(ctx);
        Box::pin(async move {
            tracing::info!(job = name, "scheduler: job starting");
            body.await;
            tracing::info!(job = name, "scheduler: job complete");
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(job = name, cron, "scheduler: registered job");
    Ok(())
}

// ---------------------------------------------------------------------------
// Job bodies
// ---------------------------------------------------------------------------

/// Poll and reconcile all in-flight ai batches (and run the age-based
/// submission trigger).
pub async fn run_poll_batches(ctx: &ServiceContext) {
    batch::poll_batches(ctx).await;
}

/// Return tasks stuck in `running` to `pending`.
pub async fn run_recover_tasks(ctx: &ServiceContext) {
    match bloglens_db::recover_stuck_tasks(&ctx.pool, STUCK_THRESHOLD_MINUTES).await {
        Ok(0) => {}
        Ok(recovered) => tracing::warn!(recovered, "recovered stuck tasks"),
        Err(e) => tracing::error!(error = %e, "stuck-task recovery failed"),
    }
}

/// Requeue ai_analysis tasks whose batch blew the provider deadline.
pub async fn run_retry_stale_batches(ctx: &ServiceContext) {
    match bloglens_db::fail_stale_ai_tasks(&ctx.pool, STALE_BATCH_HOURS).await {
        Ok(0) => {}
        Ok(requeued) => tracing::warn!(requeued, "requeued stale ai batch tasks"),
        Err(e) => tracing::error!(error = %e, "stale-batch sweep failed"),
    }
}

/// Rebuild embeddings for analysed blogs that have none. Each blog is
/// isolated: one failure never stops the pass.
pub async fn run_retry_missing_embeddings(ctx: &ServiceContext) {
    let blogs = match bloglens_db::blogs_missing_embedding(&ctx.pool, EMBEDDING_BACKFILL_LIMIT)
        .await
    {
        Ok(blogs) => blogs,
        Err(e) => {
            tracing::error!(error = %e, "embedding backfill selection failed");
            return;
        }
    };
    if blogs.is_empty() {
        return;
    }

    tracing::info!(count = blogs.len(), "backfilling missing embeddings");
    for blog in blogs {
        let Some(raw) = blog.ai_insights else { continue };
        let insights: bloglens_ai::AiInsights = match serde_json::from_value(raw) {
            Ok(insights) => insights,
            Err(e) => {
                tracing::warn!(blog_id = blog.id, error = %e, "stored insights do not parse");
                continue;
            }
        };

        let text = bloglens_ai::render_insights_text(&insights);
        let Some(vector) = ctx.embedding.embed_or_none(blog.id, &text).await else {
            continue;
        };
        if let Err(e) = bloglens_db::set_blog_embedding(&ctx.pool, blog.id, &vector).await {
            tracing::error!(blog_id = blog.id, error = %e, "embedding write failed");
        }
    }
}

/// Queue refresh scrapes for the biggest active blogs past the freshness
/// window.
pub async fn run_schedule_updates(ctx: &ServiceContext) {
    let due = match bloglens_db::blogs_due_for_update(
        &ctx.pool,
        UPDATE_FRESHNESS_DAYS,
        UPDATE_BATCH_LIMIT,
    )
    .await
    {
        Ok(due) => due,
        Err(e) => {
            tracing::error!(error = %e, "update selection failed");
            return;
        }
    };
    if due.is_empty() {
        return;
    }

    let mut queued = 0_usize;
    for blog in &due {
        match bloglens_db::create_task_if_absent(
            &ctx.pool,
            Some(blog.id),
            bloglens_db::TaskType::FullScrape,
            UPDATE_PRIORITY,
            serde_json::json!({}),
        )
        .await
        {
            Ok(Some(_)) => queued += 1,
            Ok(None) => {}
            Err(e) => tracing::error!(blog_id = blog.id, error = %e, "update task creation failed"),
        }
    }
    tracing::info!(candidates = due.len(), queued, "scheduled profile updates");
}

/// Delete storage folders whose blog no longer exists.
pub async fn run_cleanup(ctx: &ServiceContext) {
    let known: HashSet<String> = match bloglens_db::list_blog_ids(&ctx.pool).await {
        Ok(ids) => ids.into_iter().map(|id| id.to_string()).collect(),
        Err(e) => {
            tracing::error!(error = %e, "cleanup: could not list blogs");
            return;
        }
    };

    let folders = match ctx.storage.list_folders().await {
        Ok(folders) => folders,
        Err(e) => {
            tracing::error!(error = %e, "cleanup: could not list storage folders");
            return;
        }
    };

    let mut deleted = 0_usize;
    for folder in folders.into_iter().filter(|f| !known.contains(f)) {
        let objects = match ctx.storage.list_objects(&folder).await {
            Ok(objects) => objects,
            Err(e) => {
                tracing::warn!(%folder, error = %e, "cleanup: folder listing failed");
                continue;
            }
        };
        let paths: Vec<String> = objects.into_iter().map(|o| format!("{folder}/{o}")).collect();
        match ctx.storage.delete_objects(&paths).await {
            Ok(()) => {
                deleted += paths.len();
                tracing::info!(%folder, objects = paths.len(), "cleanup: orphan folder removed");
            }
            Err(e) => tracing::warn!(%folder, error = %e, "cleanup: delete failed"),
        }
    }

    if deleted > 0 {
        tracing::info!(deleted, "cleanup complete");
    }
}
