//! The ai_analysis handler.
//!
//! This handler never calls the AI provider. The claimed task stays in
//! `running` without a `batch_id`; it only nudges the accumulating batch
//! submitter, which picks the task up once the size or age trigger fires.
//! The poll job owns everything after submission.

use bloglens_db::TaskRow;

use crate::batch;
use crate::context::ServiceContext;

pub async fn run(ctx: &ServiceContext, task: &TaskRow) -> anyhow::Result<()> {
    tracing::info!(
        task_id = task.id,
        blog_id = task.blog_id,
        text_only = task.text_only(),
        "ai_analysis accumulating; task stays running until batch submission"
    );

    // A submission failure is not a task failure: the task keeps waiting
    // and the next trigger (another claim or the poll job) retries.
    if let Err(e) = batch::maybe_submit_batch(ctx).await {
        tracing::warn!(task_id = task.id, error = %e, "batch submission attempt failed");
    }

    Ok(())
}
