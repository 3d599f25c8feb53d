//! The discover handler: surface new blogs from a hashtag.

use bloglens_db::{TaskRow, TaskType};
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::context::ServiceContext;

/// Priority for discovered-profile scrapes.
const DISCOVERED_SCRAPE_PRIORITY: i16 = 5;

/// Blogs scraped within this window are not re-queued.
const FRESHNESS_DAYS: i64 = 60;

pub async fn run(
    ctx: &ServiceContext,
    task: &TaskRow,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let Some(hashtag) = task.hashtag().map(str::to_owned) else {
        bloglens_db::mark_task_failed(&ctx.pool, task.id, "discover task without hashtag", false)
            .await?;
        return Ok(());
    };
    let min_followers = task.min_followers().unwrap_or(1000);

    let candidates = match ctx.scraper.discover(&hashtag, min_followers).await {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::warn!(task_id = task.id, %hashtag, error = %e, "discovery failed");
            bloglens_db::mark_task_failed(&ctx.pool, task.id, &e.to_string(), e.is_retriable())
                .await?;
            return Ok(());
        }
    };

    let freshness_cutoff = Utc::now() - Duration::days(FRESHNESS_DAYS);
    let mut queued = 0_usize;
    let mut skipped_fresh = 0_usize;

    for candidate in candidates {
        if cancel.is_cancelled() {
            // Shutdown mid-task: leave it running for the stuck-task sweep.
            return Ok(());
        }

        let existing = bloglens_db::get_blog_by_username(&ctx.pool, &candidate.username).await?;
        let blog_id = match existing {
            Some(blog) => {
                if blog.scraped_at.is_some_and(|at| at > freshness_cutoff) {
                    skipped_fresh += 1;
                    continue;
                }
                blog.id
            }
            None => {
                let (_, blog_id) = bloglens_db::create_person_with_blog(
                    &ctx.pool,
                    candidate.full_name.as_deref(),
                    &candidate.username,
                    Some(&candidate.platform_id),
                )
                .await?;
                blog_id
            }
        };

        if bloglens_db::create_task_if_absent(
            &ctx.pool,
            Some(blog_id),
            TaskType::FullScrape,
            DISCOVERED_SCRAPE_PRIORITY,
            serde_json::json!({}),
        )
        .await?
        .is_some()
        {
            queued += 1;
        }
    }

    tracing::info!(
        task_id = task.id,
        %hashtag,
        queued,
        skipped_fresh,
        "discovery complete"
    );
    bloglens_db::mark_task_done(&ctx.pool, task.id).await?;
    Ok(())
}
