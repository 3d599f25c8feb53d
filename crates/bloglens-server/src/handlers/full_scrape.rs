//! The full_scrape handler: fetch, derive, mirror images, persist, chain
//! the analysis task.

use bloglens_db::{BlogProfileUpdate, NewHighlight, NewPost, TaskRow, TaskType};
use bloglens_scraper::{derive_metrics, ScrapeError, ScrapedProfile};
use tokio_util::sync::CancellationToken;

use crate::context::ServiceContext;

/// Priority for the chained ai_analysis task.
const ANALYSIS_PRIORITY: i16 = 3;

pub async fn run(
    ctx: &ServiceContext,
    task: &TaskRow,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let Some(blog_id) = task.blog_id else {
        bloglens_db::mark_task_failed(&ctx.pool, task.id, "scrape task without blog_id", false)
            .await?;
        return Ok(());
    };

    let Some(blog) = bloglens_db::get_blog(&ctx.pool, blog_id).await? else {
        bloglens_db::mark_task_failed(&ctx.pool, task.id, "blog row missing", false).await?;
        return Ok(());
    };

    bloglens_db::set_scrape_status(&ctx.pool, blog_id, "scraping").await?;

    let profile = match ctx.scraper.scrape_profile(&blog.username).await {
        Ok(profile) => profile,
        Err(ScrapeError::PrivateAccount { .. }) => {
            tracing::info!(blog_id, username = %blog.username, "account is private");
            bloglens_db::set_scrape_status(&ctx.pool, blog_id, "private").await?;
            bloglens_db::mark_task_done(&ctx.pool, task.id).await?;
            return Ok(());
        }
        Err(ScrapeError::UserNotFound { .. }) => {
            tracing::info!(blog_id, username = %blog.username, "account no longer exists");
            bloglens_db::set_scrape_status(&ctx.pool, blog_id, "deleted").await?;
            bloglens_db::mark_task_done(&ctx.pool, task.id).await?;
            return Ok(());
        }
        Err(e) => {
            tracing::warn!(blog_id, username = %blog.username, error = %e, "scrape failed");
            bloglens_db::mark_task_failed(&ctx.pool, task.id, &e.to_string(), e.is_retriable())
                .await?;
            return Ok(());
        }
    };

    if cancel.is_cancelled() {
        // Shutdown mid-task: leave it running for the stuck-task sweep.
        return Ok(());
    }

    persist_profile(ctx, blog_id, profile).await?;

    let chained = bloglens_db::create_task_if_absent(
        &ctx.pool,
        Some(blog_id),
        TaskType::AiAnalysis,
        ANALYSIS_PRIORITY,
        serde_json::json!({}),
    )
    .await?;
    match chained {
        Some(analysis_task_id) => {
            tracing::info!(blog_id, analysis_task_id, "chained ai_analysis task");
        }
        None => tracing::info!(blog_id, "ai_analysis task already queued"),
    }

    bloglens_db::mark_task_done(&ctx.pool, task.id).await?;
    Ok(())
}

/// Mirror images, write the blog row with derived metrics, and upsert the
/// child tables.
async fn persist_profile(
    ctx: &ServiceContext,
    blog_id: i64,
    profile: ScrapedProfile,
) -> anyhow::Result<()> {
    let metrics = derive_metrics(&profile.posts, profile.followers);

    let thumbnail_sources: Vec<(String, String)> = profile
        .posts
        .iter()
        .filter_map(|p| {
            p.thumbnail_cdn_url
                .as_ref()
                .map(|url| (p.platform_id.clone(), url.clone()))
        })
        .collect();
    let images = ctx
        .storage
        .mirror_profile_images(blog_id, profile.avatar_cdn_url.as_deref(), &thumbnail_sources)
        .await;

    let update = BlogProfileUpdate {
        platform_id: Some(profile.platform_id),
        full_name: profile.full_name,
        biography: profile.biography,
        external_url: profile.external_url,
        followers: Some(profile.followers),
        following: Some(profile.following),
        media_count: Some(profile.media_count),
        is_verified: Some(profile.is_verified),
        is_business: Some(profile.is_business),
        avatar_url: images.avatar_url,
        er: metrics.er,
        er_reels: metrics.er_reels,
        er_trend: metrics.er_trend.map(str::to_owned),
        posts_per_week: metrics.posts_per_week,
        avg_reels_views: metrics.avg_reels_views,
    };
    bloglens_db::update_blog_profile(&ctx.pool, blog_id, &update).await?;

    let posts: Vec<NewPost> = profile
        .posts
        .into_iter()
        .map(|p| {
            let thumbnail_url = images.thumbnails.get(&p.platform_id).cloned();
            NewPost {
                platform_id: p.platform_id,
                caption: p.caption,
                media_type: p.media_type,
                like_count: Some(p.like_count),
                comment_count: Some(p.comment_count),
                play_count: p.play_count,
                thumbnail_url,
                taken_at: p.taken_at,
            }
        })
        .collect();
    bloglens_db::upsert_posts(&ctx.pool, blog_id, &posts).await?;

    let highlights: Vec<NewHighlight> = profile
        .highlights
        .into_iter()
        .map(|h| NewHighlight {
            platform_id: h.platform_id,
            title: h.title,
            media_count: h.media_count,
        })
        .collect();
    bloglens_db::replace_highlights(&ctx.pool, blog_id, &highlights).await?;

    tracing::info!(
        blog_id,
        posts = posts.len(),
        highlights = highlights.len(),
        "profile persisted"
    );
    Ok(())
}
