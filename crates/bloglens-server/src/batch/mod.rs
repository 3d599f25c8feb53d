//! The AI batch pipeline: accumulate → submit → poll → reconcile.
//!
//! Submission gathers running ai_analysis tasks that carry no `batch_id`
//! yet and ships them as one provider batch once the size or age trigger
//! fires. Polling groups submitted tasks by batch id, downloads completed
//! output, and hands each line to the reconciler.

pub mod reconcile;

use std::collections::HashMap;

use bloglens_ai::{
    build_batch_request, parse_output_line, CatalogCategory, PostSummary, ProfileContext,
    TaxonomyCatalog,
};
use bloglens_db::TaskRow;
use chrono::{Duration, Utc};

use crate::context::ServiceContext;

/// How many recent posts feed one analysis request.
const REQUEST_POST_LIMIT: i64 = 12;

/// Submit the accumulated ai_analysis tasks if a trigger fires.
///
/// Triggers: at least `batch_min_size` unattached running tasks, or the
/// oldest unattached task older than `batch_max_age_hours`. Serialised by
/// the context's submit lock, so the handler nudge and the poll job cannot
/// double-submit. Returns the new batch id when a batch went out.
///
/// # Errors
///
/// Returns an error when the database or the provider fails; the tasks
/// stay unattached and the next trigger retries.
pub async fn maybe_submit_batch(ctx: &ServiceContext) -> anyhow::Result<Option<String>> {
    let _guard = ctx.submit_lock.lock().await;

    let tasks = bloglens_db::list_unsubmitted_ai_tasks(&ctx.pool).await?;
    if tasks.is_empty() {
        return Ok(None);
    }

    let oldest_started = tasks.iter().filter_map(|t| t.started_at).min();
    let age_trigger = oldest_started.is_some_and(|at| {
        Utc::now() - at >= Duration::hours(ctx.config.batch_max_age_hours)
    });
    if tasks.len() < ctx.config.batch_min_size && !age_trigger {
        tracing::debug!(
            unattached = tasks.len(),
            min_size = ctx.config.batch_min_size,
            "batch below threshold; keep accumulating"
        );
        return Ok(None);
    }

    submit_batch(ctx, &tasks).await
}

async fn submit_batch(
    ctx: &ServiceContext,
    tasks: &[TaskRow],
) -> anyhow::Result<Option<String>> {
    let catalog = load_catalog(ctx).await?;

    let mut lines = Vec::with_capacity(tasks.len());
    let mut task_ids = Vec::with_capacity(tasks.len());

    for task in tasks {
        let Some(blog_id) = task.blog_id else {
            bloglens_db::mark_task_failed(
                &ctx.pool,
                task.id,
                "ai_analysis task without blog_id",
                false,
            )
            .await?;
            continue;
        };

        let Some(profile) = build_profile_context(ctx, blog_id).await? else {
            bloglens_db::mark_task_failed(&ctx.pool, task.id, "blog row missing", false).await?;
            continue;
        };

        lines.push(build_batch_request(&profile, &catalog, task.text_only()).to_string());
        task_ids.push(task.id);
    }

    if task_ids.is_empty() {
        return Ok(None);
    }

    let mut jsonl = lines.join("\n");
    jsonl.push('\n');

    let file_id = ctx.batch_client.upload_batch_file(jsonl).await?;
    let batch = ctx.batch_client.create_batch(&file_id).await?;
    let stamped = bloglens_db::set_batch_id(&ctx.pool, &task_ids, &batch.id).await?;

    tracing::info!(
        batch_id = %batch.id,
        input_file = %file_id,
        tasks = stamped,
        "ai batch submitted"
    );
    Ok(Some(batch.id))
}

/// Load the full category/tag vocabulary for the request prompt.
///
/// # Errors
///
/// Returns an error when the taxonomy tables cannot be read.
pub async fn load_catalog(ctx: &ServiceContext) -> anyhow::Result<TaxonomyCatalog> {
    let category_rows = bloglens_db::list_category_rows(&ctx.pool).await?;
    let tag_rows = bloglens_db::list_tag_rows(&ctx.pool).await?;

    let mut by_id: HashMap<i64, CatalogCategory> = HashMap::new();
    let mut order = Vec::new();
    for row in &category_rows {
        if row.parent_id.is_none() {
            if let Some(code) = &row.code {
                by_id.insert(
                    row.id,
                    CatalogCategory {
                        code: code.clone(),
                        name: row.name.clone(),
                        children: Vec::new(),
                    },
                );
                order.push(row.id);
            }
        }
    }
    for row in &category_rows {
        if let Some(parent_id) = row.parent_id {
            if let Some(parent) = by_id.get_mut(&parent_id) {
                parent.children.push(row.name.clone());
            }
        }
    }

    Ok(TaxonomyCatalog {
        categories: order.into_iter().filter_map(|id| by_id.remove(&id)).collect(),
        tags: tag_rows
            .into_iter()
            .map(|t| (t.group_name, t.name))
            .collect(),
    })
}

/// Assemble everything the request builder needs for one blog, or `None`
/// when the blog row has vanished.
///
/// # Errors
///
/// Returns an error when any read fails.
async fn build_profile_context(
    ctx: &ServiceContext,
    blog_id: i64,
) -> anyhow::Result<Option<ProfileContext>> {
    let Some(blog) = bloglens_db::get_blog(&ctx.pool, blog_id).await? else {
        return Ok(None);
    };
    let posts = bloglens_db::list_posts_for_blog(&ctx.pool, blog_id, REQUEST_POST_LIMIT).await?;
    let highlights = bloglens_db::list_highlights_for_blog(&ctx.pool, blog_id).await?;

    Ok(Some(ProfileContext {
        blog_id,
        username: blog.username,
        full_name: blog.full_name,
        biography: blog.biography,
        followers: blog.followers.unwrap_or(0),
        following: blog.following.unwrap_or(0),
        media_count: blog.media_count.unwrap_or(0),
        is_verified: blog.is_verified.unwrap_or(false),
        is_business: blog.is_business.unwrap_or(false),
        er: blog.er,
        er_reels: blog.er_reels,
        er_trend: blog.er_trend,
        posts_per_week: blog.posts_per_week,
        avg_reels_views: blog.avg_reels_views,
        avatar_url: blog.avatar_url,
        posts: posts
            .into_iter()
            .map(|p| PostSummary {
                caption: p.caption,
                media_type: p.media_type,
                like_count: p.like_count.unwrap_or(0),
                comment_count: p.comment_count.unwrap_or(0),
                play_count: p.play_count,
                thumbnail_url: p.thumbnail_url,
            })
            .collect(),
        highlight_count: highlights.len() as i64,
    }))
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Poll every distinct batch attached to running ai_analysis tasks and
/// reconcile finished ones. Also runs the age-based submission trigger, so
/// a half-filled batch cannot wait forever for another claim.
pub async fn poll_batches(ctx: &ServiceContext) {
    if let Err(e) = maybe_submit_batch(ctx).await {
        tracing::warn!(error = %e, "age-triggered batch submission failed");
    }

    let tasks = match bloglens_db::list_running_batch_tasks(&ctx.pool).await {
        Ok(tasks) => tasks,
        Err(e) => {
            tracing::error!(error = %e, "could not list submitted ai tasks");
            return;
        }
    };
    if tasks.is_empty() {
        return;
    }

    let mut groups: HashMap<String, Vec<TaskRow>> = HashMap::new();
    for task in tasks {
        let Some(batch_id) = task.batch_id().map(str::to_owned) else {
            continue;
        };
        groups.entry(batch_id).or_default().push(task);
    }

    tracing::info!(batches = groups.len(), "polling ai batches");
    for (batch_id, tasks) in groups {
        poll_one_batch(ctx, &batch_id, tasks).await;
    }
}

async fn poll_one_batch(ctx: &ServiceContext, batch_id: &str, tasks: Vec<TaskRow>) {
    let batch = match ctx.batch_client.get_batch(batch_id).await {
        Ok(batch) => batch,
        Err(e) => {
            tracing::warn!(%batch_id, error = %e, "batch status check failed");
            return;
        }
    };

    if batch.status.is_pending() {
        tracing::debug!(%batch_id, status = ?batch.status, "batch still in flight");
        return;
    }

    if batch.status.is_dead() {
        let requeued = match bloglens_db::clear_batch_tasks_for_resubmit(
            &ctx.pool,
            batch_id,
            &format!("provider batch ended as {:?}", batch.status),
        )
        .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(%batch_id, error = %e, "could not requeue dead batch tasks");
                return;
            }
        };
        tracing::warn!(%batch_id, status = ?batch.status, requeued, "batch died; tasks requeued");
        return;
    }

    let Some(output_file_id) = batch.output_file_id.as_deref() else {
        tracing::error!(%batch_id, "completed batch has no output file; requeueing tasks");
        if let Err(e) = bloglens_db::clear_batch_tasks_for_resubmit(
            &ctx.pool,
            batch_id,
            "completed batch without output file",
        )
        .await
        {
            tracing::error!(%batch_id, error = %e, "could not requeue tasks");
        }
        return;
    };

    let content = match ctx.batch_client.download_file_content(output_file_id).await {
        Ok(content) => content,
        Err(e) => {
            // Leave the tasks attached; the next poll retries the download.
            tracing::warn!(%batch_id, error = %e, "batch output download failed");
            return;
        }
    };

    let indices = match reconcile::load_indices(ctx).await {
        Ok(indices) => indices,
        Err(e) => {
            tracing::error!(%batch_id, error = %e, "could not load taxonomy indices");
            return;
        }
    };

    let tasks_by_blog: HashMap<i64, TaskRow> = tasks
        .into_iter()
        .filter_map(|t| t.blog_id.map(|blog_id| (blog_id, t)))
        .collect();

    let mut reconciled = 0_usize;
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let parsed = match parse_output_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(%batch_id, error = %e, "unparseable batch output line");
                continue;
            }
        };

        let Ok(blog_id) = parsed.custom_id.parse::<i64>() else {
            tracing::warn!(%batch_id, custom_id = %parsed.custom_id, "non-numeric custom id");
            continue;
        };
        let Some(task) = tasks_by_blog.get(&blog_id) else {
            tracing::warn!(%batch_id, blog_id, "output line without a matching running task");
            continue;
        };

        reconcile::apply(ctx, &indices, task, blog_id, parsed.outcome).await;
        reconciled += 1;
    }

    tracing::info!(%batch_id, reconciled, "batch reconciled");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bloglens_core::taxonomy::{CategoryDef, TagGroup, TaxonomyFile};
    use bloglens_db::TaskType;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::test_support::{offline_context, openai_context};

    async fn seed_taxonomy(pool: &sqlx::PgPool) {
        let taxonomy = TaxonomyFile {
            categories: vec![
                CategoryDef {
                    code: "travel".to_string(),
                    name: "Путешествия".to_string(),
                    children: vec!["Budget Travel".to_string()],
                },
                CategoryDef {
                    code: "beauty".to_string(),
                    name: "Beauty & Makeup".to_string(),
                    children: vec![],
                },
            ],
            tags: BTreeMap::from([(
                TagGroup::Content,
                vec!["vlogs".to_string(), "tutorials".to_string()],
            )]),
        };
        bloglens_db::seed_taxonomy(pool, &taxonomy).await.expect("seed taxonomy");
    }

    /// Create a blog with one running ai_analysis task; returns (blog_id, task_id).
    async fn running_ai_task(pool: &sqlx::PgPool, username: &str) -> (i64, i64) {
        let blog = bloglens_db::upsert_blog_shell(pool, username).await.expect("blog");
        let task_id = bloglens_db::create_task_if_absent(
            pool,
            Some(blog.id),
            TaskType::AiAnalysis,
            3,
            serde_json::json!({}),
        )
        .await
        .expect("create")
        .expect("inserted");
        (blog.id, task_id)
    }

    async fn mount_submit_mocks(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "file-in"
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/batches"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "batch_test",
                "status": "validating",
                "output_file_id": null,
                "error_file_id": null
            })))
            .mount(server)
            .await;
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn submit_waits_below_threshold(pool: sqlx::PgPool) {
        seed_taxonomy(&pool).await;
        for i in 0..2 {
            running_ai_task(&pool, &format!("below{i}")).await;
        }
        bloglens_db::claim_task_batch(&pool, 10).await.expect("claim");

        let ctx = offline_context(pool.clone());
        let submitted = maybe_submit_batch(&ctx).await.expect("no provider call expected");
        assert!(submitted.is_none(), "2 tasks < batch_min_size and fresh");

        let unattached = bloglens_db::list_unsubmitted_ai_tasks(&pool).await.expect("list");
        assert_eq!(unattached.len(), 2, "tasks keep accumulating");
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn submit_at_threshold_stamps_every_task(pool: sqlx::PgPool) {
        seed_taxonomy(&pool).await;
        for i in 0..10 {
            running_ai_task(&pool, &format!("thresh{i}")).await;
        }
        bloglens_db::claim_task_batch(&pool, 10).await.expect("claim");

        let server = MockServer::start().await;
        mount_submit_mocks(&server).await;

        let ctx = openai_context(pool.clone(), &server.uri());
        let submitted = maybe_submit_batch(&ctx).await.expect("submit");
        assert_eq!(submitted.as_deref(), Some("batch_test"));

        let attached = bloglens_db::list_running_batch_tasks(&pool).await.expect("list");
        assert_eq!(attached.len(), 10, "all ten stay running with a batch id");
        assert!(attached.iter().all(|t| t.batch_id() == Some("batch_test")));

        let unattached = bloglens_db::list_unsubmitted_ai_tasks(&pool).await.expect("list");
        assert!(unattached.is_empty());
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn age_trigger_submits_a_small_batch(pool: sqlx::PgPool) {
        seed_taxonomy(&pool).await;
        let (_, task_id) = running_ai_task(&pool, "lonely").await;
        bloglens_db::claim_task_batch(&pool, 1).await.expect("claim");
        sqlx::query("UPDATE tasks SET started_at = NOW() - interval '3 hours' WHERE id = $1")
            .bind(task_id)
            .execute(&pool)
            .await
            .expect("backdate");

        let server = MockServer::start().await;
        mount_submit_mocks(&server).await;

        let ctx = openai_context(pool.clone(), &server.uri());
        let submitted = maybe_submit_batch(&ctx).await.expect("submit");
        assert!(submitted.is_some(), "old single task goes out alone");
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn catalog_groups_children_under_parents(pool: sqlx::PgPool) {
        seed_taxonomy(&pool).await;
        let ctx = offline_context(pool);

        let catalog = load_catalog(&ctx).await.expect("catalog");
        assert_eq!(catalog.categories.len(), 2);
        let travel = catalog
            .categories
            .iter()
            .find(|c| c.code == "travel")
            .expect("travel category");
        assert_eq!(travel.children, vec!["Budget Travel".to_string()]);
        assert_eq!(catalog.tags.len(), 2);

        let indices = reconcile::load_indices(&ctx).await.expect("indices");
        assert!(indices.categories.lookup("travel").is_some(), "code key");
        assert!(indices.categories.lookup("budget travel").is_some(), "child name key");
        assert!(
            indices.categories.lookup("Beauty & Makeup").is_some(),
            "normalised child/code lookup"
        );
        assert!(indices.tags.lookup("Vlogs").is_some());
    }
}
