//! Reconciliation of parsed batch outcomes into the task queue and the
//! domain tables.
//!
//! Reconciliation is at-least-once: a step that fails leaves the task
//! `running`, and the next poll re-downloads the completed batch and
//! re-applies the line. All writes are idempotent, and a task that was
//! already terminated just logs the invalid transition.

use bloglens_ai::{render_insights_text, AiInsights, BatchOutcome};
use bloglens_core::taxonomy::{resolve_categories, resolve_tags, TaxonomyIndex};
use bloglens_db::{DbError, TaskRow, TaskType};

use crate::context::ServiceContext;

/// Priority of the single text-only retry chained after a first refusal.
const REFUSAL_RETRY_PRIORITY: i16 = 3;

/// Category and tag lookup snapshots for one reconciliation pass.
pub struct TaxonomyIndices {
    pub categories: TaxonomyIndex,
    pub tags: TaxonomyIndex,
}

/// Build the lookup indices from the taxonomy tables: top-level categories
/// by code, child categories by lowercase name, tags by lowercase name.
///
/// # Errors
///
/// Returns [`DbError`] when the taxonomy tables cannot be read.
pub async fn load_indices(ctx: &ServiceContext) -> Result<TaxonomyIndices, DbError> {
    let mut categories = TaxonomyIndex::new();
    for row in bloglens_db::list_category_rows(&ctx.pool).await? {
        if row.parent_id.is_none() {
            if let Some(code) = &row.code {
                categories.insert(code.clone(), row.id);
            }
        } else {
            categories.insert(row.name.to_lowercase(), row.id);
        }
    }

    let mut tags = TaxonomyIndex::new();
    for row in bloglens_db::list_tag_rows(&ctx.pool).await? {
        tags.insert(row.name.to_lowercase(), row.id);
    }

    Ok(TaxonomyIndices { categories, tags })
}

/// Apply one parsed outcome to its blog and task. Failures are logged and
/// leave the task `running` for the next poll.
pub async fn apply(
    ctx: &ServiceContext,
    indices: &TaxonomyIndices,
    task: &TaskRow,
    blog_id: i64,
    outcome: BatchOutcome,
) {
    let result = match outcome {
        BatchOutcome::Success(insights) => {
            apply_success(ctx, indices, task, blog_id, &insights).await
        }
        BatchOutcome::Refusal(reason) => apply_refusal(ctx, task, blog_id, &reason).await,
        BatchOutcome::Invalid => apply_invalid(ctx, task, blog_id).await,
    };

    if let Err(e) = result {
        tracing::error!(
            task_id = task.id,
            blog_id,
            error = %e,
            "reconciliation failed; task stays running for the next poll"
        );
    }
}

async fn apply_success(
    ctx: &ServiceContext,
    indices: &TaxonomyIndices,
    task: &TaskRow,
    blog_id: i64,
    insights: &AiInsights,
) -> anyhow::Result<()> {
    let dump = serde_json::to_value(insights)?;
    bloglens_db::store_ai_insights(&ctx.pool, blog_id, &dump, i16::from(insights.confidence))
        .await?;
    tracing::info!(
        blog_id,
        confidence = insights.confidence,
        label = %insights.short_label,
        "insights stored"
    );

    match_categories(ctx, indices, blog_id, insights).await?;
    match_tags(ctx, indices, blog_id, insights).await?;

    // Best effort; the hourly backfill job recovers missing vectors.
    let text = render_insights_text(insights);
    if let Some(vector) = ctx.embedding.embed_or_none(blog_id, &text).await {
        bloglens_db::set_blog_embedding(&ctx.pool, blog_id, &vector).await?;
    }

    finish_task(ctx, task.id).await;
    Ok(())
}

async fn match_categories(
    ctx: &ServiceContext,
    indices: &TaxonomyIndices,
    blog_id: i64,
    insights: &AiInsights,
) -> anyhow::Result<()> {
    let resolution = resolve_categories(
        &insights.content.primary_categories,
        &insights.content.secondary_topics,
        &indices.categories,
    );
    for entry in &resolution.unresolved {
        tracing::warn!(blog_id, entry = %entry, "unresolved category");
    }
    if !resolution.resolved.is_empty() {
        bloglens_db::replace_blog_categories(&ctx.pool, blog_id, &resolution.resolved).await?;
    }
    Ok(())
}

async fn match_tags(
    ctx: &ServiceContext,
    indices: &TaxonomyIndices,
    blog_id: i64,
    insights: &AiInsights,
) -> anyhow::Result<()> {
    let resolution = resolve_tags(&insights.tags, &indices.tags);
    for entry in &resolution.unresolved {
        tracing::warn!(blog_id, entry = %entry, "unresolved tag");
    }
    if !resolution.tag_ids.is_empty() {
        bloglens_db::replace_blog_tags(&ctx.pool, blog_id, &resolution.tag_ids).await?;
    }
    Ok(())
}

async fn apply_refusal(
    ctx: &ServiceContext,
    task: &TaskRow,
    blog_id: i64,
    reason: &str,
) -> anyhow::Result<()> {
    let blog = bloglens_db::get_blog(&ctx.pool, blog_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("blog {blog_id} missing during refusal"))?;

    // A blog gets exactly one text-only retry: a repeat refusal (or a
    // refusal of the text-only task itself) is terminal.
    let already_retried = blog.scrape_status == "ai_refused" || task.text_only();
    if already_retried {
        tracing::warn!(blog_id, %reason, "second refusal; giving up on analysis");
        bloglens_db::store_ai_refusal(&ctx.pool, blog_id, reason, "ai_analyzed").await?;
        finish_task(ctx, task.id).await;
        return Ok(());
    }

    tracing::warn!(blog_id, %reason, "analysis refused; chaining text-only retry");
    bloglens_db::store_ai_refusal(&ctx.pool, blog_id, reason, "ai_refused").await?;
    finish_task(ctx, task.id).await;

    // The refusal retry is a fresh task, outside the attempts budget of the
    // refused one. Created after the old task terminates so the uniqueness
    // constraint admits it.
    let retry_id = bloglens_db::create_task_if_absent(
        &ctx.pool,
        Some(blog_id),
        TaskType::AiAnalysis,
        REFUSAL_RETRY_PRIORITY,
        serde_json::json!({ "text_only": true }),
    )
    .await?;
    if let Some(retry_id) = retry_id {
        tracing::info!(blog_id, retry_id, "text-only analysis task created");
    }

    Ok(())
}

async fn apply_invalid(ctx: &ServiceContext, task: &TaskRow, blog_id: i64) -> anyhow::Result<()> {
    tracing::warn!(blog_id, "provider error for this profile; leaving blog without insights");
    bloglens_db::set_scrape_status(&ctx.pool, blog_id, "ai_analyzed").await?;
    finish_task(ctx, task.id).await;
    Ok(())
}

/// Mark done, tolerating a task that some sweep already moved.
async fn finish_task(ctx: &ServiceContext, task_id: i64) {
    match bloglens_db::mark_task_done(&ctx.pool, task_id).await {
        Ok(()) => {}
        Err(DbError::InvalidTaskTransition { .. }) => {
            tracing::debug!(task_id, "task already left running state");
        }
        Err(e) => tracing::error!(task_id, error = %e, "could not mark task done"),
    }
}


#[cfg(test)]
mod poll_tests {
    use bloglens_db::TaskStatus;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::tests::{claimed_ai_task, sample_insights_json, seed_taxonomy};
    use crate::batch::poll_batches;
    use crate::test_support::openai_context;

    fn success_line(blog_id: i64) -> serde_json::Value {
        serde_json::json!({
            "id": "req-ok",
            "custom_id": blog_id.to_string(),
            "response": {
                "status_code": 200,
                "body": {
                    "choices": [{
                        "message": {
                            "content": sample_insights_json().to_string(),
                            "refusal": null
                        }
                    }]
                }
            },
            "error": null
        })
    }

    fn refusal_line(blog_id: i64) -> serde_json::Value {
        serde_json::json!({
            "id": "req-no",
            "custom_id": blog_id.to_string(),
            "response": {
                "status_code": 200,
                "body": {
                    "choices": [{
                        "message": { "content": null, "refusal": "policy" }
                    }]
                }
            },
            "error": null
        })
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn completed_batch_reconciles_every_line(pool: sqlx::PgPool) {
        seed_taxonomy(&pool).await;
        let (ok_blog, ok_task) = claimed_ai_task(&pool, "poll-ok", serde_json::json!({})).await;
        let (no_blog, no_task) = claimed_ai_task(&pool, "poll-no", serde_json::json!({})).await;
        bloglens_db::set_batch_id(&pool, &[ok_task.id, no_task.id], "batch_done")
            .await
            .expect("stamp");

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/batches/batch_done"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "batch_done",
                "status": "completed",
                "output_file_id": "file-out",
                "error_file_id": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/files/file-out/content"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "{}\n{}\n",
                success_line(ok_blog),
                refusal_line(no_blog)
            )))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": vec![0.5_f32; bloglens_ai::EMBEDDING_DIM] }]
            })))
            .mount(&server)
            .await;

        let ctx = openai_context(pool.clone(), &server.uri());
        poll_batches(&ctx).await;

        let ok = bloglens_db::get_blog(&pool, ok_blog).await.unwrap().unwrap();
        assert_eq!(ok.scrape_status, "active");
        assert_eq!(ok.embedding.map(|e| e.len()), Some(bloglens_ai::EMBEDDING_DIM));
        assert_eq!(
            bloglens_db::get_task(&pool, ok_task.id).await.unwrap().unwrap().status(),
            Some(TaskStatus::Done)
        );

        let no = bloglens_db::get_blog(&pool, no_blog).await.unwrap().unwrap();
        assert_eq!(no.scrape_status, "ai_refused");
        assert_eq!(
            bloglens_db::get_task(&pool, no_task.id).await.unwrap().unwrap().status(),
            Some(TaskStatus::Done)
        );

        // The refusal chained exactly one pending text-only task.
        let (pending, _) = bloglens_db::list_tasks(
            &pool,
            bloglens_db::TaskFilter {
                status: Some(TaskStatus::Pending),
                task_type: Some(bloglens_db::TaskType::AiAnalysis),
            },
            10,
            0,
        )
        .await
        .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].blog_id, Some(no_blog));
        assert!(pending[0].text_only());
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn dead_batch_requeues_members(pool: sqlx::PgPool) {
        seed_taxonomy(&pool).await;
        let (_, task) = claimed_ai_task(&pool, "poll-dead", serde_json::json!({})).await;
        bloglens_db::set_batch_id(&pool, &[task.id], "batch_dead")
            .await
            .expect("stamp");

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/batches/batch_dead"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "batch_dead",
                "status": "expired",
                "output_file_id": null,
                "error_file_id": null
            })))
            .mount(&server)
            .await;

        let ctx = openai_context(pool.clone(), &server.uri());
        poll_batches(&ctx).await;

        let row = bloglens_db::get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(row.status(), Some(TaskStatus::Pending), "member requeued");
        assert_eq!(row.batch_id(), None, "dead batch id detached");
        assert!(row.next_retry_at.is_some(), "requeue respects backoff");
    }
}
