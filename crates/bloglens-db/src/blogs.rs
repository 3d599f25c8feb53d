//! Database operations for the `persons` and `blogs` tables.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `blogs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BlogRow {
    pub id: i64,
    pub person_id: Option<i64>,
    pub platform: String,
    pub username: String,
    pub platform_id: Option<String>,
    pub full_name: Option<String>,
    pub biography: Option<String>,
    pub external_url: Option<String>,
    pub followers: Option<i64>,
    pub following: Option<i64>,
    pub media_count: Option<i32>,
    pub is_verified: Option<bool>,
    pub is_business: Option<bool>,
    pub avatar_url: Option<String>,
    pub er: Option<f64>,
    pub er_reels: Option<f64>,
    pub er_trend: Option<String>,
    pub posts_per_week: Option<f64>,
    pub avg_reels_views: Option<f64>,
    pub scrape_status: String,
    pub scraped_at: Option<DateTime<Utc>>,
    pub ai_insights: Option<serde_json::Value>,
    pub ai_confidence: Option<i16>,
    pub ai_analyzed_at: Option<DateTime<Utc>>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const BLOG_COLUMNS: &str = "id, person_id, platform, username, platform_id, full_name, \
     biography, external_url, followers, following, media_count, is_verified, is_business, \
     avatar_url, er, er_reels, er_trend, posts_per_week, avg_reels_views, scrape_status, \
     scraped_at, ai_insights, ai_confidence, ai_analyzed_at, embedding, created_at, updated_at";

/// Profile fields written after a successful scrape.
#[derive(Debug, Clone, Default)]
pub struct BlogProfileUpdate {
    pub platform_id: Option<String>,
    pub full_name: Option<String>,
    pub biography: Option<String>,
    pub external_url: Option<String>,
    pub followers: Option<i64>,
    pub following: Option<i64>,
    pub media_count: Option<i32>,
    pub is_verified: Option<bool>,
    pub is_business: Option<bool>,
    pub avatar_url: Option<String>,
    pub er: Option<f64>,
    pub er_reels: Option<f64>,
    pub er_trend: Option<String>,
    pub posts_per_week: Option<f64>,
    pub avg_reels_views: Option<f64>,
}

// ---------------------------------------------------------------------------
// Creation and lookup
// ---------------------------------------------------------------------------

/// Get or create the blog row for `(instagram, username)`.
///
/// New rows start in `scrape_status = 'pending'` with no profile data; the
/// conflict arm is a no-op update so the row comes back either way.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn upsert_blog_shell(pool: &PgPool, username: &str) -> Result<BlogRow, DbError> {
    let row = sqlx::query_as::<_, BlogRow>(&format!(
        "INSERT INTO blogs (platform, username) \
         VALUES ('instagram', $1) \
         ON CONFLICT (platform, username) DO UPDATE SET updated_at = NOW() \
         RETURNING {BLOG_COLUMNS}"
    ))
    .bind(username)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Create a person and their blog in one transaction (discovery path).
///
/// Returns `(person_id, blog_id)`. If the blog username already exists the
/// insert conflicts and the existing blog id is returned with a fresh person
/// attached only when the blog had none.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn create_person_with_blog(
    pool: &PgPool,
    full_name: Option<&str>,
    username: &str,
    platform_id: Option<&str>,
) -> Result<(i64, i64), DbError> {
    let mut tx = pool.begin().await?;

    let person_id: i64 = sqlx::query_scalar("INSERT INTO persons (full_name) VALUES ($1) RETURNING id")
        .bind(full_name)
        .fetch_one(&mut *tx)
        .await?;

    let blog_id: i64 = sqlx::query_scalar(
        "INSERT INTO blogs (person_id, platform, username, platform_id) \
         VALUES ($1, 'instagram', $2, $3) \
         ON CONFLICT (platform, username) DO UPDATE \
             SET person_id = COALESCE(blogs.person_id, EXCLUDED.person_id), \
                 updated_at = NOW() \
         RETURNING id",
    )
    .bind(person_id)
    .bind(username)
    .bind(platform_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok((person_id, blog_id))
}

/// Fetch a blog by id, or `None` if absent.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_blog(pool: &PgPool, id: i64) -> Result<Option<BlogRow>, DbError> {
    let row = sqlx::query_as::<_, BlogRow>(&format!(
        "SELECT {BLOG_COLUMNS} FROM blogs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Fetch a blog by instagram username, or `None` if unknown.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_blog_by_username(pool: &PgPool, username: &str) -> Result<Option<BlogRow>, DbError> {
    let row = sqlx::query_as::<_, BlogRow>(&format!(
        "SELECT {BLOG_COLUMNS} FROM blogs WHERE platform = 'instagram' AND username = $1"
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// All blog ids; used by the storage cleanup sweep to detect orphaned
/// image folders.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_blog_ids(pool: &PgPool) -> Result<Vec<i64>, DbError> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM blogs ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(ids)
}

// ---------------------------------------------------------------------------
// Status and profile writes
// ---------------------------------------------------------------------------

/// Set `scrape_status` for a blog.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn set_scrape_status(pool: &PgPool, id: i64, status: &str) -> Result<(), DbError> {
    sqlx::query("UPDATE blogs SET scrape_status = $1, updated_at = NOW() WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Write the scraped profile fields, derived metrics, and storage URLs,
/// moving the blog to `scrape_status = 'analyzing'` with a fresh
/// `scraped_at`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn update_blog_profile(
    pool: &PgPool,
    id: i64,
    update: &BlogProfileUpdate,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE blogs SET \
             platform_id = COALESCE($1, platform_id), \
             full_name = $2, \
             biography = $3, \
             external_url = $4, \
             followers = $5, \
             following = $6, \
             media_count = $7, \
             is_verified = $8, \
             is_business = $9, \
             avatar_url = COALESCE($10, avatar_url), \
             er = $11, \
             er_reels = $12, \
             er_trend = $13, \
             posts_per_week = $14, \
             avg_reels_views = $15, \
             scrape_status = 'analyzing', \
             scraped_at = NOW(), \
             updated_at = NOW() \
         WHERE id = $16",
    )
    .bind(&update.platform_id)
    .bind(&update.full_name)
    .bind(&update.biography)
    .bind(&update.external_url)
    .bind(update.followers)
    .bind(update.following)
    .bind(update.media_count)
    .bind(update.is_verified)
    .bind(update.is_business)
    .bind(&update.avatar_url)
    .bind(update.er)
    .bind(update.er_reels)
    .bind(&update.er_trend)
    .bind(update.posts_per_week)
    .bind(update.avg_reels_views)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// AI result writes
// ---------------------------------------------------------------------------

/// Store a successful analysis: insights, confidence, timestamp, and the
/// `active` status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn store_ai_insights(
    pool: &PgPool,
    id: i64,
    insights: &serde_json::Value,
    confidence: i16,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE blogs SET \
             ai_insights = $1, \
             ai_confidence = $2, \
             ai_analyzed_at = NOW(), \
             scrape_status = 'active', \
             updated_at = NOW() \
         WHERE id = $3",
    )
    .bind(insights)
    .bind(confidence)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a provider refusal: merge the reason into `ai_insights` and set
/// the given scrape status (`ai_refused` on the first refusal,
/// `ai_analyzed` on the second).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn store_ai_refusal(
    pool: &PgPool,
    id: i64,
    reason: &str,
    scrape_status: &str,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE blogs SET \
             ai_insights = COALESCE(ai_insights, '{}'::jsonb) \
                 || jsonb_build_object('refusal_reason', $1::text), \
             scrape_status = $2, \
             updated_at = NOW() \
         WHERE id = $3",
    )
    .bind(reason)
    .bind(scrape_status)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Store the semantic embedding vector for a blog.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn set_blog_embedding(pool: &PgPool, id: i64, embedding: &[f32]) -> Result<(), DbError> {
    sqlx::query("UPDATE blogs SET embedding = $1, updated_at = NOW() WHERE id = $2")
        .bind(embedding)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Scheduler selections
// ---------------------------------------------------------------------------

/// Blogs with stored insights but no embedding yet, oldest analysis first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn blogs_missing_embedding(pool: &PgPool, limit: i64) -> Result<Vec<BlogRow>, DbError> {
    let rows = sqlx::query_as::<_, BlogRow>(&format!(
        "SELECT {BLOG_COLUMNS} FROM blogs \
         WHERE ai_insights IS NOT NULL \
           AND ai_insights ->> 'refusal_reason' IS NULL \
           AND embedding IS NULL \
         ORDER BY ai_analyzed_at ASC NULLS LAST \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Active blogs whose last scrape is older than `older_than_days`, biggest
/// audiences first. This is the scheduled-update selection.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn blogs_due_for_update(
    pool: &PgPool,
    older_than_days: i32,
    limit: i64,
) -> Result<Vec<BlogRow>, DbError> {
    let rows = sqlx::query_as::<_, BlogRow>(&format!(
        "SELECT {BLOG_COLUMNS} FROM blogs \
         WHERE scrape_status = 'active' \
           AND scraped_at < NOW() - make_interval(days => $1) \
         ORDER BY followers DESC NULLS LAST \
         LIMIT $2"
    ))
    .bind(older_than_days)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
