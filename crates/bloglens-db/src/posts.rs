//! Database operations for the `posts` and `highlights` child tables.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `posts` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostRow {
    pub id: i64,
    pub blog_id: i64,
    pub platform_id: String,
    pub caption: Option<String>,
    pub media_type: String,
    pub like_count: Option<i32>,
    pub comment_count: Option<i32>,
    pub play_count: Option<i64>,
    pub thumbnail_url: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A row from the `highlights` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HighlightRow {
    pub id: i64,
    pub blog_id: i64,
    pub platform_id: String,
    pub title: Option<String>,
    pub media_count: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// A post as produced by the scraping adapter, ready for persistence.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub platform_id: String,
    pub caption: Option<String>,
    pub media_type: String,
    pub like_count: Option<i32>,
    pub comment_count: Option<i32>,
    pub play_count: Option<i64>,
    pub thumbnail_url: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewHighlight {
    pub platform_id: String,
    pub title: Option<String>,
    pub media_count: Option<i32>,
}

/// Upsert the scraped posts for a blog on `(blog_id, platform_id)`.
///
/// Re-scrapes refresh counters and the stored thumbnail in place; the
/// thumbnail only moves forward (a storage URL is never clobbered by a
/// missing one).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn upsert_posts(pool: &PgPool, blog_id: i64, posts: &[NewPost]) -> Result<u64, DbError> {
    let mut written: u64 = 0;

    for post in posts {
        let result = sqlx::query(
            "INSERT INTO posts \
                 (blog_id, platform_id, caption, media_type, like_count, comment_count, \
                  play_count, thumbnail_url, taken_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (blog_id, platform_id) DO UPDATE SET \
                 caption       = EXCLUDED.caption, \
                 media_type    = EXCLUDED.media_type, \
                 like_count    = EXCLUDED.like_count, \
                 comment_count = EXCLUDED.comment_count, \
                 play_count    = EXCLUDED.play_count, \
                 thumbnail_url = COALESCE(EXCLUDED.thumbnail_url, posts.thumbnail_url), \
                 taken_at      = EXCLUDED.taken_at",
        )
        .bind(blog_id)
        .bind(&post.platform_id)
        .bind(&post.caption)
        .bind(&post.media_type)
        .bind(post.like_count)
        .bind(post.comment_count)
        .bind(post.play_count)
        .bind(&post.thumbnail_url)
        .bind(post.taken_at)
        .execute(pool)
        .await?;

        written += result.rows_affected();
    }

    Ok(written)
}

/// Replace the highlight set for a blog with the scraped one.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn replace_highlights(
    pool: &PgPool,
    blog_id: i64,
    highlights: &[NewHighlight],
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM highlights WHERE blog_id = $1")
        .bind(blog_id)
        .execute(&mut *tx)
        .await?;

    for highlight in highlights {
        sqlx::query(
            "INSERT INTO highlights (blog_id, platform_id, title, media_count) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(blog_id)
        .bind(&highlight.platform_id)
        .bind(&highlight.title)
        .bind(highlight.media_count)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(())
}

/// Recent posts for a blog, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_posts_for_blog(
    pool: &PgPool,
    blog_id: i64,
    limit: i64,
) -> Result<Vec<PostRow>, DbError> {
    let rows = sqlx::query_as::<_, PostRow>(
        "SELECT id, blog_id, platform_id, caption, media_type, like_count, comment_count, \
                play_count, thumbnail_url, taken_at, created_at \
         FROM posts \
         WHERE blog_id = $1 \
         ORDER BY taken_at DESC NULLS LAST \
         LIMIT $2",
    )
    .bind(blog_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// All highlights for a blog.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_highlights_for_blog(
    pool: &PgPool,
    blog_id: i64,
) -> Result<Vec<HighlightRow>, DbError> {
    let rows = sqlx::query_as::<_, HighlightRow>(
        "SELECT id, blog_id, platform_id, title, media_count, created_at \
         FROM highlights \
         WHERE blog_id = $1 \
         ORDER BY id",
    )
    .bind(blog_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
