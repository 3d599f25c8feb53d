//! Database operations for the taxonomy tables and the blog joins.
//!
//! Pure matching lives in `bloglens_core::taxonomy`; this module only seeds
//! the vocabulary and persists resolved joins.

use bloglens_core::taxonomy::{ResolvedCategory, TaxonomyFile};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `categories` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryRow {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub code: Option<String>,
    pub name: String,
}

/// A row from the `tags` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TagRow {
    pub id: i64,
    pub name: String,
    pub group_name: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SeedCounts {
    pub categories: u64,
    pub tags: u64,
}

/// Upsert the taxonomy seed file into `categories` and `tags`.
///
/// Top-level categories conflict on `code`; children on `(parent_id, name)`.
/// Seeded tags are `active`. Idempotent: re-running with the same file
/// changes nothing.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn seed_taxonomy(pool: &PgPool, taxonomy: &TaxonomyFile) -> Result<SeedCounts, DbError> {
    let mut counts = SeedCounts::default();
    let mut tx = pool.begin().await?;

    for category in &taxonomy.categories {
        let parent_id: i64 = sqlx::query_scalar(
            "INSERT INTO categories (code, name) \
             VALUES ($1, $2) \
             ON CONFLICT (code) DO UPDATE SET name = EXCLUDED.name \
             RETURNING id",
        )
        .bind(&category.code)
        .bind(&category.name)
        .fetch_one(&mut *tx)
        .await?;
        counts.categories += 1;

        for child in &category.children {
            sqlx::query(
                "INSERT INTO categories (parent_id, name) \
                 VALUES ($1, $2) \
                 ON CONFLICT (parent_id, name) DO NOTHING",
            )
            .bind(parent_id)
            .bind(child)
            .execute(&mut *tx)
            .await?;
            counts.categories += 1;
        }
    }

    for (group, names) in &taxonomy.tags {
        for name in names {
            sqlx::query(
                "INSERT INTO tags (name, group_name, status) \
                 VALUES ($1, $2, 'active') \
                 ON CONFLICT (group_name, name) DO NOTHING",
            )
            .bind(name)
            .bind(group.to_string())
            .execute(&mut *tx)
            .await?;
            counts.tags += 1;
        }
    }

    tx.commit().await?;

    Ok(counts)
}

/// All category rows, parents before children.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_category_rows(pool: &PgPool) -> Result<Vec<CategoryRow>, DbError> {
    let rows = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, parent_id, code, name FROM categories ORDER BY parent_id NULLS FIRST, id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// All active tag rows.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_tag_rows(pool: &PgPool) -> Result<Vec<TagRow>, DbError> {
    let rows = sqlx::query_as::<_, TagRow>(
        "SELECT id, name, group_name, status FROM tags WHERE status = 'active' ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Replace a blog's category joins with the resolved set in one batch.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn replace_blog_categories(
    pool: &PgPool,
    blog_id: i64,
    resolved: &[ResolvedCategory],
) -> Result<(), DbError> {
    let category_ids: Vec<i64> = resolved.iter().map(|c| c.category_id).collect();
    let primary_flags: Vec<bool> = resolved.iter().map(|c| c.is_primary).collect();

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM blog_categories WHERE blog_id = $1")
        .bind(blog_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO blog_categories (blog_id, category_id, is_primary) \
         SELECT $1, category_id, is_primary \
         FROM UNNEST($2::bigint[], $3::boolean[]) AS t(category_id, is_primary)",
    )
    .bind(blog_id)
    .bind(&category_ids)
    .bind(&primary_flags)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(())
}

/// Replace a blog's tag joins with the resolved set in one batch.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn replace_blog_tags(pool: &PgPool, blog_id: i64, tag_ids: &[i64]) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM blog_tags WHERE blog_id = $1")
        .bind(blog_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO blog_tags (blog_id, tag_id) \
         SELECT $1, tag_id FROM UNNEST($2::bigint[]) AS t(tag_id)",
    )
    .bind(blog_id)
    .bind(tag_ids)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(())
}
