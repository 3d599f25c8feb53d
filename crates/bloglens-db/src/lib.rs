//! Postgres access for the whole service: the pool, embedded migrations,
//! and the per-table query modules.
//!
//! One process shares one pool between the HTTP surface, the polling
//! worker, and the scheduler, so the defaults in [`PoolSettings`] are sized
//! for that split rather than for a fleet of clients.

use std::time::Duration;

use bloglens_core::AppConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;

// Workspace-root migrations, resolved relative to this crate's manifest.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// Connection-pool sizing.
///
/// The default budget: two connections for the worker's concurrent task
/// slots, one for the scheduler tick that happens to overlap, and a few
/// for API reads. Two are kept warm so a claim after an idle night does
/// not pay connection setup. `acquire_timeout` is short on purpose: if
/// the pool is starved for five seconds something is already wrong, and
/// failing the caller beats queueing more work behind it.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 8,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolSettings {
    /// Sizing from the loaded service configuration.
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout: Duration::from_secs(config.db_acquire_timeout_secs),
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
    #[error("invalid task state transition for id {id}: expected status '{expected_status}'")]
    InvalidTaskTransition {
        id: i64,
        expected_status: &'static str,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Open a pool against `database_url` with the given sizing.
///
/// # Errors
///
/// Returns [`sqlx::Error`] when no connection can be established within
/// the acquire timeout.
pub async fn connect_pool(database_url: &str, settings: PoolSettings) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(database_url)
        .await
}

/// Open a pool from `DATABASE_URL` alone, with default sizing.
///
/// The CLI path: operational commands should not demand the full service
/// environment just to reach the database.
///
/// # Errors
///
/// Returns [`DbError::MissingDatabaseUrl`] when the variable is absent,
/// or [`DbError::Sqlx`] when the connection fails.
pub async fn connect_pool_from_env() -> Result<PgPool, DbError> {
    let database_url = std::env::var("DATABASE_URL").map_err(|_| DbError::MissingDatabaseUrl)?;
    connect_pool(&database_url, PoolSettings::default())
        .await
        .map_err(DbError::from)
}

/// Bring the schema up to date. Safe to call on every boot; already-applied
/// migrations are skipped by the embedded migrator.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] when a migration fails or the
/// recorded history conflicts with the embedded files.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}

/// Liveness probe for the health endpoint: one round-trip through the pool.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] when the database cannot answer.
pub async fn health_check(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}


pub mod blogs;
pub mod posts;
pub mod tasks;
pub mod taxonomy;

pub use blogs::{
    blogs_due_for_update, blogs_missing_embedding, create_person_with_blog, get_blog,
    get_blog_by_username, list_blog_ids, set_blog_embedding, set_scrape_status,
    store_ai_insights, store_ai_refusal, update_blog_profile, upsert_blog_shell,
    BlogProfileUpdate, BlogRow,
};
pub use posts::{
    list_highlights_for_blog, list_posts_for_blog, replace_highlights, upsert_posts,
    HighlightRow, NewHighlight, NewPost, PostRow,
};
pub use tasks::{
    claim_task_batch, clear_batch_tasks_for_resubmit, count_tasks_by_status,
    create_task_if_absent, fail_stale_ai_tasks, get_task, list_running_batch_tasks, list_tasks,
    list_unsubmitted_ai_tasks, mark_task_done, mark_task_failed, recover_stuck_tasks, retry_task,
    set_batch_id, TaskCounts, TaskFilter, TaskRow, TaskStatus, TaskType,
};
pub use taxonomy::{
    list_category_rows, list_tag_rows, replace_blog_categories, replace_blog_tags,
    seed_taxonomy, CategoryRow, SeedCounts, TagRow,
};
