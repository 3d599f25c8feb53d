//! The task queue: durable background work items with priorities,
//! atomic claiming, and exponential-backoff retries.
//!
//! All state transitions live here; handlers never update task rows
//! directly. Claiming and create-if-absent are single statements so they
//! stay correct under concurrent workers (see the partial unique index and
//! `FOR UPDATE SKIP LOCKED` subselect in the tasks migration).

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row and enum types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    FullScrape,
    AiAnalysis,
    Discover,
}

impl TaskType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::FullScrape => "full_scrape",
            TaskType::AiAnalysis => "ai_analysis",
            TaskType::Discover => "discover",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full_scrape" => Some(TaskType::FullScrape),
            "ai_analysis" => Some(TaskType::AiAnalysis),
            "discover" => Some(TaskType::Discover),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "done" => Some(TaskStatus::Done),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row from the `tasks` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRow {
    pub id: i64,
    pub blog_id: Option<i64>,
    pub task_type: String,
    pub status: String,
    pub priority: i16,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TaskRow {
    #[must_use]
    pub fn task_type(&self) -> Option<TaskType> {
        TaskType::parse(&self.task_type)
    }

    #[must_use]
    pub fn status(&self) -> Option<TaskStatus> {
        TaskStatus::parse(&self.status)
    }

    /// The provider batch id stamped on submitted ai_analysis tasks.
    #[must_use]
    pub fn batch_id(&self) -> Option<&str> {
        self.payload.get("batch_id").and_then(|v| v.as_str())
    }

    /// Whether this ai_analysis task must be re-submitted without images.
    #[must_use]
    pub fn text_only(&self) -> bool {
        self.payload
            .get("text_only")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn hashtag(&self) -> Option<&str> {
        self.payload.get("hashtag").and_then(|v| v.as_str())
    }

    #[must_use]
    pub fn min_followers(&self) -> Option<i64> {
        self.payload
            .get("min_followers")
            .and_then(serde_json::Value::as_i64)
    }
}

const TASK_COLUMNS: &str = "id, blog_id, task_type, status, priority, payload, attempts, \
     max_attempts, error_message, next_retry_at, started_at, completed_at, created_at";

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Create a task unless a non-terminal task for the same `(blog_id, task_type)`
/// already exists.
///
/// A single conditional insert against the partial unique index, so two
/// concurrent creators produce exactly one row. Returns the new task id, or
/// `None` when an active duplicate suppressed the insert.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on storage failure.
pub async fn create_task_if_absent(
    pool: &PgPool,
    blog_id: Option<i64>,
    task_type: TaskType,
    priority: i16,
    payload: serde_json::Value,
) -> Result<Option<i64>, DbError> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO tasks (blog_id, task_type, priority, payload) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (blog_id, task_type) WHERE status IN ('pending', 'running') \
         DO NOTHING \
         RETURNING id",
    )
    .bind(blog_id)
    .bind(task_type.as_str())
    .bind(priority)
    .bind(payload)
    .fetch_optional(pool)
    .await?;

    Ok(id)
}

// ---------------------------------------------------------------------------
// Claiming
// ---------------------------------------------------------------------------

/// Atomically claim up to `limit` eligible pending tasks.
///
/// Eligible means `status = 'pending'` and no retry delay still in force.
/// Claimed tasks move to `running` with `started_at = NOW()` and an
/// incremented attempt counter (capped at `max_attempts` so a manual retry
/// of an exhausted task cannot push the counter past the budget). The
/// `FOR UPDATE SKIP LOCKED` subselect makes concurrent claimers grab
/// disjoint sets; rows are returned in queue order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on storage failure.
pub async fn claim_task_batch(pool: &PgPool, limit: i64) -> Result<Vec<TaskRow>, DbError> {
    let mut rows = sqlx::query_as::<_, TaskRow>(&format!(
        "UPDATE tasks SET \
             status = 'running', \
             started_at = NOW(), \
             attempts = LEAST(attempts + 1, max_attempts) \
         WHERE id IN ( \
             SELECT id FROM tasks \
             WHERE status = 'pending' \
               AND (next_retry_at IS NULL OR next_retry_at <= NOW()) \
             ORDER BY priority ASC, created_at ASC \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING {TASK_COLUMNS}"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    // UPDATE … RETURNING does not guarantee ordering; restore queue order
    // for dispatch.
    rows.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.created_at.cmp(&b.created_at))
    });

    Ok(rows)
}

// ---------------------------------------------------------------------------
// Terminal transitions
// ---------------------------------------------------------------------------

/// Mark a running task as done.
///
/// # Errors
///
/// Returns [`DbError::InvalidTaskTransition`] if the task is not `running`,
/// or [`DbError::Sqlx`] on storage failure.
pub async fn mark_task_done(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'done', completed_at = NOW(), error_message = NULL \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidTaskTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Fail a running task.
///
/// With `retry = true` and remaining budget, the task returns to `pending`
/// with `next_retry_at = NOW() + 5 · 3^(attempts−1)` minutes. Otherwise it
/// finalises as `failed` with `completed_at` set. Returns the resulting
/// status.
///
/// # Errors
///
/// Returns [`DbError::InvalidTaskTransition`] if the task is not `running`,
/// or [`DbError::Sqlx`] on storage failure.
pub async fn mark_task_failed(
    pool: &PgPool,
    id: i64,
    error: &str,
    retry: bool,
) -> Result<TaskStatus, DbError> {
    let status: Option<String> = sqlx::query_scalar(
        "UPDATE tasks SET \
             status = CASE WHEN $2 AND attempts < max_attempts \
                           THEN 'pending' ELSE 'failed' END, \
             error_message = $3, \
             next_retry_at = CASE WHEN $2 AND attempts < max_attempts \
                 THEN NOW() + make_interval(mins => (5 * power(3, attempts - 1))::int) \
                 ELSE NULL END, \
             completed_at = CASE WHEN $2 AND attempts < max_attempts \
                 THEN NULL ELSE NOW() END \
         WHERE id = $1 AND status = 'running' \
         RETURNING status",
    )
    .bind(id)
    .bind(retry)
    .bind(error)
    .fetch_optional(pool)
    .await?;

    let status = status.ok_or(DbError::InvalidTaskTransition {
        id,
        expected_status: "running",
    })?;

    Ok(TaskStatus::parse(&status).unwrap_or(TaskStatus::Failed))
}

/// Re-queue a task that has exhausted its attempts.
///
/// Only valid from `failed`. Clears the retry delay and the terminal
/// timestamp but keeps `attempts`; the budget is not replenished.
///
/// # Errors
///
/// Returns [`DbError::InvalidTaskTransition`] if the task is not `failed`,
/// or [`DbError::Sqlx`] on storage failure.
pub async fn retry_task(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', next_retry_at = NULL, completed_at = NULL \
         WHERE id = $1 AND status = 'failed'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidTaskTransition {
            id,
            expected_status: "failed",
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Fetch a single task by id, or `None` if absent.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_task(pool: &PgPool, id: i64) -> Result<Option<TaskRow>, DbError> {
    let row = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Input filters for task listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
}

/// List tasks newest-first with optional status/type filters.
///
/// Returns the page plus the total row count for the same predicate.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if either query fails.
pub async fn list_tasks(
    pool: &PgPool,
    filter: TaskFilter,
    limit: i64,
    offset: i64,
) -> Result<(Vec<TaskRow>, i64), DbError> {
    let status = filter.status.map(TaskStatus::as_str);
    let task_type = filter.task_type.map(TaskType::as_str);

    let rows = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks \
         WHERE ($1::TEXT IS NULL OR status = $1) \
           AND ($2::TEXT IS NULL OR task_type = $2) \
         ORDER BY created_at DESC \
         LIMIT $3 OFFSET $4"
    ))
    .bind(status)
    .bind(task_type)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tasks \
         WHERE ($1::TEXT IS NULL OR status = $1) \
           AND ($2::TEXT IS NULL OR task_type = $2)",
    )
    .bind(status)
    .bind(task_type)
    .fetch_one(pool)
    .await?;

    Ok((rows, total))
}

/// Queue depth by status, for the health endpoint.
#[derive(Debug, Clone, Copy, Default, sqlx::FromRow)]
pub struct TaskCounts {
    pub pending: i64,
    pub running: i64,
    pub done: i64,
    pub failed: i64,
}

/// Count tasks grouped by status in one round-trip.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_tasks_by_status(pool: &PgPool) -> Result<TaskCounts, DbError> {
    let counts = sqlx::query_as::<_, TaskCounts>(
        "SELECT \
             COUNT(*) FILTER (WHERE status = 'pending') AS pending, \
             COUNT(*) FILTER (WHERE status = 'running') AS running, \
             COUNT(*) FILTER (WHERE status = 'done') AS done, \
             COUNT(*) FILTER (WHERE status = 'failed') AS failed \
         FROM tasks",
    )
    .fetch_one(pool)
    .await?;

    Ok(counts)
}

// ---------------------------------------------------------------------------
// AI batch bookkeeping
// ---------------------------------------------------------------------------

/// Running ai_analysis tasks not yet attached to a provider batch,
/// oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_unsubmitted_ai_tasks(pool: &PgPool) -> Result<Vec<TaskRow>, DbError> {
    let rows = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks \
         WHERE status = 'running' \
           AND task_type = 'ai_analysis' \
           AND payload ->> 'batch_id' IS NULL \
         ORDER BY started_at ASC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Running ai_analysis tasks already attached to a provider batch.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_running_batch_tasks(pool: &PgPool) -> Result<Vec<TaskRow>, DbError> {
    let rows = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks \
         WHERE status = 'running' \
           AND task_type = 'ai_analysis' \
           AND payload ->> 'batch_id' IS NOT NULL \
         ORDER BY started_at ASC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Stamp the provider batch id onto every listed task's payload.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn set_batch_id(pool: &PgPool, ids: &[i64], batch_id: &str) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET payload = payload || jsonb_build_object('batch_id', $2::text) \
         WHERE id = ANY($1) AND status = 'running'",
    )
    .bind(ids)
    .bind(batch_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Fail every running task of a provider batch that was reported
/// failed/expired/cancelled, detaching the dead batch id so the tasks
/// can be resubmitted on their next claim.
///
/// Retry semantics match [`mark_task_failed`] with `retry = true`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn clear_batch_tasks_for_resubmit(
    pool: &PgPool,
    batch_id: &str,
    error: &str,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE tasks SET \
             status = CASE WHEN attempts < max_attempts THEN 'pending' ELSE 'failed' END, \
             error_message = $2, \
             payload = payload - 'batch_id', \
             next_retry_at = CASE WHEN attempts < max_attempts \
                 THEN NOW() + make_interval(mins => (5 * power(3, attempts - 1))::int) \
                 ELSE NULL END, \
             completed_at = CASE WHEN attempts < max_attempts THEN NULL ELSE NOW() END \
         WHERE status = 'running' \
           AND task_type = 'ai_analysis' \
           AND payload ->> 'batch_id' = $1",
    )
    .bind(batch_id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

/// Return tasks stuck in `running` longer than `stuck_after_minutes` to
/// `pending`.
///
/// Excludes `ai_analysis`: those tasks legitimately sit in `running` for up
/// to a day while their provider batch completes, and the stale-batch sweep
/// owns their recovery.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn recover_stuck_tasks(
    pool: &PgPool,
    stuck_after_minutes: i32,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', started_at = NULL \
         WHERE status = 'running' \
           AND task_type <> 'ai_analysis' \
           AND started_at < NOW() - make_interval(mins => $1)",
    )
    .bind(stuck_after_minutes)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Fail running ai_analysis tasks whose claim is older than
/// `stale_after_hours`, with retry semantics and batch detachment as in
/// [`clear_batch_tasks_for_resubmit`].
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn fail_stale_ai_tasks(pool: &PgPool, stale_after_hours: i32) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE tasks SET \
             status = CASE WHEN attempts < max_attempts THEN 'pending' ELSE 'failed' END, \
             error_message = 'ai batch did not complete within the deadline', \
             payload = payload - 'batch_id', \
             next_retry_at = CASE WHEN attempts < max_attempts \
                 THEN NOW() + make_interval(mins => (5 * power(3, attempts - 1))::int) \
                 ELSE NULL END, \
             completed_at = CASE WHEN attempts < max_attempts THEN NULL ELSE NOW() END \
         WHERE status = 'running' \
           AND task_type = 'ai_analysis' \
           AND started_at < NOW() - make_interval(hours => $1)",
    )
    .bind(stale_after_hours)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_round_trips() {
        for t in [TaskType::FullScrape, TaskType::AiAnalysis, TaskType::Discover] {
            assert_eq!(TaskType::parse(t.as_str()), Some(t));
        }
        assert_eq!(TaskType::parse("unknown"), None);
    }

    #[test]
    fn task_status_terminality() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn payload_accessors_read_known_keys() {
        let row = TaskRow {
            id: 1,
            blog_id: Some(7),
            task_type: "ai_analysis".to_string(),
            status: "running".to_string(),
            priority: 3,
            payload: serde_json::json!({
                "batch_id": "batch_abc",
                "text_only": true,
                "hashtag": "travel",
                "min_followers": 5000,
            }),
            attempts: 1,
            max_attempts: 3,
            error_message: None,
            next_retry_at: None,
            started_at: None,
            completed_at: None,
            created_at: chrono::Utc::now(),
        };

        assert_eq!(row.batch_id(), Some("batch_abc"));
        assert!(row.text_only());
        assert_eq!(row.hashtag(), Some("travel"));
        assert_eq!(row.min_followers(), Some(5000));
    }

    #[test]
    fn payload_accessors_default_when_absent() {
        let row = TaskRow {
            id: 2,
            blog_id: None,
            task_type: "discover".to_string(),
            status: "pending".to_string(),
            priority: 5,
            payload: serde_json::json!({}),
            attempts: 0,
            max_attempts: 3,
            error_message: None,
            next_retry_at: None,
            started_at: None,
            completed_at: None,
            created_at: chrono::Utc::now(),
        };

        assert_eq!(row.batch_id(), None);
        assert!(!row.text_only());
        assert_eq!(row.hashtag(), None);
        assert_eq!(row.min_followers(), None);
    }
}
