//! Task endpoints: list, inspect, create scrape/discover work, retry.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bloglens_db::{DbError, TaskFilter, TaskRow, TaskStatus, TaskType};

use super::{map_db_error, ApiError, AppState};
use crate::middleware::RequestId;

const MAX_USERNAMES_PER_REQUEST: usize = 100;
const SCRAPE_PRIORITY: i16 = 5;
const DISCOVER_PRIORITY: i16 = 5;
const DEFAULT_MIN_FOLLOWERS: i64 = 1000;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct TaskDto {
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

impl From<TaskRow> for TaskDto {
    fn from(row: TaskRow) -> Self {
        Self {
            id: row.id,
            blog_id: row.blog_id,
            task_type: row.task_type,
            status: row.status,
            priority: row.priority,
            payload: row.payload,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            error_message: row.error_message,
            next_retry_at: row.next_retry_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub task_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskDto>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub usernames: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ScrapeEntry {
    pub task_id: Option<i64>,
    pub username: String,
    pub blog_id: i64,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    pub created: usize,
    pub skipped: usize,
    pub tasks: Vec<ScrapeEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DiscoverRequest {
    pub hashtag: String,
    pub min_followers: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    pub task_id: Option<i64>,
    pub hashtag: String,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub task_id: i64,
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(params): Query<ListParams>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let mut filter = TaskFilter::default();
    if let Some(raw) = params.status.as_deref() {
        filter.status = Some(TaskStatus::parse(raw).ok_or_else(|| {
            ApiError::new(
                req_id.0.clone(),
                "validation_error",
                format!("unknown status \"{raw}\""),
            )
        })?);
    }
    if let Some(raw) = params.task_type.as_deref() {
        filter.task_type = Some(TaskType::parse(raw).ok_or_else(|| {
            ApiError::new(
                req_id.0.clone(),
                "validation_error",
                format!("unknown task_type \"{raw}\""),
            )
        })?);
    }

    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);

    let (rows, total) = bloglens_db::list_tasks(&state.pool, filter, limit, offset)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(TaskListResponse {
        tasks: rows.into_iter().map(TaskDto::from).collect(),
        total,
        limit,
        offset,
    }))
}

pub async fn get_task(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<TaskDto>, ApiError> {
    let row = bloglens_db::get_task(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| ApiError::new(req_id.0, "not_found", format!("task {id} not found")))?;

    Ok(Json(TaskDto::from(row)))
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Strip the `@` prefix and any whitespace from a submitted username.
fn normalize_username(raw: &str) -> String {
    raw.trim().trim_start_matches('@').trim().to_owned()
}

pub async fn create_scrape_tasks(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(request): Json<ScrapeRequest>,
) -> Result<(StatusCode, Json<ScrapeResponse>), ApiError> {
    if request.usernames.is_empty() {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "usernames must not be empty",
        ));
    }
    if request.usernames.len() > MAX_USERNAMES_PER_REQUEST {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            format!("at most {MAX_USERNAMES_PER_REQUEST} usernames per request"),
        ));
    }

    let mut seen = std::collections::HashSet::new();
    let mut usernames = Vec::new();
    for raw in &request.usernames {
        let username = normalize_username(raw);
        if username.is_empty() {
            return Err(ApiError::new(
                req_id.0,
                "validation_error",
                format!("username \"{raw}\" is empty after normalization"),
            ));
        }
        if seen.insert(username.to_lowercase()) {
            usernames.push(username);
        }
    }

    let mut entries = Vec::with_capacity(usernames.len());
    let mut created = 0;
    let mut skipped = 0;

    for username in usernames {
        let blog = bloglens_db::upsert_blog_shell(&state.pool, &username)
            .await
            .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

        let task_id = bloglens_db::create_task_if_absent(
            &state.pool,
            Some(blog.id),
            TaskType::FullScrape,
            SCRAPE_PRIORITY,
            serde_json::json!({}),
        )
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

        match task_id {
            Some(_) => created += 1,
            None => skipped += 1,
        }
        entries.push(ScrapeEntry {
            task_id,
            username,
            blog_id: blog.id,
            status: if task_id.is_some() { "created" } else { "skipped" },
        });
    }

    Ok((
        StatusCode::CREATED,
        Json(ScrapeResponse {
            created,
            skipped,
            tasks: entries,
        }),
    ))
}

pub async fn create_discover_task(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(request): Json<DiscoverRequest>,
) -> Result<(StatusCode, Json<DiscoverResponse>), ApiError> {
    let hashtag = request
        .hashtag
        .trim()
        .trim_start_matches('#')
        .trim()
        .to_owned();
    if hashtag.is_empty() {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "hashtag must not be empty",
        ));
    }

    let min_followers = request.min_followers.unwrap_or(DEFAULT_MIN_FOLLOWERS);
    if min_followers < 0 {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "min_followers must not be negative",
        ));
    }

    let task_id = bloglens_db::create_task_if_absent(
        &state.pool,
        None,
        TaskType::Discover,
        DISCOVER_PRIORITY,
        serde_json::json!({ "hashtag": hashtag, "min_followers": min_followers }),
    )
    .await
    .map_err(|e| map_db_error(req_id.0, &e))?;

    Ok((
        StatusCode::CREATED,
        Json(DiscoverResponse { task_id, hashtag }),
    ))
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

pub async fn retry_task(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<RetryResponse>, ApiError> {
    let row = bloglens_db::get_task(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| {
            ApiError::new(req_id.0.clone(), "not_found", format!("task {id} not found"))
        })?;

    match bloglens_db::retry_task(&state.pool, id).await {
        Ok(()) => Ok(Json(RetryResponse { task_id: id })),
        Err(DbError::InvalidTaskTransition { .. }) => Err(ApiError::new(
            req_id.0,
            "conflict",
            format!("task {id} is {}, only failed tasks can be retried", row.status),
        )),
        Err(e) => Err(map_db_error(req_id.0, &e)),
    }
}
