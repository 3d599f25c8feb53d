//! The HTTP control plane: thin routing over the task queue.

mod tasks;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use bloglens_scraper::Scraper;
use serde::Serialize;
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::middleware::{
    enforce_rate_limit, request_id, require_bearer_auth, AuthState, RateLimitState, RequestId,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub scraper: Arc<Scraper>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            request_id: request_id.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "validation_error" => StatusCode::UNPROCESSABLE_ENTITY,
            "conflict" => StatusCode::CONFLICT,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub(super) fn map_db_error(request_id: String, error: &bloglens_db::DbError) -> ApiError {
    tracing::error!(error = %error, "database query failed");
    ApiError::new(request_id, "internal_error", "database query failed")
}

#[derive(Debug, Serialize)]
struct HealthData {
    status: &'static str,
    accounts_total: i64,
    accounts_available: i64,
    tasks_running: i64,
    tasks_pending: i64,
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
}

fn protected_router(auth: AuthState, rate_limit: RateLimitState) -> Router<AppState> {
    Router::new()
        .route("/api/tasks", get(tasks::list_tasks))
        .route("/api/tasks/{id}", get(tasks::get_task))
        .route("/api/tasks/scrape", post(tasks::create_scrape_tasks))
        .route("/api/tasks/discover", post(tasks::create_discover_task))
        .route("/api/tasks/{id}/retry", post(tasks::retry_task))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    rate_limit,
                    enforce_rate_limit,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    auth,
                    require_bearer_auth,
                )),
        )
}

pub fn build_app(state: AppState, auth: AuthState, rate_limit: RateLimitState) -> Router {
    let public_routes = Router::new().route("/api/health", get(health));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(auth, rate_limit))
        .layer(
            ServiceBuilder::new()
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let db_ok = bloglens_db::health_check(&state.pool).await.is_ok();
    if !db_ok {
        tracing::warn!(request_id = %req_id.0, "health check: database unavailable");
    }

    let counts = bloglens_db::count_tasks_by_status(&state.pool)
        .await
        .unwrap_or_default();
    let accounts = state.scraper.account_stats().await;

    let body = HealthData {
        status: if db_ok { "ok" } else { "degraded" },
        accounts_total: accounts.total,
        accounts_available: accounts.available,
        tasks_running: counts.running,
        tasks_pending: counts.pending,
    };

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(body))
}

pub fn default_rate_limit_state() -> RateLimitState {
    RateLimitState::new(60, Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    /// A scraper pointed at a closed local port: account stats degrade to
    /// zeros without leaving the machine.
    fn offline_scraper() -> Arc<Scraper> {
        Arc::new(Scraper::Hikerapi(
            bloglens_scraper::HikerApiClient::with_base_url("test-key", 1, "http://127.0.0.1:9")
                .expect("client"),
        ))
    }

    fn test_app(pool: sqlx::PgPool) -> Router {
        build_app(
            AppState {
                pool,
                scraper: offline_scraper(),
            },
            AuthState::disabled(),
            default_rate_limit_state(),
        )
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json parse")
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    // -------------------------------------------------------------------
    // Health
    // -------------------------------------------------------------------

    #[sqlx::test(migrations = "../../migrations")]
    async fn health_reports_queue_depth(pool: sqlx::PgPool) {
        let blog = bloglens_db::upsert_blog_shell(&pool, "healthblog").await.unwrap();
        bloglens_db::create_task_if_absent(
            &pool,
            Some(blog.id),
            bloglens_db::TaskType::FullScrape,
            5,
            serde_json::json!({}),
        )
        .await
        .unwrap();

        let response = test_app(pool)
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["tasks_pending"], 1);
        assert_eq!(json["tasks_running"], 0);
    }

    // -------------------------------------------------------------------
    // Auth
    // -------------------------------------------------------------------

    #[sqlx::test(migrations = "../../migrations")]
    async fn protected_routes_require_bearer_token(pool: sqlx::PgPool) {
        let app = build_app(
            AppState {
                pool,
                scraper: offline_scraper(),
            },
            AuthState::new("top-secret"),
            default_rate_limit_state(),
        );

        let missing = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/tasks")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/tasks")
                    .header("authorization", "Bearer nope")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let ok = app
            .oneshot(
                Request::builder()
                    .uri("/api/tasks")
                    .header("authorization", "Bearer top-secret")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(ok.status(), StatusCode::OK);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn health_is_public(pool: sqlx::PgPool) {
        let app = build_app(
            AppState {
                pool,
                scraper: offline_scraper(),
            },
            AuthState::new("top-secret"),
            default_rate_limit_state(),
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    // -------------------------------------------------------------------
    // Rate limiting
    // -------------------------------------------------------------------

    #[sqlx::test(migrations = "../../migrations")]
    async fn over_limit_requests_get_429(pool: sqlx::PgPool) {
        let app = build_app(
            AppState {
                pool,
                scraper: offline_scraper(),
            },
            AuthState::disabled(),
            RateLimitState::new(3, Duration::from_secs(60)),
        );

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/api/tasks")
                        .body(Body::empty())
                        .expect("request"),
                )
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
        }

        let limited = app
            .oneshot(
                Request::builder()
                    .uri("/api/tasks")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    // -------------------------------------------------------------------
    // Scrape endpoint
    // -------------------------------------------------------------------

    #[sqlx::test(migrations = "../../migrations")]
    async fn scrape_request_creates_blogs_and_tasks(pool: sqlx::PgPool) {
        let app = test_app(pool.clone());

        let response = app
            .oneshot(post_json(
                "/api/tasks/scrape",
                serde_json::json!({ "usernames": ["@Blogger1 ", "blogger2", "blogger1"] }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["created"], 2, "deduped usernames create two tasks");
        assert_eq!(json["skipped"], 0);

        let entries = json["tasks"].as_array().expect("tasks array");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["username"], "Blogger1");
        assert_eq!(entries[0]["status"], "created");
        assert!(entries[0]["task_id"].is_i64());
        assert!(entries[0]["blog_id"].is_i64());

        let blog = bloglens_db::get_blog_by_username(&pool, "Blogger1")
            .await
            .unwrap();
        assert!(blog.is_some(), "blog shell persisted");
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn duplicate_scrape_request_is_skipped(pool: sqlx::PgPool) {
        let app = test_app(pool);

        let first = app
            .clone()
            .oneshot(post_json(
                "/api/tasks/scrape",
                serde_json::json!({ "usernames": ["blogger1"] }),
            ))
            .await
            .expect("response");
        let first_json = body_json(first).await;
        let first_task = first_json["tasks"][0]["task_id"].as_i64().expect("task id");
        let first_blog = first_json["tasks"][0]["blog_id"].as_i64().expect("blog id");

        let second = app
            .oneshot(post_json(
                "/api/tasks/scrape",
                serde_json::json!({ "usernames": ["blogger1"] }),
            ))
            .await
            .expect("response");
        let second_json = body_json(second).await;

        assert_eq!(second_json["created"], 0);
        assert_eq!(second_json["skipped"], 1);
        assert_eq!(second_json["tasks"][0]["status"], "skipped");
        assert_eq!(
            second_json["tasks"][0]["blog_id"].as_i64(),
            Some(first_blog),
            "same blog id on both calls"
        );
        assert!(second_json["tasks"][0]["task_id"].is_null());
        assert!(first_task > 0);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn scrape_request_boundary_validation(pool: sqlx::PgPool) {
        let app = test_app(pool);

        let empty = app
            .clone()
            .oneshot(post_json(
                "/api/tasks/scrape",
                serde_json::json!({ "usernames": [] }),
            ))
            .await
            .expect("response");
        assert_eq!(empty.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let hundred: Vec<String> = (0..100).map(|i| format!("user{i}")).collect();
        let at_limit = app
            .clone()
            .oneshot(post_json(
                "/api/tasks/scrape",
                serde_json::json!({ "usernames": hundred }),
            ))
            .await
            .expect("response");
        assert_eq!(at_limit.status(), StatusCode::CREATED);

        let over: Vec<String> = (0..101).map(|i| format!("over{i}")).collect();
        let over_limit = app
            .oneshot(post_json(
                "/api/tasks/scrape",
                serde_json::json!({ "usernames": over }),
            ))
            .await
            .expect("response");
        assert_eq!(over_limit.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    // -------------------------------------------------------------------
    // Discover endpoint
    // -------------------------------------------------------------------

    #[sqlx::test(migrations = "../../migrations")]
    async fn discover_strips_hash_and_creates_task(pool: sqlx::PgPool) {
        let app = test_app(pool.clone());

        let response = app
            .oneshot(post_json(
                "/api/tasks/discover",
                serde_json::json!({ "hashtag": "#travel" }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["hashtag"], "travel");
        let task_id = json["task_id"].as_i64().expect("task id");

        let task = bloglens_db::get_task(&pool, task_id).await.unwrap().unwrap();
        assert_eq!(task.hashtag(), Some("travel"));
        assert_eq!(task.min_followers(), Some(1000), "default min_followers");
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn discover_rejects_empty_hashtag(pool: sqlx::PgPool) {
        let app = test_app(pool);

        let response = app
            .oneshot(post_json(
                "/api/tasks/discover",
                serde_json::json!({ "hashtag": "#" }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    // -------------------------------------------------------------------
    // Task reads and retry
    // -------------------------------------------------------------------

    #[sqlx::test(migrations = "../../migrations")]
    async fn get_unknown_task_is_404(pool: sqlx::PgPool) {
        let app = test_app(pool);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/tasks/999999")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn list_tasks_filters_and_paginates(pool: sqlx::PgPool) {
        let blog = bloglens_db::upsert_blog_shell(&pool, "listblog").await.unwrap();
        bloglens_db::create_task_if_absent(
            &pool,
            Some(blog.id),
            bloglens_db::TaskType::FullScrape,
            5,
            serde_json::json!({}),
        )
        .await
        .unwrap();

        let app = test_app(pool);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/tasks?status=pending&task_type=full_scrape&limit=5")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["total"], 1);
        assert_eq!(json["limit"], 5);
        assert_eq!(json["offset"], 0);
        assert_eq!(json["tasks"][0]["task_type"], "full_scrape");

        let bad_filter = app
            .oneshot(
                Request::builder()
                    .uri("/api/tasks?status=sideways")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(bad_filter.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn retry_only_requeues_failed_tasks(pool: sqlx::PgPool) {
        let blog = bloglens_db::upsert_blog_shell(&pool, "retryblog").await.unwrap();
        let task_id = bloglens_db::create_task_if_absent(
            &pool,
            Some(blog.id),
            bloglens_db::TaskType::FullScrape,
            5,
            serde_json::json!({}),
        )
        .await
        .unwrap()
        .unwrap();

        let app = test_app(pool.clone());

        // Pending task: retry is a conflict.
        let conflict = app
            .clone()
            .oneshot(post_json(
                &format!("/api/tasks/{task_id}/retry"),
                serde_json::json!({}),
            ))
            .await
            .expect("response");
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        bloglens_db::claim_task_batch(&pool, 1).await.unwrap();
        bloglens_db::mark_task_failed(&pool, task_id, "boom", false)
            .await
            .unwrap();

        let ok = app
            .clone()
            .oneshot(post_json(
                &format!("/api/tasks/{task_id}/retry"),
                serde_json::json!({}),
            ))
            .await
            .expect("response");
        assert_eq!(ok.status(), StatusCode::OK);
        let json = body_json(ok).await;
        assert_eq!(json["task_id"].as_i64(), Some(task_id));

        let unknown = app
            .oneshot(post_json("/api/tasks/424242/retry", serde_json::json!({})))
            .await
            .expect("response");
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }
}
