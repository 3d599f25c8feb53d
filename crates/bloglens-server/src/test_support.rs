//! Shared fixtures for server tests: a service context whose external
//! clients either point at a closed local port (fail fast, never leave
//! the machine) or at a wiremock server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use bloglens_ai::{EmbeddingClient, OpenAiBatchClient};
use bloglens_core::{AppConfig, Environment, ScraperBackendKind};
use bloglens_scraper::{HikerApiClient, Scraper};
use bloglens_storage::SupabaseStorageClient;
use sqlx::PgPool;

use crate::context::ServiceContext;

/// A port nothing listens on; connections are refused immediately.
pub(crate) const CLOSED: &str = "http://127.0.0.1:9";

pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".to_string(),
        env: Environment::Test,
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8001),
        log_level: "info".to_string(),
        taxonomy_path: PathBuf::from("./config/taxonomy.yaml"),
        api_key: "test-api-key".to_string(),
        openai_api_key: "sk-test".to_string(),
        supabase_url: CLOSED.to_string(),
        supabase_service_key: "service".to_string(),
        supabase_bucket: "blog-media".to_string(),
        scraper_backend: ScraperBackendKind::Hikerapi,
        hikerapi_token: Some("token".to_string()),
        instagrapi_url: None,
        instagrapi_token: None,
        worker_poll_interval_secs: 1,
        worker_max_concurrent: 2,
        batch_min_size: 10,
        batch_max_age_hours: 2,
        db_max_connections: 5,
        db_min_connections: 1,
        db_acquire_timeout_secs: 5,
    }
}

/// Context with every external client offline.
pub(crate) fn offline_context(pool: PgPool) -> ServiceContext {
    context_with(pool, CLOSED, CLOSED)
}

/// Context whose OpenAI clients talk to `openai_base` (a wiremock server).
pub(crate) fn openai_context(pool: PgPool, openai_base: &str) -> ServiceContext {
    context_with(pool, openai_base, CLOSED)
}

/// Context with scraper, storage, and OpenAI all pointed at one wiremock
/// server; the clients use disjoint path prefixes so mocks never collide.
pub(crate) fn wired_context(pool: PgPool, base: &str) -> ServiceContext {
    let mut ctx = context_with(pool, base, base);
    ctx.scraper = Arc::new(Scraper::Hikerapi(
        HikerApiClient::with_base_url("token", 5, base).expect("scraper client"),
    ));
    ctx
}

fn context_with(pool: PgPool, openai_base: &str, storage_base: &str) -> ServiceContext {
    let config = test_config();
    ServiceContext {
        scraper: Arc::new(Scraper::Hikerapi(
            HikerApiClient::with_base_url("token", 1, CLOSED).expect("scraper client"),
        )),
        batch_client: OpenAiBatchClient::with_base_url("sk-test", openai_base)
            .expect("batch client"),
        embedding: EmbeddingClient::with_base_url("sk-test", openai_base)
            .expect("embedding client"),
        storage: SupabaseStorageClient::new(storage_base, "service", "blog-media")
            .expect("storage client"),
        submit_lock: tokio::sync::Mutex::new(()),
        config,
        pool,
    }
}
