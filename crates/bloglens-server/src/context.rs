//! Shared service context wiring the external clients to the pool.

use std::sync::Arc;

use bloglens_ai::{EmbeddingClient, OpenAiBatchClient};
use bloglens_core::AppConfig;
use bloglens_scraper::{build_scraper, Scraper};
use bloglens_storage::SupabaseStorageClient;
use sqlx::PgPool;

pub struct ServiceContext {
    pub config: AppConfig,
    pub pool: PgPool,
    pub scraper: Arc<Scraper>,
    pub batch_client: OpenAiBatchClient,
    pub embedding: EmbeddingClient,
    pub storage: SupabaseStorageClient,
    /// Serialises batch submission; overlapping triggers (handler + poll
    /// job) must not double-submit the same unattached tasks.
    pub submit_lock: tokio::sync::Mutex<()>,
}

impl ServiceContext {
    /// Construct every external client from config.
    ///
    /// # Errors
    ///
    /// Returns an error when any underlying HTTP client cannot be built.
    pub fn build(config: AppConfig, pool: PgPool) -> anyhow::Result<Self> {
        let scraper = Arc::new(build_scraper(&config)?);
        let batch_client = OpenAiBatchClient::new(&config.openai_api_key)?;
        let embedding = EmbeddingClient::new(&config.openai_api_key)?;
        let storage = SupabaseStorageClient::new(
            &config.supabase_url,
            &config.supabase_service_key,
            &config.supabase_bucket,
        )?;

        Ok(Self {
            config,
            pool,
            scraper,
            batch_client,
            embedding,
            storage,
            submit_lock: tokio::sync::Mutex::new(()),
        })
    }
}
