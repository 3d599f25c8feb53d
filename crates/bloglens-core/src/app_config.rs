use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Which scraping backend serves profile and hashtag requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScraperBackendKind {
    Hikerapi,
    Instagrapi,
}

impl std::fmt::Display for ScraperBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScraperBackendKind::Hikerapi => write!(f, "hikerapi"),
            ScraperBackendKind::Instagrapi => write!(f, "instagrapi"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub taxonomy_path: PathBuf,
    pub api_key: String,
    pub openai_api_key: String,
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub supabase_bucket: String,
    pub scraper_backend: ScraperBackendKind,
    pub hikerapi_token: Option<String>,
    pub instagrapi_url: Option<String>,
    pub instagrapi_token: Option<String>,
    pub worker_poll_interval_secs: u64,
    pub worker_max_concurrent: usize,
    pub batch_min_size: usize,
    pub batch_max_age_hours: i64,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("taxonomy_path", &self.taxonomy_path)
            .field("database_url", &"[redacted]")
            .field("api_key", &"[redacted]")
            .field("openai_api_key", &"[redacted]")
            .field("supabase_url", &self.supabase_url)
            .field("supabase_service_key", &"[redacted]")
            .field("supabase_bucket", &self.supabase_bucket)
            .field("scraper_backend", &self.scraper_backend)
            .field(
                "hikerapi_token",
                &self.hikerapi_token.as_ref().map(|_| "[redacted]"),
            )
            .field("instagrapi_url", &self.instagrapi_url)
            .field(
                "instagrapi_token",
                &self.instagrapi_token.as_ref().map(|_| "[redacted]"),
            )
            .field("worker_poll_interval_secs", &self.worker_poll_interval_secs)
            .field("worker_max_concurrent", &self.worker_max_concurrent)
            .field("batch_min_size", &self.batch_min_size)
            .field("batch_max_age_hours", &self.batch_max_age_hours)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .finish()
    }
}
