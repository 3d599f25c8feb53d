pub mod app_config;
pub mod config;
pub mod taxonomy;

pub use app_config::{AppConfig, Environment, ScraperBackendKind};
pub use config::{load_app_config, load_app_config_from_env};
pub use taxonomy::{
    load_taxonomy, normalize_key, similarity, CategoryDef, ResolvedCategory, TagGroup,
    TaxonomyFile, TaxonomyIndex,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var: {0}")]
    MissingEnvVar(String),

    #[error("invalid env var {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read taxonomy file {path}: {source}")]
    TaxonomyFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse taxonomy file: {0}")]
    TaxonomyFileParse(#[source] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),
}
