//! AI batch pipeline building blocks: the strict insights schema, the
//! per-profile batch request builder, the OpenAI Batch/Files client, and
//! the embedding producer.
//!
//! This crate never touches the database; the server crate wires these
//! pieces to the task queue and the domain tables.

pub mod batch;
pub mod embedding;
pub mod error;
pub mod insights;
pub mod request;

pub use batch::{BatchState, OpenAiBatchClient, ProviderBatch};
pub use embedding::{render_insights_text, EmbeddingClient, EMBEDDING_DIM, EMBEDDING_MODEL};
pub use error::AiError;
pub use insights::{
    insights_json_schema, parse_output_line, AiInsights, AudienceInference, BatchOutcome,
    BatchOutputLine, BloggerProfile, Commercial, ContentInsights, EngagementQuality, Lifestyle,
    MarketingValue, PageType,
};
pub use request::{
    build_batch_request, data_quality_hint, render_profile_text, CatalogCategory, PostSummary,
    ProfileContext, TaxonomyCatalog, ANALYSIS_MODEL, MAX_IMAGES,
};
