use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("embedding has {got} dimensions, expected {expected}")]
    EmbeddingShape { got: usize, expected: usize },

    #[error("batch {batch_id} reported completed without an output file")]
    MissingOutputFile { batch_id: String },
}
