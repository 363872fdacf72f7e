use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt hash record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode hash record: {0}")]
    Encode(#[source] serde_json::Error),
}
