use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("unknown stream part tag: {0:?}")]
    UnknownTag(String),
    #[error("payload is not valid json: {0}")]
    BadPayload(#[from] serde_json::Error),
}
