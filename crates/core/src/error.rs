use thiserror::Error;

/// Coarse classification shared by every error type in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A credential or setting is missing. Fatal to the operation, never retried.
    Configuration,
    NotFound,
    Validation,
    /// Transient upstream failure.
    Provider,
    EmptyResult,
    EmbeddingFailure,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not configured: {0}")]
    Configuration(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {provider}: {details}")]
    Response { provider: String, details: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            _ => ErrorKind::Provider,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid index input: {0}")]
    Validation(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            _ => ErrorKind::Provider,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("raw source not found: {0}")]
    NotFound(String),

    #[error("no chunks produced for {0}")]
    EmptyResult(String),

    #[error("no chunk of {partition} could be embedded ({attempted} attempted)")]
    EmbeddingFailure { partition: String, attempted: usize },

    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vector index error: {0}")]
    Store(#[from] StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::EmptyResult(_) => ErrorKind::EmptyResult,
            Self::EmbeddingFailure { .. } => ErrorKind::EmbeddingFailure,
            Self::Validation(_) | Self::Regex(_) => ErrorKind::Validation,
            Self::Io(_) => ErrorKind::Provider,
            Self::Store(error) => error.kind(),
            Self::Provider(error) => error.kind(),
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
