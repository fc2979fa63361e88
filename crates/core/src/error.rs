use crate::document::Stage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[{file}] cannot {stage} before the document is {required}")]
    Precondition {
        file: String,
        stage: Stage,
        required: &'static str,
    },

    #[error("[{file}] {stage} has already been done")]
    AlreadyComplete { file: String, stage: Stage },

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("[{file}] pdf extraction failed: {reason}")]
    Extraction { file: String, reason: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("unknown document: {0}")]
    UnknownDocument(String),

    #[error("index error: {0}")]
    Index(#[from] SearchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PreconditionViolation,
    ExtractionFailure,
    ConfigurationError,
    Other,
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Precondition { .. } | IngestError::AlreadyComplete { .. } => {
                ErrorKind::PreconditionViolation
            }
            IngestError::Extraction { .. } | IngestError::PdfParse(_) | IngestError::Io(_) => {
                ErrorKind::ExtractionFailure
            }
            IngestError::Configuration(_) => ErrorKind::ConfigurationError,
            IngestError::Tokenizer(_)
            | IngestError::UnknownDocument(_)
            | IngestError::Index(_) => ErrorKind::Other,
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] SearchError),

    #[error("generation request failed: {0}")]
    Generation(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("malformed stream event: {0}")]
    Stream(#[from] serde_json::Error),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
