use thiserror::Error;

/// Failure of one fetch cycle. Aborts the cycle; the last good snapshot stays served.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return FetchError::MalformedPayload(err.to_string());
        }
        FetchError::Transport(err.to_string())
    }
}

/// Field-level defect on a single raw record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordDefect {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has the wrong type (expected {expected})")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field `{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("duplicate customer id {0}")]
    DuplicateId(String),
}

/// A record the normalizer dropped, with where it sat in the payload.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed record at index {index}: {defect}")]
pub struct MalformedRecord {
    pub index: usize,
    pub id: Option<String>,
    pub defect: RecordDefect,
}

pub type FetchResult<T> = Result<T, FetchError>;
