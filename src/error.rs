use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    /// A camera identifier without a trailing `_<integer>` token.
    #[error("cannot parse camera id from {raw:?}: {reason}")]
    Parse { raw: String, reason: String },
    #[error("empty batch: {0}")]
    EmptyBatch(String),
    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        expected: usize,
        found: usize,
        context: String,
    },
    #[error("proxy label {label} out of range for memory bank with {len} proxies")]
    UnknownProxy { label: usize, len: usize },
    /// Only raised when strict k is requested; the default is to return fewer neighbors.
    #[error("requested {requested} nearest negatives but only {available} candidates exist")]
    InsufficientCandidates { requested: usize, available: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn dim_mismatch(expected: usize, found: usize, context: impl Into<String>) -> Self {
        Error::DimensionMismatch {
            expected,
            found,
            context: context.into(),
        }
    }
}
