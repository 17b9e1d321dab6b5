use std::io;
use std::path::Path;

use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum EsErrorKind {
    #[error("append rejected: {0}")]
    AppendRejected(String),
    #[error("io error at {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("compression failed for {path}: {reason}")]
    CompressFailed { path: String, reason: String },
    #[error("invalid retention policy: {0}")]
    InvalidPolicy(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Clone, Debug, Error)]
#[error(transparent)]
pub struct EsError(pub EsErrorKind);

impl EsError {
    pub fn new(kind: EsErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &EsErrorKind {
        &self.0
    }

    pub fn io(path: &Path, err: io::Error) -> Self {
        Self(EsErrorKind::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        })
    }

    pub fn invalid_policy(reason: impl Into<String>) -> Self {
        Self(EsErrorKind::InvalidPolicy(reason.into()))
    }
}

impl From<EsErrorKind> for EsError {
    fn from(kind: EsErrorKind) -> Self {
        EsError(kind)
    }
}
