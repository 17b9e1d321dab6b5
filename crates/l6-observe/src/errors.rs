use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ObserveError {
    #[error("invalid observe policy: {0}")]
    InvalidPolicy(String),
}
