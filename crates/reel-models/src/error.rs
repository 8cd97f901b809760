//! Model validation errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Invalid reel id: {0}")]
    InvalidReelId(String),

    #[error("Invalid render context: {0}")]
    InvalidContext(String),
}
