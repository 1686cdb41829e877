use std::path::{Path, PathBuf};

use crate::types::TreeError;
use thiserror::Error;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Page image not found at the specified path.
    #[error("page image not found: {0}")]
    MissingImage(PathBuf),
    /// Custom error message.
    #[error("{0}")]
    Message(String),
    /// Storage or traversal error.
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_image(path: impl AsRef<Path>) -> Self {
        AdminError::MissingImage(path.as_ref().to_path_buf())
    }
}
