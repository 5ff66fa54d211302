use storage::StorageError;
use thiserror::Error;

pub type CaptionResult<T> = std::result::Result<T, CaptionError>;

/// Errors that end a run. Problems with a single image are counted in the
/// `RunSummary` instead.
#[derive(Error, Debug)]
pub enum CaptionError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("caption model failed: {0:#}")]
    Model(anyhow::Error),
}
