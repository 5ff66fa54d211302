use opendal::Error as OpenDalError;
use thiserror::Error;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    OpenDalError(#[from] OpenDalError),

    #[error("Storage io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Path error: {0}")]
    PathError(String),

    #[error("Storage root is not a directory: {0}")]
    NotADirectory(String),
}
