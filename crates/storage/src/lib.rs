mod error;
mod utils;

pub use error::{StorageError, StorageResult};
pub use opendal::Buffer;
use opendal::{services::Fs, Operator};
use std::path::{Path, PathBuf};
pub use utils::{path_to_string, tmp_path_for};

/// Filesystem storage rooted at one directory. All paths are relative to the root.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    op: Operator,
}

impl Storage {
    pub fn new_fs(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = std::fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(StorageError::NotADirectory(
                root.to_string_lossy().into_owned(),
            ));
        }

        let mut builder = Fs::default();
        builder.root(path_to_string(&root)?.as_str());
        let op: Operator = Operator::new(builder)?.finish();

        Ok(Self { root, op })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a relative storage path, for logging.
    pub fn get_actual_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    pub async fn is_exist(&self, path: impl AsRef<Path>) -> StorageResult<bool> {
        let path = path_to_string(path)?;
        self.op
            .is_exist(path.as_str())
            .await
            .map_err(StorageError::from)
    }

    pub async fn read(&self, path: impl AsRef<Path>) -> StorageResult<Vec<u8>> {
        let path = path_to_string(path)?;
        self.op
            .read(path.as_str())
            .await
            .map(|bs| bs.to_vec())
            .map_err(StorageError::from)
    }

    // list regular files directly under path, no recursion
    // accept relative path like "path/" "path" ""
    pub async fn list_files(&self, path: impl AsRef<Path>) -> StorageResult<Vec<PathBuf>> {
        let path = path_to_string(path)?;
        let path = if path.is_empty() || path.ends_with('/') {
            format!("{}/", path.trim_end_matches('/'))
        } else {
            format!("{}/", path)
        };

        let entries = self.op.list(path.as_str()).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.metadata().mode().is_file())
            .map(|entry| PathBuf::from(entry.path()))
            .collect())
    }

    /// Writes `bs` to `path` so that readers only ever see the old state or the complete
    /// new content: the data goes to a `.tmp` sibling first and is renamed into place.
    pub async fn write_atomic(
        &self,
        path: impl AsRef<Path>,
        bs: impl Into<Buffer>,
    ) -> StorageResult<()> {
        let target = path_to_string(path.as_ref())?;
        let tmp = path_to_string(tmp_path_for(path.as_ref()))?;

        let result = match self.op.write(tmp.as_str(), bs).await {
            Ok(()) => self.op.rename(tmp.as_str(), target.as_str()).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if let Err(cleanup) = self.op.delete(tmp.as_str()).await {
                tracing::warn!("failed to remove temporary file {}: {}", tmp, cleanup);
            }
            return Err(e.into());
        }

        Ok(())
    }
}
