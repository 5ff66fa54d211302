use std::path::{Path, PathBuf};

use crate::{StorageError, StorageResult};

pub fn path_to_string(path: impl AsRef<Path>) -> StorageResult<String> {
    match path.as_ref().to_str() {
        Some(path) => Ok(path.to_string()),
        None => Err(StorageError::PathError(
            path.as_ref().to_string_lossy().into_owned(),
        )),
    }
}

/// Sibling path a file is written to before being renamed into place.
///
/// `a/b.txt` becomes `a/b.txt.tmp`, which never collides with a `.txt` target.
pub fn tmp_path_for(path: &Path) -> PathBuf {
    let mut file_name = path.file_name().unwrap_or_default().to_os_string();
    file_name.push(".tmp");
    path.with_file_name(file_name)
}
