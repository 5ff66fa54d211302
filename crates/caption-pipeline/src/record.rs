use std::path::{Path, PathBuf};
use storage::{Storage, StorageResult};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

pub const CAPTION_EXTENSION: &str = "txt";

/// Image formats picked up by a run, recognized by the end of the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, EnumIter, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ImageExtension {
    Jpg,
    Jpeg,
    Png,
}

impl ImageExtension {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_lowercase();
        ImageExtension::iter().find(|ext| name.ends_with(&format!(".{}", ext)))
    }
}

/// A candidate image, relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub extension: ImageExtension,
    pub caption_path: PathBuf,
}

impl ImageRecord {
    /// Returns `None` for files that are not a recognized image.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let extension = ImageExtension::from_path(&path)?;
        let caption_path = path.with_extension(CAPTION_EXTENSION);
        Some(Self {
            path,
            extension,
            caption_path,
        })
    }

    /// Whether a caption file sits next to the image. Its presence marks the image as
    /// done; the content is never inspected.
    pub async fn has_caption(&self, storage: &Storage) -> StorageResult<bool> {
        storage.is_exist(&self.caption_path).await
    }
}

/// Lists the candidate images under the storage root, sorted by path.
pub async fn scan_images(storage: &Storage) -> StorageResult<Vec<ImageRecord>> {
    let mut records: Vec<ImageRecord> = storage
        .list_files("")
        .await?
        .into_iter()
        .filter_map(ImageRecord::from_path)
        .collect();
    records.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(records)
}
