mod error;
mod extract;
mod normalize;
mod record;
mod runner;
mod summary;

pub use error::{CaptionError, CaptionResult};
pub use extract::{Caption, CaptionExtractor, Extraction};
pub use normalize::{TextNormalizer, DEFAULT_BOILERPLATE};
pub use record::{scan_images, ImageExtension, ImageRecord, CAPTION_EXTENSION};
pub use runner::{caption_directory, BatchRunner};
pub use summary::{ImageOutcome, RunSummary};

pub use ai::{CaptionTask, ImageCaptionInput, ImageCaptionModel, RawModelOutput};
pub use tokio_util::sync::CancellationToken;
