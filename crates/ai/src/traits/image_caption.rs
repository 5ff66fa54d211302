use super::AIModel;
use image::DynamicImage;
use std::{collections::HashMap, sync::Arc};
use strum_macros::{Display, EnumIter, EnumString};

/// Which kind of caption is requested from the model.
///
/// Parsed case-insensitively from the task identifier (`<DETAILED_CAPTION>`,
/// `detailed_caption`, `detailed`, ...). The displayed form is the output key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, Display)]
#[strum(ascii_case_insensitive)]
pub enum CaptionTask {
    #[strum(
        to_string = "<CAPTION>",
        serialize = "caption",
        serialize = "brief",
        serialize = "short"
    )]
    Caption,
    #[strum(
        to_string = "<DETAILED_CAPTION>",
        serialize = "detailed_caption",
        serialize = "detailed"
    )]
    DetailedCaption,
    #[strum(
        to_string = "<MORE_DETAILED_CAPTION>",
        serialize = "more_detailed_caption",
        serialize = "more_detailed"
    )]
    MoreDetailedCaption,
}

impl CaptionTask {
    /// Key under which a model stores the text generated for this task.
    pub fn output_key(&self) -> &'static str {
        match self {
            CaptionTask::Caption => "<CAPTION>",
            CaptionTask::DetailedCaption => "<DETAILED_CAPTION>",
            CaptionTask::MoreDetailedCaption => "<MORE_DETAILED_CAPTION>",
        }
    }

    /// Instruction used by prompt-driven captioners.
    pub fn prompt(&self) -> &'static str {
        match self {
            CaptionTask::Caption => "Describe the image in one short sentence.",
            CaptionTask::DetailedCaption => "Describe the image.",
            CaptionTask::MoreDetailedCaption => {
                "Describe the image in detail, including the subjects, their colors, the background and the style."
            }
        }
    }
}

/// One decoded image together with the task to run on it.
///
/// `width` and `height` are the dimensions of the decoded image, for models that
/// post-process region-based output.
#[derive(Debug, Clone)]
pub struct ImageCaptionInput {
    pub image: Arc<DynamicImage>,
    pub task: CaptionTask,
    pub width: u32,
    pub height: u32,
}

impl ImageCaptionInput {
    pub fn new(image: DynamicImage, task: CaptionTask) -> Self {
        let (width, height) = (image.width(), image.height());
        Self {
            image: Arc::new(image),
            task,
            width,
            height,
        }
    }
}

/// Generated text keyed by [`CaptionTask::output_key`], plus any extra keys the
/// model emits.
pub type RawModelOutput = HashMap<String, String>;
pub type ImageCaptionModel = AIModel<ImageCaptionInput, RawModelOutput>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn parses_task_identifiers() {
        for (input, expected) in [
            ("<DETAILED_CAPTION>", CaptionTask::DetailedCaption),
            ("<detailed_caption>", CaptionTask::DetailedCaption),
            ("detailed", CaptionTask::DetailedCaption),
            ("<CAPTION>", CaptionTask::Caption),
            ("Brief", CaptionTask::Caption),
            ("short", CaptionTask::Caption),
            ("more_detailed", CaptionTask::MoreDetailedCaption),
        ] {
            assert_eq!(CaptionTask::from_str(input).expect(input), expected);
        }

        assert!(CaptionTask::from_str("<OCR>").is_err());
        assert!(CaptionTask::from_str("").is_err());
    }

    #[test]
    fn display_matches_output_key() {
        for task in CaptionTask::iter() {
            assert_eq!(task.to_string(), task.output_key());
            assert_eq!(CaptionTask::from_str(task.output_key()).unwrap(), task);
        }
    }

    #[test]
    fn input_records_image_dimensions() {
        let image = DynamicImage::new_rgb8(7, 3);
        let input = ImageCaptionInput::new(image, CaptionTask::Caption);
        assert_eq!((input.width, input.height), (7, 3));
    }
}
