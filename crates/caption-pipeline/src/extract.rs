use crate::normalize::TextNormalizer;
use ai::{CaptionTask, RawModelOutput};
use std::fmt;

/// Normalized, non-empty caption text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption(String);

impl Caption {
    /// Returns `None` when the text is empty after trimming.
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            None
        } else {
            Some(Self(text))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Caption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of pulling a caption out of raw model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Caption(Caption),
    /// The task key was missing or its text normalized to nothing.
    SoftMiss,
}

impl Extraction {
    pub fn caption(&self) -> Option<&Caption> {
        match self {
            Extraction::Caption(caption) => Some(caption),
            Extraction::SoftMiss => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaptionExtractor {
    normalizer: TextNormalizer,
}

impl CaptionExtractor {
    pub fn new(normalizer: TextNormalizer) -> Self {
        Self { normalizer }
    }

    pub fn extract(&self, raw: &RawModelOutput, task: CaptionTask) -> Extraction {
        let text = raw
            .get(task.output_key())
            .map(String::as_str)
            .unwrap_or_default();

        match Caption::new(self.normalizer.normalize(text)) {
            Some(caption) => Extraction::Caption(caption),
            None => Extraction::SoftMiss,
        }
    }
}
