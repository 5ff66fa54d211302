/// Lead-in phrases captioning models like to start with.
pub const DEFAULT_BOILERPLATE: &[&str] = &[
    "The image shows",
    "In this image",
    "This image shows",
    "This is an image of",
];

/// Strips boilerplate lead-in phrases from generated captions.
///
/// Phrases are tried in order and each one is tested against the output of the
/// previous step, so "In this image, the image shows a cat" loses both lead-ins only
/// when the phrases appear in that order in the list.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    phrases: Vec<String>,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::with_phrases(DEFAULT_BOILERPLATE.iter().copied())
    }
}

impl TextNormalizer {
    pub fn with_phrases<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phrases: phrases.into_iter().map(Into::into).collect(),
        }
    }

    pub fn normalize(&self, text: &str) -> String {
        let mut caption = text;
        for phrase in &self.phrases {
            if let Some(rest) = strip_prefix_ignore_case(caption, phrase) {
                let rest = rest.trim();
                caption = rest
                    .strip_prefix([',', '.'])
                    .map(str::trim)
                    .unwrap_or(rest);
            }
        }
        caption.to_string()
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut rest = text;
    for expected in prefix.chars() {
        let mut chars = rest.chars();
        let actual = chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
        rest = chars.as_str();
    }
    Some(rest)
}
