use serde::Serialize;
use std::fmt;
use strum_macros::Display;

/// What happened to one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ImageOutcome {
    Captioned,
    SkippedExisting,
    SkippedUnreadable,
    SkippedEmpty,
    WriteFailed,
    TimedOut,
    /// Dry run: the image would have been captioned.
    Pending,
    /// The run was cancelled while this image was being processed.
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub captioned: usize,
    pub skipped_existing: usize,
    pub skipped_unreadable: usize,
    pub skipped_empty: usize,
    pub write_failed: usize,
    pub timed_out: usize,
    pub pending: usize,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn record(&mut self, outcome: ImageOutcome) {
        match outcome {
            ImageOutcome::Captioned => self.captioned += 1,
            ImageOutcome::SkippedExisting => self.skipped_existing += 1,
            ImageOutcome::SkippedUnreadable => self.skipped_unreadable += 1,
            ImageOutcome::SkippedEmpty => self.skipped_empty += 1,
            ImageOutcome::WriteFailed => self.write_failed += 1,
            ImageOutcome::TimedOut => self.timed_out += 1,
            ImageOutcome::Pending => self.pending += 1,
            ImageOutcome::Cancelled => self.interrupted = true,
        }
    }

    /// Number of images that got a final outcome.
    pub fn total(&self) -> usize {
        self.captioned
            + self.skipped_existing
            + self.skipped_unreadable
            + self.skipped_empty
            + self.write_failed
            + self.timed_out
            + self.pending
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "captioned: {}, skipped (existing): {}, skipped (unreadable): {}, skipped (empty): {}",
            self.captioned, self.skipped_existing, self.skipped_unreadable, self.skipped_empty
        )?;
        if self.write_failed > 0 {
            write!(f, ", write failed: {}", self.write_failed)?;
        }
        if self.timed_out > 0 {
            write!(f, ", timed out: {}", self.timed_out)?;
        }
        if self.pending > 0 {
            write!(f, ", to caption: {}", self.pending)?;
        }
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}
