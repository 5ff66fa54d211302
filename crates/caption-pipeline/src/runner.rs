use crate::{
    error::{CaptionError, CaptionResult},
    extract::{CaptionExtractor, Extraction},
    record::{scan_images, ImageRecord},
    summary::{ImageOutcome, RunSummary},
};
use ai::{CaptionTask, ImageCaptionInput, ImageCaptionModel, RawModelOutput};
use image::DynamicImage;
use std::{path::Path, time::Duration};
use storage::Storage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Captions every image of one directory, one image at a time.
///
/// An image counts as done when its `.txt` sibling exists, so a run can be interrupted
/// and started again without redoing finished work.
pub struct BatchRunner {
    storage: Storage,
    model: ImageCaptionModel,
    extractor: CaptionExtractor,
    image_timeout: Option<Duration>,
    cancel: CancellationToken,
    dry_run: bool,
}

enum ModelCall {
    Done(RawModelOutput),
    TimedOut,
    Cancelled,
}

impl BatchRunner {
    pub fn new(storage: Storage, model: ImageCaptionModel) -> Self {
        Self {
            storage,
            model,
            extractor: CaptionExtractor::default(),
            image_timeout: None,
            cancel: CancellationToken::new(),
            dry_run: false,
        }
    }

    pub fn with_extractor(mut self, extractor: CaptionExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Gives up on an image when the model takes longer than `timeout`.
    pub fn with_image_timeout(mut self, timeout: Duration) -> Self {
        self.image_timeout = Some(timeout);
        self
    }

    /// Stops the run once `cancel` fires; the image in progress is abandoned.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Only reports which images would be captioned.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[tracing::instrument(name = "BatchRunner::run", skip_all, fields(root = %self.storage.root().display(), task = %task))]
    pub async fn run(&self, task: CaptionTask) -> CaptionResult<RunSummary> {
        let records = scan_images(&self.storage).await?;
        info!("found {} images", records.len());

        let mut summary = RunSummary::default();
        for record in &records {
            if self.cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            let outcome = self.process_image(record, task).await?;
            debug!(image = %record.path.display(), format = %record.extension, %outcome, "image done");
            summary.record(outcome);

            if outcome == ImageOutcome::Cancelled {
                break;
            }
        }

        if summary.interrupted {
            warn!("run interrupted: {}", summary);
        } else {
            info!("run finished: {}", summary);
        }
        Ok(summary)
    }

    async fn process_image(
        &self,
        record: &ImageRecord,
        task: CaptionTask,
    ) -> CaptionResult<ImageOutcome> {
        if record.has_caption(&self.storage).await? {
            info!(
                "caption already exists, skip: {}",
                record.caption_path.display()
            );
            return Ok(ImageOutcome::SkippedExisting);
        }

        let image = match self.decode(&record.path).await {
            Ok(image) => image,
            Err(e) => {
                warn!(
                    "cannot read image {}, skip: {:#}",
                    record.path.display(),
                    e
                );
                return Ok(ImageOutcome::SkippedUnreadable);
            }
        };

        if self.dry_run {
            info!("would caption {}", record.path.display());
            return Ok(ImageOutcome::Pending);
        }

        let raw = match self.call_model(ImageCaptionInput::new(image, task)).await? {
            ModelCall::Done(raw) => raw,
            ModelCall::TimedOut => {
                warn!(
                    "captioning {} timed out after {:?}",
                    record.path.display(),
                    self.image_timeout
                );
                return Ok(ImageOutcome::TimedOut);
            }
            ModelCall::Cancelled => {
                warn!("cancelled while captioning {}", record.path.display());
                return Ok(ImageOutcome::Cancelled);
            }
        };

        let caption = match self.extractor.extract(&raw, task) {
            Extraction::Caption(caption) => caption,
            Extraction::SoftMiss => {
                warn!("no caption produced for {}", record.path.display());
                return Ok(ImageOutcome::SkippedEmpty);
            }
        };

        match self
            .storage
            .write_atomic(&record.caption_path, caption.as_str().as_bytes().to_vec())
            .await
        {
            Ok(()) => {
                info!("caption for {}: {}", record.path.display(), caption);
                Ok(ImageOutcome::Captioned)
            }
            Err(e) => {
                error!(
                    "failed to write {}: {}",
                    self.storage.get_actual_path(&record.caption_path).display(),
                    e
                );
                Ok(ImageOutcome::WriteFailed)
            }
        }
    }

    /// Reads and decodes an image as RGB.
    async fn decode(&self, path: &Path) -> anyhow::Result<DynamicImage> {
        let data = self.storage.read(path).await?;
        let image = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&data).map(|image| DynamicImage::ImageRgb8(image.to_rgb8()))
        })
        .await??;
        Ok(image)
    }

    async fn call_model(&self, input: ImageCaptionInput) -> CaptionResult<ModelCall> {
        let request = async {
            match self.image_timeout {
                Some(limit) => tokio::time::timeout(limit, self.model.process(input))
                    .await
                    .ok(),
                None => Some(self.model.process(input).await),
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Ok(ModelCall::Cancelled),
            result = request => match result {
                Some(Ok(raw)) => Ok(ModelCall::Done(raw)),
                Some(Err(e)) => Err(CaptionError::Model(e)),
                None => Ok(ModelCall::TimedOut),
            },
        }
    }
}

/// Captions `directory` with `model`, using default runner settings.
pub async fn caption_directory(
    directory: impl AsRef<Path>,
    task: CaptionTask,
    model: ImageCaptionModel,
) -> CaptionResult<RunSummary> {
    let storage = Storage::new_fs(directory)?;
    BatchRunner::new(storage, model).run(task).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::TextNormalizer;
    use ai::{AIModel, Model};
    use std::{
        path::PathBuf,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    /// Answers every request with a fixed text, optionally misbehaving on one call.
    #[derive(Clone, Default)]
    struct FakeCaptioner {
        reply: String,
        calls: Arc<AtomicUsize>,
        fail_on: Option<usize>,
        slow_on: Option<(usize, Duration)>,
        cancel_on: Option<(usize, CancellationToken)>,
    }

    impl Model for FakeCaptioner {
        type Item = ImageCaptionInput;
        type Output = RawModelOutput;

        async fn process(&mut self, item: ImageCaptionInput) -> anyhow::Result<RawModelOutput> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(item.width > 0 && item.height > 0);

            if self.fail_on == Some(call) {
                anyhow::bail!("CUDA out of memory");
            }
            if let Some((on, delay)) = self.slow_on {
                if on == call {
                    tokio::time::sleep(delay).await;
                }
            }
            if let Some((on, token)) = &self.cancel_on {
                if *on == call {
                    token.cancel();
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }

            Ok(RawModelOutput::from([(
                item.task.output_key().to_string(),
                self.reply.clone(),
            )]))
        }
    }

    fn model(fake: FakeCaptioner) -> ImageCaptionModel {
        AIModel::new(
            "fake-captioner",
            move || {
                let fake = fake.clone();
                async move { Ok(fake) }
            },
            None,
        )
        .expect("create model")
    }

    fn replying(reply: &str) -> FakeCaptioner {
        FakeCaptioner {
            reply: reply.to_string(),
            ..Default::default()
        }
    }

    fn write_image(dir: &Path, name: &str) {
        let image = image::RgbImage::from_pixel(16, 12, image::Rgb([200, 40, 20]));
        image.save(dir.join(name)).expect("save test image");
    }

    fn read(dir: &Path, name: &str) -> Option<String> {
        std::fs::read_to_string(dir.join(name)).ok()
    }

    fn runner(dir: &Path, fake: FakeCaptioner) -> BatchRunner {
        BatchRunner::new(Storage::new_fs(dir).unwrap(), model(fake))
    }

    #[test_log::test(tokio::test)]
    async fn mixed_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.jpg");
        write_image(dir.path(), "b.jpg");
        std::fs::write(dir.path().join("b.txt"), "hand written").unwrap();
        std::fs::write(dir.path().join("c.png"), b"\x89PNG not really").unwrap();

        let fake = replying("This is an image of a red fox.");
        let calls = fake.calls.clone();
        let summary = runner(dir.path(), fake)
            .run(CaptionTask::DetailedCaption)
            .await
            .unwrap();

        assert_eq!(summary.captioned, 1);
        assert_eq!(summary.skipped_existing, 1);
        assert_eq!(summary.skipped_unreadable, 1);
        assert_eq!(summary.total(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(read(dir.path(), "a.txt").as_deref(), Some("a red fox."));
        assert_eq!(read(dir.path(), "b.txt").as_deref(), Some("hand written"));
        assert_eq!(read(dir.path(), "c.txt"), None);
    }

    #[test_log::test(tokio::test)]
    async fn second_run_skips_everything() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "one.png");
        write_image(dir.path(), "two.JPG");

        let first = runner(dir.path(), replying("The image shows a tiny square"))
            .run(CaptionTask::Caption)
            .await
            .unwrap();
        assert_eq!(first.captioned, 2);
        let one = read(dir.path(), "one.txt");
        let two = read(dir.path(), "two.txt");
        assert_eq!(one.as_deref(), Some("a tiny square"));

        let fake = replying("something else entirely");
        let calls = fake.calls.clone();
        let second = runner(dir.path(), fake)
            .run(CaptionTask::Caption)
            .await
            .unwrap();

        assert_eq!(
            second,
            RunSummary {
                skipped_existing: 2,
                ..Default::default()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(read(dir.path(), "one.txt"), one);
        assert_eq!(read(dir.path(), "two.txt"), two);
    }

    #[test_log::test(tokio::test)]
    async fn non_images_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("anim.gif"), b"GIF89a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "notes").unwrap();
        write_image(dir.path(), "UPPER.JPG");

        let summary = runner(dir.path(), replying("a photo"))
            .run(CaptionTask::Caption)
            .await
            .unwrap();

        assert_eq!(summary.captioned, 1);
        assert_eq!(summary.total(), 1);
        assert!(dir.path().join("UPPER.txt").exists());
        assert!(!dir.path().join("anim.txt").exists());
    }

    #[test_log::test(tokio::test)]
    async fn existing_caption_of_same_stem_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "pic.jpg");
        write_image(dir.path(), "pic.png");

        let summary = runner(dir.path(), replying("a red square"))
            .run(CaptionTask::Caption)
            .await
            .unwrap();

        assert_eq!(summary.captioned, 1);
        assert_eq!(summary.skipped_existing, 1);
    }

    #[test_log::test(tokio::test)]
    async fn custom_boilerplate_phrases() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png");

        let summary = runner(dir.path(), replying("A cute icon of a rocket"))
            .with_extractor(CaptionExtractor::new(TextNormalizer::with_phrases([
                "A cute icon of",
            ])))
            .run(CaptionTask::Caption)
            .await
            .unwrap();

        assert_eq!(summary.captioned, 1);
        assert_eq!(read(dir.path(), "a.txt").as_deref(), Some("a rocket"));
    }

    #[test_log::test(tokio::test)]
    async fn empty_caption_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png");

        let summary = runner(dir.path(), replying("In this image."))
            .run(CaptionTask::Caption)
            .await
            .unwrap();

        assert_eq!(summary.skipped_empty, 1);
        assert_eq!(summary.captioned, 0);
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test_log::test(tokio::test)]
    async fn model_failure_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png");
        write_image(dir.path(), "b.png");
        write_image(dir.path(), "c.png");

        let fake = FakeCaptioner {
            fail_on: Some(1),
            ..replying("a square")
        };
        let err = runner(dir.path(), fake)
            .run(CaptionTask::Caption)
            .await
            .unwrap_err();

        assert!(matches!(err, CaptionError::Model(_)));
        assert!(err.to_string().contains("CUDA out of memory"));
        // the caption written before the failure is kept
        assert_eq!(read(dir.path(), "a.txt").as_deref(), Some("a square"));
        assert!(!dir.path().join("b.txt").exists());
        assert!(!dir.path().join("c.txt").exists());
    }

    #[test_log::test(tokio::test)]
    async fn slow_image_times_out_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png");
        write_image(dir.path(), "b.png");

        let fake = FakeCaptioner {
            slow_on: Some((0, Duration::from_millis(800))),
            ..replying("a square")
        };
        let summary = runner(dir.path(), fake)
            .with_image_timeout(Duration::from_millis(500))
            .run(CaptionTask::Caption)
            .await
            .unwrap();

        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.captioned, 1);
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(read(dir.path(), "b.txt").as_deref(), Some("a square"));
    }

    #[test_log::test(tokio::test)]
    async fn timeout_does_not_spill_onto_next_image() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png");
        write_image(dir.path(), "b.png");
        write_image(dir.path(), "c.png");

        let fake = FakeCaptioner {
            slow_on: Some((0, Duration::from_millis(1500))),
            ..replying("a square")
        };
        let summary = runner(dir.path(), fake)
            .with_image_timeout(Duration::from_millis(500))
            .run(CaptionTask::Caption)
            .await
            .unwrap();

        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.captioned, 2);
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(read(dir.path(), "b.txt").as_deref(), Some("a square"));
        assert_eq!(read(dir.path(), "c.txt").as_deref(), Some("a square"));
    }

    #[test_log::test(tokio::test)]
    async fn failed_write_is_counted_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png");
        write_image(dir.path(), "b.png");
        // a directory in place of the temporary file makes the write fail
        std::fs::create_dir(dir.path().join("a.txt.tmp")).unwrap();

        let summary = runner(dir.path(), replying("a square"))
            .run(CaptionTask::Caption)
            .await
            .unwrap();

        assert_eq!(summary.write_failed, 1);
        assert_eq!(summary.captioned, 1);
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(read(dir.path(), "b.txt").as_deref(), Some("a square"));
    }

    #[test_log::test(tokio::test)]
    async fn cancellation_keeps_finished_captions() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png");
        write_image(dir.path(), "b.png");
        write_image(dir.path(), "c.png");

        let token = CancellationToken::new();
        let fake = FakeCaptioner {
            cancel_on: Some((1, token.clone())),
            ..replying("a square")
        };
        let summary = runner(dir.path(), fake)
            .with_cancellation(token)
            .run(CaptionTask::Caption)
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.captioned, 1);
        assert!(dir.path().join("a.txt").exists());
        assert!(!dir.path().join("b.txt").exists());
        assert!(!dir.path().join("c.txt").exists());
    }

    #[test_log::test(tokio::test)]
    async fn cancelled_before_start_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png");

        let token = CancellationToken::new();
        token.cancel();
        let fake = replying("a square");
        let calls = fake.calls.clone();
        let summary = runner(dir.path(), fake)
            .with_cancellation(token)
            .run(CaptionTask::Caption)
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.total(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test_log::test(tokio::test)]
    async fn dry_run_reports_pending_images() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png");
        write_image(dir.path(), "b.png");
        std::fs::write(dir.path().join("b.txt"), "done").unwrap();

        let fake = replying("a square");
        let calls = fake.calls.clone();
        let summary = runner(dir.path(), fake)
            .with_dry_run(true)
            .run(CaptionTask::Caption)
            .await
            .unwrap();

        assert_eq!(summary.pending, 1);
        assert_eq!(summary.skipped_existing, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test_log::test(tokio::test)]
    async fn unicode_caption_is_written_as_utf8() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "猫.png");

        caption_directory(
            dir.path(),
            CaptionTask::MoreDetailedCaption,
            model(replying("The image shows 一只橘色的猫, sitting on a café table")),
        )
        .await
        .unwrap();

        assert_eq!(
            read(dir.path(), "猫.txt").as_deref(),
            Some("一只橘色的猫, sitting on a café table")
        );
    }

    #[test_log::test(tokio::test)]
    async fn missing_directory_is_an_error() {
        let missing = PathBuf::from("/nonexistent/images");
        let err = caption_directory(missing, CaptionTask::Caption, model(replying("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptionError::Storage(_)));
    }
}
