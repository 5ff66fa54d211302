use ai::{
    device::ComputeDevice,
    moondream::{
        GenerationConfig, MoondreamSource, DEFAULT_MODEL_ID, DEFAULT_MODEL_REVISION,
        DEFAULT_TOKENIZER_ID, DEFAULT_TOKENIZER_REVISION,
    },
};
use caption_pipeline::CaptionTask;
use clap::Parser;
use std::{path::PathBuf, time::Duration};

/// Writes a caption next to every image of a directory, skipping images that already
/// have one.
#[derive(Parser, Debug)]
#[command(name = "captioner", author, version, about, long_about = None)]
pub struct Cli {
    /// Directory containing .jpg / .jpeg / .png images
    #[arg(env = "CAPTIONER_DIR")]
    pub directory: PathBuf,

    /// Caption kind: brief, detailed or more_detailed (task identifiers like
    /// <DETAILED_CAPTION> are accepted too)
    #[arg(long, env = "CAPTIONER_TASK", default_value = "detailed")]
    pub task: CaptionTask,

    /// Local GGUF weights; downloaded from --model-id when not set
    #[arg(long, env = "CAPTIONER_MODEL_FILE")]
    pub model_file: Option<PathBuf>,

    /// Local tokenizer.json; downloaded from --tokenizer-id when not set
    #[arg(long, env = "CAPTIONER_TOKENIZER_FILE")]
    pub tokenizer_file: Option<PathBuf>,

    #[arg(long, env = "CAPTIONER_MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long, env = "CAPTIONER_REVISION", default_value = DEFAULT_MODEL_REVISION)]
    pub revision: String,

    #[arg(long, env = "CAPTIONER_TOKENIZER_ID", default_value = DEFAULT_TOKENIZER_ID)]
    pub tokenizer_id: String,

    #[arg(long, env = "CAPTIONER_TOKENIZER_REVISION", default_value = DEFAULT_TOKENIZER_REVISION)]
    pub tokenizer_revision: String,

    /// auto, cpu, cuda or metal
    #[arg(long, env = "CAPTIONER_DEVICE", default_value = "auto")]
    pub device: ComputeDevice,

    #[arg(long, env = "CAPTIONER_MAX_NEW_TOKENS", default_value_t = 1024)]
    pub max_new_tokens: usize,

    /// Give up on an image after this many seconds
    #[arg(long, env = "CAPTIONER_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// List the images that would be captioned without loading the model
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Write logs to <DIR>/captioner.log instead of stderr
    #[arg(long, env = "CAPTIONER_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Cli {
    pub fn model_source(&self) -> MoondreamSource {
        MoondreamSource {
            model_file: self.model_file.clone(),
            tokenizer_file: self.tokenizer_file.clone(),
            model_id: self.model_id.clone(),
            model_revision: self.revision.clone(),
            tokenizer_id: self.tokenizer_id.clone(),
            tokenizer_revision: self.tokenizer_revision.clone(),
        }
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            max_new_tokens: self.max_new_tokens,
            ..Default::default()
        }
    }

    pub fn image_timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
