use hf_hub::{api::tokio::Api, Repo, RepoType};
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_MODEL_ID: &str = "santiagomed/candle-moondream";
pub const DEFAULT_MODEL_REVISION: &str = "main";
pub const DEFAULT_MODEL_FILE: &str = "model-q4_0.gguf";
pub const DEFAULT_TOKENIZER_ID: &str = "vikhyatk/moondream2";
pub const DEFAULT_TOKENIZER_REVISION: &str = "2024-03-06";

/// Where to find the quantized weights and the tokenizer.
///
/// Local paths win; anything missing is fetched from the Hugging Face hub (and cached
/// there) using the repository ids.
#[derive(Debug, Clone)]
pub struct MoondreamSource {
    pub model_file: Option<PathBuf>,
    pub tokenizer_file: Option<PathBuf>,
    pub model_id: String,
    pub model_revision: String,
    pub tokenizer_id: String,
    pub tokenizer_revision: String,
}

impl Default for MoondreamSource {
    fn default() -> Self {
        Self {
            model_file: None,
            tokenizer_file: None,
            model_id: DEFAULT_MODEL_ID.to_string(),
            model_revision: DEFAULT_MODEL_REVISION.to_string(),
            tokenizer_id: DEFAULT_TOKENIZER_ID.to_string(),
            tokenizer_revision: DEFAULT_TOKENIZER_REVISION.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MoondreamFiles {
    pub model: PathBuf,
    pub tokenizer: PathBuf,
}

impl MoondreamSource {
    pub fn is_local(&self) -> bool {
        self.model_file.is_some() && self.tokenizer_file.is_some()
    }

    pub async fn resolve(&self) -> anyhow::Result<MoondreamFiles> {
        if let (Some(model), Some(tokenizer)) = (&self.model_file, &self.tokenizer_file) {
            return Ok(MoondreamFiles {
                model: existing(model)?,
                tokenizer: existing(tokenizer)?,
            });
        }

        let api = Api::new()?;

        let model = match &self.model_file {
            Some(path) => existing(path)?,
            None => {
                info!("fetching {} from {}", DEFAULT_MODEL_FILE, self.model_id);
                api.repo(Repo::with_revision(
                    self.model_id.clone(),
                    RepoType::Model,
                    self.model_revision.clone(),
                ))
                .get(DEFAULT_MODEL_FILE)
                .await?
            }
        };

        let tokenizer = match &self.tokenizer_file {
            Some(path) => existing(path)?,
            None => {
                info!("fetching tokenizer.json from {}", self.tokenizer_id);
                api.repo(Repo::with_revision(
                    self.tokenizer_id.clone(),
                    RepoType::Model,
                    self.tokenizer_revision.clone(),
                ))
                .get("tokenizer.json")
                .await?
            }
        };

        Ok(MoondreamFiles { model, tokenizer })
    }
}

fn existing(path: &Path) -> anyhow::Result<PathBuf> {
    if !path.is_file() {
        anyhow::bail!("model file not found: {}", path.display());
    }
    Ok(path.to_path_buf())
}
