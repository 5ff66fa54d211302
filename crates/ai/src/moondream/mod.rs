mod files;

pub use files::*;

use crate::traits::{ImageCaptionInput, Model, RawModelOutput};
use anyhow::anyhow;
use candle_core::{DType, Device, Tensor};
use candle_transformers::{
    generation::LogitsProcessor,
    models::{moondream, quantized_moondream},
};
use image::DynamicImage;
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::debug;

const IMAGE_SIZE: usize = 378;

/// Decoding parameters. The defaults give deterministic output: argmax sampling with a
/// fixed seed, so the same image and task always produce the same caption.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub seed: u64,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub repeat_penalty: f32,
    pub repeat_last_n: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 1024,
            seed: 1337,
            temperature: None,
            top_p: None,
            repeat_penalty: 1.0,
            repeat_last_n: 64,
        }
    }
}

/// Quantized Moondream2 captioner.
pub struct Moondream {
    model: quantized_moondream::Model,
    device: Device,
    tokenizer: Tokenizer,
    special_token: u32,
    config: GenerationConfig,
}

impl Model for Moondream {
    type Item = ImageCaptionInput;
    type Output = RawModelOutput;

    async fn process(&mut self, item: Self::Item) -> anyhow::Result<Self::Output> {
        debug!(
            task = %item.task,
            width = item.width,
            height = item.height,
            "generating caption"
        );
        let text = self.generate(item.task.prompt(), &item.image).await?;

        let mut output = RawModelOutput::new();
        output.insert(item.task.output_key().to_string(), text);
        Ok(output)
    }
}

impl Moondream {
    pub fn load(
        files: &MoondreamFiles,
        device: Device,
        config: GenerationConfig,
    ) -> anyhow::Result<Self> {
        let tokenizer = load_tokenizer(&files.tokenizer)?;

        // Moondream tokenizer bos_token and eos_token is "<|endoftext|>"
        // https://huggingface.co/vikhyatk/moondream2/blob/main/special_tokens_map.json
        let special_token = match tokenizer.get_vocab(true).get("<|endoftext|>") {
            Some(token) => *token,
            None => anyhow::bail!("cannot find the special token"),
        };

        let vb = candle_transformers::quantized_var_builder::VarBuilder::from_gguf(
            &files.model,
            &device,
        )?;
        let model = quantized_moondream::Model::new(&moondream::Config::v2(), vb)?;
        debug!("moondream loaded from {}", files.model.display());

        Ok(Self {
            model,
            device,
            tokenizer,
            special_token,
            config,
        })
    }

    async fn generate(&mut self, prompt: &str, image: &DynamicImage) -> anyhow::Result<String> {
        let image_embeds = image_to_tensor(image)?
            .to_device(&self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .apply(self.model.vision_encoder())?;

        let prompt = format!("\n\nQuestion: {0}\n\nAnswer:", prompt);
        let tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| anyhow!(e))?;
        if tokens.is_empty() {
            anyhow::bail!("Empty prompts are not supported in the Moondream model.")
        }
        let mut tokens = tokens.get_ids().to_vec();

        // every image starts from an empty cache
        self.model.text_model.clear_kv_cache();
        let mut logits_processor =
            LogitsProcessor::new(self.config.seed, self.config.temperature, self.config.top_p);
        let (bos_token, eos_token) = (self.special_token, self.special_token);

        let mut token_ids = vec![];
        for index in 0..self.config.max_new_tokens {
            let context_size = if index > 0 { 1 } else { tokens.len() };
            let ctxt = &tokens[tokens.len().saturating_sub(context_size)..];
            let input = Tensor::new(ctxt, &self.device)?.unsqueeze(0)?;
            let logits = if index > 0 {
                self.model.text_model.forward(&input)?
            } else {
                let bos_token = Tensor::new(&[bos_token], &self.device)?.unsqueeze(0)?;
                self.model
                    .text_model
                    .forward_with_img(&bos_token, &input, &image_embeds)?
            };

            let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
            let logits = if self.config.repeat_penalty == 1. {
                logits
            } else {
                let start_at = tokens.len().saturating_sub(self.config.repeat_last_n);
                candle_transformers::utils::apply_repeat_penalty(
                    &logits,
                    self.config.repeat_penalty,
                    &tokens[start_at..],
                )?
            };
            let next_token = logits_processor.sample(&logits)?;
            tokens.push(next_token);
            if next_token == eos_token || tokens.ends_with(&[27, 10619, 29] /* <END> */) {
                break;
            }
            token_ids.push(next_token);

            // lets the worker drop a request whose caller has gone away
            tokio::task::yield_now().await;
        }

        self.tokenizer
            .decode(&token_ids, true)
            .map_err(|_| anyhow!("failed to generate result"))
            .map(|v| v.trim().to_string())
    }
}

fn load_tokenizer(path: impl AsRef<Path>) -> anyhow::Result<Tokenizer> {
    Tokenizer::from_file(path.as_ref()).map_err(|e| {
        anyhow!(
            "failed to initialize tokenizer from {}: {}",
            path.as_ref().display(),
            e
        )
    })
}

/// Turns a decoded image into a normalized (3, 378, 378) tensor on the CPU.
pub fn image_to_tensor(image: &DynamicImage) -> candle_core::Result<Tensor> {
    let img = image
        .resize_to_fill(
            IMAGE_SIZE as u32,
            IMAGE_SIZE as u32,
            image::imageops::FilterType::Triangle,
        )
        .to_rgb8();
    let data = img.into_raw();
    let data =
        Tensor::from_vec(data, (IMAGE_SIZE, IMAGE_SIZE, 3), &Device::Cpu)?.permute((2, 0, 1))?;
    let mean = Tensor::new(&[0.5f32, 0.5, 0.5], &Device::Cpu)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&[0.5f32, 0.5, 0.5], &Device::Cpu)?.reshape((3, 1, 1))?;
    (data.to_dtype(DType::F32)? / 255.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)
}
