// ============================================================
// Layer 2 — ForwardUseCase
// ============================================================
// One end-to-end forward pass:
//
//   Step 1: Resolve model config      (file, base, or tiny)
//   Step 2: Resolve tokenizer         (path / saved / hub / offline)
//   Step 3: Build model + pretrained  (Layer 5)
//   Step 4: Load or synthesise image  (Layer 4)
//   Step 5: Forward, report shapes
//
// The `demo` command is this use case with no config, a random
// image and the text "This is the test text".

use anyhow::Result;
use burn::prelude::*;
use std::path::PathBuf;

use crate::application::{load_model_config, resolve_tokenizer, InferBackend};
use crate::data::image::random_image;
use crate::infra::tokenizer_store::TokenizerStore;
use crate::ml::{config::Florence2Config, inferencer::Inferencer};

pub const DEMO_TEXT: &str = "This is the test text";

/// Embedding table size of the offline toy model
const TINY_VOCAB: usize = 64;

#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Florence2Config JSON; `None` means the base pairing
    pub config: Option<String>,
    /// Image file; `None` means uniform noise
    pub image:  Option<PathBuf>,
    pub texts:  Vec<String>,
    /// Toy architecture with a vocabulary built from `texts`,
    /// needs neither weights nor network access
    pub tiny:   bool,
}

impl ForwardConfig {
    pub fn demo(tiny: bool) -> Self {
        Self {
            config: None,
            image:  None,
            texts:  vec![DEMO_TEXT.to_string()],
            tiny,
        }
    }
}

/// Shapes of everything that went in and came out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardReport {
    pub input_shape:   [usize; 4],
    pub text_shape:    [usize; 2],
    pub logits_shape:  [usize; 3],
    pub encoder_shape: [usize; 3],
}

pub struct ForwardUseCase {
    config: ForwardConfig,
}

impl ForwardUseCase {
    pub fn new(config: ForwardConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<ForwardReport> {
        let device = Default::default();
        self.execute_on::<InferBackend>(&device)
    }

    pub fn execute_on<B: Backend>(&self, device: &B::Device) -> Result<ForwardReport> {
        let cfg = &self.config;

        let (model_cfg, tokenizer) = if cfg.tiny {
            tracing::info!("Using the tiny offline architecture");
            (Florence2Config::tiny(TINY_VOCAB), TokenizerStore::build(&cfg.texts, TINY_VOCAB)?)
        } else {
            let model_cfg = load_model_config(cfg.config.as_deref())?;
            let tokenizer = resolve_tokenizer(&model_cfg.language_model, None)?;
            (model_cfg, tokenizer)
        };

        let inferencer = Inferencer::<B>::from_config(&model_cfg, tokenizer, device)?;

        let image = match &cfg.image {
            Some(path) => inferencer.load_image(path)?,
            None => random_image(cfg.texts.len(), inferencer.image_size(), device),
        };
        let input_shape = image.dims();

        let (_, text_token) = inferencer.encode_text(&cfg.texts)?;
        let out = inferencer.forward(image, &cfg.texts)?;

        let report = ForwardReport {
            input_shape,
            text_shape:    text_token.dims(),
            logits_shape:  out.logits.dims(),
            encoder_shape: out.encoder_hidden_states.dims(),
        };
        tracing::debug!("{:?}", report);
        Ok(report)
    }
}
