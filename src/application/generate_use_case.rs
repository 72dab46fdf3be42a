// ============================================================
// Layer 2 — GenerateUseCase
// ============================================================
// Captions an image with greedy decoding. The model comes either
// from a fine-tuning checkpoint directory (config, weights and the
// tokenizer saved next to them) or from a Florence2Config JSON with
// optional pretrained parts.

use anyhow::Result;
use burn::prelude::*;
use std::path::Path;

use crate::application::{load_model_config, resolve_tokenizer, InferBackend};
use crate::domain::traits::Captioner;
use crate::infra::{checkpoint::CheckpointManager, tokenizer_store::TokenizerStore};
use crate::ml::inferencer::Inferencer;

pub const DEFAULT_MAX_NEW_TOKENS: usize = 32;

pub struct GenerateUseCase<B: Backend = InferBackend> {
    inferencer:     Inferencer<B>,
    max_new_tokens: usize,
}

impl<B: Backend> GenerateUseCase<B> {
    pub fn from_checkpoint(checkpoint_dir: &str, max_new_tokens: usize, device: &B::Device) -> Result<Self> {
        let ckpt = CheckpointManager::new(checkpoint_dir)?;
        let cfg  = ckpt.load_config()?;
        let tokenizer = resolve_tokenizer(&cfg.language_model, Some(&TokenizerStore::new(checkpoint_dir)))?;
        Ok(Self {
            inferencer: Inferencer::from_checkpoint(&ckpt, tokenizer, device)?,
            max_new_tokens,
        })
    }

    pub fn from_config(config: Option<&str>, max_new_tokens: usize, device: &B::Device) -> Result<Self> {
        let cfg = load_model_config(config)?;
        let tokenizer = resolve_tokenizer(&cfg.language_model, None)?;
        Ok(Self {
            inferencer: Inferencer::from_config(&cfg, tokenizer, device)?,
            max_new_tokens,
        })
    }
}

impl<B: Backend> Captioner for GenerateUseCase<B> {
    fn caption(&self, image: &Path, prompt: &str) -> Result<String> {
        let pixels = self.inferencer.load_image(image)?;
        let mut captions = self.inferencer.generate(pixels, &[prompt], self.max_new_tokens)?;
        tracing::debug!("Captioned '{}'", image.display());
        Ok(captions.pop().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    use crate::ml::{config::Florence2Config, florence2::Florence2Model};

    #[test]
    fn test_caption_from_checkpoint_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt_dir = dir.path().join("ckpt");
        let ckpt_dir = ckpt_dir.to_str().unwrap();
        let device = Default::default();

        // What a training run leaves behind
        let cfg = Florence2Config::tiny(40);
        let ckpt = CheckpointManager::new(ckpt_dir).unwrap();
        ckpt.save_config(&cfg).unwrap();
        let model: Florence2Model<NdArray> = cfg.init(&device).unwrap();
        ckpt.save_model(&model, 1).unwrap();
        TokenizerStore::new(ckpt_dir)
            .build_and_save(&["a red square".to_string()], 40)
            .unwrap();

        let image = dir.path().join("red.png");
        RgbImage::from_pixel(20, 20, Rgb([255, 0, 0])).save(&image).unwrap();

        let captioner = GenerateUseCase::<NdArray>::from_checkpoint(ckpt_dir, 5, &device).unwrap();
        let caption = captioner.caption(&image, "").unwrap();
        // Random weights: only the budget is predictable
        assert!(caption.split_whitespace().count() <= 5);
    }

    #[test]
    fn test_missing_checkpoint_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        assert!(GenerateUseCase::<NdArray>::from_checkpoint(dir.path().to_str().unwrap(), 5, &device).is_err());
    }
}
