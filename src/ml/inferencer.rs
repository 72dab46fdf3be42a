// ============================================================
// Layer 5 — Inferencer
// ============================================================
// Runtime wrapper around Florence2Model: owns the tokenizer and the
// image preprocessor so callers work with strings and file paths.
//
//   Inferencer::from_config      random init + pretrained parts
//   Inferencer::from_checkpoint  full fine-tuned weights
//
// The tokenizer's row budget is the BART position budget minus the
// image tokens, so a tokenized prompt always fits next to the image.

use anyhow::{Context, Result};
use burn::prelude::*;
use std::path::Path;
use tokenizers::Tokenizer;

use crate::data::image::ImagePreprocessor;
use crate::domain::error::ModelError;
use crate::infra::checkpoint::{load_weights, CheckpointManager};
use crate::ml::{
    bart::Seq2SeqOutput,
    config::Florence2Config,
    florence2::Florence2Model,
    tokenizer::{BartTokenizer, TokenBatch},
};

pub struct Inferencer<B: Backend> {
    model:        Florence2Model<B>,
    tokenizer:    BartTokenizer,
    preprocessor: ImagePreprocessor,
    device:       B::Device,
}

/// Load the configured pretrained backbone / language model records
/// into a freshly built model. Parts without a `weight` keep their init.
pub fn load_pretrained<B: Backend>(
    mut model: Florence2Model<B>,
    cfg:       &Florence2Config,
    device:    &B::Device,
) -> Result<Florence2Model<B>> {
    if let Some(path) = &cfg.backbone.weight {
        model.image_encoder = load_weights(model.image_encoder, path, device)
            .context("Loading pretrained backbone")?;
    }
    if let Some(path) = &cfg.language_model.weight {
        model.language_model = load_weights(model.language_model, path, device)
            .context("Loading pretrained language model")?;
    }
    Ok(model)
}

impl<B: Backend> Inferencer<B> {
    pub fn new(
        model:     Florence2Model<B>,
        tokenizer: Tokenizer,
        cfg:       &Florence2Config,
        device:    &B::Device,
    ) -> Result<Self> {
        let davit = cfg.backbone.davit();
        let bart  = &cfg.language_model.bart;
        let text_budget = bart.max_position_embeddings.saturating_sub(davit.num_tokens());
        let tokenizer = BartTokenizer::new(tokenizer, text_budget)?;

        if tokenizer.vocab_size() > bart.vocab_size {
            return Err(ModelError::VocabTooLarge {
                tokenizer: tokenizer.vocab_size(),
                model:     bart.vocab_size,
            }
            .into());
        }

        tracing::debug!(
            "Inferencer ready: {} image tokens, {} text positions",
            davit.num_tokens(),
            text_budget
        );
        Ok(Self {
            model,
            tokenizer,
            preprocessor: ImagePreprocessor::new(davit.image_size),
            device: device.clone(),
        })
    }

    pub fn from_config(cfg: &Florence2Config, tokenizer: Tokenizer, device: &B::Device) -> Result<Self> {
        let model = load_pretrained(cfg.init::<B>(device)?, cfg, device)?;
        Self::new(model, tokenizer, cfg, device)
    }

    pub fn from_checkpoint(ckpt: &CheckpointManager, tokenizer: Tokenizer, device: &B::Device) -> Result<Self> {
        let cfg   = ckpt.load_config()?;
        let model = ckpt.load_model(cfg.init::<B>(device)?, device)?;
        tracing::info!("Model loaded from checkpoint");
        Self::new(model, tokenizer, &cfg, device)
    }

    pub fn image_size(&self) -> usize {
        self.preprocessor.size()
    }

    pub fn load_image(&self, path: &Path) -> Result<Tensor<B, 4>> {
        self.preprocessor.load_tensor(path, &self.device)
    }

    pub fn tokenize<S: AsRef<str>>(&self, texts: &[S]) -> Result<TokenBatch<B>> {
        Ok(self.tokenizer.encode(texts)?.to_batch(&self.device))
    }

    /// Strings → (embeddings [B, T, D], token ids [B, T])
    pub fn encode_text<S: AsRef<str>>(&self, texts: &[S]) -> Result<(Tensor<B, 3>, Tensor<B, 2, Int>)> {
        let batch = self.tokenize(texts)?;
        Ok(self.model.encode_text(batch.ids))
    }

    pub fn forward<S: AsRef<str>>(&self, image: Tensor<B, 4>, texts: &[S]) -> Result<Seq2SeqOutput<B>> {
        let text = self.tokenize(texts)?;
        Ok(self.model.forward(image, text)?)
    }

    /// Greedy decoding, one string per image.
    pub fn generate<S: AsRef<str>>(
        &self,
        image:          Tensor<B, 4>,
        prompts:        &[S],
        max_new_tokens: usize,
    ) -> Result<Vec<String>> {
        let prompt = self.tokenize(prompts)?;
        let rows = self.model.generate(image, prompt, max_new_tokens)?;
        rows.iter().map(|ids| self.tokenizer.decode(ids)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    use crate::data::image::random_image;
    use crate::infra::{checkpoint::save_weights, tokenizer_store::TokenizerStore};
    use crate::ml::florence2::tests::tiny_config;

    type TestBackend = NdArray;

    fn word_tokenizer(dir: &Path) -> Tokenizer {
        TokenizerStore::new(dir.to_string_lossy())
            .build_and_save(&["this is the test text".to_string()], 40)
            .unwrap()
    }

    #[test]
    fn test_forward_from_strings() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let inf = Inferencer::<TestBackend>::from_config(&tiny_config(40), word_tokenizer(dir.path()), &device)
            .unwrap();

        let image = random_image(1, inf.image_size(), &device);
        let out = inf.forward(image, &["This is the test text"]).unwrap();
        // <s> + 5 words + </s>
        assert_eq!(out.logits.dims(), [1, 7, 40]);
        assert_eq!(out.encoder_hidden_states.dims(), [1, 8, 16]);
    }

    #[test]
    fn test_encode_text_pads_batch() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let inf = Inferencer::<TestBackend>::from_config(&tiny_config(40), word_tokenizer(dir.path()), &device)
            .unwrap();

        let (features, tokens) = inf.encode_text(&["this is the test text", "test"]).unwrap();
        assert_eq!(features.dims(), [2, 7, 16]);
        assert_eq!(tokens.dims(), [2, 7]);
    }

    #[test]
    fn test_generate_returns_one_string_per_image() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let inf = Inferencer::<TestBackend>::from_config(&tiny_config(40), word_tokenizer(dir.path()), &device)
            .unwrap();

        let image = random_image(2, inf.image_size(), &device);
        let captions = inf.generate(image, &["", "test"], 4).unwrap();
        assert_eq!(captions.len(), 2);
    }

    #[test]
    fn test_vocab_larger_than_embedding_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let err = Inferencer::<TestBackend>::from_config(&tiny_config(6), word_tokenizer(dir.path()), &device)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<ModelError>(),
            Some(ModelError::VocabTooLarge { model: 6, .. })
        ));
    }

    #[test]
    fn test_pretrained_parts_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let cfg = tiny_config(40);
        let donor: Florence2Model<TestBackend> = cfg.init(&device).unwrap();
        save_weights(&donor.image_encoder, dir.path().join("davit")).unwrap();
        save_weights(&donor.language_model, dir.path().join("bart")).unwrap();

        let mut cfg = cfg;
        cfg.backbone.weight = Some(dir.path().join("davit").to_string_lossy().into());
        cfg.language_model.weight = Some(dir.path().join("bart").to_string_lossy().into());
        let model = load_pretrained(cfg.init::<TestBackend>(&device).unwrap(), &cfg, &device).unwrap();

        model
            .image_encoder
            .head
            .weight
            .val()
            .into_data()
            .assert_eq(&donor.image_encoder.head.weight.val().into_data(), true);
        model
            .language_model
            .shared
            .weight
            .val()
            .into_data()
            .assert_eq(&donor.language_model.shared.weight.val().into_data(), true);
    }
}
