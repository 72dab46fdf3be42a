// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers for one user goal each:
//
//   forward_use_case.rs  — one forward pass, report tensor shapes
//                          (also the `demo` command)
//   generate_use_case.rs — caption an image with greedy decoding
//   train_use_case.rs    — fine-tune on a caption manifest
//
// Rules for this layer:
//   - No tensor math here (that's Layer 5)
//   - No printing here (that's Layer 1)
//   - Only workflow coordination

use anyhow::{Context, Result};
use burn::config::Config;
use tokenizers::Tokenizer;

use crate::infra::tokenizer_store::TokenizerStore;
use crate::ml::config::{Florence2Config, LanguageModelConfig};

/// A single forward pass and its output shapes
pub mod forward_use_case;

/// Image captioning through greedy generation
pub mod generate_use_case;

/// The fine-tuning workflow
pub mod train_use_case;

/// Burn uses Wgpu for inference outside of tests
pub type InferBackend = burn::backend::Wgpu;

/// Read a Florence2Config JSON, or fall back to the base pairing.
pub fn load_model_config(path: Option<&str>) -> Result<Florence2Config> {
    let cfg = match path {
        Some(path) => Florence2Config::load(path)
            .map_err(|e| anyhow::anyhow!("Cannot read model config '{path}': {e:?}"))?,
        None => {
            tracing::info!("No model config given, using DaViT-base + bart-large");
            Florence2Config::base()
        }
    };
    cfg.validate().context("Invalid model config")?;
    Ok(cfg)
}

/// Pick the tokenizer for `lm`, in order: the configured
/// tokenizer.json, a copy saved in `store`, the hub by model name.
pub fn resolve_tokenizer(lm: &LanguageModelConfig, store: Option<&TokenizerStore>) -> Result<Tokenizer> {
    if let Some(path) = &lm.tokenizer {
        return TokenizerStore::load_file(path);
    }
    if let Some(store) = store.filter(|s| s.path().exists()) {
        tracing::info!("Using tokenizer saved in '{}'", store.path().display());
        return store.load();
    }
    TokenizerStore::from_pretrained(&lm.model_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_falls_back_to_base() {
        let cfg = load_model_config(None).unwrap();
        assert_eq!(cfg.backbone.davit().feature_dim(), 1024);
        assert_eq!(cfg.language_model.bart.d_model, 1024);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("florence2.json");
        Florence2Config::tiny(40).save(&path).unwrap();

        let cfg = load_model_config(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.backbone.davit().image_size, 32);
        assert_eq!(cfg.language_model.bart.vocab_size, 40);
    }

    #[test]
    fn test_invalid_config_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("florence2.json");
        let mut cfg = Florence2Config::tiny(40);
        cfg.language_model.bart.attention_heads = 3;
        cfg.save(&path).unwrap();
        assert!(load_model_config(Some(path.to_str().unwrap())).is_err());
    }

    #[test]
    fn test_configured_path_wins_over_store() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = TokenizerStore::new(dir.path().join("a").to_string_lossy());
        explicit.build_and_save(&["alpha".to_string()], 20).unwrap();
        let saved = TokenizerStore::new(dir.path().join("b").to_string_lossy());
        saved.build_and_save(&["beta".to_string()], 20).unwrap();

        let lm = LanguageModelConfig::new(crate::ml::config::BartConfig::tiny(20))
            .with_tokenizer(Some(explicit.path().to_string_lossy().into()));
        let tok = resolve_tokenizer(&lm, Some(&saved)).unwrap();
        assert!(tok.token_to_id("alpha").is_some());

        let lm = LanguageModelConfig::new(crate::ml::config::BartConfig::tiny(20));
        let tok = resolve_tokenizer(&lm, Some(&saved)).unwrap();
        assert!(tok.token_to_id("beta").is_some());
    }
}
