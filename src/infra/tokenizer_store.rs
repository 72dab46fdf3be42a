// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Resolves the tokenizer used by the language model, in order:
//
//   1. an explicit tokenizer.json path from the config
//   2. tokenizer.json fetched from the HuggingFace hub by model name
//   3. (offline) a word-level vocabulary built from a text corpus,
//      laid out with BART's special ids so the model config matches
//
// The built vocabulary is written as HuggingFace tokenizer JSON and
// loaded back through Tokenizer::from_file, so every path ends up
// with the same type.

use anyhow::{Context, Result};
use std::{collections::HashMap, path::PathBuf, str::FromStr};
use tokenizers::Tokenizer;

use crate::ml::tokenizer::{BOS, EOS, MASK, PAD, UNK};

/// BART reserves ids 0..=3 for <s>, <pad>, </s>, <unk>.
const SPECIAL_TOKENS: [&str; 5] = [BOS, PAD, EOS, UNK, MASK];

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<String>) -> Self {
        Self { dir: PathBuf::from(dir.into()) }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join("tokenizer.json")
    }

    /// Load a tokenizer.json from an explicit path
    pub fn load_file(path: impl Into<PathBuf>) -> Result<Tokenizer> {
        let path = path.into();
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!(
                "Cannot load tokenizer from '{}': {}", path.display(), e
            ))
    }

    /// Load the tokenizer previously saved in this store
    pub fn load(&self) -> Result<Tokenizer> {
        Self::load_file(self.path())
    }

    /// Download (or reuse the hub cache for) `tokenizer.json` of a hub model.
    pub fn from_pretrained(model_name: &str) -> Result<Tokenizer> {
        tracing::info!("Fetching tokenizer for '{}' from the HuggingFace hub", model_name);
        let api = hf_hub::api::sync::Api::new()
            .context("Cannot initialise HuggingFace hub client")?;
        let path = api
            .model(model_name.to_string())
            .get("tokenizer.json")
            .with_context(|| format!("Cannot download tokenizer.json for '{model_name}'"))?;
        Self::load_file(path)
    }

    /// Load existing tokenizer or build a new one from texts
    pub fn load_or_build(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        if self.path().exists() {
            tracing::info!("Loading existing tokenizer from disk");
            self.load()
        } else {
            tracing::info!("Building new tokenizer (vocab_size={})", vocab_size);
            self.build_and_save(texts, vocab_size)
        }
    }

    /// Build a word-level vocabulary from `texts` and save it as
    /// HuggingFace tokenizer JSON.
    pub fn build_and_save(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        let tokenizer = Self::build(texts, vocab_size)?;
        self.save(&tokenizer)?;
        Ok(tokenizer)
    }

    /// Write `tokenizer` into this store so later runs reuse it.
    pub fn save(&self, tokenizer: &Tokenizer) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;
        let tok_path = self.path();
        tokenizer
            .save(&tok_path, true)
            .map_err(|e| anyhow::anyhow!("Cannot write '{}': {e}", tok_path.display()))?;
        tracing::debug!("Saved tokenizer to '{}'", tok_path.display());
        Ok(())
    }

    /// Build a word-level vocabulary in memory. Words are ranked by
    /// frequency and ties broken alphabetically so rebuilding is
    /// deterministic.
    pub fn build(texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        let mut freq: HashMap<String, usize> = HashMap::new();
        for text in texts {
            // Mirrors the Whitespace pre-tokenizer: runs of word characters
            for word in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
                if !word.is_empty() {
                    *freq.entry(word.to_lowercase()).or_insert(0) += 1;
                }
            }
        }

        let mut words: Vec<(String, usize)> = freq.into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(vocab_size.saturating_sub(SPECIAL_TOKENS.len()));

        let mut vocab = serde_json::Map::new();
        let mut added_tokens = Vec::new();
        for (id, tok) in SPECIAL_TOKENS.iter().enumerate() {
            vocab.insert(tok.to_string(), serde_json::json!(id));
            added_tokens.push(serde_json::json!({
                "id": id, "content": tok, "single_word": false, "lstrip": false,
                "rstrip": false, "normalized": false, "special": true
            }));
        }
        for (word, _) in &words {
            let next_id = vocab.len();
            vocab.entry(word.clone()).or_insert(serde_json::json!(next_id));
        }
        let size = vocab.len();

        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added_tokens,
            "normalizer": {
                "type": "BertNormalizer",
                "clean_text": true,
                "handle_chinese_chars": true,
                "strip_accents": null,
                "lowercase": true
            },
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": UNK
            }
        });

        let tokenizer = Tokenizer::from_str(&tokenizer_json.to_string())
            .map_err(|e| anyhow::anyhow!("Cannot build word-level tokenizer: {e}"))?;
        tracing::info!("Tokenizer built with {} entries", size);
        Ok(tokenizer)
    }
}
