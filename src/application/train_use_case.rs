// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the fine-tuning pipeline in order:
//
//   Step 1: Resolve model config        (file or base)
//   Step 2: Load caption manifest       (Layer 4 - data)
//   Step 3: Resolve / build tokenizer   (Layer 6 - infra)
//   Step 4: Split train/validation      (Layer 4 - data)
//   Step 5: Save config + tokenizer     (Layer 6 - infra)
//   Step 6: Run training loop           (Layer 5 - ml)
//
// Everything `generate --checkpoint-dir` needs ends up in the
// checkpoint directory: florence2_config.json, tokenizer.json and
// the per-epoch weights.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::application::{load_model_config, resolve_tokenizer};
use crate::data::{
    batcher::CaptionBatcher,
    dataset::CaptionDataset,
    image::ImagePreprocessor,
    loader::CaptionLoader,
    splitter::split_train_val,
};
use crate::domain::traits::CaptionSource;
use crate::infra::{checkpoint::CheckpointManager, metrics::EpochMetrics, tokenizer_store::TokenizerStore};
use crate::ml::{tokenizer::BartTokenizer, trainer::run_training};

// ─── Training Configuration ──────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Florence2Config JSON; `None` means the base pairing
    pub config:         Option<String>,
    pub manifest:       String,
    pub checkpoint_dir: String,
    /// Build a word-level vocabulary from the manifest instead of
    /// using the configured / hub tokenizer
    pub offline_vocab:  bool,
    pub batch_size:     usize,
    pub epochs:         usize,
    pub lr:             f64,
    pub train_fraction: f64,
    pub seed:           u64,
    /// Continue from the latest checkpoint in `checkpoint_dir`
    pub resume:         bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            config:         None,
            manifest:       "data/captions.json".to_string(),
            checkpoint_dir: "checkpoints".to_string(),
            offline_vocab:  false,
            batch_size:     4,
            epochs:         10,
            lr:             5e-5,
            train_fraction: 0.9,
            seed:           42,
            resume:         false,
        }
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<Vec<EpochMetrics>> {
        let cfg = &self.config;

        // ── Step 1: Model config ──────────────────────────────────────────────
        // A resumed run must rebuild exactly the saved architecture
        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir)?;
        let model_cfg = if cfg.resume && ckpt_manager.has_checkpoint() {
            ckpt_manager.load_config()?
        } else {
            load_model_config(cfg.config.as_deref())?
        };
        let davit = model_cfg.backbone.davit();
        let bart  = &model_cfg.language_model.bart;

        // ── Step 2: Caption pairs ─────────────────────────────────────────────
        let pairs = CaptionLoader::new(&cfg.manifest).load_all()?;
        if pairs.is_empty() {
            bail!("No usable caption pairs in '{}'", cfg.manifest);
        }
        let corpus = CaptionDataset::new(pairs.clone()).texts();

        // ── Step 3: Tokenizer ─────────────────────────────────────────────────
        let tok_store = TokenizerStore::new(&cfg.checkpoint_dir);
        let tokenizer = if cfg.offline_vocab {
            tok_store.load_or_build(&corpus, bart.vocab_size)?
        } else {
            resolve_tokenizer(&model_cfg.language_model, Some(&tok_store))?
        };
        tok_store.save(&tokenizer)?;

        let text_budget = bart.max_position_embeddings.saturating_sub(davit.num_tokens());
        let tokenizer = BartTokenizer::new(tokenizer, text_budget)?;

        // ── Step 4: Train / validation split ──────────────────────────────────
        let (train_pairs, val_pairs) = split_train_val(pairs, cfg.train_fraction, cfg.seed);
        tracing::info!(
            "Split: {} train, {} validation",
            train_pairs.len(),
            val_pairs.len()
        );
        if train_pairs.is_empty() {
            bail!("train_fraction {} leaves no training pairs", cfg.train_fraction);
        }

        // ── Step 5: Save config for inference ─────────────────────────────────
        ckpt_manager.save_config(&model_cfg)?;

        // ── Step 6: Training loop (Layer 5) ───────────────────────────────────
        let batcher = CaptionBatcher::new(tokenizer, ImagePreprocessor::new(davit.image_size));
        run_training(
            cfg,
            &model_cfg,
            batcher,
            CaptionDataset::new(train_pairs),
            CaptionDataset::new(val_pairs),
            &ckpt_manager,
        )
    }
}
