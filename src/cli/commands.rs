// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the four subcommands and their flags:
//
//   demo      random image + "This is the test text", print shapes
//   forward   one forward pass on a real image / text
//   generate  greedy caption for an image
//   train     fine-tune on a captions.json manifest

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::{
    forward_use_case::{ForwardConfig, DEMO_TEXT},
    generate_use_case::DEFAULT_MAX_NEW_TOKENS,
    train_use_case::TrainConfig,
};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run DaViT-base + bart-large on a random 224x224 image
    Demo(DemoArgs),

    /// One forward pass, printing input and output shapes
    Forward(ForwardArgs),

    /// Caption an image with greedy decoding
    Generate(GenerateArgs),

    /// Fine-tune on a caption manifest
    Train(TrainArgs),
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Use a toy architecture and an offline vocabulary
    /// (no download, runs in seconds)
    #[arg(long)]
    pub tiny: bool,
}

impl From<DemoArgs> for ForwardConfig {
    fn from(a: DemoArgs) -> Self {
        ForwardConfig::demo(a.tiny)
    }
}

#[derive(Args, Debug)]
pub struct ForwardArgs {
    /// Florence2Config JSON (defaults to DaViT-base + bart-large)
    #[arg(long)]
    pub config: Option<String>,

    /// Image file; a random image is used when omitted
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Text fed to both the encoder (after the image) and the decoder
    #[arg(long, default_value = DEMO_TEXT)]
    pub text: String,
}

impl From<ForwardArgs> for ForwardConfig {
    fn from(a: ForwardArgs) -> Self {
        ForwardConfig {
            config: a.config,
            image:  a.image,
            texts:  vec![a.text],
            tiny:   false,
        }
    }
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Image to caption
    #[arg(long)]
    pub image: PathBuf,

    /// Prompt placed after the image tokens
    #[arg(long, default_value = "")]
    pub prompt: String,

    /// Directory written by `train`; takes precedence over --config
    #[arg(long)]
    pub checkpoint_dir: Option<String>,

    /// Florence2Config JSON with optional pretrained weights
    #[arg(long)]
    pub config: Option<String>,

    /// Stop after this many generated tokens
    #[arg(long, default_value_t = DEFAULT_MAX_NEW_TOKENS)]
    pub max_new_tokens: usize,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Florence2Config JSON (defaults to DaViT-base + bart-large)
    #[arg(long)]
    pub config: Option<String>,

    /// captions.json: [{"image", "prompt", "target"}, ...]
    #[arg(long, default_value = "data/captions.json")]
    pub manifest: String,

    /// Directory for checkpoints, tokenizer, config and metrics
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Build a word-level vocabulary from the manifest
    #[arg(long)]
    pub offline_vocab: bool,

    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(long, default_value_t = 5e-5)]
    pub lr: f64,

    /// Share of pairs used for training, the rest validates
    #[arg(long, default_value_t = 0.9)]
    pub train_fraction: f64,

    /// Seed for the split and the loader shuffle
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Continue from the latest checkpoint
    #[arg(long)]
    pub resume: bool,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            config:         a.config,
            manifest:       a.manifest,
            checkpoint_dir: a.checkpoint_dir,
            offline_vocab:  a.offline_vocab,
            batch_size:     a.batch_size,
            epochs:         a.epochs,
            lr:             a.lr,
            train_fraction: a.train_fraction,
            seed:           a.seed,
            resume:         a.resume,
        }
    }
}
