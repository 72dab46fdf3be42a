// ============================================================
// Layer 3 — Model Errors
// ============================================================
// Failures the composition can detect before touching a tensor
// kernel. Everything else is reported through anyhow with context.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    /// The composition concatenates token features, so the backbone
    /// must not be configured to return classification logits.
    #[error("backbone must be built with return_feature = true to feed the language model")]
    FeaturesRequired,

    #[error("{component}: width {dim} is not divisible by {heads} heads")]
    HeadsNotDivisible {
        component: String,
        dim:       usize,
        heads:     usize,
    },

    #[error("image batch has {images} items but text batch has {texts}")]
    BatchMismatch { images: usize, texts: usize },

    #[error("combined sequence of {len} tokens exceeds {max} positions")]
    SequenceTooLong { len: usize, max: usize },

    #[error("tokenizer has no id for special token '{0}'")]
    MissingSpecialToken(String),

    #[error("text batch is empty")]
    EmptyBatch,

    #[error("tokenizer has {tokenizer} entries but the embedding table only {model}")]
    VocabTooLarge { tokenizer: usize, model: usize },
}
