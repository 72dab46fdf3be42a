// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer works against these traits rather than
// concrete loaders or models.

use anyhow::Result;
use std::path::Path;

use crate::domain::caption::CaptionPair;

// ─── CaptionSource ────────────────────────────────────────────────────────────
/// Any component that can produce labelled caption examples.
///
/// Implementations:
///   - CaptionLoader → reads a captions.json manifest
pub trait CaptionSource {
    fn load_all(&self) -> Result<Vec<CaptionPair>>;
}

// ─── Captioner ────────────────────────────────────────────────────────────────
/// Any component that can turn an image (plus optional prompt)
/// into text.
///
/// Implementations:
///   - GenerateUseCase → greedy decoding through Florence2
pub trait Captioner {
    fn caption(&self, image: &Path, prompt: &str) -> Result<String>;
}
