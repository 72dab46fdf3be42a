// ============================================================
// Layer 3 — CaptionPair Domain Type
// ============================================================
// One supervised example for conditional generation:
//   - an image on disk
//   - a prompt fed to the encoder next to the image tokens
//   - the target text the decoder should produce
//
// Example:
//   image:  "images/dog.png"
//   prompt: "<CAPTION>"
//   target: "a dog running on the beach"

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A labelled image/text example.
///
/// `image` is resolved against the manifest directory by the loader,
/// so by the time a CaptionPair exists the path is usable as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionPair {
    pub image: PathBuf,

    /// Empty prompts are allowed; the encoder then sees `<s></s>`
    /// after the image tokens.
    #[serde(default)]
    pub prompt: String,

    pub target: String,
}

impl CaptionPair {
    pub fn new(
        image:  impl Into<PathBuf>,
        prompt: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            image:  image.into(),
            prompt: prompt.into(),
            target: target.into(),
        }
    }

    /// Re-root a relative image path under `base`.
    /// Absolute paths are left untouched.
    pub fn resolved_against(mut self, base: &Path) -> Self {
        if self.image.is_relative() {
            self.image = base.join(&self.image);
        }
        self
    }
}
