// ============================================================
// Layer 4 — Caption Manifest Loader
// ============================================================
// Reads a captions.json manifest: a JSON list of examples whose
// image paths are relative to the manifest's own directory.
//
//   [
//     { "image": "img/dog.png", "prompt": "<CAPTION>", "target": "a dog on grass" },
//     { "image": "img/cat.jpg", "target": "a sleeping cat" }
//   ]
//
// Entries whose image file is missing are skipped with a warning
// rather than failing the whole run.

use anyhow::{Context, Result};
use std::{fs, path::{Path, PathBuf}};

use crate::domain::caption::CaptionPair;
use crate::domain::traits::CaptionSource;

pub struct CaptionLoader {
    manifest: PathBuf,
}

impl CaptionLoader {
    pub fn new(manifest: impl Into<PathBuf>) -> Self {
        Self { manifest: manifest.into() }
    }

    fn base_dir(&self) -> &Path {
        self.manifest.parent().unwrap_or_else(|| Path::new("."))
    }
}

impl CaptionSource for CaptionLoader {
    fn load_all(&self) -> Result<Vec<CaptionPair>> {
        let raw = fs::read_to_string(&self.manifest)
            .with_context(|| format!("Cannot read manifest '{}'", self.manifest.display()))?;
        let entries: Vec<CaptionPair> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid caption manifest '{}'", self.manifest.display()))?;

        let base = self.base_dir();
        let mut pairs = Vec::with_capacity(entries.len());
        for entry in entries {
            let pair = entry.resolved_against(base);
            if !pair.image.exists() {
                tracing::warn!("Skipping '{}': image not found", pair.image.display());
                continue;
            }
            if pair.target.trim().is_empty() {
                tracing::warn!("Skipping '{}': empty target", pair.image.display());
                continue;
            }
            pairs.push(pair);
        }

        tracing::info!(
            "Loaded {} caption pairs from '{}'",
            pairs.len(),
            self.manifest.display()
        );
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("captions.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_paths_resolve_against_manifest_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"").unwrap();
        let manifest = write_manifest(
            dir.path(),
            r#"[{"image": "a.png", "prompt": "<CAPTION>", "target": "a cat"}]"#,
        );

        let pairs = CaptionLoader::new(manifest).load_all().unwrap();
        assert_eq!(pairs, vec![CaptionPair::new(dir.path().join("a.png"), "<CAPTION>", "a cat")]);
    }

    #[test]
    fn test_missing_images_and_empty_targets_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"").unwrap();
        let manifest = write_manifest(
            dir.path(),
            r#"[
                {"image": "a.png", "target": "kept"},
                {"image": "gone.png", "target": "dropped"},
                {"image": "a.png", "target": "   "}
            ]"#,
        );

        let pairs = CaptionLoader::new(manifest).load_all().unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].target, "kept");
    }

    #[test]
    fn test_malformed_manifest_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(dir.path(), r#"{"image": "a.png"}"#);
        assert!(CaptionLoader::new(manifest).load_all().is_err());
    }

    #[test]
    fn test_missing_manifest_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CaptionLoader::new(dir.path().join("captions.json")).load_all().is_err());
    }
}
