// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights as gzipped MessagePack records.
// Full precision is kept so a reload reproduces the saved weights
// bit for bit (CompactRecorder would round them to f16).
//
// File naming convention:
//   checkpoints/
//     model_epoch_1.mpk.gz   ← full Florence2 weights after epoch 1
//     ...
//     latest_epoch.json      ← number of the latest saved epoch
//     florence2_config.json  ← architecture needed to rebuild the model
//
// Pretrained parts (backbone, language model) are plain records
// too and go through `load_weights`.

use anyhow::{Context, Result};
use std::{fs, path::{Path, PathBuf}};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder},
};

use crate::ml::config::Florence2Config;
use crate::ml::florence2::Florence2Model;

type WeightRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

const CONFIG_FILE: &str = "florence2_config.json";
const LATEST_FILE: &str = "latest_epoch.json";

/// Load a record file into an already-built module of matching shape.
pub fn load_weights<B: Backend, M: Module<B>>(
    module: M,
    path:   impl AsRef<Path>,
    device: &B::Device,
) -> Result<M> {
    let path = path.as_ref().to_path_buf();
    let module = module
        .load_file(path.clone(), &WeightRecorder::new(), device)
        .map_err(|e| anyhow::anyhow!("Cannot load weights from '{}': {e:?}", path.display()))?;
    tracing::info!("Loaded weights from '{}'", path.display());
    Ok(module)
}

/// Save any module as a record file (the recorder adds the extension).
pub fn save_weights<B: Backend, M: Module<B>>(module: &M, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref().to_path_buf();
    module
        .clone()
        .save_file(path.clone(), &WeightRecorder::new())
        .map_err(|e| anyhow::anyhow!("Failed to save weights to '{}': {e:?}", path.display()))
}

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<String>) -> Result<Self> {
        let dir = PathBuf::from(dir.into());
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint dir '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save_model<B: Backend>(&self, model: &Florence2Model<B>, epoch: usize) -> Result<()> {
        save_weights(model, self.dir.join(format!("model_epoch_{epoch}")))?;

        let latest_path = self.dir.join(LATEST_FILE);
        fs::write(&latest_path, serde_json::to_string(&epoch)?)
            .with_context(|| format!("Failed to write {LATEST_FILE}"))?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Restore the weights of the latest epoch into `model`.
    pub fn load_model<B: Backend>(
        &self,
        model:  Florence2Model<B>,
        device: &B::Device,
    ) -> Result<Florence2Model<B>> {
        let epoch = self.latest_epoch()?;
        tracing::info!("Loading checkpoint from epoch {}", epoch);
        load_weights(model, self.dir.join(format!("model_epoch_{epoch}")), device)
            .with_context(|| "Have you trained the model first?")
    }

    pub fn save_config(&self, cfg: &Florence2Config) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        cfg.save(&path)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved model config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<Florence2Config> {
        let path = self.dir.join(CONFIG_FILE);
        Florence2Config::load(&path).map_err(|e| {
            anyhow::anyhow!(
                "Cannot read config from '{}': {:?}. Make sure you have run 'train' first.",
                path.display(),
                e
            )
        })
    }

    pub fn has_checkpoint(&self) -> bool {
        self.dir.join(LATEST_FILE).exists()
    }

    /// Number of the last epoch written by `save_model`.
    pub fn latest_epoch(&self) -> Result<usize> {
        let path = self.dir.join(LATEST_FILE);
        let s = fs::read_to_string(&path)
            .with_context(|| format!("Cannot find '{}'", path.display()))?;
        Ok(serde_json::from_str::<usize>(&s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use crate::ml::florence2::tests::tiny_config;
    use crate::ml::projection::{LinearProjection, LinearProjectionConfig};

    #[test]
    fn test_weights_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let saved: LinearProjection<NdArray> = LinearProjectionConfig::new(4, 3).init(&device);
        save_weights(&saved, dir.path().join("proj")).unwrap();

        let fresh: LinearProjection<NdArray> = LinearProjectionConfig::new(4, 3).init(&device);
        let loaded = load_weights(fresh, dir.path().join("proj"), &device).unwrap();
        loaded
            .linear
            .weight
            .val()
            .into_data()
            .assert_eq(&saved.linear.weight.val().into_data(), true);
    }

    #[test]
    fn test_missing_weights_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let fresh: LinearProjection<NdArray> = LinearProjectionConfig::new(4, 3).init(&device);
        assert!(load_weights(fresh, dir.path().join("absent"), &device).is_err());
    }

    #[test]
    fn test_model_checkpoint_tracks_latest_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let ckpt = CheckpointManager::new(dir.path().to_string_lossy()).unwrap();
        assert!(!ckpt.has_checkpoint());

        let cfg = tiny_config(40);
        let model: Florence2Model<NdArray> = cfg.init(&device).unwrap();
        ckpt.save_config(&cfg).unwrap();
        ckpt.save_model(&model, 1).unwrap();
        ckpt.save_model(&model, 2).unwrap();

        assert!(ckpt.has_checkpoint());
        assert_eq!(ckpt.latest_epoch().unwrap(), 2);

        let cfg = ckpt.load_config().unwrap();
        let restored = ckpt.load_model(cfg.init::<NdArray>(&device).unwrap(), &device).unwrap();
        restored
            .visual_projection
            .linear
            .weight
            .val()
            .into_data()
            .assert_eq(&model.visual_projection.linear.weight.val().into_data(), true);
    }
}
