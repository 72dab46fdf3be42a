// ============================================================
// Layer 5 — Model Configuration
// ============================================================
// Every architecture knob lives in a Burn `Config` so the whole
// model can be rebuilt from a single JSON file:
//
//   {
//     "backbone": { "kind": "base", "weight": null, "return_feature": true },
//     "language_model": { "model_name": "facebook/bart-large", ... }
//   }
//
// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::error::ModelError;

/// The two DaViT sizes the composition knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackboneKind {
    /// DaViT-base, 224px input, 1024-wide output tokens
    Base,
    /// DaViT-large with 12x12 windows, 384px input, 1536-wide output tokens
    Large,
}

#[derive(Config, Debug)]
pub struct BackboneConfig {
    pub kind: BackboneKind,

    /// Burn record with pretrained DaViT weights. `None` keeps random init.
    pub weight: Option<String>,

    /// Drop the classification head and hand token features downstream.
    #[config(default = true)]
    pub return_feature: bool,

    /// Explicit architecture; overrides the preset selected by `kind`.
    pub architecture: Option<DavitConfig>,
}

impl BackboneConfig {
    pub fn davit(&self) -> DavitConfig {
        if let Some(arch) = &self.architecture {
            return arch.clone();
        }
        match self.kind {
            BackboneKind::Base  => DavitConfig::base(),
            BackboneKind::Large => DavitConfig::large_window12_384(),
        }
    }
}

#[derive(Config, Debug)]
pub struct DavitConfig {
    pub in_chans:      usize,
    pub image_size:    usize,
    pub patch_size:    [usize; 4],
    pub patch_stride:  [usize; 4],
    pub patch_padding: [usize; 4],
    pub embed_dims:    [usize; 4],
    pub num_heads:     [usize; 4],
    pub depths:        [usize; 4],
    pub window_size:   usize,
    #[config(default = 4.0)]
    pub mlp_ratio:     f64,
    #[config(default = 1000)]
    pub num_classes:   usize,
    #[config(default = 0.0)]
    pub drop_rate:     f64,
}

impl DavitConfig {
    pub fn base() -> Self {
        Self {
            in_chans:      3,
            image_size:    224,
            patch_size:    [7, 3, 3, 3],
            patch_stride:  [4, 2, 2, 2],
            patch_padding: [3, 1, 1, 1],
            embed_dims:    [128, 256, 512, 1024],
            num_heads:     [4, 8, 16, 32],
            depths:        [1, 1, 9, 1],
            window_size:   7,
            mlp_ratio:     4.0,
            num_classes:   1000,
            drop_rate:     0.0,
        }
    }

    pub fn large_window12_384() -> Self {
        Self {
            image_size:  384,
            embed_dims:  [192, 384, 768, 1536],
            num_heads:   [6, 12, 24, 48],
            window_size: 12,
            ..Self::base()
        }
    }

    /// 32px toy backbone (one 32-wide output token) for offline demos
    /// and tests. Grids of 8/4/2/1 exercise window padding at every stage.
    pub fn tiny() -> Self {
        Self {
            image_size:  32,
            embed_dims:  [8, 16, 16, 32],
            num_heads:   [2, 2, 4, 4],
            depths:      [1, 1, 2, 1],
            window_size: 3,
            mlp_ratio:   2.0,
            num_classes: 5,
            ..Self::base()
        }
    }

    /// Width of the tokens produced by the last stage.
    pub fn feature_dim(&self) -> usize {
        self.embed_dims[3]
    }

    /// Number of image tokens for a square `image_size` input.
    pub fn num_tokens(&self) -> usize {
        let side = (0..4).fold(self.image_size, |side, i| {
            (side + 2 * self.patch_padding[i]).saturating_sub(self.patch_size[i]) / self.patch_stride[i] + 1
        });
        side * side
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        for (stage, (&dim, &heads)) in self.embed_dims.iter().zip(&self.num_heads).enumerate() {
            if heads == 0 || dim % heads != 0 {
                return Err(ModelError::HeadsNotDivisible {
                    component: format!("davit stage {stage}"),
                    dim,
                    heads,
                });
            }
        }
        Ok(())
    }
}

#[derive(Config, Debug)]
pub struct BartConfig {
    pub vocab_size:              usize,
    pub d_model:                 usize,
    pub encoder_layers:          usize,
    pub decoder_layers:          usize,
    pub attention_heads:         usize,
    pub ffn_dim:                 usize,
    pub max_position_embeddings: usize,
    #[config(default = 0.1)]
    pub dropout:                 f64,
    #[config(default = 1)]
    pub pad_token_id:            usize,
    #[config(default = 0)]
    pub bos_token_id:            usize,
    #[config(default = 2)]
    pub eos_token_id:            usize,
    #[config(default = 2)]
    pub decoder_start_token_id:  usize,
}

impl BartConfig {
    /// facebook/bart-large
    pub fn large() -> Self {
        Self::new(50265, 1024, 12, 12, 16, 4096, 1024)
    }

    /// 16-wide, 2+2 layers, 64 positions, no dropout.
    pub fn tiny(vocab_size: usize) -> Self {
        Self::new(vocab_size, 16, 2, 2, 2, 32, 64).with_dropout(0.0)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.attention_heads == 0 || self.d_model % self.attention_heads != 0 {
            return Err(ModelError::HeadsNotDivisible {
                component: "bart".to_string(),
                dim:       self.d_model,
                heads:     self.attention_heads,
            });
        }
        Ok(())
    }
}

#[derive(Config, Debug)]
pub struct LanguageModelConfig {
    /// Hub id used to fetch `tokenizer.json` when `tokenizer` is unset.
    #[config(default = "String::from(\"facebook/bart-large\")")]
    pub model_name: String,

    /// Local `tokenizer.json`.
    pub tokenizer: Option<String>,

    /// Burn record with pretrained BART weights.
    pub weight: Option<String>,

    pub bart: BartConfig,
}

#[derive(Config, Debug)]
pub struct Florence2Config {
    pub backbone:       BackboneConfig,
    pub language_model: LanguageModelConfig,
}

impl Florence2Config {
    /// The demo configuration: DaViT-base without
    /// pretrained weights feeding bart-large.
    pub fn base() -> Self {
        Self::new(
            BackboneConfig::new(BackboneKind::Base),
            LanguageModelConfig::new(BartConfig::large()),
        )
    }

    /// Toy pairing of `DavitConfig::tiny` and `BartConfig::tiny`.
    pub fn tiny(vocab_size: usize) -> Self {
        Self::new(
            BackboneConfig::new(BackboneKind::Base).with_architecture(Some(DavitConfig::tiny())),
            LanguageModelConfig::new(BartConfig::tiny(vocab_size)),
        )
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.backbone.return_feature {
            return Err(ModelError::FeaturesRequired);
        }
        self.backbone.davit().validate()?;
        self.language_model.bart.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_feature_dims() {
        assert_eq!(BackboneConfig::new(BackboneKind::Base).davit().feature_dim(), 1024);
        assert_eq!(BackboneConfig::new(BackboneKind::Large).davit().feature_dim(), 1536);
        assert_eq!(DavitConfig::large_window12_384().image_size, 384);
    }

    #[test]
    fn test_image_token_counts() {
        assert_eq!(DavitConfig::base().num_tokens(), 49);
        assert_eq!(DavitConfig::large_window12_384().num_tokens(), 144);
    }

    #[test]
    fn test_base_config_is_valid() {
        let cfg = Florence2Config::base();
        assert!(cfg.validate().is_ok());
        assert!(cfg.backbone.return_feature);
        assert!(cfg.backbone.weight.is_none());
        assert_eq!(cfg.language_model.model_name, "facebook/bart-large");
    }

    #[test]
    fn test_classification_backbone_rejected() {
        let mut cfg = Florence2Config::base();
        cfg.backbone.return_feature = false;
        assert_eq!(cfg.validate(), Err(ModelError::FeaturesRequired));
    }

    #[test]
    fn test_bad_head_count_rejected() {
        let mut cfg = Florence2Config::base();
        cfg.language_model.bart.attention_heads = 3;
        assert!(matches!(
            cfg.validate(),
            Err(ModelError::HeadsNotDivisible { dim: 1024, heads: 3, .. })
        ));
    }

    #[test]
    fn test_unknown_backbone_kind_rejected() {
        let json = r#"{"kind": "huge", "weight": null, "return_feature": true}"#;
        assert!(serde_json::from_str::<BackboneConfig>(json).is_err());
    }

    #[test]
    fn test_config_json_roundtrip_on_disk() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("florence2.json");
        let mut cfg = Florence2Config::base();
        cfg.backbone.kind = BackboneKind::Large;
        cfg.save(&path).unwrap();

        let loaded = Florence2Config::load(&path).unwrap();
        assert_eq!(loaded.backbone.kind, BackboneKind::Large);
        assert_eq!(loaded.language_model.bart.d_model, 1024);
    }
}
