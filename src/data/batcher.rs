// ============================================================
// Layer 4 — Caption Batcher
// ============================================================
// Implements Burn's Batcher trait to turn a Vec<CaptionPair> into
// model-ready tensors:
//
//   images  [N, 3, S, S]  decoded + normalised by ImagePreprocessor
//   prompts [N, P]        <s> prompt </s> <pad>..., with mask
//   targets [N, T]        <s> target </s> <pad>..., with mask
//
// Prompts and targets are padded independently, each to the
// longest row of this batch only.

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::data::image::{stack_images, ImagePreprocessor};
use crate::domain::caption::CaptionPair;
use crate::ml::tokenizer::{BartTokenizer, TokenBatch};

#[derive(Debug, Clone)]
pub struct CaptionBatch<B: Backend> {
    pub images:  Tensor<B, 4>,
    pub prompts: TokenBatch<B>,
    pub targets: TokenBatch<B>,
}

#[derive(Clone)]
pub struct CaptionBatcher {
    tokenizer:    BartTokenizer,
    preprocessor: ImagePreprocessor,
}

impl CaptionBatcher {
    pub fn new(tokenizer: BartTokenizer, preprocessor: ImagePreprocessor) -> Self {
        Self { tokenizer, preprocessor }
    }

    pub fn try_batch<B: Backend>(
        &self,
        items:  &[CaptionPair],
        device: &B::Device,
    ) -> anyhow::Result<CaptionBatch<B>> {
        let size = self.preprocessor.size();
        // An unreadable image becomes the all-zero (mean colour) input
        // so one bad file does not abort an epoch.
        let pixels: Vec<Vec<f32>> = items
            .iter()
            .map(|item| {
                self.preprocessor.load(&item.image).unwrap_or_else(|e| {
                    tracing::warn!("{e:#}; using a blank image instead");
                    vec![0.0; 3 * size * size]
                })
            })
            .collect();

        let prompts: Vec<&str> = items.iter().map(|p| p.prompt.as_str()).collect();
        let targets: Vec<&str> = items.iter().map(|p| p.target.as_str()).collect();

        Ok(CaptionBatch {
            images:  stack_images(&pixels, size, device),
            prompts: self.tokenizer.encode(&prompts)?.to_batch(device),
            targets: self.tokenizer.encode(&targets)?.to_batch(device),
        })
    }
}

impl<B: Backend> Batcher<B, CaptionPair, CaptionBatch<B>> for CaptionBatcher {
    fn batch(&self, items: Vec<CaptionPair>, device: &B::Device) -> CaptionBatch<B> {
        // The trait has no error channel; a tokenizer failure here means
        // the vocabulary itself is broken, not the sample.
        match self.try_batch(&items, device) {
            Ok(batch) => batch,
            Err(e) => panic!("Cannot build caption batch: {e:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    use crate::infra::tokenizer_store::TokenizerStore;

    #[test]
    fn test_batch_shapes_and_padding() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("a.png");
        RgbImage::from_pixel(12, 9, Rgb([10, 200, 30])).save(&img).unwrap();

        let tok = TokenizerStore::new(dir.path().to_string_lossy())
            .build_and_save(&["a red car on the road".to_string()], 50)
            .unwrap();
        let batcher = CaptionBatcher::new(BartTokenizer::new(tok, 16).unwrap(), ImagePreprocessor::new(8));

        let items = vec![
            CaptionPair::new(&img, "", "a red car"),
            CaptionPair::new(&img, "car", "a car on the road"),
        ];
        let device = Default::default();
        let batch: CaptionBatch<NdArray> = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        // prompts: <s></s> vs <s> car </s>
        assert_eq!(batch.prompts.ids.dims(), [2, 3]);
        // targets: 3 words vs 5 words, plus <s> and </s>
        assert_eq!(batch.targets.ids.dims(), [2, 7]);
        let mask: Vec<i64> = batch.targets.mask.into_data().iter::<i64>().collect();
        assert_eq!(mask, vec![1, 1, 1, 1, 1, 0, 0, 1, 1, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_unreadable_image_becomes_blank() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"not an image").unwrap();

        let tok = TokenizerStore::new(dir.path().to_string_lossy())
            .build_and_save(&["x".to_string()], 10)
            .unwrap();
        let batcher = CaptionBatcher::new(BartTokenizer::new(tok, 8).unwrap(), ImagePreprocessor::new(4));

        let device = Default::default();
        let batch = batcher
            .try_batch::<NdArray>(&[CaptionPair::new(&bad, "", "x")], &device)
            .unwrap();
        assert_eq!(batch.images.abs().sum().into_scalar().elem::<f32>(), 0.0);
    }
}
