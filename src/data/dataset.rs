use burn::data::dataset::Dataset;

use crate::domain::caption::CaptionPair;

/// In-memory list of caption pairs. Images stay on disk and are
/// decoded by the batcher, so the dataset is cheap to clone and split.
pub struct CaptionDataset {
    pairs: Vec<CaptionPair>,
}

impl CaptionDataset {
    pub fn new(pairs: Vec<CaptionPair>) -> Self { Self { pairs } }

    /// Prompts and targets, e.g. as a corpus for an offline vocabulary.
    pub fn texts(&self) -> Vec<String> {
        self.pairs
            .iter()
            .flat_map(|p| [p.prompt.clone(), p.target.clone()])
            .filter(|t| !t.is_empty())
            .collect()
    }
}

impl Dataset<CaptionPair> for CaptionDataset {
    fn get(&self, index: usize) -> Option<CaptionPair> {
        self.pairs.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }
}
