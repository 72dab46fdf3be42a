// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from a caption manifest on disk to tensor batches.
//
//   captions.json
//       │
//       ▼
//   CaptionLoader     → reads the manifest, resolves image paths
//       │
//       ▼
//   split_train_val   → seeded shuffle into train / validation
//       │
//       ▼
//   CaptionDataset    → implements Burn's Dataset trait
//       │
//       ▼
//   CaptionBatcher    → decodes images (ImagePreprocessor) and
//       │               tokenizes prompts and targets
//       ▼
//   DataLoader        → feeds batches to the training loop

/// Reads captions.json manifests
pub mod loader;

/// Image decoding, resizing and ImageNet normalisation
pub mod image;

/// Implements Burn's Dataset trait for caption pairs
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Seeded train/validation split
pub mod splitter;
