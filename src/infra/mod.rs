// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// File-system concerns shared by the other layers:
//
//   checkpoint.rs      — Saving and loading weights
//                        Full-model records per epoch, the
//                        Florence2Config JSON needed to rebuild
//                        the model, and standalone records for the
//                        pretrained backbone / language model.
//
//   tokenizer_store.rs — Tokenizer resolution
//                        Explicit tokenizer.json, HuggingFace hub
//                        download by model name, or an offline
//                        word-level vocabulary with BART's ids.
//
//   metrics.rs         — Training metrics logging
//                        Epoch-level losses appended to a CSV.

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Tokenizer loading, downloading and offline building
pub mod tokenizer_store;

/// Training metrics CSV logger
pub mod metrics;
