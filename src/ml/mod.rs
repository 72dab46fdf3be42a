// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that builds or runs tensors lives here.
//
//   config.rs     — Burn Configs for backbone, BART and the
//                   composition; JSON save/load and validation
//
//   davit.rs      — DaViT image backbone
//                   • ConvEmbed patch stages
//                   • window attention + channel-group attention
//                   • depthwise conv positional encoding
//
//   projection.rs — single Linear from backbone width to d_model
//
//   bart.rs       — BART encoder-decoder
//                   • shared embedding, learned positions (offset 2)
//                   • post-norm encoder / decoder layers
//                   • tied LM head + final_logits_bias
//
//   tokenizer.rs  — <s> text </s> batching over a HF tokenizer
//
//   florence2.rs  — the composition:
//                   image → DaViT → projection ┐
//                   text  → embedding ─────────┴→ BART → logits
//
//   inferencer.rs — runtime wrapper: strings + image files in,
//                   shapes / captions out
//
//   trainer.rs    — Adam fine-tuning loop with validation,
//                   checkpointing and metrics
//
// Reference: Ding et al. (2022) DaViT
//            Lewis et al. (2020) BART
//            Xiao et al. (2023) Florence-2

/// Architecture and model configuration
pub mod config;

/// DaViT vision backbone
pub mod davit;

/// Visual projection into the language model width
pub mod projection;

/// BART encoder-decoder
pub mod bart;

/// BART-style tokenization helper
pub mod tokenizer;

/// Florence2 composition module
pub mod florence2;

/// Inference runtime — tokenizer, preprocessing and model together
pub mod inferencer;

/// Full training loop with validation and checkpointing
pub mod trainer;
