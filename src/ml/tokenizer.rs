// ============================================================
// Layer 5 — BART Tokenization Helper
// ============================================================
// Wraps a HuggingFace tokenizer with the BART input format:
//
//   <s> text tokens </s> <pad> <pad> ...
//
// Every row is truncated to the position budget and right-padded
// to the longest row in the batch. The attention mask is 1 for real
// tokens and 0 for padding.

use burn::prelude::*;
use tokenizers::Tokenizer;

use crate::domain::error::ModelError;

pub const BOS: &str = "<s>";
pub const PAD: &str = "<pad>";
pub const EOS: &str = "</s>";
pub const UNK: &str = "<unk>";
pub const MASK: &str = "<mask>";

/// A padded, row-major batch of token ids.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedText {
    pub input_ids:      Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub batch_size:     usize,
    pub seq_len:        usize,
}

impl EncodedText {
    pub fn row(&self, i: usize) -> &[u32] {
        &self.input_ids[i * self.seq_len..(i + 1) * self.seq_len]
    }

    pub fn to_batch<B: Backend>(&self, device: &B::Device) -> TokenBatch<B> {
        let to_tensor = |v: &[u32]| {
            let ints: Vec<i32> = v.iter().map(|&x| x as i32).collect();
            Tensor::<B, 1, Int>::from_ints(ints.as_slice(), device)
                .reshape([self.batch_size, self.seq_len])
        };
        TokenBatch {
            ids:  to_tensor(&self.input_ids),
            mask: to_tensor(&self.attention_mask),
        }
    }
}

/// Token ids and attention mask, both [batch, seq_len].
#[derive(Debug, Clone)]
pub struct TokenBatch<B: Backend> {
    pub ids:  Tensor<B, 2, Int>,
    pub mask: Tensor<B, 2, Int>,
}

#[derive(Clone)]
pub struct BartTokenizer {
    tokenizer: Tokenizer,
    max_len:   usize,
    pub bos_id: u32,
    pub pad_id: u32,
    pub eos_id: u32,
}

impl BartTokenizer {
    pub fn new(tokenizer: Tokenizer, max_len: usize) -> Result<Self, ModelError> {
        let id = |tok: &str| {
            tokenizer
                .token_to_id(tok)
                .ok_or_else(|| ModelError::MissingSpecialToken(tok.to_string()))
        };
        Ok(Self {
            bos_id: id(BOS)?,
            pad_id: id(PAD)?,
            eos_id: id(EOS)?,
            tokenizer,
            max_len,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn encode<S: AsRef<str>>(&self, texts: &[S]) -> anyhow::Result<EncodedText> {
        if texts.is_empty() {
            return Err(ModelError::EmptyBatch.into());
        }

        let body_budget = self.max_len.saturating_sub(2);
        let mut rows = Vec::with_capacity(texts.len());
        for text in texts {
            let enc = self
                .tokenizer
                .encode(text.as_ref(), false)
                .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
            let mut row = Vec::with_capacity(enc.get_ids().len() + 2);
            row.push(self.bos_id);
            row.extend(enc.get_ids().iter().take(body_budget));
            row.push(self.eos_id);
            rows.push(row);
        }

        let seq_len = rows.iter().map(Vec::len).max().unwrap_or(2);
        let mut input_ids      = Vec::with_capacity(rows.len() * seq_len);
        let mut attention_mask = Vec::with_capacity(rows.len() * seq_len);
        for row in &rows {
            input_ids.extend_from_slice(row);
            attention_mask.extend(std::iter::repeat(1).take(row.len()));
            input_ids.extend(std::iter::repeat(self.pad_id).take(seq_len - row.len()));
            attention_mask.extend(std::iter::repeat(0).take(seq_len - row.len()));
        }

        Ok(EncodedText {
            input_ids,
            attention_mask,
            batch_size: rows.len(),
            seq_len,
        })
    }

    /// Decode ids, dropping special tokens.
    pub fn decode(&self, ids: &[u32]) -> anyhow::Result<String> {
        let text = self
            .tokenizer
            .decode(ids, true)
            .map_err(|e| anyhow::anyhow!("Decode: {e}"))?;
        Ok(text.trim().to_string())
    }
}
