// ============================================================
// Layer 5 — BART Sequence-to-Sequence Model
// ============================================================
// Encoder-decoder transformer used as the language head:
//
//   inputs_embeds ─► + learned positions ─► LayerNorm ─► N x EncoderLayer
//                                                             │
//   decoder ids ─► shared embedding ─► + positions ─► LayerNorm
//                                  ─► M x DecoderLayer (causal self-attn,
//                                                       cross-attn on encoder)
//                                  ─► tied LM head + final_logits_bias
//
// Both stacks are post-norm (residual add, then LayerNorm).
// Learned positions start at index 2, which BART reserves.
//
// Reference: Lewis et al. (2019) BART: Denoising Sequence-to-Sequence Pre-training

use burn::{
    module::Param,
    nn::{
        attention::{generate_autoregressive_mask, MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::gelu,
};

use crate::ml::config::BartConfig;

const POSITION_OFFSET: i64 = 2;

/// Prepend `decoder_start` and drop the last token of every row.
pub fn shift_tokens_right<B: Backend>(ids: Tensor<B, 2, Int>, decoder_start: usize) -> Tensor<B, 2, Int> {
    let [b, t] = ids.dims();
    if t == 0 {
        return ids;
    }
    let start = Tensor::<B, 2, Int>::full([b, 1], decoder_start as i64, &ids.device());
    Tensor::cat(vec![start, ids.slice([0..b, 0..t - 1])], 1)
}

/// 1 = attend, 0 = padding  →  true where the key must be ignored
fn pad_mask<B: Backend>(attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2, Bool> {
    attention_mask.equal_elem(0)
}

pub struct Seq2SeqOutput<B: Backend> {
    /// [batch, target_len, vocab]
    pub logits:                Tensor<B, 3>,
    /// [batch, source_len, d_model]
    pub encoder_hidden_states: Tensor<B, 3>,
}

// ─── Layers ───────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
}

impl<B: Backend> FeedForward<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.fc2.forward(gelu(self.fc1.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct BartEncoderLayer<B: Backend> {
    pub self_attn:      MultiHeadAttention<B>,
    pub self_attn_norm: LayerNorm<B>,
    pub ffn:            FeedForward<B>,
    pub final_norm:     LayerNorm<B>,
    pub dropout:        Dropout,
}

impl<B: Backend> BartEncoderLayer<B> {
    pub fn forward(&self, x: Tensor<B, 3>, mask: Option<Tensor<B, 2, Bool>>) -> Tensor<B, 3> {
        let mut input = MhaInput::self_attn(x.clone());
        if let Some(mask) = mask {
            input = input.mask_pad(mask);
        }
        let attn = self.self_attn.forward(input).context;
        let x = self.self_attn_norm.forward(x + self.dropout.forward(attn));

        let ffn = self.ffn.forward(x.clone());
        self.final_norm.forward(x + self.dropout.forward(ffn))
    }
}

#[derive(Module, Debug)]
pub struct BartDecoderLayer<B: Backend> {
    pub self_attn:       MultiHeadAttention<B>,
    pub self_attn_norm:  LayerNorm<B>,
    pub cross_attn:      MultiHeadAttention<B>,
    pub cross_attn_norm: LayerNorm<B>,
    pub ffn:             FeedForward<B>,
    pub final_norm:      LayerNorm<B>,
    pub dropout:         Dropout,
}

impl<B: Backend> BartDecoderLayer<B> {
    pub fn forward(
        &self,
        x:            Tensor<B, 3>,
        causal:       Tensor<B, 3, Bool>,
        self_mask:    Option<Tensor<B, 2, Bool>>,
        encoder:      Tensor<B, 3>,
        encoder_mask: Option<Tensor<B, 2, Bool>>,
    ) -> Tensor<B, 3> {
        let mut input = MhaInput::self_attn(x.clone()).mask_attn(causal);
        if let Some(mask) = self_mask {
            input = input.mask_pad(mask);
        }
        let attn = self.self_attn.forward(input).context;
        let x = self.self_attn_norm.forward(x + self.dropout.forward(attn));

        let mut input = MhaInput::new(x.clone(), encoder.clone(), encoder);
        if let Some(mask) = encoder_mask {
            input = input.mask_pad(mask);
        }
        let cross = self.cross_attn.forward(input).context;
        let x = self.cross_attn_norm.forward(x + self.dropout.forward(cross));

        let ffn = self.ffn.forward(x.clone());
        self.final_norm.forward(x + self.dropout.forward(ffn))
    }
}

// ─── Model ────────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct Bart<B: Backend> {
    pub shared:                  Embedding<B>,
    pub encoder_positions:       Embedding<B>,
    pub decoder_positions:       Embedding<B>,
    pub encoder_embedding_norm:  LayerNorm<B>,
    pub decoder_embedding_norm:  LayerNorm<B>,
    pub encoder_layers:          Vec<BartEncoderLayer<B>>,
    pub decoder_layers:          Vec<BartDecoderLayer<B>>,
    pub final_logits_bias:       Param<Tensor<B, 1>>,
    pub dropout:                 Dropout,
    pub d_model:                 usize,
    pub max_position_embeddings: usize,
}

impl BartConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Bart<B> {
        let positions = self.max_position_embeddings + POSITION_OFFSET as usize;
        Bart {
            shared:                 EmbeddingConfig::new(self.vocab_size, self.d_model).init(device),
            encoder_positions:      EmbeddingConfig::new(positions, self.d_model).init(device),
            decoder_positions:      EmbeddingConfig::new(positions, self.d_model).init(device),
            encoder_embedding_norm: LayerNormConfig::new(self.d_model).init(device),
            decoder_embedding_norm: LayerNormConfig::new(self.d_model).init(device),
            encoder_layers: (0..self.encoder_layers)
                .map(|_| self.build_encoder_layer(device))
                .collect(),
            decoder_layers: (0..self.decoder_layers)
                .map(|_| self.build_decoder_layer(device))
                .collect(),
            final_logits_bias:       Param::from_tensor(Tensor::zeros([self.vocab_size], device)),
            dropout:                 DropoutConfig::new(self.dropout).init(),
            d_model:                 self.d_model,
            max_position_embeddings: self.max_position_embeddings,
        }
    }

    fn build_attention<B: Backend>(&self, device: &B::Device) -> MultiHeadAttention<B> {
        MultiHeadAttentionConfig::new(self.d_model, self.attention_heads)
            .with_dropout(self.dropout)
            .init(device)
    }

    fn build_ffn<B: Backend>(&self, device: &B::Device) -> FeedForward<B> {
        FeedForward {
            fc1: LinearConfig::new(self.d_model, self.ffn_dim).init(device),
            fc2: LinearConfig::new(self.ffn_dim, self.d_model).init(device),
        }
    }

    fn build_encoder_layer<B: Backend>(&self, device: &B::Device) -> BartEncoderLayer<B> {
        BartEncoderLayer {
            self_attn:      self.build_attention(device),
            self_attn_norm: LayerNormConfig::new(self.d_model).init(device),
            ffn:            self.build_ffn(device),
            final_norm:     LayerNormConfig::new(self.d_model).init(device),
            dropout:        DropoutConfig::new(self.dropout).init(),
        }
    }

    fn build_decoder_layer<B: Backend>(&self, device: &B::Device) -> BartDecoderLayer<B> {
        BartDecoderLayer {
            self_attn:       self.build_attention(device),
            self_attn_norm:  LayerNormConfig::new(self.d_model).init(device),
            cross_attn:      self.build_attention(device),
            cross_attn_norm: LayerNormConfig::new(self.d_model).init(device),
            ffn:             self.build_ffn(device),
            final_norm:      LayerNormConfig::new(self.d_model).init(device),
            dropout:         DropoutConfig::new(self.dropout).init(),
        }
    }
}

impl<B: Backend> Bart<B> {
    /// Raw lookup in the shared token embedding: [batch, len] → [batch, len, d_model]
    pub fn extract_embedding(&self, tokens: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        self.shared.forward(tokens)
    }

    fn positions(&self, table: &Embedding<B>, batch: usize, len: usize, device: &B::Device) -> Tensor<B, 3> {
        let ids = Tensor::<B, 1, Int>::arange(POSITION_OFFSET..len as i64 + POSITION_OFFSET, device)
            .unsqueeze::<2>()
            .expand([batch, len]);
        table.forward(ids)
    }

    /// Run the encoder stack over already-embedded inputs.
    pub fn encode_embeds(
        &self,
        inputs_embeds:  Tensor<B, 3>,
        attention_mask: Option<Tensor<B, 2, Int>>,
    ) -> Tensor<B, 3> {
        let [batch, len, _] = inputs_embeds.dims();
        let device = inputs_embeds.device();

        let pos = self.positions(&self.encoder_positions, batch, len, &device);
        let mut x = self.dropout.forward(self.encoder_embedding_norm.forward(inputs_embeds + pos));

        let mask = attention_mask.map(pad_mask);
        for layer in &self.encoder_layers {
            x = layer.forward(x, mask.clone());
        }
        x
    }

    /// Decoder stack plus tied LM head: returns [batch, target_len, vocab] logits.
    pub fn decode(
        &self,
        decoder_input_ids:      Tensor<B, 2, Int>,
        decoder_attention_mask: Option<Tensor<B, 2, Int>>,
        encoder_hidden_states:  Tensor<B, 3>,
        encoder_attention_mask: Option<Tensor<B, 2, Int>>,
    ) -> Tensor<B, 3> {
        let [batch, len] = decoder_input_ids.dims();
        let device = decoder_input_ids.device();

        let tok = self.shared.forward(decoder_input_ids);
        let pos = self.positions(&self.decoder_positions, batch, len, &device);
        let mut x = self.dropout.forward(self.decoder_embedding_norm.forward(tok + pos));

        let causal = generate_autoregressive_mask::<B>(batch, len, &device);
        let self_mask = decoder_attention_mask.map(pad_mask);
        let enc_mask = encoder_attention_mask.map(pad_mask);
        for layer in &self.decoder_layers {
            x = layer.forward(
                x,
                causal.clone(),
                self_mask.clone(),
                encoder_hidden_states.clone(),
                enc_mask.clone(),
            );
        }

        self.lm_head(x)
    }

    fn lm_head(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, len, d_model] = x.dims();
        let weight = self.shared.weight.val(); // [vocab, d_model]
        let [vocab, _] = weight.dims();
        let logits = x.reshape([batch * len, d_model]).matmul(weight.transpose())
            + self.final_logits_bias.val().unsqueeze::<2>();
        logits.reshape([batch, len, vocab])
    }

    /// Standard seq2seq pass with precomputed encoder inputs.
    pub fn forward(
        &self,
        inputs_embeds:          Tensor<B, 3>,
        attention_mask:         Option<Tensor<B, 2, Int>>,
        decoder_input_ids:      Tensor<B, 2, Int>,
        decoder_attention_mask: Option<Tensor<B, 2, Int>>,
    ) -> Seq2SeqOutput<B> {
        let encoder_hidden_states = self.encode_embeds(inputs_embeds, attention_mask.clone());
        let logits = self.decode(
            decoder_input_ids,
            decoder_attention_mask,
            encoder_hidden_states.clone(),
            attention_mask,
        );
        Seq2SeqOutput { logits, encoder_hidden_states }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn ids(rows: &[&[i64]]) -> Tensor<TestBackend, 2, Int> {
        let device = Default::default();
        let width = rows[0].len();
        let flat: Vec<i64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::<TestBackend, 1, Int>::from_ints(flat.as_slice(), &device).reshape([rows.len(), width])
    }

    fn max_abs_diff(a: Tensor<TestBackend, 3>, b: Tensor<TestBackend, 3>) -> f32 {
        (a - b).abs().max().into_scalar().elem::<f32>()
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model: Bart<TestBackend> = BartConfig::tiny(30).init(&device);
        let embeds = Tensor::<TestBackend, 3>::ones([2, 9, 16], &device);
        let out = model.forward(embeds, None, ids(&[&[2, 0, 5, 6], &[2, 0, 7, 1]]), None);
        assert_eq!(out.logits.dims(), [2, 4, 30]);
        assert_eq!(out.encoder_hidden_states.dims(), [2, 9, 16]);
    }

    #[test]
    fn test_decoder_is_causal() {
        let device = Default::default();
        let model: Bart<TestBackend> = BartConfig::tiny(30).init(&device);
        let embeds = Tensor::<TestBackend, 3>::random([1, 5, 16], burn::tensor::Distribution::Default, &device);
        let enc = model.encode_embeds(embeds, None);

        let a = model.decode(ids(&[&[2, 0, 5, 6]]), None, enc.clone(), None);
        let b = model.decode(ids(&[&[2, 0, 5, 9]]), None, enc, None);

        // Changing the last token must leave earlier positions untouched.
        let diff = max_abs_diff(a.clone().slice([0..1, 0..3, 0..30]), b.clone().slice([0..1, 0..3, 0..30]));
        assert!(diff < 1e-5, "earlier logits changed by {diff}");
        let diff = max_abs_diff(a.slice([0..1, 3..4, 0..30]), b.slice([0..1, 3..4, 0..30]));
        assert!(diff > 0.0);
    }

    #[test]
    fn test_encoder_ignores_masked_positions() {
        let device = Default::default();
        let model: Bart<TestBackend> = BartConfig::tiny(30).init(&device);
        let mask = ids(&[&[1, 1, 1, 0]]);

        let base = Tensor::<TestBackend, 3>::random([1, 4, 16], burn::tensor::Distribution::Default, &device);
        let noise = Tensor::<TestBackend, 3>::random([1, 1, 16], burn::tensor::Distribution::Default, &device);
        let changed = Tensor::cat(vec![base.clone().slice([0..1, 0..3, 0..16]), noise], 1);

        let a = model.encode_embeds(base, Some(mask.clone()));
        let b = model.encode_embeds(changed, Some(mask));
        let diff = max_abs_diff(a.slice([0..1, 0..3, 0..16]), b.slice([0..1, 0..3, 0..16]));
        assert!(diff < 1e-5, "unmasked positions changed by {diff}");
    }

    #[test]
    fn test_extract_embedding_is_lookup() {
        let device = Default::default();
        let model: Bart<TestBackend> = BartConfig::tiny(30).init(&device);
        let emb = model.extract_embedding(ids(&[&[4, 4, 7]]));
        assert_eq!(emb.dims(), [1, 3, 16]);
        let diff = max_abs_diff(emb.clone().slice([0..1, 0..1, 0..16]), emb.slice([0..1, 1..2, 0..16]));
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn test_shift_tokens_right() {
        let shifted = shift_tokens_right(ids(&[&[0, 11, 12, 2], &[0, 13, 2, 1]]), 2);
        shifted
            .into_data()
            .assert_eq(&ids(&[&[2, 0, 11, 12], &[2, 0, 13, 2]]).into_data(), true);
    }
}
