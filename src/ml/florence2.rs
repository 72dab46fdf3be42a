// ============================================================
// Layer 5 — Florence2 Composition
// ============================================================
// Wires the three submodules together:
//
//   image ─► DaViT ─► visual_projection ─┐
//                                        ├─ cat(dim=1) ─► BART encoder
//   text  ─► shared embedding ───────────┘                    │
//   text tokens ─────────────────────────────────────► BART decoder ─► logits
//
// Image tokens are never masked; text padding is masked with the
// tokenizer's attention mask on both the encoder and decoder side.

use burn::{prelude::*, tensor::activation::log_softmax};

use crate::domain::error::ModelError;
use crate::ml::{
    bart::{shift_tokens_right, Bart, Seq2SeqOutput},
    config::Florence2Config,
    davit::{Davit, DavitOutput},
    projection::{LinearProjection, LinearProjectionConfig},
    tokenizer::TokenBatch,
};

#[derive(Module, Debug)]
pub struct Florence2Model<B: Backend> {
    pub image_encoder:          Davit<B>,
    pub visual_projection:      LinearProjection<B>,
    pub language_model:         Bart<B>,
    pub decoder_start_token_id: usize,
    pub eos_token_id:           usize,
    pub pad_token_id:           usize,
}

impl Florence2Config {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Florence2Model<B>, ModelError> {
        self.validate()?;
        let davit = self.backbone.davit();
        let bart  = &self.language_model.bart;
        Ok(Florence2Model {
            image_encoder:          davit.init(self.backbone.return_feature, device),
            visual_projection:      LinearProjectionConfig::new(davit.feature_dim(), bart.d_model)
                .init(device),
            language_model:         bart.init(device),
            decoder_start_token_id: bart.decoder_start_token_id,
            eos_token_id:           bart.eos_token_id,
            pad_token_id:           bart.pad_token_id,
        })
    }
}

impl<B: Backend> Florence2Model<B> {
    /// image: [batch, 3, h, w] → backbone tokens [batch, n, feature_dim]
    pub fn encode_image(&self, image: Tensor<B, 4>) -> Result<Tensor<B, 3>, ModelError> {
        match self.image_encoder.forward(image) {
            DavitOutput::Features(features) => Ok(features),
            DavitOutput::Logits(_)          => Err(ModelError::FeaturesRequired),
        }
    }

    /// tokens: [batch, len] → (embeddings [batch, len, d_model], tokens)
    pub fn encode_text(&self, tokens: Tensor<B, 2, Int>) -> (Tensor<B, 3>, Tensor<B, 2, Int>) {
        let text_feature = self.language_model.extract_embedding(tokens.clone());
        (text_feature, tokens)
    }

    /// Project image tokens, append text embeddings and build the
    /// matching encoder mask. Returns (inputs_embeds, mask, text tokens).
    fn fuse(
        &self,
        image: Tensor<B, 4>,
        text:  &TokenBatch<B>,
    ) -> Result<(Tensor<B, 3>, Tensor<B, 2, Int>, Tensor<B, 2, Int>), ModelError> {
        let [images, ..] = image.dims();
        let [texts, text_len] = text.ids.dims();
        if images != texts {
            return Err(ModelError::BatchMismatch { images, texts });
        }
        let max = self.language_model.max_position_embeddings;
        if text_len > max {
            return Err(ModelError::SequenceTooLong { len: text_len, max });
        }

        let image_features = self.encode_image(image)?;
        let (text_features, text_token) = self.encode_text(text.ids.clone());

        // single step visual projection
        let image_features = self.visual_projection.forward(image_features);

        let [batch, image_len, _] = image_features.dims();
        if image_len + text_len > max {
            return Err(ModelError::SequenceTooLong { len: image_len + text_len, max });
        }

        let device = image_features.device();
        let image_mask = Tensor::<B, 2, Int>::ones([batch, image_len], &device);
        let mask = Tensor::cat(vec![image_mask, text.mask.clone()], 1);
        let concat_features = Tensor::cat(vec![image_features, text_features], 1);
        Ok((concat_features, mask, text_token))
    }

    /// End-to-end pass: the text is both appended to the encoder input
    /// and used as the decoder input.
    pub fn forward(&self, image: Tensor<B, 4>, text: TokenBatch<B>) -> Result<Seq2SeqOutput<B>, ModelError> {
        let (concat_features, mask, text_token) = self.fuse(image, &text)?;
        Ok(self
            .language_model
            .forward(concat_features, Some(mask), text_token, Some(text.mask)))
    }

    /// Cross-entropy of `target` given image + `prompt`, decoding from the
    /// ground-truth prefix.
    /// Averaged over the non-pad target tokens, so extra padding columns
    /// leave the loss unchanged.
    pub fn forward_loss(
        &self,
        image:  Tensor<B, 4>,
        prompt: TokenBatch<B>,
        target: TokenBatch<B>,
    ) -> Result<(Tensor<B, 1>, Seq2SeqOutput<B>), ModelError> {
        let [prompts, _] = prompt.ids.dims();
        let [targets, target_len] = target.ids.dims();
        if prompts != targets {
            return Err(ModelError::BatchMismatch { images: prompts, texts: targets });
        }
        let max = self.language_model.max_position_embeddings;
        if target_len > max {
            return Err(ModelError::SequenceTooLong { len: target_len, max });
        }

        let (concat_features, mask, _) = self.fuse(image, &prompt)?;
        let decoder_input_ids = shift_tokens_right(target.ids.clone(), self.decoder_start_token_id);
        let decoder_mask = shift_tokens_right(target.mask.clone(), 1);

        let output = self.language_model.forward(
            concat_features,
            Some(mask),
            decoder_input_ids,
            Some(decoder_mask),
        );

        // Mean token NLL over non-pad target positions only
        let log_probs = log_softmax(output.logits.clone(), 2);
        let nll = log_probs
            .gather(2, target.ids.unsqueeze_dim::<3>(2))
            .reshape([targets, target_len])
            .neg();
        let mask = target.mask.float();
        let count = mask.clone().sum().clamp_min(1.0);
        let loss = (nll * mask).sum() / count;
        Ok((loss, output))
    }

    /// Greedy decoding. Returns the generated ids per row, without the
    /// decoder start token and without anything after `</s>`.
    pub fn generate(
        &self,
        image:          Tensor<B, 4>,
        prompt:         TokenBatch<B>,
        max_new_tokens: usize,
    ) -> Result<Vec<Vec<u32>>, ModelError> {
        let (concat_features, mask, _) = self.fuse(image, &prompt)?;
        let [batch, _, _] = concat_features.dims();
        let device = concat_features.device();
        let memory = self.language_model.encode_embeds(concat_features, Some(mask.clone()));

        // Step i feeds i + 1 ids (start token included), so the last step
        // feeds `budget` ids.
        let budget = max_new_tokens.min(self.language_model.max_position_embeddings);
        let mut rows: Vec<Vec<u32>> = vec![vec![self.decoder_start_token_id as u32]; batch];
        let mut finished = vec![false; batch];

        for step in 0..budget {
            let len = step + 1;
            let flat: Vec<i32> = rows.iter().flatten().map(|&t| t as i32).collect();
            let ids = Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &device).reshape([batch, len]);

            let logits = self.language_model.decode(ids, None, memory.clone(), Some(mask.clone()));
            let [_, _, vocab] = logits.dims();
            let next: Vec<i64> = logits
                .slice([0..batch, len - 1..len, 0..vocab])
                .reshape([batch, vocab])
                .argmax(1)
                .into_data()
                .iter::<i64>()
                .collect();

            for ((row, done), &token) in rows.iter_mut().zip(finished.iter_mut()).zip(&next) {
                if *done {
                    row.push(self.pad_token_id as u32);
                    continue;
                }
                row.push(token as u32);
                *done = token as usize == self.eos_token_id;
            }
            if finished.iter().all(|&d| d) {
                break;
            }
        }

        let eos = self.eos_token_id as u32;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().skip(1).take_while(|&t| t != eos).collect())
            .collect())
    }
}
