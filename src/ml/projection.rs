// ============================================================
// Layer 5 — Visual Projection
// ============================================================
// Single affine map from backbone feature width into the
// language model's embedding width:
//
//   [batch, tokens, in_features] → [batch, tokens, hidden_features]

use burn::{
    nn::{Linear, LinearConfig},
    prelude::*,
};

#[derive(Config, Debug)]
pub struct LinearProjectionConfig {
    pub in_features:     usize,
    pub hidden_features: usize,
}

impl LinearProjectionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LinearProjection<B> {
        LinearProjection {
            linear: LinearConfig::new(self.in_features, self.hidden_features).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct LinearProjection<B: Backend> {
    pub linear: Linear<B>,
}

impl<B: Backend> LinearProjection<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        self.linear.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_projects_last_dim_only() {
        let device = Default::default();
        let proj: LinearProjection<NdArray> = LinearProjectionConfig::new(12, 20).init(&device);
        let x = Tensor::<NdArray, 3>::ones([2, 7, 12], &device);
        assert_eq!(proj.forward(x).dims(), [2, 7, 20]);
    }

    #[test]
    fn test_identical_tokens_map_identically() {
        let device = Default::default();
        let proj: LinearProjection<NdArray> = LinearProjectionConfig::new(4, 3).init(&device);
        let out = proj.forward(Tensor::<NdArray, 3>::ones([1, 2, 4], &device));
        let first  = out.clone().slice([0..1, 0..1, 0..3]);
        let second = out.slice([0..1, 1..2, 0..3]);
        first.into_data().assert_eq(&second.into_data(), true);
    }
}
