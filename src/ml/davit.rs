// ============================================================
// Layer 5 — DaViT Backbone
// ============================================================
// Dual Attention Vision Transformer. Four stages, each one:
//
//   ConvEmbed  → strided conv, halves (or quarters) the grid
//   N x [ SpatialBlock → attention inside ws x ws windows
//         ChannelBlock → attention across channel groups   ]
//
// Tokens travel as [batch, h*w, channels] together with the
// (h, w) grid size so convolutions can fold them back into maps.
//
// Reference: Ding et al. (2022) DaViT: Dual Attention Vision Transformers

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Dropout, DropoutConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
        PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::{gelu, softmax},
};

use crate::ml::config::DavitConfig;

type GridSize = (usize, usize);

/// [batch, h*w, c] → [batch, c, h, w]
pub(crate) fn tokens_to_map<B: Backend>(x: Tensor<B, 3>, (h, w): GridSize) -> Tensor<B, 4> {
    let [b, _, c] = x.dims();
    x.swap_dims(1, 2).reshape([b, c, h, w])
}

/// [batch, c, h, w] → ([batch, h*w, c], (h, w))
pub(crate) fn map_to_tokens<B: Backend>(x: Tensor<B, 4>) -> (Tensor<B, 3>, GridSize) {
    let [b, c, h, w] = x.dims();
    (x.reshape([b, c, h * w]).swap_dims(1, 2), (h, w))
}

/// Split a [b, h, w, c] map into windows of [b * n_windows, ws * ws, c].
/// The map is zero padded on the bottom/right up to a multiple of `ws`;
/// the padded grid size is returned for the reverse step.
pub(crate) fn window_partition<B: Backend>(x: Tensor<B, 4>, ws: usize) -> (Tensor<B, 3>, GridSize) {
    let [b, h, w, c] = x.dims();
    let pad_h = (ws - h % ws) % ws;
    let pad_w = (ws - w % ws) % ws;
    let device = x.device();

    let mut x = x;
    if pad_w > 0 {
        x = Tensor::cat(vec![x, Tensor::zeros([b, h, pad_w, c], &device)], 2);
    }
    if pad_h > 0 {
        x = Tensor::cat(vec![x, Tensor::zeros([b, pad_h, w + pad_w, c], &device)], 1);
    }
    let (hp, wp) = (h + pad_h, w + pad_w);

    let windows = x
        .reshape([b, hp / ws, ws, wp / ws, ws, c])
        .permute([0, 1, 3, 2, 4, 5])
        .reshape([b * (hp / ws) * (wp / ws), ws * ws, c]);
    (windows, (hp, wp))
}

/// Inverse of [`window_partition`]: stitch windows back and crop the padding.
pub(crate) fn window_reverse<B: Backend>(
    windows: Tensor<B, 3>,
    ws:      usize,
    padded:  GridSize,
    (h, w):  GridSize,
) -> Tensor<B, 4> {
    let (hp, wp) = padded;
    let [n, _, c] = windows.dims();
    let b = n / ((hp / ws) * (wp / ws));

    windows
        .reshape([b, hp / ws, wp / ws, ws, ws, c])
        .permute([0, 1, 3, 2, 4, 5])
        .reshape([b, hp, wp, c])
        .slice([0..b, 0..h, 0..w, 0..c])
}

// ─── Building blocks ──────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct ConvEmbed<B: Backend> {
    pub proj:     Conv2d<B>,
    pub norm:     LayerNorm<B>,
    /// Later stages normalise the incoming tokens; the stem normalises
    /// its own output.
    pub pre_norm: bool,
}

impl<B: Backend> ConvEmbed<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 3>, GridSize) {
        if self.pre_norm {
            let (tokens, size) = map_to_tokens(x);
            let x = tokens_to_map(self.norm.forward(tokens), size);
            map_to_tokens(self.proj.forward(x))
        } else {
            let (tokens, size) = map_to_tokens(self.proj.forward(x));
            (self.norm.forward(tokens), size)
        }
    }
}

/// Depthwise 3x3 convolution added back onto the tokens.
#[derive(Module, Debug)]
pub struct ConvPosEnc<B: Backend> {
    pub proj: Conv2d<B>,
}

impl<B: Backend> ConvPosEnc<B> {
    pub fn forward(&self, x: Tensor<B, 3>, size: GridSize) -> Tensor<B, 3> {
        let (feat, _) = map_to_tokens(self.proj.forward(tokens_to_map(x.clone(), size)));
        x + feat
    }
}

#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    pub fc1:     Linear<B>,
    pub fc2:     Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> Mlp<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.dropout.forward(gelu(self.fc1.forward(x)));
        self.dropout.forward(self.fc2.forward(x))
    }
}

/// Multi-head self-attention restricted to non-overlapping windows.
#[derive(Module, Debug)]
pub struct WindowAttention<B: Backend> {
    pub qkv:         Linear<B>,
    pub proj:        Linear<B>,
    pub num_heads:   usize,
    pub window_size: usize,
}

impl<B: Backend> WindowAttention<B> {
    pub fn forward(&self, x: Tensor<B, 3>, size: GridSize) -> Tensor<B, 3> {
        let [b, n, c] = x.dims();
        let (h, w) = size;
        let ws = self.window_size;
        let head_dim = c / self.num_heads;
        let scale = (head_dim as f64).powf(-0.5);

        let (windows, padded) = window_partition(x.reshape([b, h, w, c]), ws);
        let [bw, wn, _] = windows.dims();

        let qkv = self.qkv.forward(windows);
        let heads = |t: Tensor<B, 3>| t.reshape([bw, wn, self.num_heads, head_dim]).swap_dims(1, 2);
        let q = heads(qkv.clone().narrow(2, 0, c)).mul_scalar(scale);
        let k = heads(qkv.clone().narrow(2, c, c));
        let v = heads(qkv.narrow(2, 2 * c, c));

        let attn = softmax(q.matmul(k.swap_dims(2, 3)), 3);
        let out = attn.matmul(v).swap_dims(1, 2).reshape([bw, wn, c]);
        let out = self.proj.forward(out);

        window_reverse(out, ws, padded, size).reshape([b, n, c])
    }
}

/// Attention where channel groups attend to each other, with the
/// token axis acting as the feature axis.
///
/// Follows the Florence-2 vision tower so its records load as-is:
/// `q` is scaled by `n^-0.5` and the channel affinity is `qᵀk`,
/// giving `out = (softmax(qᵀk) · vᵀ)ᵀ` per group.
#[derive(Module, Debug)]
pub struct ChannelAttention<B: Backend> {
    pub qkv:    Linear<B>,
    pub proj:   Linear<B>,
    pub groups: usize,
}

impl<B: Backend> ChannelAttention<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [b, n, c] = x.dims();
        let group_dim = c / self.groups;
        let scale = (n as f64).powf(-0.5);

        let qkv = self.qkv.forward(x);
        let groups = |t: Tensor<B, 3>| t.reshape([b, n, self.groups, group_dim]).swap_dims(1, 2);
        let q = groups(qkv.clone().narrow(2, 0, c)).mul_scalar(scale);
        let k = groups(qkv.clone().narrow(2, c, c));
        let v = groups(qkv.narrow(2, 2 * c, c));

        // [b, g, cg, cg]
        let attn = softmax(q.swap_dims(2, 3).matmul(k), 3);
        let out = attn
            .matmul(v.swap_dims(2, 3))
            .swap_dims(2, 3)
            .swap_dims(1, 2)
            .reshape([b, n, c]);
        self.proj.forward(out)
    }
}

#[derive(Module, Debug)]
pub struct SpatialBlock<B: Backend> {
    pub cpe_attn: ConvPosEnc<B>,
    pub norm1:    LayerNorm<B>,
    pub attn:     WindowAttention<B>,
    pub cpe_mlp:  ConvPosEnc<B>,
    pub norm2:    LayerNorm<B>,
    pub mlp:      Mlp<B>,
}

impl<B: Backend> SpatialBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>, size: GridSize) -> Tensor<B, 3> {
        let x = self.cpe_attn.forward(x, size);
        let x = x.clone() + self.attn.forward(self.norm1.forward(x), size);
        let x = self.cpe_mlp.forward(x, size);
        x.clone() + self.mlp.forward(self.norm2.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct ChannelBlock<B: Backend> {
    pub cpe_attn: ConvPosEnc<B>,
    pub norm1:    LayerNorm<B>,
    pub attn:     ChannelAttention<B>,
    pub cpe_mlp:  ConvPosEnc<B>,
    pub norm2:    LayerNorm<B>,
    pub mlp:      Mlp<B>,
}

impl<B: Backend> ChannelBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>, size: GridSize) -> Tensor<B, 3> {
        let x = self.cpe_attn.forward(x, size);
        let x = x.clone() + self.attn.forward(self.norm1.forward(x));
        let x = self.cpe_mlp.forward(x, size);
        x.clone() + self.mlp.forward(self.norm2.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct DualBlock<B: Backend> {
    pub spatial: SpatialBlock<B>,
    pub channel: ChannelBlock<B>,
}

#[derive(Module, Debug)]
pub struct DavitStage<B: Backend> {
    pub embed:  ConvEmbed<B>,
    pub blocks: Vec<DualBlock<B>>,
}

impl<B: Backend> DavitStage<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 3>, GridSize) {
        let (mut tokens, size) = self.embed.forward(x);
        for block in &self.blocks {
            tokens = block.spatial.forward(tokens, size);
            tokens = block.channel.forward(tokens, size);
        }
        (tokens, size)
    }
}

// ─── Backbone ─────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct Davit<B: Backend> {
    pub stages:         Vec<DavitStage<B>>,
    pub norm:           LayerNorm<B>,
    pub head:           Linear<B>,
    pub feature_dim:    usize,
    pub return_feature: bool,
}

/// What the backbone hands back, depending on `return_feature`.
pub enum DavitOutput<B: Backend> {
    /// [batch, tokens, feature_dim]
    Features(Tensor<B, 3>),
    /// [batch, num_classes]
    Logits(Tensor<B, 2>),
}

impl<B: Backend> Davit<B> {
    /// image: [batch, channels, h, w] → tokens of the last stage
    pub fn forward_features(&self, image: Tensor<B, 4>) -> Tensor<B, 3> {
        let mut map = image;
        let mut tokens = None;
        for stage in &self.stages {
            let (out, size) = stage.forward(map);
            map = tokens_to_map(out.clone(), size);
            tokens = Some(out);
        }
        tokens.unwrap_or_else(|| map_to_tokens(map).0)
    }

    pub fn forward(&self, image: Tensor<B, 4>) -> DavitOutput<B> {
        let tokens = self.forward_features(image);
        if self.return_feature {
            return DavitOutput::Features(tokens);
        }
        let [b, _, c] = tokens.dims();
        let pooled = self.norm.forward(tokens.mean_dim(1)).reshape([b, c]);
        DavitOutput::Logits(self.head.forward(pooled))
    }
}

impl DavitConfig {
    pub fn init<B: Backend>(&self, return_feature: bool, device: &B::Device) -> Davit<B> {
        let stages = (0..4).map(|i| self.build_stage(i, device)).collect();
        let last = self.feature_dim();
        Davit {
            stages,
            norm: LayerNormConfig::new(last).init(device),
            head: LinearConfig::new(last, self.num_classes).init(device),
            feature_dim: last,
            return_feature,
        }
    }

    fn build_stage<B: Backend>(&self, i: usize, device: &B::Device) -> DavitStage<B> {
        let dim = self.embed_dims[i];
        let in_ch = if i == 0 { self.in_chans } else { self.embed_dims[i - 1] };
        let k = self.patch_size[i];
        let s = self.patch_stride[i];
        let p = self.patch_padding[i];

        let pre_norm = i > 0;
        let embed = ConvEmbed {
            proj: Conv2dConfig::new([in_ch, dim], [k, k])
                .with_stride([s, s])
                .with_padding(PaddingConfig2d::Explicit(p, p))
                .init(device),
            norm: LayerNormConfig::new(if pre_norm { in_ch } else { dim }).init(device),
            pre_norm,
        };

        let blocks = (0..self.depths[i])
            .map(|_| DualBlock {
                spatial: SpatialBlock {
                    cpe_attn: self.build_cpe(dim, device),
                    norm1:    LayerNormConfig::new(dim).init(device),
                    attn:     WindowAttention {
                        qkv:         LinearConfig::new(dim, 3 * dim).init(device),
                        proj:        LinearConfig::new(dim, dim).init(device),
                        num_heads:   self.num_heads[i],
                        window_size: self.window_size,
                    },
                    cpe_mlp:  self.build_cpe(dim, device),
                    norm2:    LayerNormConfig::new(dim).init(device),
                    mlp:      self.build_mlp(dim, device),
                },
                channel: ChannelBlock {
                    cpe_attn: self.build_cpe(dim, device),
                    norm1:    LayerNormConfig::new(dim).init(device),
                    attn:     ChannelAttention {
                        qkv:    LinearConfig::new(dim, 3 * dim).init(device),
                        proj:   LinearConfig::new(dim, dim).init(device),
                        groups: self.num_heads[i],
                    },
                    cpe_mlp:  self.build_cpe(dim, device),
                    norm2:    LayerNormConfig::new(dim).init(device),
                    mlp:      self.build_mlp(dim, device),
                },
            })
            .collect();

        DavitStage { embed, blocks }
    }

    fn build_cpe<B: Backend>(&self, dim: usize, device: &B::Device) -> ConvPosEnc<B> {
        ConvPosEnc {
            proj: Conv2dConfig::new([dim, dim], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_groups(dim)
                .init(device),
        }
    }

    fn build_mlp<B: Backend>(&self, dim: usize, device: &B::Device) -> Mlp<B> {
        let hidden = (dim as f64 * self.mlp_ratio) as usize;
        Mlp {
            fc1:     LinearConfig::new(dim, hidden).init(device),
            fc2:     LinearConfig::new(hidden, dim).init(device),
            dropout: DropoutConfig::new(self.drop_rate).init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn identity_linear(d_in: usize, copies: usize, device: &<TestBackend as Backend>::Device) -> Linear<TestBackend> {
        let mut linear = LinearConfig::new(d_in, d_in * copies).init(device);
        let eye = Tensor::<TestBackend, 2>::eye(d_in, device);
        linear.weight = burn::module::Param::from_tensor(Tensor::cat(vec![eye; copies], 1));
        linear.bias = linear
            .bias
            .map(|_| burn::module::Param::from_tensor(Tensor::zeros([d_in * copies], device)));
        linear
    }

    #[test]
    fn test_channel_attention_scales_query_by_token_count() {
        let device = Default::default();
        // q = k = v = x, proj = identity
        let attn = ChannelAttention {
            qkv:    identity_linear(2, 3, &device),
            proj:   identity_linear(2, 1, &device),
            groups: 1,
        };
        let x = [[1.0f32, 0.0], [0.0, 2.0]];
        let input = Tensor::<TestBackend, 1>::from_floats([1.0, 0.0, 0.0, 2.0], &device).reshape([1, 2, 2]);
        let out: Vec<f32> = attn.forward(input).into_data().iter::<f32>().collect();

        // affinity[i][j] = sum_n x[n][i] * x[n][j] / sqrt(2), softmax over j
        let scale = 2f32.powf(-0.5);
        let mut probs = [[0.0f32; 2]; 2];
        for i in 0..2 {
            let logits: Vec<f32> = (0..2)
                .map(|j| (0..2).map(|n| x[n][i] * x[n][j]).sum::<f32>() * scale)
                .collect();
            let z: f32 = logits.iter().map(|l| l.exp()).sum();
            for j in 0..2 {
                probs[i][j] = logits[j].exp() / z;
            }
        }
        // out[n][i] = sum_j probs[i][j] * x[n][j]
        for n in 0..2 {
            for i in 0..2 {
                let expected: f32 = (0..2).map(|j| probs[i][j] * x[n][j]).sum();
                let got = out[n * 2 + i];
                assert!((got - expected).abs() < 1e-5, "out[{n}][{i}] = {got}, expected {expected}");
            }
        }
    }

    #[test]
    fn test_window_partition_pads_and_reverses() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([2, 4, 5, 3], burn::tensor::Distribution::Default, &device);

        let (windows, padded) = window_partition(x.clone(), 3);
        assert_eq!(padded, (6, 6));
        // 2 images x (2 x 2) windows, 9 tokens each
        assert_eq!(windows.dims(), [8, 9, 3]);

        let back = window_reverse(windows, 3, padded, (4, 5));
        back.into_data().assert_eq(&x.into_data(), true);
    }

    #[test]
    fn test_token_map_roundtrip_keeps_layout() {
        let device = Default::default();
        let map = Tensor::<TestBackend, 1, Int>::arange(0..24, &device)
            .float()
            .reshape([1, 2, 3, 4]);
        let (tokens, size) = map_to_tokens(map.clone());
        assert_eq!(size, (3, 4));
        assert_eq!(tokens.dims(), [1, 12, 2]);
        tokens_to_map(tokens, size)
            .into_data()
            .assert_eq(&map.into_data(), true);
    }

    #[test]
    fn test_features_shape() {
        let device = Default::default();
        let cfg = DavitConfig::tiny();
        let model: Davit<TestBackend> = cfg.init(true, &device);
        let image = Tensor::<TestBackend, 4>::random([2, 3, 32, 32], burn::tensor::Distribution::Default, &device);

        match model.forward(image) {
            DavitOutput::Features(f) => assert_eq!(f.dims(), [2, 1, 32]),
            DavitOutput::Logits(_)   => panic!("expected token features"),
        }
    }

    #[test]
    fn test_classification_head_shape() {
        let device = Default::default();
        let model: Davit<TestBackend> = DavitConfig::tiny().init(false, &device);
        let image = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);

        match model.forward(image) {
            DavitOutput::Logits(l)   => assert_eq!(l.dims(), [1, 5]),
            DavitOutput::Features(_) => panic!("expected logits"),
        }
    }

    #[test]
    fn test_non_square_grid() {
        let device = Default::default();
        let model: Davit<TestBackend> = DavitConfig::tiny().init(true, &device);
        let image = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 32], &device);
        // 64x32 → 16x8 → 8x4 → 4x2 → 2x1
        assert_eq!(model.forward_features(image).dims(), [1, 2, 32]);
    }
}
