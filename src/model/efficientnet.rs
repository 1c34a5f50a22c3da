//! EfficientNet-B0 feature extractor
//!
//! Parameter layout mirrors torchvision's `efficientnet_b0` so ImageNet
//! weights can be imported (see `pretrained`):
//!
//! - `stem`: 3x3/2 conv, 3 -> 32
//! - `stages`: seven stages of MBConv blocks with squeeze-and-excitation
//! - `top`: 1x1 conv, 320 -> 1280
//!
//! The classification layer is not part of the backbone; the classifier owns it.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{
        activation::{sigmoid, silu},
        backend::Backend,
        Distribution, Tensor,
    },
};

/// Output width of the `top` block
pub const FEATURE_WIDTH: usize = 1280;

const STEM_CHANNELS: usize = 32;
const STOCHASTIC_DEPTH_PROB: f64 = 0.2;

/// One stage: (expand ratio, kernel, stride, in channels, out channels, layers)
#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    pub expand_ratio: usize,
    pub kernel: usize,
    pub stride: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub layers: usize,
}

const fn stage(
    expand_ratio: usize,
    kernel: usize,
    stride: usize,
    in_channels: usize,
    out_channels: usize,
    layers: usize,
) -> StageSpec {
    StageSpec {
        expand_ratio,
        kernel,
        stride,
        in_channels,
        out_channels,
        layers,
    }
}

/// B0 stage table (width and depth multipliers of 1.0)
pub const STAGES: [StageSpec; 7] = [
    stage(1, 3, 1, 32, 16, 1),
    stage(6, 3, 2, 16, 24, 2),
    stage(6, 5, 2, 24, 40, 2),
    stage(6, 3, 2, 40, 80, 3),
    stage(6, 5, 1, 80, 112, 3),
    stage(6, 5, 2, 112, 192, 4),
    stage(6, 3, 1, 192, 320, 1),
];

/// Conv + BatchNorm, optionally followed by SiLU
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    activate: bool,
}

impl<B: Backend> ConvBn<B> {
    fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        groups: usize,
        activate: bool,
        device: &B::Device,
    ) -> Self {
        let pad = (kernel - 1) / 2;
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(pad, pad))
            .with_groups(groups)
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(channels[1]).init(device);

        Self { conv, bn, activate }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        if self.activate {
            silu(x)
        } else {
            x
        }
    }
}

/// Squeeze-and-excitation gate
#[derive(Module, Debug)]
pub struct SqueezeExcite<B: Backend> {
    pool: AdaptiveAvgPool2d,
    fc1: Conv2d<B>,
    fc2: Conv2d<B>,
}

impl<B: Backend> SqueezeExcite<B> {
    fn new(channels: usize, squeeze: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: Conv2dConfig::new([channels, squeeze], [1, 1]).init(device),
            fc2: Conv2dConfig::new([squeeze, channels], [1, 1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.pool.forward(x.clone());
        let scale = silu(self.fc1.forward(scale));
        let scale = sigmoid(self.fc2.forward(scale));
        x * scale
    }
}

/// Inverted residual block
#[derive(Module, Debug)]
pub struct MBConv<B: Backend> {
    expand: Option<ConvBn<B>>,
    depthwise: ConvBn<B>,
    se: SqueezeExcite<B>,
    project: ConvBn<B>,
    use_residual: bool,
    drop_prob: f64,
}

impl<B: Backend> MBConv<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        expand_ratio: usize,
        kernel: usize,
        stride: usize,
        drop_prob: f64,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expand_ratio;
        let expand = (expand_ratio != 1)
            .then(|| ConvBn::new([in_channels, hidden], 1, 1, 1, true, device));
        let depthwise = ConvBn::new([hidden, hidden], kernel, stride, hidden, true, device);
        let se = SqueezeExcite::new(hidden, (in_channels / 4).max(1), device);
        let project = ConvBn::new([hidden, out_channels], 1, 1, 1, false, device);

        Self {
            expand,
            depthwise,
            se,
            project,
            use_residual: stride == 1 && in_channels == out_channels,
            drop_prob,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input.clone();
        if let Some(expand) = &self.expand {
            x = expand.forward(x);
        }
        x = self.depthwise.forward(x);
        x = self.se.forward(x);
        x = self.project.forward(x);

        if !self.use_residual {
            return x;
        }
        self.stochastic_depth(x) + input
    }

    /// Per-sample residual drop, only while gradients are tracked
    fn stochastic_depth(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        if !B::ad_enabled() || self.drop_prob <= 0.0 {
            return x;
        }

        let survival = 1.0 - self.drop_prob;
        let [batch, _, _, _] = x.dims();
        let mask = Tensor::<B, 4>::random(
            [batch, 1, 1, 1],
            Distribution::Bernoulli(survival),
            &x.device(),
        );
        x * mask.div_scalar(survival)
    }
}

/// EfficientNet-B0 without its classifier
#[derive(Module, Debug)]
pub struct EfficientNetB0<B: Backend> {
    stem: ConvBn<B>,
    stages: Vec<Vec<MBConv<B>>>,
    top: ConvBn<B>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> EfficientNetB0<B> {
    pub fn new(device: &B::Device) -> Self {
        let stem = ConvBn::new([3, STEM_CHANNELS], 3, 2, 1, true, device);

        let total_blocks: usize = STAGES.iter().map(|s| s.layers).sum();
        let mut block_id = 0usize;

        let stages = STAGES
            .iter()
            .map(|spec| {
                (0..spec.layers)
                    .map(|layer| {
                        let (in_channels, stride) = if layer == 0 {
                            (spec.in_channels, spec.stride)
                        } else {
                            (spec.out_channels, 1)
                        };
                        let drop_prob = STOCHASTIC_DEPTH_PROB * block_id as f64 / total_blocks as f64;
                        block_id += 1;

                        MBConv::new(
                            in_channels,
                            spec.out_channels,
                            spec.expand_ratio,
                            spec.kernel,
                            stride,
                            drop_prob,
                            device,
                        )
                    })
                    .collect()
            })
            .collect();

        let last = STAGES[STAGES.len() - 1].out_channels;
        let top = ConvBn::new([last, FEATURE_WIDTH], 1, 1, 1, true, device);

        Self {
            stem,
            stages,
            top,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    /// `[batch, 3, h, w]` -> `[batch, 1280]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(input);
        for stage in &self.stages {
            for block in stage {
                x = block.forward(x);
            }
        }
        x = self.top.forward(x);

        let x = self.pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }
}
