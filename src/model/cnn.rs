//! CNN Model Architecture for Seedling Classification

use burn::{
    config::Config,
    module::{Module, ModuleMapper, ParamId},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Configuration for the SeedlingCnn model
#[derive(Config, Debug)]
pub struct SeedlingCnnConfig {
    /// Number of output classes
    #[config(default = "12")]
    pub num_classes: usize,

    /// Input image size (square images)
    #[config(default = "128")]
    pub image_size: usize,

    /// Dropout rate before the classifier
    #[config(default = "0.5")]
    pub dropout_rate: f64,

    /// Filters in the first block; doubled in each following block
    #[config(default = "32")]
    pub base_filters: usize,

    #[config(default = "256")]
    pub dense_units: usize,
}

/// Number of convolutional blocks that can be frozen for fine-tuning
pub const NUM_BLOCKS: usize = 3;

/// Re-enables gradients on every parameter it maps
struct RequireGrad;

impl<B: Backend> ModuleMapper<B> for RequireGrad {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        tensor.set_require_grad(true)
    }
}

/// Two 3x3 convolutions with BatchNorm and ReLU, then 2x2 max-pooling
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv_a: Conv2d<B>,
    pub bn_a: BatchNorm<B, 2>,
    pub conv_b: Conv2d<B>,
    pub bn_b: BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv_a = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let conv_b = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv_a,
            bn_a: BatchNormConfig::new(out_channels).init(device),
            conv_b,
            bn_b: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.bn_a.forward(self.conv_a.forward(x)));
        let x = self.relu.forward(self.bn_b.forward(self.conv_b.forward(x)));
        self.pool.forward(x)
    }
}

/// Seedling classifier CNN
///
/// Architecture:
/// - 3 convolutional blocks (32, 64, 128 filters by default), each halving
///   the spatial resolution
/// - Global Average Pooling
/// - Dense layer with ReLU and dropout
/// - Linear head producing one logit per class
#[derive(Module, Debug)]
pub struct SeedlingCnn<B: Backend> {
    pub block1: ConvBlock<B>,
    pub block2: ConvBlock<B>,
    pub block3: ConvBlock<B>,
    pub global_pool: AdaptiveAvgPool2d,
    pub fc: Linear<B>,
    pub relu: Relu,
    pub dropout: Dropout,
    pub head: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> SeedlingCnn<B> {
    pub fn new(config: &SeedlingCnnConfig, device: &B::Device) -> Self {
        let base = config.base_filters;

        Self {
            block1: ConvBlock::new(3, base, device),
            block2: ConvBlock::new(base, base * 2, device),
            block3: ConvBlock::new(base * 2, base * 4, device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(base * 4, config.dense_units).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            head: LinearConfig::new(config.dense_units, config.num_classes).init(device),
            num_classes: config.num_classes,
        }
    }

    /// Input `[batch, 3, height, width]`, output logits `[batch, num_classes]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.block1.forward(x);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.relu.forward(self.fc.forward(x));
        let x = self.dropout.forward(x);
        self.head.forward(x)
    }

    /// Keep the weights of the first `count` blocks fixed during training
    ///
    /// Batch-norm running statistics of frozen blocks still follow the data.
    pub fn freeze_blocks(mut self, count: usize) -> Self {
        if count >= 1 {
            self.block1 = self.block1.no_grad();
        }
        if count >= 2 {
            self.block2 = self.block2.no_grad();
        }
        if count >= 3 {
            self.block3 = self.block3.no_grad();
        }
        self
    }

    /// Let block `index` (0-based) train again
    pub fn unfreeze_block(mut self, index: usize) -> Self {
        match index {
            0 => self.block1 = self.block1.map(&mut RequireGrad),
            1 => self.block2 = self.block2.map(&mut RequireGrad),
            2 => self.block3 = self.block3.map(&mut RequireGrad),
            _ => {}
        }
        self
    }

    /// Replace the classifier head with a freshly initialised one
    pub fn with_new_head(mut self, config: &SeedlingCnnConfig, device: &B::Device) -> Self {
        self.head = LinearConfig::new(config.dense_units, config.num_classes).init(device);
        self.num_classes = config.num_classes;
        self
    }

    /// Class probabilities for inference
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}
