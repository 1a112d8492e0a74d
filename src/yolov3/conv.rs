use candle_core::{Result, Tensor};
use candle_nn::{
    batch_norm, conv2d_no_bias, BatchNorm, Conv2d, Conv2dConfig, Module, ModuleT, VarBuilder,
};

/// Convolution + batch norm + leaky ReLU (negative slope 0.1).
///
/// Batch norm runs in train or eval mode through `ModuleT`; the final
/// projection of a head carries raw logits and is a plain `Conv2d` instead.
#[derive(Debug)]
pub(crate) struct ConvBlock {
    conv: Conv2d,
    bn: BatchNorm,
    span: tracing::Span,
}

impl ConvBlock {
    pub fn load(vb: VarBuilder, c1: usize, c2: usize, k: usize, stride: usize) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: k / 2,
            stride,
            ..Default::default()
        };
        let conv = conv2d_no_bias(c1, c2, k, cfg, vb.pp("conv"))?;
        let bn = batch_norm(c2, 1e-3, vb.pp("bn"))?;
        Ok(Self {
            conv,
            bn,
            span: tracing::span!(tracing::Level::TRACE, "conv-block"),
        })
    }
}

impl ModuleT for ConvBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let _enter = self.span.enter();
        let xs = self.conv.forward(xs)?;
        let xs = self.bn.forward_t(&xs, train)?;
        candle_nn::ops::leaky_relu(&xs, 0.1)
    }
}
