use candle_core::{bail, Result, Tensor};
use candle_nn::{conv2d, Conv2d, Module, ModuleT, VarBuilder};

use super::conv::ConvBlock;

/// Channel configuration for one scale's detection head.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadConfig {
    /// Channels of the incoming feature (the previous scale's route feature
    /// when fusing).
    pub in_channels: usize,
    /// Trunk width; the 1x1 reductions run at half of this.
    pub filters: usize,
    /// Channels of the skip feature concatenated after upsampling, if this
    /// scale fuses one.
    pub fuse_channels: Option<usize>,
}

/// One scale's detection head.
///
/// When fusing, the input is reduced by a 1x1 conv, upsampled
/// nearest-neighbor to the skip feature's spatial size and
/// channel-concatenated with it. The trunk alternates 1x1
/// reductions with 3x3 mixing convs three times; a final 1x1 conv projects
/// to `n_anchors * (5 + n_class)` raw logit channels with no norm or
/// activation.
#[derive(Debug)]
pub struct DetectionHead {
    reduce: Option<ConvBlock>,
    trunk: [ConvBlock; 6],
    project: Conv2d,
    span: tracing::Span,
}

impl DetectionHead {
    pub fn load(vb: VarBuilder, cfg: HeadConfig, out_channels: usize) -> Result<Self> {
        if cfg.filters % 2 != 0 {
            bail!("head trunk width {} is not divisible by 2", cfg.filters);
        }
        let half = cfg.filters / 2;
        let (reduce, trunk_in) = match cfg.fuse_channels {
            Some(skip) => {
                let reduce = ConvBlock::load(vb.pp("conv_0"), cfg.in_channels, half, 1, 1)?;
                (Some(reduce), half + skip)
            }
            None => (None, cfg.in_channels),
        };
        let trunk = [
            ConvBlock::load(vb.pp("conv_1"), trunk_in, half, 1, 1)?,
            ConvBlock::load(vb.pp("conv_2"), half, cfg.filters, 3, 1)?,
            ConvBlock::load(vb.pp("conv_3"), cfg.filters, half, 1, 1)?,
            ConvBlock::load(vb.pp("conv_4"), half, cfg.filters, 3, 1)?,
            ConvBlock::load(vb.pp("conv_5"), cfg.filters, half, 1, 1)?,
            ConvBlock::load(vb.pp("conv_6"), half, cfg.filters, 3, 1)?,
        ];
        let project = conv2d(
            cfg.filters,
            out_channels,
            1,
            Default::default(),
            vb.pp("conv_7"),
        )?;
        Ok(Self {
            reduce,
            trunk,
            project,
            span: tracing::span!(tracing::Level::TRACE, "detection-head"),
        })
    }

    /// Returns the raw logit output and the route feature (the last 1x1
    /// reduction's output) that feeds the next, finer scale's fusion.
    pub fn forward_t(
        &self,
        xs: &Tensor,
        skip: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let _enter = self.span.enter();
        let xs = match (&self.reduce, skip) {
            (Some(reduce), Some(skip)) => {
                let (_, _, h, w) = skip.dims4()?;
                let up = reduce.forward_t(xs, train)?.upsample_nearest2d(h, w)?;
                Tensor::cat(&[&up, skip], 1)?
            }
            (None, None) => xs.clone(),
            (Some(_), None) => bail!("head is configured to fuse but no skip feature was given"),
            (None, Some(_)) => bail!("head is not configured to fuse but a skip feature was given"),
        };
        let mut route = xs;
        for block in &self.trunk[..5] {
            route = block.forward_t(&route, train)?;
        }
        let raw = self.project.forward(&self.trunk[5].forward_t(&route, train)?)?;
        Ok((raw, route))
    }

    pub fn forward(&self, xs: &Tensor, skip: Option<&Tensor>) -> Result<(Tensor, Tensor)> {
        self.forward_t(xs, skip, false)
    }
}
