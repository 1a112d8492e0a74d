pub use candle_core::{Result, Tensor};
use candle_core::bail;
use candle_nn::VarBuilder;

pub mod codec;
pub(crate) mod conv;
pub mod detect;
pub mod head;
pub mod predict;

use codec::Anchor;
use head::{DetectionHead, HeadConfig};

/// Static configuration of the detection network, validated before any
/// forward pass.
///
/// Scales are listed coarsest first (stride 32, then 16, then 8), matching
/// the order of the backbone feature taps handed to [`Yolov3::forward`].
#[derive(Debug, Clone, PartialEq)]
pub struct Yolov3Config {
    pub n_class: usize,
    /// Anchor priors per scale, in input-image pixels.
    pub anchors: [Vec<Anchor>; 3],
    /// Network-input stride of each scale's feature map.
    pub strides: [usize; 3],
    /// Trunk width of each scale's head.
    pub filters: [usize; 3],
    /// Channels of the backbone features; index 0 feeds the coarsest head,
    /// indices 1 and 2 are the skip features fused into the finer heads.
    pub feature_channels: [usize; 3],
}

impl Yolov3Config {
    /// The standard COCO-80 configuration with the reference anchor set.
    pub fn coco80() -> Self {
        Self {
            n_class: 80,
            anchors: [
                vec![
                    Anchor::new(116.0, 90.0),
                    Anchor::new(156.0, 198.0),
                    Anchor::new(373.0, 326.0),
                ],
                vec![
                    Anchor::new(30.0, 61.0),
                    Anchor::new(62.0, 45.0),
                    Anchor::new(59.0, 119.0),
                ],
                vec![
                    Anchor::new(10.0, 13.0),
                    Anchor::new(16.0, 30.0),
                    Anchor::new(33.0, 23.0),
                ],
            ],
            strides: [32, 16, 8],
            filters: [1024, 512, 256],
            feature_channels: [1024, 512, 256],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_class == 0 {
            bail!("class count must be positive");
        }
        for (scale, anchors) in self.anchors.iter().enumerate() {
            if anchors.is_empty() {
                bail!("scale {scale} has no anchors");
            }
        }
        for (scale, &stride) in self.strides.iter().enumerate() {
            if stride == 0 {
                bail!("scale {scale} has stride 0");
            }
        }
        for (scale, &filters) in self.filters.iter().enumerate() {
            if filters == 0 || filters % 2 != 0 {
                bail!("scale {scale} trunk width {filters} is not a positive even number");
            }
        }
        for (scale, &channels) in self.feature_channels.iter().enumerate() {
            if channels == 0 {
                bail!("scale {scale} has no feature channels");
            }
        }
        Ok(())
    }

    fn out_channels(&self, scale: usize) -> usize {
        self.anchors[scale].len() * (4 + 1 + self.n_class)
    }
}

/// The three-scale YOLOv3 detector over externally supplied backbone
/// features.
///
/// Each head's route feature feeds the next, finer scale's fusion step, so
/// the coarse context flows down through upsample + concat. Weights live in
/// the `VarBuilder`'s store; the detector never mutates them.
#[derive(Debug)]
pub struct Yolov3 {
    heads: [DetectionHead; 3],
    anchors: [Vec<Anchor>; 3],
    strides: [usize; 3],
    n_class: usize,
    span: tracing::Span,
}

impl Yolov3 {
    pub fn load(vb: VarBuilder, cfg: &Yolov3Config) -> Result<Self> {
        cfg.validate()?;
        let head_0 = DetectionHead::load(
            vb.pp("head_0"),
            HeadConfig {
                in_channels: cfg.feature_channels[0],
                filters: cfg.filters[0],
                fuse_channels: None,
            },
            cfg.out_channels(0),
        )?;
        let head_1 = DetectionHead::load(
            vb.pp("head_1"),
            HeadConfig {
                in_channels: cfg.filters[0] / 2,
                filters: cfg.filters[1],
                fuse_channels: Some(cfg.feature_channels[1]),
            },
            cfg.out_channels(1),
        )?;
        let head_2 = DetectionHead::load(
            vb.pp("head_2"),
            HeadConfig {
                in_channels: cfg.filters[1] / 2,
                filters: cfg.filters[2],
                fuse_channels: Some(cfg.feature_channels[2]),
            },
            cfg.out_channels(2),
        )?;
        Ok(Self {
            heads: [head_0, head_1, head_2],
            anchors: cfg.anchors.clone(),
            strides: cfg.strides,
            n_class: cfg.n_class,
            span: tracing::span!(tracing::Level::TRACE, "yolov3"),
        })
    }

    /// Raw per-scale logits, coarsest scale first, for an external loss
    /// module. `features` are the backbone taps at strides 32, 16 and 8.
    pub fn forward_t(&self, features: [&Tensor; 3], train: bool) -> Result<[Tensor; 3]> {
        let _enter = self.span.enter();
        let (raw_0, route) = self.heads[0].forward_t(features[0], None, train)?;
        let (raw_1, route) = self.heads[1].forward_t(&route, Some(features[1]), train)?;
        let (raw_2, _) = self.heads[2].forward_t(&route, Some(features[2]), train)?;
        Ok([raw_0, raw_1, raw_2])
    }

    pub fn forward(&self, features: [&Tensor; 3]) -> Result<[Tensor; 3]> {
        self.forward_t(features, false)
    }

    /// Assembled candidates concatenated across all three scales:
    /// `(scores [b, n, n_class], boxes [b, n, 4])` in network-input pixels,
    /// ready for [`detect::extract_detections`].
    pub fn predict(&self, features: [&Tensor; 3]) -> Result<(Tensor, Tensor)> {
        let raw = self.forward(features)?;
        let mut scores = Vec::with_capacity(raw.len());
        let mut boxes = Vec::with_capacity(raw.len());
        for (scale, raw) in raw.iter().enumerate() {
            let (s, b) = predict::assemble(
                raw,
                &self.anchors[scale],
                self.n_class,
                self.strides[scale],
            )?;
            scores.push(s);
            boxes.push(b);
        }
        Ok((Tensor::cat(&scores, 1)?, Tensor::cat(&boxes, 1)?))
    }
}
