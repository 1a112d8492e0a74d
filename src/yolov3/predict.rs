use candle_core::{bail, IndexOp, Result, Tensor};

use super::codec::{self, Anchor};

/// Flattens one scale's raw head output into per-image candidate arrays.
///
/// `raw` is `[b, n_anchors * (5 + n_class), h, w]`. The channel dimension is
/// split into one chunk per anchor and each chunk into box values,
/// objectness and class logits. Boxes are decoded against the grid table and
/// the chunk's anchor; objectness and class logits get independent sigmoids
/// (multi-label, no softmax) and every candidate scores
/// `objectness * class probability`.
///
/// Returns `(scores, boxes)` of shapes `[b, h*w*n_anchors, n_class]` and
/// `[b, h*w*n_anchors, 4]`; candidates are ordered anchor-major with
/// row-major cells inside each anchor. The caller concatenates scales.
pub fn assemble(
    raw: &Tensor,
    anchors: &[Anchor],
    n_class: usize,
    stride: usize,
) -> Result<(Tensor, Tensor)> {
    let (b, c, h, w) = raw.dims4()?;
    let per_anchor = 4 + 1 + n_class;
    if anchors.is_empty() || c != anchors.len() * per_anchor {
        bail!(
            "raw output has {c} channels, expected {} ({} anchors x {per_anchor})",
            anchors.len() * per_anchor,
            anchors.len(),
        );
    }
    let grid = codec::make_grid(h, w, raw.device())?;
    let split = raw.reshape((b, anchors.len(), per_anchor, h * w))?;

    let mut scores = Vec::with_capacity(anchors.len());
    let mut boxes = Vec::with_capacity(anchors.len());
    for (anchor_id, &anchor) in anchors.iter().enumerate() {
        let flat = split.i((.., anchor_id))?.transpose(1, 2)?;
        let bbox = flat.i((.., .., 0..4))?;
        let objectness = candle_nn::ops::sigmoid(&flat.i((.., .., 4..5))?)?;
        let classes = candle_nn::ops::sigmoid(&flat.i((.., .., 5..))?)?;
        boxes.push(codec::decode(&bbox, &grid, anchor, stride as f32)?);
        scores.push(objectness.broadcast_mul(&classes)?);
    }
    Ok((Tensor::cat(&scores, 1)?, Tensor::cat(&boxes, 1)?))
}
