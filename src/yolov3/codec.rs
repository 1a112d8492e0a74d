use candle_core::{D, DType, Device, Result, Tensor};

/// Anchor prior in input-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub w: f32,
    pub h: f32,
}

impl Anchor {
    pub const fn new(w: f32, h: f32) -> Self {
        Self { w, h }
    }
}

impl From<(f32, f32)> for Anchor {
    fn from((w, h): (f32, f32)) -> Self {
        Self { w, h }
    }
}

/// Grid cell coordinate table for an `h` x `w` feature map, shape
/// `[1, h*w, 2]` holding `(x, y)` per cell.
///
/// Cells are laid out row-major (x varies fastest), the same order a
/// `[b, c, h, w]` tensor flattens its spatial dimensions in. Decoding and
/// flattening must share this ordering.
pub fn make_grid(h: usize, w: usize, device: &Device) -> Result<Tensor> {
    let sx = Tensor::arange(0u32, w as u32, device)?.to_dtype(DType::F32)?;
    let sy = Tensor::arange(0u32, h as u32, device)?.to_dtype(DType::F32)?;
    let sx = sx.reshape((1, w))?.repeat((h, 1))?.flatten_all()?;
    let sy = sy.reshape((h, 1))?.repeat((1, w))?.flatten_all()?;
    Tensor::stack(&[&sx, &sy], D::Minus1)?.reshape((1, h * w, 2))
}

/// Decodes raw box predictions for one anchor into absolute pixel boxes.
///
/// `raw` is `[b, n, 4]` with `(t_x, t_y, t_w, t_h)` per cell and `grid` is
/// the matching `[1, n, 2]` table from [`make_grid`]. The center is
/// `(sigmoid(t_xy) + grid) * stride` and the size is `anchor * exp(t_wh)`,
/// so the output is `(cx, cy, w, h)` in network-input pixels. Width and
/// height are not clamped; a large `t_wh` yields a box larger than the
/// image and is left for the caller's rescale/clipping step.
pub fn decode(raw: &Tensor, grid: &Tensor, anchor: Anchor, stride: f32) -> Result<Tensor> {
    let t_xy = raw.narrow(D::Minus1, 0, 2)?;
    let t_wh = raw.narrow(D::Minus1, 2, 2)?;
    let xy = (candle_nn::ops::sigmoid(&t_xy)?.broadcast_add(grid)? * stride as f64)?;
    let anchor = Tensor::from_slice(&[anchor.w, anchor.h], (1, 1, 2), raw.device())?;
    let wh = t_wh.exp()?.broadcast_mul(&anchor)?;
    Tensor::cat(&[&xy, &wh], D::Minus1)
}

/// Inverse of [`decode`], producing the regression targets a loss module
/// compares raw predictions against.
///
/// `boxes` is `[b, n, 4]` in `(cx, cy, w, h)` network-input pixels. Centers
/// must lie strictly inside their own grid cell and sizes must be positive,
/// otherwise the logit/log parameterization is not finite.
pub fn encode(boxes: &Tensor, grid: &Tensor, anchor: Anchor, stride: f32) -> Result<Tensor> {
    let xy = boxes.narrow(D::Minus1, 0, 2)?;
    let wh = boxes.narrow(D::Minus1, 2, 2)?;
    let frac = (xy / stride as f64)?.broadcast_sub(grid)?;
    let t_xy = (frac.log()? - frac.affine(-1.0, 1.0)?.log()?)?;
    let anchor = Tensor::from_slice(&[anchor.w, anchor.h], (1, 1, 2), boxes.device())?;
    let t_wh = wh.broadcast_div(&anchor)?.log()?;
    Tensor::cat(&[&t_xy, &t_wh], D::Minus1)
}
