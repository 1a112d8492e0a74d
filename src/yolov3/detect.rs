use candle_core::{bail, IndexOp, Result, Tensor};

/// One final detection, corner format, in the coordinate space the
/// candidates were in when extracted (original-image pixels when a
/// [`Letterbox`] was supplied).
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub score: f32,
    pub class_id: usize,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

/// Thresholds controlling detection extraction.
#[derive(Debug, Clone, Copy)]
pub struct DetectConfig {
    pub score_threshold: f32,
    pub iou_threshold: f32,
    pub max_boxes_per_class: usize,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            iou_threshold: 0.45,
            max_boxes_per_class: 20,
        }
    }
}

/// Aspect-preserving resize-and-pad transform between an original image and
/// the network input, used to map decoded boxes back to original-image
/// pixels. A naive linear rescale would offset every box by the padding.
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    orig_w: f32,
    orig_h: f32,
}

impl Letterbox {
    pub fn new(input: (u32, u32), original: (u32, u32)) -> Self {
        let (in_w, in_h) = (input.0 as f32, input.1 as f32);
        let (orig_w, orig_h) = (original.0 as f32, original.1 as f32);
        let scale = (in_w / orig_w).min(in_h / orig_h);
        Self {
            scale,
            pad_x: (in_w - orig_w * scale) / 2.0,
            pad_y: (in_h - orig_h * scale) / 2.0,
            orig_w,
            orig_h,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn padding(&self) -> (f32, f32) {
        (self.pad_x, self.pad_y)
    }

    /// Maps a corner-format box from network-input pixels back to
    /// original-image pixels, clipped to the image bounds. The decoder does
    /// not clamp predicted sizes, so this is where out-of-image boxes get
    /// cut down.
    pub fn restore(&self, [x1, y1, x2, y2]: [f32; 4]) -> [f32; 4] {
        [
            ((x1 - self.pad_x) / self.scale).clamp(0.0, self.orig_w),
            ((y1 - self.pad_y) / self.scale).clamp(0.0, self.orig_h),
            ((x2 - self.pad_x) / self.scale).clamp(0.0, self.orig_w),
            ((y2 - self.pad_y) / self.scale).clamp(0.0, self.orig_h),
        ]
    }
}

/// Intersection over union of two corner-format boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let iw = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let ih = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = iw * ih;
    if inter <= 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    inter / (area_a + area_b - inter)
}

/// Turns assembled candidates into final detections, one list per batch
/// element.
///
/// `scores` is `[b, n, n_class]` and `boxes` is `[b, n, 4]` in center format
/// and network-input pixels, concatenated over all scales. Boxes are
/// converted to corner format once (after the optional letterbox undo), then
/// each class is suppressed independently: candidates at or above the score
/// threshold, stable-sorted by score descending (equal scores keep candidate
/// order), greedily kept while discarding boxes whose IoU with a kept box
/// exceeds the IoU threshold, capped at `max_boxes_per_class`. Classes never
/// suppress each other, so one location can yield detections under several
/// labels. A class with no candidate above threshold contributes nothing.
pub fn extract_detections(
    scores: &Tensor,
    boxes: &Tensor,
    cfg: &DetectConfig,
    letterbox: Option<&Letterbox>,
) -> Result<Vec<Vec<Detection>>> {
    let span = tracing::span!(tracing::Level::TRACE, "extract-detections");
    let _enter = span.enter();

    let (b, n, n_class) = scores.dims3()?;
    if boxes.dims3()? != (b, n, 4) {
        bail!(
            "scores {:?} and boxes {:?} disagree on the candidate layout",
            scores.shape(),
            boxes.shape(),
        );
    }

    let mut out = Vec::with_capacity(b);
    for i in 0..b {
        let im_scores = scores.i(i)?.to_vec2::<f32>()?;
        let im_boxes = boxes.i(i)?.to_vec2::<f32>()?;
        let corners: Vec<[f32; 4]> = im_boxes
            .iter()
            .map(|bx| {
                let (cx, cy, w, h) = (bx[0], bx[1], bx[2], bx[3]);
                let c = [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0];
                match letterbox {
                    Some(lb) => lb.restore(c),
                    None => c,
                }
            })
            .collect();
        out.push(suppress_image(&im_scores, &corners, n_class, cfg));
    }
    Ok(out)
}

fn suppress_image(
    scores: &[Vec<f32>],
    corners: &[[f32; 4]],
    n_class: usize,
    cfg: &DetectConfig,
) -> Vec<Detection> {
    let mut detections = Vec::new();
    for class_id in 0..n_class {
        let mut order: Vec<usize> = (0..corners.len())
            .filter(|&i| scores[i][class_id] >= cfg.score_threshold)
            .collect();
        order.sort_by(|&a, &b| scores[b][class_id].total_cmp(&scores[a][class_id]));

        let mut suppressed = vec![false; order.len()];
        let mut kept = 0;
        for i in 0..order.len() {
            if suppressed[i] {
                continue;
            }
            let a = order[i];
            detections.push(Detection {
                score: scores[a][class_id],
                class_id,
                xmin: corners[a][0],
                ymin: corners[a][1],
                xmax: corners[a][2],
                ymax: corners[a][3],
            });
            kept += 1;
            if kept == cfg.max_boxes_per_class {
                break;
            }
            for j in i + 1..order.len() {
                if !suppressed[j] && iou(&corners[a], &corners[order[j]]) > cfg.iou_threshold {
                    suppressed[j] = true;
                }
            }
        }
    }
    detections
}
