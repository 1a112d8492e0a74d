use candle_core::{Device, Result, Tensor};
use yolov3::yolov3::detect::{extract_detections, iou, DetectConfig, Detection, Letterbox};

/// Builds the `(scores, boxes)` tensor pair for one image from corner-format
/// candidates with per-class scores.
fn candidates(cands: &[([f32; 4], Vec<f32>)]) -> Result<(Tensor, Tensor)> {
    let n = cands.len();
    let n_class = cands[0].1.len();
    let mut scores = Vec::with_capacity(n * n_class);
    let mut boxes = Vec::with_capacity(n * 4);
    for ([x1, y1, x2, y2], class_scores) in cands {
        assert_eq!(class_scores.len(), n_class);
        scores.extend_from_slice(class_scores);
        boxes.extend_from_slice(&[
            (x1 + x2) / 2.0,
            (y1 + y2) / 2.0,
            x2 - x1,
            y2 - y1,
        ]);
    }
    let dev = Device::Cpu;
    Ok((
        Tensor::from_vec(scores, (1, n, n_class), &dev)?,
        Tensor::from_vec(boxes, (1, n, 4), &dev)?,
    ))
}

fn config(score_threshold: f32, iou_threshold: f32, max_boxes_per_class: usize) -> DetectConfig {
    DetectConfig {
        score_threshold,
        iou_threshold,
        max_boxes_per_class,
    }
}

fn sorted(mut dets: Vec<Detection>) -> Vec<Detection> {
    dets.sort_by(|a, b| {
        (a.class_id, a.xmin, a.ymin)
            .partial_cmp(&(b.class_id, b.xmin, b.ymin))
            .unwrap()
    });
    dets
}

#[test]
fn threshold_above_score_space_yields_no_detections() -> Result<()> {
    let (scores, boxes) = candidates(&[
        ([0.0, 0.0, 10.0, 10.0], vec![1.0, 0.9]),
        ([20.0, 20.0, 30.0, 30.0], vec![0.8, 1.0]),
    ])?;
    let dets = extract_detections(&scores, &boxes, &config(1.01, 0.5, 20), None)?;
    assert_eq!(dets.len(), 1);
    assert!(dets[0].is_empty());
    Ok(())
}

#[test]
fn survivors_within_a_class_stay_below_iou_threshold() -> Result<()> {
    let cfg = config(0.1, 0.5, 20);
    let (scores, boxes) = candidates(&[
        ([0.0, 0.0, 10.0, 10.0], vec![0.9]),
        ([1.0, 1.0, 11.0, 11.0], vec![0.8]),
        ([2.0, 0.0, 12.0, 10.0], vec![0.7]),
        ([50.0, 50.0, 60.0, 60.0], vec![0.6]),
    ])?;
    let dets = &extract_detections(&scores, &boxes, &cfg, None)?[0];
    assert!(dets.len() >= 2);
    for a in dets {
        for b in dets {
            if a != b {
                let overlap = iou(
                    &[a.xmin, a.ymin, a.xmax, a.ymax],
                    &[b.xmin, b.ymin, b.xmax, b.ymax],
                );
                assert!(overlap <= cfg.iou_threshold, "iou {overlap} between survivors");
            }
        }
    }
    // the highest-scoring and the disjoint box always survive
    assert!(dets.iter().any(|d| d.score == 0.9));
    assert!(dets.iter().any(|d| d.score == 0.6));
    Ok(())
}

#[test]
fn suppression_is_idempotent() -> Result<()> {
    let cfg = config(0.1, 0.45, 20);
    let (scores, boxes) = candidates(&[
        ([0.0, 0.0, 10.0, 10.0], vec![0.9, 0.0]),
        ([0.5, 0.5, 10.5, 10.5], vec![0.85, 0.0]),
        ([30.0, 30.0, 40.0, 40.0], vec![0.0, 0.7]),
        ([31.0, 30.0, 41.0, 40.0], vec![0.0, 0.6]),
        ([80.0, 80.0, 90.0, 90.0], vec![0.5, 0.5]),
    ])?;
    let first = &extract_detections(&scores, &boxes, &cfg, None)?[0];

    // feed the survivors back in as a fresh candidate set
    let n_class = 2;
    let rebuilt: Vec<([f32; 4], Vec<f32>)> = first
        .iter()
        .map(|d| {
            let mut class_scores = vec![0.0; n_class];
            class_scores[d.class_id] = d.score;
            ([d.xmin, d.ymin, d.xmax, d.ymax], class_scores)
        })
        .collect();
    let (scores2, boxes2) = candidates(&rebuilt)?;
    let second = &extract_detections(&scores2, &boxes2, &cfg, None)?[0];

    assert_eq!(sorted(first.clone()), sorted(second.clone()));
    Ok(())
}

#[test]
fn one_candidate_can_detect_under_two_classes() -> Result<()> {
    let (scores, boxes) = candidates(&[([5.0, 5.0, 25.0, 25.0], vec![0.9, 0.0, 0.8])])?;
    let dets = &extract_detections(&scores, &boxes, &config(0.5, 0.45, 20), None)?[0];
    assert_eq!(dets.len(), 2);
    let mut classes: Vec<usize> = dets.iter().map(|d| d.class_id).collect();
    classes.sort_unstable();
    assert_eq!(classes, vec![0, 2]);
    // same box under both labels, untouched by cross-class suppression
    assert_eq!(dets[0].xmin, dets[1].xmin);
    assert_eq!(dets[0].ymax, dets[1].ymax);
    Ok(())
}

#[test]
fn per_class_cap_keeps_the_top_scorers() -> Result<()> {
    let (scores, boxes) = candidates(&[
        ([0.0, 0.0, 10.0, 10.0], vec![0.6]),
        ([20.0, 0.0, 30.0, 10.0], vec![0.9]),
        ([40.0, 0.0, 50.0, 10.0], vec![0.7]),
        ([60.0, 0.0, 70.0, 10.0], vec![0.8]),
        ([80.0, 0.0, 90.0, 10.0], vec![0.5]),
    ])?;
    let dets = &extract_detections(&scores, &boxes, &config(0.1, 0.5, 2), None)?[0];
    assert_eq!(dets.len(), 2);
    assert_eq!(dets[0].score, 0.9);
    assert_eq!(dets[1].score, 0.8);
    Ok(())
}

#[test]
fn equal_scores_keep_the_first_candidate() -> Result<()> {
    let (scores, boxes) = candidates(&[
        ([0.0, 0.0, 10.0, 10.0], vec![0.8]),
        ([0.0, 0.0, 10.0, 11.0], vec![0.8]),
    ])?;
    let dets = &extract_detections(&scores, &boxes, &config(0.5, 0.45, 20), None)?[0];
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].ymax, 10.0);
    Ok(())
}

#[test]
fn batch_elements_are_independent() -> Result<()> {
    let dev = Device::Cpu;
    // image 0 has one strong candidate, image 1 none above threshold
    let scores = Tensor::from_vec(vec![0.9f32, 0.2], (2, 1, 1), &dev)?;
    let boxes = Tensor::from_vec(
        vec![5.0f32, 5.0, 10.0, 10.0, 5.0, 5.0, 10.0, 10.0],
        (2, 1, 4),
        &dev,
    )?;
    let dets = extract_detections(&scores, &boxes, &config(0.5, 0.45, 20), None)?;
    assert_eq!(dets.len(), 2);
    assert_eq!(dets[0].len(), 1);
    assert!(dets[1].is_empty());
    Ok(())
}

#[test]
fn letterbox_undo_removes_padding_before_scaling() -> Result<()> {
    // 832x416 original into a 416x416 input: scale 0.5, 104px of vertical pad
    let lb = Letterbox::new((416, 416), (832, 416));
    assert!((lb.scale() - 0.5).abs() < 1e-6);
    assert_eq!(lb.padding(), (0.0, 104.0));

    let restored = lb.restore([158.0, 158.0, 258.0, 258.0]);
    assert_eq!(restored, [316.0, 108.0, 516.0, 308.0]);

    // boxes leaking outside the image are clipped by the restore step
    let clipped = lb.restore([-10.0, 0.0, 500.0, 416.0]);
    assert_eq!(clipped, [0.0, 0.0, 832.0, 416.0]);

    let (scores, boxes) = candidates(&[([158.0, 158.0, 258.0, 258.0], vec![0.9])])?;
    let dets = &extract_detections(&scores, &boxes, &config(0.5, 0.45, 20), Some(&lb))?[0];
    assert_eq!(dets.len(), 1);
    assert_eq!(
        [dets[0].xmin, dets[0].ymin, dets[0].xmax, dets[0].ymax],
        [316.0, 108.0, 516.0, 308.0]
    );
    Ok(())
}

#[test]
fn candidate_layout_mismatch_is_an_error() -> Result<()> {
    let dev = Device::Cpu;
    let scores = Tensor::zeros((1, 10, 3), candle_core::DType::F32, &dev)?;
    let boxes = Tensor::zeros((1, 9, 4), candle_core::DType::F32, &dev)?;
    assert!(extract_detections(&scores, &boxes, &DetectConfig::default(), None).is_err());
    Ok(())
}
