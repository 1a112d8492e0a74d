use anyhow::{bail, Context, Result};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use yolov3::{
    draw_detections, extract_detections, DetectConfig, Letterbox, Yolov3, Yolov3Config,
    COCO_CLASS_LABELS,
};

/// Runs the detection heads over backbone features exported to safetensors
/// (keys `feat_32`, `feat_16`, `feat_8`) and draws the detections onto the
/// original image.
///
/// Usage: detect <weights.safetensors> <features.safetensors> <image> [input-size]
fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let [_, weights, features, image_path, rest @ ..] = args.as_slice() else {
        bail!("usage: detect <weights.safetensors> <features.safetensors> <image> [input-size]");
    };
    let input_size: u32 = match rest {
        [size] => size.parse().context("input size must be an integer")?,
        _ => 416,
    };

    let device = Device::cuda_if_available(0)?;
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device) }?;
    let model = Yolov3::load(vb, &Yolov3Config::coco80())?;

    let feats = candle_core::safetensors::load(features, &device)?;
    let feat = |name: &str| {
        feats
            .get(name)
            .with_context(|| format!("features file is missing the {name} tensor"))
    };
    let (scores, boxes) = model.predict([feat("feat_32")?, feat("feat_16")?, feat("feat_8")?])?;

    let original = image::open(image_path)?;
    let letterbox = Letterbox::new(
        (input_size, input_size),
        (original.width(), original.height()),
    );
    let detections = extract_detections(&scores, &boxes, &DetectConfig::default(), Some(&letterbox))?
        .into_iter()
        .next()
        .unwrap_or_default();

    for det in &detections {
        println!(
            "{:12} {:.3} ({:.0}, {:.0}) - ({:.0}, {:.0})",
            COCO_CLASS_LABELS[det.class_id], det.score, det.xmin, det.ymin, det.xmax, det.ymax,
        );
    }

    let annotated = draw_detections(&original, &detections);
    annotated.save("detections.jpg")?;
    println!("{} detections -> detections.jpg", detections.len());
    Ok(())
}
