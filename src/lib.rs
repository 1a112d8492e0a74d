//! YOLOv3 detection core on candle: anchor-based box codec, multi-scale
//! detection heads with upsample/concat fusion, prediction assembly and
//! per-class non-max suppression. Backbone features, weights and the
//! training loop are supplied by the surrounding system.

use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;

pub mod yolov3;

pub use yolov3::codec::Anchor;
pub use yolov3::detect::{extract_detections, DetectConfig, Detection, Letterbox};
pub use yolov3::{Yolov3, Yolov3Config};

#[rustfmt::skip]
pub const COCO_CLASS_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat", "traffic light",
    "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog", "horse", "sheep", "cow", "elephant",
    "bear", "zebra", "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard",
    "sports ball", "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange", "broccoli",
    "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant", "bed", "dining table", "toilet",
    "tv", "laptop", "mouse", "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush"
];

const CLASS_COLORS: [Rgb<u8>; 20] = [
    Rgb([255, 0, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 0, 255]),
    Rgb([255, 255, 0]),
    Rgb([255, 0, 255]),
    Rgb([0, 255, 255]),
    Rgb([255, 128, 0]),
    Rgb([255, 0, 128]),
    Rgb([128, 255, 0]),
    Rgb([0, 128, 255]),
    Rgb([128, 0, 255]),
    Rgb([255, 128, 128]),
    Rgb([128, 255, 128]),
    Rgb([128, 128, 255]),
    Rgb([255, 255, 128]),
    Rgb([255, 128, 255]),
    Rgb([128, 255, 255]),
    Rgb([192, 192, 192]),
    Rgb([128, 128, 128]),
    Rgb([0, 0, 0]),
];

/// Draws hollow rectangles for each detection onto a copy of `image`, with
/// a fixed per-class color. Detections are expected in this image's pixel
/// coordinates (i.e. already letterbox-restored).
pub fn draw_detections(image: &DynamicImage, detections: &[Detection]) -> DynamicImage {
    let mut canvas = image.to_rgb8();
    for det in detections {
        let x = det.xmin.max(0.0) as u32;
        let y = det.ymin.max(0.0) as u32;
        if x >= canvas.width()
            || y >= canvas.height()
            || det.xmax <= det.xmin
            || det.ymax <= det.ymin
        {
            continue;
        }
        let w = ((det.xmax - det.xmin) as u32).min(canvas.width() - x).max(1);
        let h = ((det.ymax - det.ymin) as u32).min(canvas.height() - y).max(1);
        let color = CLASS_COLORS[det.class_id % CLASS_COLORS.len()];

        // offset rectangles for a thicker border
        for offset_y in -1i32..=1 {
            for offset_x in -1i32..=1 {
                let rect = imageproc::rect::Rect::at(x as i32 + offset_x, y as i32 + offset_y)
                    .of_size(w, h);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }
        }
    }
    DynamicImage::ImageRgb8(canvas)
}
