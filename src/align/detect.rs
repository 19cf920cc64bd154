//! Detection primitives shared by the detector backends.

use anyhow::Result;
use image::RgbImage;

/// A detected face: pixel-space box, confidence in [0, 1], and optional
/// five-point landmarks [left eye, right eye, nose, left mouth, right mouth].
#[derive(Debug, Clone)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// A face-detection strategy. Implementations must not mutate the input
/// image and must report confidences in [0, 1].
///
/// Exactly one backend is active per process; it is selected once at
/// startup by [`super::Aligner::probe`] and never swapped per call.
pub trait DetectBackend: Send {
    fn name(&self) -> &'static str;
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;
}

/// Non-maximum suppression: drop detections overlapping a higher-confidence
/// detection by more than `iou_threshold`.
pub(crate) fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

pub(crate) fn iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
