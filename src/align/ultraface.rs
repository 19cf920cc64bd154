//! UltraFace detector via ONNX Runtime, the fallback backend.
//!
//! Lightweight and auto-downloaded, but box-only: no landmarks, so
//! alignment degrades to expansion-aware cropping instead of a geometric
//! warp.

use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::RgbImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use super::detect::{nms, DetectBackend, Detection};
use crate::models;

const INPUT_WIDTH: u32 = 320;
const INPUT_HEIGHT: u32 = 240;
/// Floor below which anchors are discarded before NMS; the aligner's own
/// `min_conf` gate is applied later.
const SCORE_FLOOR: f32 = 0.5;
const NMS_THRESHOLD: f32 = 0.3;

pub struct UltrafaceBackend {
    session: Session,
}

impl UltrafaceBackend {
    /// Download the model if needed and build a session.
    pub fn new() -> Result<Self> {
        let model_path = models::ensure_model(models::ULTRAFACE_FILENAME, models::ULTRAFACE_URL)?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)?;

        Ok(Self { session })
    }
}

impl DetectBackend for UltrafaceBackend {
    fn name(&self) -> &'static str {
        "ultraface"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let (orig_width, orig_height) = (image.width(), image.height());

        let resized = image::imageops::resize(image, INPUT_WIDTH, INPUT_HEIGHT, FilterType::Triangle);

        // NCHW, (pixel - 127) / 128 per the UltraFace training recipe.
        let plane = (INPUT_HEIGHT * INPUT_WIDTH) as usize;
        let mut input_data = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let idx = y as usize * INPUT_WIDTH as usize + x as usize;
            for c in 0..3 {
                input_data[c * plane + idx] = (pixel[c] as f32 - 127.0) / 128.0;
            }
        }

        let input_tensor = Tensor::from_array((
            [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
            input_data.into_boxed_slice(),
        ))?;

        let outputs = self.session.run(ort::inputs!["input" => input_tensor])?;

        let scores_value = outputs
            .get("scores")
            .ok_or_else(|| anyhow!("No scores output"))?;
        let boxes_value = outputs
            .get("boxes")
            .ok_or_else(|| anyhow!("No boxes output"))?;

        let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
        let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

        // scores: [1, num_anchors, 2] (background, face)
        // boxes:  [1, num_anchors, 4] (x1, y1, x2, y2 normalized)
        let num_anchors = scores_shape[1] as usize;
        let mut detections = Vec::new();

        for i in 0..num_anchors {
            let confidence = scores_data[i * 2 + 1];
            if confidence <= SCORE_FLOOR {
                continue;
            }

            let x1 = boxes_data[i * 4] * orig_width as f32;
            let y1 = boxes_data[i * 4 + 1] * orig_height as f32;
            let x2 = boxes_data[i * 4 + 2] * orig_width as f32;
            let y2 = boxes_data[i * 4 + 3] * orig_height as f32;

            detections.push(Detection {
                x: x1.max(0.0),
                y: y1.max(0.0),
                width: (x2 - x1).max(1.0),
                height: (y2 - y1).max(1.0),
                confidence,
                landmarks: None,
            });
        }

        Ok(nms(detections, NMS_THRESHOLD))
    }
}
