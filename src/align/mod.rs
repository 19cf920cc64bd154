//! Face detection and alignment.
//!
//! One backend is active per process, chosen at startup by probing in a
//! fixed preference order: SCRFD (landmark-based geometric alignment)
//! first, UltraFace (expansion-aware bounding-box crop) as fallback. A
//! probe failure (a missing model file, an unusable runtime) is an
//! expected condition and moves on to the next backend; exhausting all
//! backends is a configuration error and fails construction.
//!
//! The two backends honor the same observable contract but are not
//! geometrically interchangeable: SCRFD output is rotation- and
//! scale-corrected onto reference landmark positions and always square,
//! while UltraFace output is an axis-aligned crop that honors
//! `keep_input_size` and `face_scale`. Mixing backends across runs of the
//! same dataset will shift downstream embedding statistics.

pub mod detect;
pub mod scrfd;
pub mod ultraface;
pub mod warp;

use anyhow::{bail, Result};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;

use crate::config::AlignSettings;
use crate::models;
use detect::{DetectBackend, Detection};
use scrfd::ScrfdBackend;
use ultraface::UltrafaceBackend;

#[derive(Debug, Clone)]
pub struct AlignOptions {
    pub min_conf: f32,
    pub output_size: u32,
    pub face_scale: f32,
    pub keep_input_size: bool,
}

impl From<&AlignSettings> for AlignOptions {
    fn from(s: &AlignSettings) -> Self {
        Self {
            min_conf: s.min_conf,
            output_size: s.output_size,
            face_scale: s.face_scale,
            keep_input_size: s.keep_input_size,
        }
    }
}

/// Why one image could not be aligned. These terminate the item, not the
/// batch.
#[derive(Debug, Error)]
pub enum AlignFailure {
    /// Zero or multiple confident faces. `count` is the detection count
    /// before the confidence filter, so logs can distinguish "empty frame"
    /// from "group photo". Multi-face images are rejected outright rather
    /// than best-picked: automated selection risks keeping the wrong
    /// identity.
    #[error("expected exactly one confident face, found {count} detection(s)")]
    NoSingleFace { count: usize },

    /// Detection or the geometric transform itself failed.
    #[error("alignment failed: {message}")]
    Failed { message: String },
}

impl AlignFailure {
    /// Stable reason code for the manifest.
    pub fn reason(&self) -> &'static str {
        match self {
            AlignFailure::NoSingleFace { .. } => "no_single_face",
            AlignFailure::Failed { .. } => "align_failed",
        }
    }
}

/// Metadata attached to every aligned face.
#[derive(Debug, Clone, Serialize)]
pub struct AlignMeta {
    pub backend: &'static str,
    pub det_conf: f32,
    /// Detection box corners [x1, y1, x2, y2].
    pub bbox: [i32; 4],
    /// Requested (unclamped) expansion corners; bounding-box mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expanded_bbox: Option<[i32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<[(f32, f32); 5]>,
    /// Head pose [yaw, pitch, roll], when the backend exposes it. Neither
    /// shipped backend currently does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<[f32; 3]>,
}

#[derive(Debug)]
pub struct AlignedFace {
    pub image: RgbImage,
    pub meta: AlignMeta,
}

pub struct Aligner {
    backend: Box<dyn DetectBackend>,
    opts: AlignOptions,
}

impl Aligner {
    /// Probe backends in preference order and keep the first that
    /// initializes. Fails only when every backend is unavailable.
    pub fn probe(settings: &AlignSettings) -> Result<Self> {
        let opts = AlignOptions::from(settings);

        let scrfd_path = match &settings.scrfd_model {
            Some(p) => p.clone(),
            None => models::default_scrfd_path()?,
        };

        match ScrfdBackend::new(&scrfd_path) {
            Ok(backend) => {
                tracing::info!(model = %scrfd_path.display(), "Using SCRFD backend for alignment");
                return Ok(Self {
                    backend: Box::new(backend),
                    opts,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "SCRFD backend unavailable, trying UltraFace");
            }
        }

        match UltrafaceBackend::new() {
            Ok(backend) => {
                tracing::info!("Falling back to UltraFace backend for alignment");
                Ok(Self {
                    backend: Box::new(backend),
                    opts,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "UltraFace backend unavailable");
                bail!("No alignment backend could be initialized")
            }
        }
    }

    /// Build an aligner around an explicit backend. Used by tests and by
    /// callers that manage model selection themselves.
    pub fn with_backend(backend: Box<dyn DetectBackend>, opts: AlignOptions) -> Self {
        Self { backend, opts }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Detect and align exactly one face.
    ///
    /// Detections below `min_conf` are filtered out; unless exactly one
    /// remains, the image is rejected with the pre-filter count. With
    /// landmarks the face is warped onto canonical positions; without them
    /// the detection box is expanded by `face_scale`, clamped to the image,
    /// cropped and resized.
    pub fn align(&mut self, image: &RgbImage) -> Result<AlignedFace, AlignFailure> {
        let detections = self
            .backend
            .detect(image)
            .map_err(|e| AlignFailure::Failed {
                message: e.to_string(),
            })?;

        let pre_filter_count = detections.len();
        let mut confident: Vec<Detection> = detections
            .into_iter()
            .filter(|d| d.confidence >= self.opts.min_conf)
            .collect();

        if confident.len() != 1 {
            return Err(AlignFailure::NoSingleFace {
                count: pre_filter_count,
            });
        }
        let face = confident.remove(0);

        let bbox = [
            face.x.round() as i32,
            face.y.round() as i32,
            (face.x + face.width).round() as i32,
            (face.y + face.height).round() as i32,
        ];

        match face.landmarks {
            Some(landmarks) => self.align_landmarks(image, &face, bbox, landmarks),
            None => self.align_bbox(image, &face, bbox),
        }
    }

    /// Landmark mode: similarity warp onto reference positions. Always
    /// produces the square canonical size; rotation correction and
    /// `keep_input_size` don't mix.
    fn align_landmarks(
        &self,
        image: &RgbImage,
        face: &Detection,
        bbox: [i32; 4],
        landmarks: [(f32, f32); 5],
    ) -> Result<AlignedFace, AlignFailure> {
        let matrix = warp::landmark_transform(&landmarks, self.opts.output_size).ok_or_else(|| {
            AlignFailure::Failed {
                message: "degenerate landmark configuration".to_string(),
            }
        })?;

        let aligned = warp::warp_similarity(image, &matrix, self.opts.output_size);

        Ok(AlignedFace {
            image: aligned,
            meta: AlignMeta {
                backend: self.backend.name(),
                det_conf: face.confidence,
                bbox,
                expanded_bbox: None,
                landmarks: Some(landmarks),
                pose: None,
            },
        })
    }

    /// Bounding-box mode: expand, clamp, crop, resize.
    fn align_bbox(
        &self,
        image: &RgbImage,
        face: &Detection,
        bbox: [i32; 4],
    ) -> Result<AlignedFace, AlignFailure> {
        let (rect, expanded) =
            warp::expand_and_clamp(face, self.opts.face_scale, image.width(), image.height());

        let target = if self.opts.keep_input_size {
            (image.width(), image.height())
        } else {
            (self.opts.output_size, self.opts.output_size)
        };

        let cropped = warp::crop_and_resize(image, rect, target);

        Ok(AlignedFace {
            image: cropped,
            meta: AlignMeta {
                backend: self.backend.name(),
                det_conf: face.confidence,
                bbox,
                expanded_bbox: Some(expanded),
                landmarks: None,
                pose: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Emits a fixed set of detections regardless of input.
    struct FixedBackend {
        detections: Vec<Detection>,
    }

    impl DetectBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>> {
            Ok(self.detections.clone())
        }
    }

    struct FailingBackend;

    impl DetectBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>> {
            anyhow::bail!("inference exploded")
        }
    }

    fn opts() -> AlignOptions {
        AlignOptions {
            min_conf: 0.8,
            output_size: 64,
            face_scale: 1.0,
            keep_input_size: false,
        }
    }

    fn det(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Detection {
        Detection {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    fn img(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([120, 120, 120]))
    }

    #[test]
    fn zero_faces_reports_count_zero() {
        let mut aligner = Aligner::with_backend(
            Box::new(FixedBackend { detections: vec![] }),
            opts(),
        );
        match aligner.align(&img(100, 100)) {
            Err(AlignFailure::NoSingleFace { count }) => assert_eq!(count, 0),
            other => panic!("expected NoSingleFace, got {other:?}"),
        }
    }

    #[test]
    fn two_faces_reports_prefilter_count() {
        let mut aligner = Aligner::with_backend(
            Box::new(FixedBackend {
                detections: vec![det(0.0, 0.0, 20.0, 20.0, 0.95), det(50.0, 50.0, 20.0, 20.0, 0.9)],
            }),
            opts(),
        );
        let failure = aligner.align(&img(100, 100)).unwrap_err();
        assert_eq!(failure.reason(), "no_single_face");
        match failure {
            AlignFailure::NoSingleFace { count } => assert_eq!(count, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn low_confidence_detections_are_filtered_but_counted() {
        // Two detections, one below min_conf: the filtered set has exactly
        // one face, so alignment proceeds.
        let mut aligner = Aligner::with_backend(
            Box::new(FixedBackend {
                detections: vec![det(10.0, 10.0, 40.0, 40.0, 0.95), det(60.0, 60.0, 20.0, 20.0, 0.3)],
            }),
            opts(),
        );
        let aligned = aligner.align(&img(100, 100)).unwrap();
        assert_eq!(aligned.meta.bbox, [10, 10, 50, 50]);
        assert!((aligned.meta.det_conf - 0.95).abs() < 1e-6);
    }

    #[test]
    fn backend_error_becomes_align_failed() {
        let mut aligner = Aligner::with_backend(Box::new(FailingBackend), opts());
        let failure = aligner.align(&img(100, 100)).unwrap_err();
        assert_eq!(failure.reason(), "align_failed");
    }

    #[test]
    fn bbox_mode_produces_canonical_square() {
        let mut aligner = Aligner::with_backend(
            Box::new(FixedBackend {
                detections: vec![det(10.0, 10.0, 50.0, 50.0, 0.99)],
            }),
            opts(),
        );
        let aligned = aligner.align(&img(100, 100)).unwrap();
        assert_eq!((aligned.image.width(), aligned.image.height()), (64, 64));
        assert_eq!(aligned.meta.backend, "fixed");
        assert!(aligned.meta.expanded_bbox.is_some());
        assert!(aligned.meta.landmarks.is_none());
    }

    #[test]
    fn keep_input_size_resizes_to_source_resolution() {
        let mut options = opts();
        options.keep_input_size = true;
        let mut aligner = Aligner::with_backend(
            Box::new(FixedBackend {
                detections: vec![det(10.0, 10.0, 30.0, 30.0, 0.99)],
            }),
            options,
        );
        let aligned = aligner.align(&img(120, 80)).unwrap();
        assert_eq!((aligned.image.width(), aligned.image.height()), (120, 80));
    }

    #[test]
    fn landmark_mode_warps_and_records_landmarks() {
        let landmarks = [
            (40.0, 35.0),
            (60.0, 35.0),
            (50.0, 48.0),
            (42.0, 60.0),
            (58.0, 60.0),
        ];
        let mut aligner = Aligner::with_backend(
            Box::new(FixedBackend {
                detections: vec![Detection {
                    landmarks: Some(landmarks),
                    ..det(30.0, 25.0, 40.0, 45.0, 0.97)
                }],
            }),
            opts(),
        );
        let aligned = aligner.align(&img(100, 100)).unwrap();
        assert_eq!((aligned.image.width(), aligned.image.height()), (64, 64));
        assert_eq!(aligned.meta.landmarks, Some(landmarks));
        assert!(aligned.meta.expanded_bbox.is_none());
    }

    #[test]
    fn degenerate_landmarks_fail_alignment() {
        let mut aligner = Aligner::with_backend(
            Box::new(FixedBackend {
                detections: vec![Detection {
                    landmarks: Some([(50.0, 50.0); 5]),
                    ..det(30.0, 25.0, 40.0, 45.0, 0.97)
                }],
            }),
            opts(),
        );
        let failure = aligner.align(&img(100, 100)).unwrap_err();
        assert_eq!(failure.reason(), "align_failed");
    }
}
