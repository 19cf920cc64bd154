//! Per-image quality gate: sharpness, exposure, saturation.
//!
//! Checks run in a fixed order and short-circuit, so every rejected image
//! carries exactly one reason.

use image::RgbImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// Minimum variance of the Laplacian of the grayscale image.
    #[serde(default = "default_min_sharpness")]
    pub min_sharpness: f64,

    #[serde(default = "default_min_brightness")]
    pub min_brightness: f64,

    #[serde(default = "default_max_brightness")]
    pub max_brightness: f64,

    /// Mean saturation bounds, normalized to [0, 1].
    #[serde(default = "default_min_saturation")]
    pub min_saturation: f64,

    #[serde(default = "default_max_saturation")]
    pub max_saturation: f64,
}

fn default_min_sharpness() -> f64 {
    120.0
}

fn default_min_brightness() -> f64 {
    90.0
}

fn default_max_brightness() -> f64 {
    180.0
}

fn default_min_saturation() -> f64 {
    0.12
}

fn default_max_saturation() -> f64 {
    0.55
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_sharpness: default_min_sharpness(),
            min_brightness: default_min_brightness(),
            max_brightness: default_max_brightness(),
            min_saturation: default_min_saturation(),
            max_saturation: default_max_saturation(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    LowSharpness,
    BadExposure,
    BadSaturation,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::LowSharpness => "low_sharpness",
            RejectReason::BadExposure => "bad_exposure",
            RejectReason::BadSaturation => "bad_saturation",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QualityVerdict {
    pub pass: bool,
    pub reason: Option<RejectReason>,
}

/// Score an image against the thresholds. Sharpness is checked first, then
/// exposure, then saturation; the first failing axis is the verdict.
pub fn passes_quality(img: &RgbImage, thresholds: &QualityThresholds) -> QualityVerdict {
    let gray = grayscale(img);

    let sharp = laplacian_variance(&gray, img.width() as usize, img.height() as usize);
    if sharp < thresholds.min_sharpness {
        return QualityVerdict {
            pass: false,
            reason: Some(RejectReason::LowSharpness),
        };
    }

    let bright = mean(&gray);
    if bright < thresholds.min_brightness || bright > thresholds.max_brightness {
        return QualityVerdict {
            pass: false,
            reason: Some(RejectReason::BadExposure),
        };
    }

    let sat = mean_saturation(img);
    if sat < thresholds.min_saturation || sat > thresholds.max_saturation {
        return QualityVerdict {
            pass: false,
            reason: Some(RejectReason::BadSaturation),
        };
    }

    QualityVerdict {
        pass: true,
        reason: None,
    }
}

fn grayscale(img: &RgbImage) -> Vec<f64> {
    img.pixels()
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Variance of the 4-neighbor Laplacian over interior pixels.
fn laplacian_variance(gray: &[f64], width: usize, height: usize) -> f64 {
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut responses = Vec::with_capacity((width - 2) * (height - 2));
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = gray[y * width + x];
            let lap = gray[(y - 1) * width + x]
                + gray[(y + 1) * width + x]
                + gray[y * width + x - 1]
                + gray[y * width + x + 1]
                - 4.0 * center;
            responses.push(lap);
        }
    }

    let mu = mean(&responses);
    responses.iter().map(|r| (r - mu) * (r - mu)).sum::<f64>() / responses.len() as f64
}

/// Mean HSV-style saturation in [0, 1].
fn mean_saturation(img: &RgbImage) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;

    for p in img.pixels() {
        let max = p.0.iter().copied().max().unwrap_or(0) as f64;
        let min = p.0.iter().copied().min().unwrap_or(0) as f64;
        let s = if max > 0.0 { (max - min) / max } else { 0.0 };
        total += s;
        count += 1;
    }

    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}
