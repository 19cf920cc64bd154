use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::quality::QualityThresholds;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub align: AlignSettings,

    #[serde(default)]
    pub quality: QualityThresholds,

    #[serde(default)]
    pub dedupe: DedupeSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignSettings {
    /// Detections below this confidence are ignored when deciding whether
    /// the image contains exactly one face.
    #[serde(default = "default_min_conf")]
    pub min_conf: f32,

    /// Side length of the square canonical output crop.
    #[serde(default = "default_output_size")]
    pub output_size: u32,

    /// Symmetric bounding-box expansion factor (>1.0 keeps background
    /// context around the face). Only used by the bounding-box crop mode.
    #[serde(default = "default_face_scale")]
    pub face_scale: f32,

    /// Resize crops back to the source image resolution instead of the
    /// square canonical size.
    #[serde(default)]
    pub keep_input_size: bool,

    /// Path to a local SCRFD model file. When unset, the default location
    /// under the data directory is probed.
    #[serde(default)]
    pub scrfd_model: Option<PathBuf>,
}

fn default_min_conf() -> f32 {
    0.9
}

fn default_output_size() -> u32 {
    512
}

fn default_face_scale() -> f32 {
    1.3
}

impl Default for AlignSettings {
    fn default() -> Self {
        Self {
            min_conf: default_min_conf(),
            output_size: default_output_size(),
            face_scale: default_face_scale(),
            keep_input_size: false,
            scrfd_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupeSettings {
    /// Cosine similarity at or above which two embeddings are considered
    /// near-duplicates.
    #[serde(default = "default_cosine_thresh")]
    pub cosine_thresh: f32,

    /// Number of nearest neighbors inspected per kept item. Clusters larger
    /// than this can be under-suppressed; raise it for bursty datasets.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Path to a local ArcFace model file. When unset, the model is
    /// downloaded into the data directory on first use.
    #[serde(default)]
    pub arcface_model: Option<PathBuf>,
}

fn default_cosine_thresh() -> f32 {
    0.92
}

fn default_top_k() -> usize {
    10
}

impl Default for DedupeSettings {
    fn default() -> Self {
        Self {
            cosine_thresh: default_cosine_thresh(),
            top_k: default_top_k(),
            arcface_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Reference image for statistical color transfer. When unset, color
    /// normalization is a pass-through.
    #[serde(default)]
    pub reference_image: Option<PathBuf>,

    /// Write a `<hash>.json` sidecar with detection metadata next to each
    /// accepted artifact.
    #[serde(default)]
    pub dump_meta: bool,
}

fn default_image_extensions() -> Vec<String> {
    vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()]
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            reference_image: None,
            dump_meta: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, or fall back to defaults when
    /// no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: Config = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Config::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert!((config.align.min_conf - 0.9).abs() < 1e-6);
        assert_eq!(config.align.output_size, 512);
        assert!((config.align.face_scale - 1.3).abs() < 1e-6);
        assert!(!config.align.keep_input_size);
        assert!((config.dedupe.cosine_thresh - 0.92).abs() < 1e-6);
        assert_eq!(config.dedupe.top_k, 10);
        assert_eq!(config.pipeline.image_extensions, vec!["jpg", "jpeg", "png"]);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [align]
            min_conf = 0.8
            keep_input_size = true

            [dedupe]
            top_k = 25
            "#,
        )
        .unwrap();

        assert!((config.align.min_conf - 0.8).abs() < 1e-6);
        assert!(config.align.keep_input_size);
        assert_eq!(config.align.output_size, 512);
        assert_eq!(config.dedupe.top_k, 25);
        assert!((config.dedupe.cosine_thresh - 0.92).abs() < 1e-6);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pipeline]\ndump_meta = true\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert!(config.pipeline.dump_meta);
    }
}
