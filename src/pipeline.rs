//! Batch orchestration: discovery, per-image processing, deduplication,
//! manifests.
//!
//! Inputs are processed in sorted traversal order and every failure is
//! isolated to its item; only I/O on the run's own outputs (manifests,
//! output directory) aborts the batch.

use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

use crate::align::Aligner;
use crate::color;
use crate::config::Config;
use crate::dedupe;
use crate::discovery;
use crate::embed::FaceEmbedder;
use crate::imgio;
use crate::manifest::{self, ManifestEntry};
use crate::quality;

pub const IMAGES_SUBDIR: &str = "images";
pub const PRE_DEDUPE_MANIFEST: &str = "manifest_pre_dedupe.csv";
pub const FINAL_MANIFEST: &str = "manifest_final.csv";

#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    /// Input files discovered.
    pub total: usize,
    /// Items that produced an artifact before deduplication.
    pub accepted: usize,
    /// Items rejected or failed before deduplication.
    pub rejected: usize,
    /// Artifacts surviving deduplication.
    pub kept: usize,
}

pub struct Pipeline {
    config: Config,
    input_dir: PathBuf,
    out_dir: PathBuf,
    reference: Option<RgbImage>,
}

impl Pipeline {
    /// Resolve the run's directories and decode the color reference image
    /// once, up front. A configured but unreadable reference is a setup
    /// error, not a per-item one.
    pub fn new(config: Config, input_dir: &Path, out_dir: &Path) -> Result<Self> {
        let reference = match &config.pipeline.reference_image {
            Some(path) => {
                let img = imgio::load_image(path)
                    .with_context(|| format!("reference image {}", path.display()))?;
                // Resized once to the canonical size; read-only afterwards.
                let size = config.align.output_size;
                let img = if (img.width(), img.height()) == (size, size) {
                    img
                } else {
                    image::imageops::resize(&img, size, size, image::imageops::FilterType::Triangle)
                };
                tracing::info!(path = %path.display(), "Color reference loaded");
                Some(img)
            }
            None => None,
        };

        Ok(Self {
            config,
            input_dir: input_dir.to_path_buf(),
            out_dir: out_dir.to_path_buf(),
            reference,
        })
    }

    /// Process every discovered image, write both manifests, and return the
    /// run counts. The embedder is optional; without one, deduplication
    /// falls back to perceptual hashing of the persisted artifacts.
    pub fn run(
        &self,
        aligner: &mut Aligner,
        mut embedder: Option<FaceEmbedder>,
    ) -> Result<RunSummary> {
        let images_dir = self.out_dir.join(IMAGES_SUBDIR);
        std::fs::create_dir_all(&images_dir)
            .with_context(|| format!("creating {}", images_dir.display()))?;

        let inputs =
            discovery::discover_images(&self.input_dir, &self.config.pipeline.image_extensions)?;
        tracing::info!(
            count = inputs.len(),
            input = %self.input_dir.display(),
            backend = aligner.backend_name(),
            "Starting run"
        );

        let mut entries: Vec<ManifestEntry> = Vec::with_capacity(inputs.len());
        let mut outputs: Vec<PathBuf> = Vec::new();

        for path in &inputs {
            match self.process_one(path, aligner, &images_dir) {
                Ok(out_path) => {
                    tracing::debug!(path = %path.display(), out = %out_path.display(), "accepted");
                    entries.push(ManifestEntry::ok(path, &out_path));
                    outputs.push(out_path);
                }
                Err(reason) => {
                    tracing::debug!(path = %path.display(), %reason, "rejected");
                    entries.push(ManifestEntry::fail(path, &reason));
                }
            }
        }

        let accepted = outputs.len();
        manifest::write_pre_dedupe(&self.out_dir.join(PRE_DEDUPE_MANIFEST), &entries)?;

        let keep = self.dedupe_outputs(&outputs, embedder.as_mut());
        let survivors: Vec<String> = keep
            .iter()
            .map(|&i| outputs[i].to_string_lossy().to_string())
            .collect();
        manifest::write_final(&self.out_dir.join(FINAL_MANIFEST), &survivors)?;

        let summary = RunSummary {
            total: inputs.len(),
            accepted,
            rejected: inputs.len() - accepted,
            kept: survivors.len(),
        };
        tracing::info!(
            total = summary.total,
            accepted = summary.accepted,
            rejected = summary.rejected,
            kept = summary.kept,
            "Run finished"
        );

        Ok(summary)
    }

    /// Run one image through decode, alignment, quality, color transfer and
    /// persistence. The error is the manifest reason code.
    fn process_one(
        &self,
        path: &Path,
        aligner: &mut Aligner,
        images_dir: &Path,
    ) -> Result<PathBuf, String> {
        let img = match imgio::load_image(path) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "decode failed");
                return Err("read_fail".to_string());
            }
        };

        let aligned = aligner.align(&img).map_err(|failure| {
            tracing::debug!(path = %path.display(), error = %failure, "alignment rejected");
            failure.reason().to_string()
        })?;

        let verdict = quality::passes_quality(&aligned.image, &self.config.quality);
        if let Some(reason) = verdict.reason {
            return Err(reason.as_str().to_string());
        }

        let final_image = match &self.reference {
            Some(reference) => color::lab_match(&aligned.image, reference),
            None => aligned.image,
        };

        let out_path = images_dir.join(imgio::artifact_name(path));
        if let Err(e) = imgio::save_png(&out_path, &final_image) {
            tracing::warn!(path = %out_path.display(), error = %e, "write failed");
            return Err("write_fail".to_string());
        }

        if self.config.pipeline.dump_meta {
            if let Err(e) = write_meta(&out_path, &aligned.meta) {
                // The artifact is already valid; a missing sidecar is only
                // worth a warning.
                tracing::warn!(path = %out_path.display(), error = %e, "meta sidecar failed");
            }
        }

        Ok(out_path)
    }

    /// Choose surviving indices among the persisted artifacts. Embedding
    /// dedup is preferred; any failure there downgrades to perceptual
    /// hashing rather than losing the run.
    fn dedupe_outputs(&self, outputs: &[PathBuf], embedder: Option<&mut FaceEmbedder>) -> Vec<usize> {
        if outputs.is_empty() {
            return Vec::new();
        }

        if let Some(embedder) = embedder {
            match embedder.embed_files(outputs) {
                Ok(feats) => {
                    return dedupe::dedupe_embeddings(
                        feats.view(),
                        self.config.dedupe.cosine_thresh,
                        self.config.dedupe.top_k,
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "embedding dedup failed, falling back to perceptual hashing");
                }
            }
        }

        dedupe::phash_dedupe(outputs)
    }
}

/// Write the detection metadata sidecar next to an artifact, swapping the
/// `.png` extension for `.json`.
fn write_meta(artifact_path: &Path, meta: &crate::align::AlignMeta) -> Result<()> {
    let meta_path = artifact_path.with_extension("json");
    let json = serde_json::to_string_pretty(meta)?;
    std::fs::write(&meta_path, json)?;
    Ok(())
}
