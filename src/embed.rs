//! ArcFace embedding extraction via ONNX Runtime.
//!
//! Embeddings exist only for the duration of the deduplication pass; they
//! are never persisted. When this model cannot be initialized the pipeline
//! downgrades to perceptual-hash deduplication.

use anyhow::{anyhow, bail, Result};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};

use crate::imgio;
use crate::models;

const INPUT_SIZE: u32 = 112;

pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Build a session from a local model file, downloading the default
    /// ArcFace model when no override is given.
    pub fn new(model_path: Option<&Path>) -> Result<Self> {
        let path = match model_path {
            Some(p) => p.to_path_buf(),
            None => models::ensure_model(models::ARCFACE_FILENAME, models::ARCFACE_URL)?,
        };

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&path)?;

        Ok(Self { session })
    }

    /// Compute an L2-normalized embedding for one face crop.
    pub fn embed(&mut self, img: &RgbImage) -> Result<Vec<f32>> {
        let resized = image::imageops::resize(img, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

        // NCHW, (pixel - 127.5) / 127.5 per the ArcFace training recipe.
        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        let mut input_data = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let idx = y as usize * INPUT_SIZE as usize + x as usize;
            for c in 0..3 {
                input_data[c * plane + idx] = (pixel[c] as f32 - 127.5) / 127.5;
            }
        }

        let input_tensor = Tensor::from_array((
            [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
            input_data.into_boxed_slice(),
        ))?;

        // ArcFace ONNX exports use "data" as the input name.
        let outputs = self.session.run(ort::inputs!["data" => input_tensor])?;

        let embedding_output = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding output"))?;
        let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

        Ok(l2_normalize(embedding_data.to_vec()))
    }

    /// Embed a batch of image files into an N×D matrix, rows in input
    /// order. Any decode or inference failure aborts the batch; the
    /// caller decides whether to fall back to another dedup strategy.
    pub fn embed_files(&mut self, paths: &[PathBuf]) -> Result<Array2<f32>> {
        let mut dim: Option<usize> = None;
        let mut flat: Vec<f32> = Vec::new();

        for path in paths {
            let img = imgio::load_image(path)?;
            let embedding = self.embed(&img)?;

            match dim {
                None => dim = Some(embedding.len()),
                Some(d) if d != embedding.len() => {
                    bail!(
                        "inconsistent embedding dimensions: {} vs {}",
                        d,
                        embedding.len()
                    )
                }
                _ => {}
            }
            flat.extend(embedding);
        }

        let d = dim.unwrap_or(0);
        Ok(Array2::from_shape_vec((paths.len(), d), flat)?)
    }
}

fn l2_normalize(v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.into_iter().map(|x| x / norm).collect()
    } else {
        v
    }
}
