//! ONNX model provisioning.
//!
//! Models live under the user data directory and are downloaded on first
//! use where a public URL exists. The SCRFD detector has no stable public
//! mirror and must be provisioned manually; a missing file there is an
//! ordinary probe failure, not a fatal error.

use anyhow::{anyhow, Result};
use std::path::PathBuf;

pub const ULTRAFACE_FILENAME: &str = "ultraface-320.onnx";
pub const ULTRAFACE_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";

pub const ARCFACE_FILENAME: &str = "arcface-resnet100.onnx";
pub const ARCFACE_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx";

pub const SCRFD_FILENAME: &str = "scrfd_10g_kps.onnx";

/// Directory where model files are stored.
pub fn models_dir() -> Result<PathBuf> {
    let data_dir =
        dirs::data_local_dir().ok_or_else(|| anyhow!("Could not find local data directory"))?;
    let models_dir = data_dir.join("faceprep").join("models");
    std::fs::create_dir_all(&models_dir)?;
    Ok(models_dir)
}

/// Download a model file if it doesn't exist yet.
pub fn ensure_model(filename: &str, url: &str) -> Result<PathBuf> {
    let models_dir = models_dir()?;
    let model_path = models_dir.join(filename);

    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download model: {}", e))?;

        let mut file = std::fs::File::create(&model_path)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
    }

    Ok(model_path)
}

/// Default on-disk location of the SCRFD detector model.
pub fn default_scrfd_path() -> Result<PathBuf> {
    Ok(models_dir()?.join(SCRFD_FILENAME))
}
