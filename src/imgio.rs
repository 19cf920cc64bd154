//! Image decode/encode helpers.
//!
//! Decoding honors the EXIF orientation tag: phone photos routinely store
//! pixels rotated with a tag instead of rewriting them, and an
//! orientation-blind decode feeds sideways faces to the detector.

use anyhow::{anyhow, Result};
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::{DynamicImage, ImageEncoder, RgbImage};
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Decode an image and apply its EXIF orientation, returning RGB pixels.
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let img = image::open(path).map_err(|e| anyhow!("failed to decode {}: {}", path.display(), e))?;
    let img = match read_orientation(path) {
        Some(orientation) => apply_orientation(img, orientation),
        None => img,
    };
    Ok(img.to_rgb8())
}

/// Read the EXIF orientation tag (1-8), if the file carries one.
fn read_orientation(path: &Path) -> Option<u32> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    field.value.get_uint(0)
}

fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Persist an RGB image as PNG with a fixed moderate compression level.
pub fn save_png(path: &Path, img: &RgbImage) -> Result<()> {
    let file = File::create(path)?;
    let encoder = PngEncoder::new_with_quality(
        BufWriter::new(file),
        CompressionType::Default,
        PngFilter::Adaptive,
    );
    encoder.write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(())
}

/// Deterministic artifact filename derived from the source path.
///
/// Hashing the path (not the content) keeps names stable across reruns
/// without tracking a counter.
pub fn artifact_name(src_path: &Path) -> String {
    let mut hasher = Md5::new();
    hasher.update(src_path.to_string_lossy().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}.png", &digest[..10])
}
