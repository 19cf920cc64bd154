//! Near-duplicate suppression.
//!
//! Two interchangeable strategies, chosen by the caller based on what data
//! is available: greedy suppression over dense embeddings, or perceptual
//! hashing over image files. Both return the kept index subset in input
//! order and never reorder or mutate their input.

use anyhow::{anyhow, Result};
use img_hash::HasherConfig;
use ndarray::ArrayView2;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;

/// Greedy near-duplicate suppression over L2-normalized embeddings.
///
/// Items are visited in input order; for each still-kept item, its `top_k`
/// nearest neighbors by inner product are inspected and every neighbor at
/// or above `cosine_thresh` that is still kept gets suppressed. Earlier
/// items always win over later near-duplicates.
///
/// Known approximation: a cluster with more than `top_k` members can be
/// under-suppressed, because only the `top_k` closest neighbors of the
/// representative are ever inspected. [`dedupe_embeddings_exhaustive`] does
/// not have this limitation; the two agree whenever `top_k` covers the
/// largest cluster.
pub fn dedupe_embeddings(feats: ArrayView2<'_, f32>, cosine_thresh: f32, top_k: usize) -> Vec<usize> {
    let n = feats.nrows();
    if n == 0 {
        return Vec::new();
    }

    // Batch neighbor search: for every item, the top_k most similar other
    // items with their similarities, descending.
    let neighbors: Vec<Vec<(usize, f32)>> = (0..n)
        .map(|i| {
            let row = feats.row(i);
            let mut sims: Vec<(usize, f32)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, row.dot(&feats.row(j))))
                .collect();
            sims.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            sims.truncate(top_k);
            sims
        })
        .collect();

    let mut keep_mask = vec![true; n];
    for i in 0..n {
        if !keep_mask[i] {
            continue;
        }
        for &(j, sim) in &neighbors[i] {
            if sim >= cosine_thresh && keep_mask[j] {
                keep_mask[j] = false;
            }
        }
    }

    mask_to_indices(&keep_mask)
}

/// Exhaustive O(N²) variant of [`dedupe_embeddings`]: every still-kept later
/// item is compared against each kept representative.
pub fn dedupe_embeddings_exhaustive(feats: ArrayView2<'_, f32>, cosine_thresh: f32) -> Vec<usize> {
    let n = feats.nrows();
    let mut keep_mask = vec![true; n];

    for i in 0..n {
        if !keep_mask[i] {
            continue;
        }
        let row = feats.row(i);
        for j in (i + 1)..n {
            if keep_mask[j] && row.dot(&feats.row(j)) >= cosine_thresh {
                keep_mask[j] = false;
            }
        }
    }

    mask_to_indices(&keep_mask)
}

fn mask_to_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &kept)| kept.then_some(i))
        .collect()
}

/// Deduplicate image files by perceptual hash, keeping the first occurrence
/// of each distinct hash in input order.
///
/// Hashes are computed in parallel; keep decisions run sequentially so the
/// outcome is independent of scheduling. A file whose hash cannot be
/// computed is kept unconditionally: an unreadable image is not a
/// duplicate.
pub fn phash_dedupe(paths: &[PathBuf]) -> Vec<usize> {
    let hashes: Vec<Option<String>> = paths
        .par_iter()
        .map(|path| match perceptual_hash(path) {
            Ok(hash) => Some(hash),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "hash failed, keeping image");
                None
            }
        })
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    let mut keep = Vec::new();

    for (idx, hash) in hashes.into_iter().enumerate() {
        match hash {
            Some(h) => {
                if seen.insert(h) {
                    keep.push(idx);
                }
            }
            None => keep.push(idx),
        }
    }

    keep
}

fn perceptual_hash(path: &PathBuf) -> Result<String> {
    let img = image::open(path)?;

    // Hash a small thumbnail; the hash is coarse by design and thumbnail()
    // is much cheaper than hashing full resolution.
    let thumbnail = img.thumbnail(64, 64);

    let hasher = HasherConfig::new().hash_size(16, 16).to_hasher();

    // img_hash bundles its own image version; convert through raw pixels.
    let rgba = thumbnail.to_rgba8();
    let (width, height) = rgba.dimensions();
    let img_hash_image = img_hash::image::RgbaImage::from_raw(width, height, rgba.into_raw())
        .ok_or_else(|| anyhow!("Failed to create image for hashing"))?;

    let hash = hasher.hash_image(&img_hash::image::DynamicImage::ImageRgba8(img_hash_image));

    Ok(hash.to_base64())
}
