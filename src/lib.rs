//! faceprep prepares a raw collection of face photographs into a clean,
//! deduplicated, quality-filtered, color-normalized dataset.
//!
//! The pipeline runs one forward pass per input file:
//! decode → align → quality gate → color normalize → persist, then a
//! batch deduplication pass over the persisted outputs.

pub mod align;
pub mod color;
pub mod config;
pub mod dedupe;
pub mod discovery;
pub mod embed;
pub mod imgio;
pub mod logging;
pub mod manifest;
pub mod models;
pub mod pipeline;
pub mod quality;
