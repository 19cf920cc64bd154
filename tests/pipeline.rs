//! End-to-end pipeline runs against a mock detection backend, exercising
//! traversal order, per-item failure isolation, manifests and dedup.

use anyhow::Result;
use image::{Rgb, RgbImage};
use std::path::Path;
use tempfile::tempdir;

use faceprep::align::detect::{DetectBackend, Detection};
use faceprep::align::{AlignOptions, Aligner};
use faceprep::config::Config;
use faceprep::pipeline::{Pipeline, FINAL_MANIFEST, IMAGES_SUBDIR, PRE_DEDUPE_MANIFEST};

/// One confident full-frame face for every image, except 40-pixel-wide
/// images which get two faces.
struct StubBackend;

impl DetectBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let full = Detection {
            x: 0.0,
            y: 0.0,
            width: image.width() as f32,
            height: image.height() as f32,
            confidence: 0.99,
            landmarks: None,
        };
        if image.width() == 40 {
            let mut second = full.clone();
            second.confidence = 0.9;
            Ok(vec![full, second])
        } else {
            Ok(vec![full])
        }
    }
}

fn checkerboard(size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| {
        if (x + y) % 2 == 0 {
            Rgb([150, 90, 90])
        } else {
            Rgb([90, 150, 90])
        }
    })
}

fn write_inputs(dir: &Path) {
    // a.jpg: undecodable.
    std::fs::write(dir.join("a.jpg"), b"definitely not a jpeg").unwrap();
    // b.png: 40 wide, so the stub reports two faces.
    RgbImage::from_pixel(40, 40, Rgb([120, 120, 120]))
        .save(dir.join("b.png"))
        .unwrap();
    // c.png and d.png: identical sharp, well-exposed content.
    checkerboard(32).save(dir.join("c.png")).unwrap();
    checkerboard(32).save(dir.join("d.png")).unwrap();
    // e.png: flat, fails the sharpness gate.
    RgbImage::from_pixel(32, 32, Rgb([130, 110, 110]))
        .save(dir.join("e.png"))
        .unwrap();
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.align.min_conf = 0.5;
    config.align.output_size = 32;
    config.align.face_scale = 1.0;
    config
}

fn aligner(config: &Config) -> Aligner {
    Aligner::with_backend(Box::new(StubBackend), AlignOptions::from(&config.align))
}

fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
    let mut rdr = csv::Reader::from_path(path).unwrap();
    rdr.records().map(|r| r.unwrap()).collect()
}

#[test]
fn full_run_produces_both_manifests() {
    let input = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_inputs(input.path());

    let config = test_config();
    let mut aligner = aligner(&config);
    let pipeline = Pipeline::new(config, input.path(), out.path()).unwrap();

    let summary = pipeline.run(&mut aligner, None).unwrap();
    assert_eq!(summary.total, 5);
    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.rejected, 3);
    assert_eq!(summary.kept, 1);

    // Pre-dedupe manifest: one row per input, in sorted traversal order.
    let rows = read_rows(&out.path().join(PRE_DEDUPE_MANIFEST));
    assert_eq!(rows.len(), 5);

    let outcome: Vec<(&str, &str)> = rows.iter().map(|r| (&r[1], &r[2])).collect();
    assert_eq!(
        outcome,
        vec![
            ("fail", "read_fail"),
            ("fail", "no_single_face"),
            ("ok", ""),
            ("ok", ""),
            ("fail", "low_sharpness"),
        ]
    );
    assert!(rows[0][0].ends_with("a.jpg"));
    assert!(rows[4][0].ends_with("e.png"));

    // Both accepted artifacts were written, even though one is later
    // suppressed as a duplicate.
    let pngs: Vec<_> = std::fs::read_dir(out.path().join(IMAGES_SUBDIR))
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "png"))
        .collect();
    assert_eq!(pngs.len(), 2);

    // c.png and d.png have identical content; the earlier one survives.
    let final_rows = read_rows(&out.path().join(FINAL_MANIFEST));
    assert_eq!(final_rows.len(), 1);
    assert_eq!(&final_rows[0][0], &rows[2][3]);
}

#[test]
fn empty_input_still_writes_manifests() {
    let input = tempdir().unwrap();
    let out = tempdir().unwrap();

    let config = test_config();
    let mut aligner = aligner(&config);
    let pipeline = Pipeline::new(config, input.path(), out.path()).unwrap();

    let summary = pipeline.run(&mut aligner, None).unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(summary.kept, 0);

    assert!(read_rows(&out.path().join(PRE_DEDUPE_MANIFEST)).is_empty());
    assert!(read_rows(&out.path().join(FINAL_MANIFEST)).is_empty());
}

#[test]
fn dump_meta_writes_sidecars_for_accepted_items() {
    let input = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_inputs(input.path());

    let mut config = test_config();
    config.pipeline.dump_meta = true;
    let mut aligner = aligner(&config);
    let pipeline = Pipeline::new(config, input.path(), out.path()).unwrap();
    pipeline.run(&mut aligner, None).unwrap();

    let sidecars: Vec<_> = std::fs::read_dir(out.path().join(IMAGES_SUBDIR))
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "json"))
        .collect();
    assert_eq!(sidecars.len(), 2);

    let meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&sidecars[0]).unwrap()).unwrap();
    assert_eq!(meta["backend"], "stub");
    assert_eq!(meta["bbox"][0], 0);
}

#[test]
fn reference_image_is_applied_without_breaking_acceptance() {
    let input = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_inputs(input.path());

    // The reference lives outside the scanned input tree.
    let ref_dir = tempdir().unwrap();
    let reference = ref_dir.path().join("ref.png");
    checkerboard(32).save(&reference).unwrap();

    let mut config = test_config();
    config.pipeline.reference_image = Some(reference);
    let mut aligner = aligner(&config);
    let pipeline = Pipeline::new(config, input.path(), out.path()).unwrap();

    let summary = pipeline.run(&mut aligner, None).unwrap();
    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.kept, 1);
}
