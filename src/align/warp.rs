//! Alignment geometry: landmark-based similarity warps and bounding-box
//! crops.

use image::imageops::FilterType;
use image::RgbImage;

use super::detect::Detection;

/// ArcFace reference landmarks for a 112×112 canvas, scaled up to the
/// configured output size at runtime.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

const REFERENCE_CANVAS: f32 = 112.0;

/// Estimate a 2×3 similarity transform (scale, rotation, translation) that
/// maps the detected landmarks onto the reference positions scaled to
/// `output_size`. Returns `None` when the landmark system is numerically
/// degenerate (e.g. collinear or coincident points).
pub fn landmark_transform(src: &[(f32, f32); 5], output_size: u32) -> Option<[f32; 6]> {
    let scale = output_size as f32 / REFERENCE_CANVAS;
    let dst: [(f32, f32); 5] =
        std::array::from_fn(|i| (REFERENCE_LANDMARKS_112[i].0 * scale, REFERENCE_LANDMARKS_112[i].1 * scale));

    estimate_similarity(src, &dst)
}

/// Least-squares fit of [a, -b, tx, b, a, ty]:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
/// For each point pair (sx, sy) -> (dx, dy):
///   sx * a - sy * b + tx = dx
///   sy * a + sx * b + ty = dy
fn estimate_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<[f32; 6]> {
    let mut ata = [0.0f32; 16]; // 4x4, row-major
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb)?;
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    // A vanishing linear part means the source points collapsed to one spot.
    if a * a + b * b < 1e-12 {
        return None;
    }

    Some([a, -b, tx, b, a, ty])
}

/// Gaussian elimination with partial pivoting; `None` on a singular system.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> Option<[f32; 4]> {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    Some(x)
}

/// Apply a 2×3 similarity warp to an RGB image, producing a square output.
/// Bilinear sampling; out-of-bounds pixels are black.
pub fn warp_similarity(img: &RgbImage, matrix: &[f32; 6], out_size: u32) -> RgbImage {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // Invert the linear part: M = [[a, -b], [b, a]], det = a² + b².
    let det = a * a + b * b;
    let mut out = RgbImage::new(out_size, out_size);
    if det.abs() < 1e-12 {
        return out;
    }
    let inv_det = 1.0 / det;
    let ia = a * inv_det;
    let ib = b * inv_det;

    let (src_w, src_h) = (img.width() as i32, img.height() as i32);

    for oy in 0..out_size {
        for ox in 0..out_size {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i32;
            let y0 = sy.floor() as i32;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let sample = |x: i32, y: i32, c: usize| -> f32 {
                if x >= 0 && x < src_w && y >= 0 && y < src_h {
                    img.get_pixel(x as u32, y as u32)[c] as f32
                } else {
                    0.0
                }
            };

            let mut pixel = [0u8; 3];
            for c in 0..3 {
                let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
                pixel[c] = val.round().clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(ox, oy, image::Rgb(pixel));
        }
    }

    out
}

/// A pixel rectangle, clamped to image bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Expand a detection box symmetrically about its center by `face_scale`,
/// then clamp to the image bounds. Truncation at the edges clamps rather
/// than fails. Returns the clamped rect and the unclamped expanded corners
/// (for metadata).
pub fn expand_and_clamp(
    det: &Detection,
    face_scale: f32,
    img_width: u32,
    img_height: u32,
) -> (CropRect, [i32; 4]) {
    let cx = det.x + det.width / 2.0;
    let cy = det.y + det.height / 2.0;
    let half_w = det.width * face_scale / 2.0;
    let half_h = det.height * face_scale / 2.0;

    let expanded = [
        (cx - half_w).round() as i32,
        (cy - half_h).round() as i32,
        (cx + half_w).round() as i32,
        (cy + half_h).round() as i32,
    ];

    let x1 = expanded[0].clamp(0, img_width as i32 - 1);
    let y1 = expanded[1].clamp(0, img_height as i32 - 1);
    let x2 = expanded[2].clamp(x1 + 1, img_width as i32);
    let y2 = expanded[3].clamp(y1 + 1, img_height as i32);

    let rect = CropRect {
        x: x1 as u32,
        y: y1 as u32,
        width: (x2 - x1) as u32,
        height: (y2 - y1) as u32,
    };

    (rect, expanded)
}

/// Crop a rectangle out of the image and resize it to `target` dimensions
/// using a downscale-friendly averaging filter.
pub fn crop_and_resize(img: &RgbImage, rect: CropRect, target: (u32, u32)) -> RgbImage {
    let crop = image::imageops::crop_imm(img, rect.x, rect.y, rect.width, rect.height).to_image();
    if (crop.width(), crop.height()) == target {
        return crop;
    }
    image::imageops::resize(&crop, target.0, target.1, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection {
            x,
            y,
            width: w,
            height: h,
            confidence: 1.0,
            landmarks: None,
        }
    }

    #[test]
    fn identity_landmarks_give_identity_transform() {
        let scale = 1.0;
        let pts: [(f32, f32); 5] =
            std::array::from_fn(|i| (REFERENCE_LANDMARKS_112[i].0 * scale, REFERENCE_LANDMARKS_112[i].1 * scale));
        let m = landmark_transform(&pts, 112).unwrap();

        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn double_scale_landmarks_halve_the_transform() {
        let src: [(f32, f32); 5] =
            std::array::from_fn(|i| (REFERENCE_LANDMARKS_112[i].0 * 2.0, REFERENCE_LANDMARKS_112[i].1 * 2.0));
        let m = landmark_transform(&src, 112).unwrap();
        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn coincident_landmarks_are_degenerate() {
        let src = [(50.0, 50.0); 5];
        assert!(landmark_transform(&src, 112).is_none());
    }

    #[test]
    fn warp_tracks_a_bright_patch_to_reference_position() {
        let mut img = RgbImage::new(200, 200);
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // 5x5 bright patch at the left-eye landmark.
        for dy in 0..5u32 {
            for dx in 0..5u32 {
                let px = 80 - 2 + dx;
                let py = 60 - 2 + dy;
                img.put_pixel(px, py, image::Rgb([255, 255, 255]));
            }
        }

        let m = landmark_transform(&src, 112).unwrap();
        let aligned = warp_similarity(&img, &m, 112);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as u32;

        let mut max_val = 0u8;
        for dy in 0..3u32 {
            for dx in 0..3u32 {
                let x = (ref_x - 1 + dx).min(111);
                let y = (ref_y - 1 + dy).min(111);
                max_val = max_val.max(aligned.get_pixel(x, y)[0]);
            }
        }
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_val}");
    }

    #[test]
    fn scale_one_crop_matches_tight_box() {
        let d = det(20.0, 30.0, 40.0, 50.0);
        let (rect, expanded) = expand_and_clamp(&d, 1.0, 200, 200);
        assert_eq!(rect, CropRect { x: 20, y: 30, width: 40, height: 50 });
        assert_eq!(expanded, [20, 30, 60, 80]);
    }

    #[test]
    fn scale_two_quadruples_area_when_unclamped() {
        let d = det(80.0, 80.0, 40.0, 40.0);
        let (rect, _) = expand_and_clamp(&d, 2.0, 400, 400);
        let area = rect.width * rect.height;
        assert_eq!(area, 4 * 40 * 40);
        // Still centered on the same spot.
        assert_eq!(rect.x + rect.width / 2, 100);
        assert_eq!(rect.y + rect.height / 2, 100);
    }

    #[test]
    fn expansion_clamps_at_image_edges_without_error() {
        let d = det(0.0, 0.0, 100.0, 100.0);
        let (rect, expanded) = expand_and_clamp(&d, 2.0, 120, 120);
        assert_eq!(rect, CropRect { x: 0, y: 0, width: 120, height: 120 });
        // The unclamped corners record the requested expansion.
        assert_eq!(expanded, [-50, -50, 150, 150]);
    }

    #[test]
    fn crop_and_resize_honors_target_dimensions() {
        let img = RgbImage::from_pixel(100, 80, image::Rgb([10, 20, 30]));
        let rect = CropRect { x: 10, y: 10, width: 50, height: 40 };
        let out = crop_and_resize(&img, rect, (32, 32));
        assert_eq!((out.width(), out.height()), (32, 32));
    }
}
