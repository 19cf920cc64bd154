//! Statistical color transfer in CIE L*a*b*.
//!
//! Each channel of the source is rescaled to the reference's mean and
//! standard deviation. L*a*b* is perceptually uniform, so matching channel
//! statistics there shifts overall tone without hue artifacts.

use image::RgbImage;
use palette::{Clamp, FromColor, Lab, Srgb};

/// Guards against division by zero on flat-color images.
const STD_EPSILON: f32 = 1e-6;

struct ChannelStats {
    mean: [f32; 3],
    std: [f32; 3],
}

fn to_lab(img: &RgbImage) -> Vec<Lab> {
    img.pixels()
        .map(|p| {
            let srgb = Srgb::new(p[0], p[1], p[2]).into_format::<f32>();
            Lab::from_color(srgb)
        })
        .collect()
}

fn channel_stats(pixels: &[Lab]) -> ChannelStats {
    let n = pixels.len().max(1) as f32;

    let mut mean = [0.0f32; 3];
    for p in pixels {
        mean[0] += p.l;
        mean[1] += p.a;
        mean[2] += p.b;
    }
    for m in &mut mean {
        *m /= n;
    }

    let mut var = [0.0f32; 3];
    for p in pixels {
        let d = [p.l - mean[0], p.a - mean[1], p.b - mean[2]];
        for c in 0..3 {
            var[c] += d[c] * d[c];
        }
    }

    let std = [
        (var[0] / n).sqrt() + STD_EPSILON,
        (var[1] / n).sqrt() + STD_EPSILON,
        (var[2] / n).sqrt() + STD_EPSILON,
    ];

    ChannelStats { mean, std }
}

/// Rescale each L*a*b* channel of `source` to the reference's mean and
/// standard deviation, clamping the result to displayable sRGB.
pub fn lab_match(source: &RgbImage, reference: &RgbImage) -> RgbImage {
    let src_lab = to_lab(source);
    let ref_lab = to_lab(reference);

    let s = channel_stats(&src_lab);
    let r = channel_stats(&ref_lab);

    let mut out = RgbImage::new(source.width(), source.height());
    for (pixel, lab) in out.pixels_mut().zip(src_lab.iter()) {
        let l = (lab.l - s.mean[0]) / s.std[0] * r.std[0] + r.mean[0];
        let a = (lab.a - s.mean[1]) / s.std[1] * r.std[1] + r.mean[1];
        let b = (lab.b - s.mean[2]) / s.std[2] * r.std[2] + r.mean[2];

        let rgb = Srgb::from_color(Lab::new(l, a, b)).clamp();
        let (red, green, blue) = rgb.into_format::<u8>().into_components();
        *pixel = image::Rgb([red, green, blue]);
    }

    out
}
