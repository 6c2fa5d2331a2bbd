//! Pixel-diff computation between two decoded images (spec §4.3 step 3,
//! §4.4 "Combined metric contract").
//!
//! Grounded on `store_attachment` (`mcp-agent-mail-storage::lib`) for the
//! `image` crate decode/encode idiom (`image::load_from_memory`,
//! `GenericImageView`, RGBA8 buffers, PNG output).

use image::{GenericImageView, ImageEncoder, Rgba, RgbaImage};
use pixeltriage_core::DiffMetrics;

/// `rms(v[4]) = sqrt(sum(v_i^2)/4)` (spec §4.4).
#[must_use]
pub fn rms(v: &[u8; 4]) -> f64 {
    let sum_sq: f64 = v.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
    (sum_sq / 4.0).sqrt()
}

/// `combinedMetric = sqrt(pixelDiffPercent * rms(maxRGBA) / 255)`. An
/// empty `maxRGBA` (no comparable pixels) is maximally different: 1.0
/// (spec §4.4, tested by §8's three quantified cases).
#[must_use]
pub fn combined_metric(pixel_diff_percent: f64, max_rgba: &[u8]) -> f64 {
    if max_rgba.is_empty() {
        return 1.0;
    }
    let arr: [u8; 4] = [
        max_rgba.first().copied().unwrap_or(0),
        max_rgba.get(1).copied().unwrap_or(0),
        max_rgba.get(2).copied().unwrap_or(0),
        max_rgba.get(3).copied().unwrap_or(0),
    ];
    (pixel_diff_percent * rms(&arr) / 255.0).sqrt()
}

/// Decodes a PNG from bytes. Thin wrapper so callers produce a uniform
/// decode-failure error regardless of which `image` error variant fired.
pub fn decode(bytes: &[u8]) -> Result<image::DynamicImage, image::ImageError> {
    image::load_from_memory(bytes)
}

/// Result of comparing two decoded images: the populated `DiffMetrics`
/// (minus `diff_image_path`, filled in by the caller once the PNG is
/// written) plus the encoded diff-visualization PNG bytes.
pub struct DiffResult {
    pub metrics: DiffMetrics,
    pub diff_png: Vec<u8>,
}

/// Computes per-pixel RGBA differences between `a` and `b`. Differing
/// dimensions are handled by comparing the overlapping region and setting
/// `dim_differ = true`; every pixel outside the overlap counts as
/// differing.
#[must_use]
pub fn compute(a: &image::DynamicImage, b: &image::DynamicImage) -> DiffResult {
    let (aw, ah) = a.dimensions();
    let (bw, bh) = b.dimensions();
    let dim_differ = aw != bw || ah != bh;
    let out_w = aw.max(bw);
    let out_h = ah.max(bh);

    let a_rgba = a.to_rgba8();
    let b_rgba = b.to_rgba8();

    let mut diff_image = RgbaImage::new(out_w, out_h);
    let mut num_diff_pixels: u64 = 0;
    let mut max_rgba = [0u8; 4];

    for y in 0..out_h {
        for x in 0..out_w {
            let pa = if x < aw && y < ah { *a_rgba.get_pixel(x, y) } else { Rgba([0, 0, 0, 0]) };
            let pb = if x < bw && y < bh { *b_rgba.get_pixel(x, y) } else { Rgba([0, 0, 0, 0]) };

            let mut channel_diff = [0u8; 4];
            let mut differs = false;
            for c in 0..4 {
                let d = pa.0[c].abs_diff(pb.0[c]);
                channel_diff[c] = d;
                if d > 0 {
                    differs = true;
                }
                max_rgba[c] = max_rgba[c].max(d);
            }
            if differs {
                num_diff_pixels += 1;
            }
            diff_image.put_pixel(x, y, Rgba(channel_diff));
        }
    }

    let total_pixels = u64::from(out_w) * u64::from(out_h);
    let pixel_diff_percent =
        if total_pixels == 0 { 0.0 } else { (num_diff_pixels as f64 / total_pixels as f64) * 100.0 };

    let metric = combined_metric(pixel_diff_percent, &max_rgba);

    let mut diff_png = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut diff_png);
    let _ = encoder.write_image(diff_image.as_raw(), out_w, out_h, image::ExtendedColorType::Rgba8);

    DiffResult {
        metrics: DiffMetrics {
            pixel_diff_percent,
            max_rgba_diffs: max_rgba,
            num_diff_pixels,
            dim_differ,
            combined_metric: metric,
            diff_image_path: String::new(),
        },
        diff_png,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_metric_of_identical_images_is_zero() {
        assert!((combined_metric(0.0, &[]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn combined_metric_matches_spec_examples() {
        assert!((combined_metric(0.0, &[]) - 1.0).abs() < 1e-9);
        assert!((combined_metric(1.0, &[255, 255, 255, 255]) - 1.0).abs() < 1e-9);
        let got = combined_metric(0.5, &[255, 255, 255, 255]);
        assert!((got - 0.5_f64.sqrt()).abs() < 1e-9, "got={got}");
    }

    #[test]
    fn identical_images_produce_zero_diff() {
        let img = image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255])));
        let result = compute(&img, &img);
        assert_eq!(result.metrics.num_diff_pixels, 0);
        assert!((result.metrics.pixel_diff_percent - 0.0).abs() < 1e-9);
        assert!(!result.metrics.dim_differ);
    }

    #[test]
    fn fully_differing_images_reach_max_metric() {
        let a = image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])));
        let b = image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255])));
        let result = compute(&a, &b);
        assert_eq!(result.metrics.num_diff_pixels, 4);
        assert!((result.metrics.pixel_diff_percent - 100.0).abs() < 1e-9);
        assert!((result.metrics.combined_metric - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_dimensions_are_flagged() {
        let a = image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])));
        let b = image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 2, Rgba([0, 0, 0, 255])));
        let result = compute(&a, &b);
        assert!(result.metrics.dim_differ);
    }
}
