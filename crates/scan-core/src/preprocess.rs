//! Frame preprocessing ahead of barcode decoding.
//!
//! Every filter is a pure function over a row-major grayscale buffer. The
//! preprocessor produces a fixed, ordered set of named variants per frame;
//! low-contrast or unevenly lit codes that the plain grayscale pass misses
//! are often recovered by the thresholded or sharpened variants.

use thiserror::Error;

/// Filter parameters. Validated once at startup; per-frame processing never
/// fails.
#[derive(Clone, Copy, Debug)]
pub struct PreprocessConfig {
    /// Side length of the adaptive-threshold neighbourhood, must be odd and
    /// at least 3.
    pub adaptive_block: usize,
    /// Constant subtracted from the neighbourhood mean before comparison.
    pub adaptive_delta: i32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            adaptive_block: 11,
            adaptive_delta: 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("adaptive threshold block size must be an odd number >= 3, got {0}")]
    InvalidBlockSize(usize),
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<(), PreprocessError> {
        if self.adaptive_block < 3 || self.adaptive_block % 2 == 0 {
            return Err(PreprocessError::InvalidBlockSize(self.adaptive_block));
        }
        Ok(())
    }
}

/// One named preprocessing output for a frame.
pub struct Variant {
    pub name: &'static str,
    pub data: Vec<u8>,
}

pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Result<Self, PreprocessError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Produce the variant set for one frame, fixed order. The grayscale
    /// input itself is the first variant.
    pub fn variants(&self, luma: &[u8], width: usize, height: usize) -> Vec<Variant> {
        debug_assert_eq!(luma.len(), width * height);
        vec![
            Variant {
                name: "grayscale",
                data: luma.to_vec(),
            },
            Variant {
                name: "blurred",
                data: box_blur(luma, width, height),
            },
            Variant {
                name: "adaptive",
                data: adaptive_threshold(
                    luma,
                    width,
                    height,
                    self.config.adaptive_block,
                    self.config.adaptive_delta,
                ),
            },
            Variant {
                name: "otsu",
                data: otsu_binarize(luma),
            },
            Variant {
                name: "equalized",
                data: equalize(luma),
            },
            Variant {
                name: "sharpened",
                data: sharpen(luma, width, height),
            },
        ]
    }
}

/// Convert a packed BGR8 buffer to grayscale using integer Rec.601 weights.
pub fn bgr_to_luma(bgr: &[u8]) -> Vec<u8> {
    let mut luma = Vec::with_capacity(bgr.len() / 3);
    for chunk in bgr.chunks_exact(3) {
        let b = chunk[0] as u32;
        let g = chunk[1] as u32;
        let r = chunk[2] as u32;
        luma.push(((77 * r + 150 * g + 29 * b) >> 8) as u8);
    }
    luma
}

/// 3x3 mean blur with edge replication.
pub fn box_blur(luma: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = vec![0u8; luma.len()];
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0u32;
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    let sy = clamp_index(y as i64 + dy, height);
                    let sx = clamp_index(x as i64 + dx, width);
                    sum += luma[sy * width + sx] as u32;
                }
            }
            out[y * width + x] = (sum / 9) as u8;
        }
    }
    out
}

/// Mean adaptive threshold: a pixel is white when it exceeds the mean of its
/// `block`-sized neighbourhood minus `delta`, black otherwise. Uses an
/// integral image so the cost is independent of the block size.
pub fn adaptive_threshold(
    luma: &[u8],
    width: usize,
    height: usize,
    block: usize,
    delta: i32,
) -> Vec<u8> {
    let mut integral = vec![0u64; (width + 1) * (height + 1)];
    for y in 0..height {
        let mut row_sum = 0u64;
        for x in 0..width {
            row_sum += luma[y * width + x] as u64;
            integral[(y + 1) * (width + 1) + (x + 1)] =
                integral[y * (width + 1) + (x + 1)] + row_sum;
        }
    }

    let radius = block / 2;
    let mut out = vec![0u8; luma.len()];
    for y in 0..height {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius + 1).min(height);
        for x in 0..width {
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius + 1).min(width);
            let count = ((y1 - y0) * (x1 - x0)) as u64;
            let sum = integral[y1 * (width + 1) + x1] + integral[y0 * (width + 1) + x0]
                - integral[y0 * (width + 1) + x1]
                - integral[y1 * (width + 1) + x0];
            let mean = (sum / count) as i32;
            let pixel = luma[y * width + x] as i32;
            out[y * width + x] = if pixel > mean - delta { 255 } else { 0 };
        }
    }
    out
}

/// Binarize with Otsu's globally optimal threshold.
pub fn otsu_binarize(luma: &[u8]) -> Vec<u8> {
    let threshold = otsu_threshold(luma);
    luma.iter()
        .map(|&p| if p >= threshold { 255 } else { 0 })
        .collect()
}

/// Calculate Otsu's threshold by maximising between-class variance.
pub fn otsu_threshold(luma: &[u8]) -> u8 {
    let mut histogram = [0u32; 256];
    for &pixel in luma {
        histogram[pixel as usize] += 1;
    }

    let total_pixels = luma.len() as f64;
    let mut max_variance = 0.0;
    let mut optimal_threshold = 128u8;

    for threshold in 0..=255u32 {
        let mut class1_pixels = 0u64;
        let mut class1_sum = 0u64;
        let mut class2_pixels = 0u64;
        let mut class2_sum = 0u64;

        for intensity in 0..=255u32 {
            let count = histogram[intensity as usize] as u64;
            if intensity < threshold {
                class1_pixels += count;
                class1_sum += count * intensity as u64;
            } else {
                class2_pixels += count;
                class2_sum += count * intensity as u64;
            }
        }

        if class1_pixels == 0 || class2_pixels == 0 {
            continue;
        }

        let class1_mean = class1_sum as f64 / class1_pixels as f64;
        let class2_mean = class2_sum as f64 / class2_pixels as f64;
        let weight1 = class1_pixels as f64 / total_pixels;
        let weight2 = class2_pixels as f64 / total_pixels;
        let variance = weight1 * weight2 * (class1_mean - class2_mean).powi(2);

        if variance > max_variance {
            max_variance = variance;
            optimal_threshold = threshold as u8;
        }
    }

    optimal_threshold
}

/// Global histogram equalization, stretching the used intensity range to the
/// full 0..=255 span.
pub fn equalize(luma: &[u8]) -> Vec<u8> {
    if luma.is_empty() {
        return Vec::new();
    }

    let mut histogram = [0u32; 256];
    for &pixel in luma {
        histogram[pixel as usize] += 1;
    }

    let mut cdf = [0u32; 256];
    let mut running = 0u32;
    for (value, count) in histogram.iter().enumerate() {
        running += count;
        cdf[value] = running;
    }

    let cdf_min = cdf
        .iter()
        .copied()
        .find(|&c| c > 0)
        .unwrap_or(0);
    let total = luma.len() as u64;
    if total == cdf_min as u64 {
        // Single-intensity image, nothing to spread.
        return luma.to_vec();
    }

    let mut map = [0u8; 256];
    for value in 0..256 {
        let numerator = (cdf[value].saturating_sub(cdf_min)) as u64 * 255;
        map[value] = (numerator / (total - cdf_min as u64)) as u8;
    }

    luma.iter().map(|&p| map[p as usize]).collect()
}

/// 3x3 sharpening kernel (center 9, neighbours -1) with edge replication.
pub fn sharpen(luma: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = vec![0u8; luma.len()];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0i32;
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    let sy = clamp_index(y as i64 + dy, height);
                    let sx = clamp_index(x as i64 + dx, width);
                    let weight = if dy == 0 && dx == 0 { 9 } else { -1 };
                    acc += weight * luma[sy * width + sx] as i32;
                }
            }
            out[y * width + x] = acc.clamp(0, 255) as u8;
        }
    }
    out
}

fn clamp_index(value: i64, len: usize) -> usize {
    value.clamp(0, len as i64 - 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_even_block() {
        let config = PreprocessConfig {
            adaptive_block: 10,
            adaptive_delta: 2,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_rejects_tiny_block() {
        let config = PreprocessConfig {
            adaptive_block: 1,
            adaptive_delta: 2,
        };
        assert!(config.validate().is_err());
        assert!(PreprocessConfig::default().validate().is_ok());
    }

    #[test]
    fn luma_weights() {
        // Pure white and pure black survive conversion.
        assert_eq!(bgr_to_luma(&[255, 255, 255]), vec![255]);
        assert_eq!(bgr_to_luma(&[0, 0, 0]), vec![0]);
        // Green dominates red dominates blue.
        let g = bgr_to_luma(&[0, 255, 0])[0];
        let r = bgr_to_luma(&[0, 0, 255])[0];
        let b = bgr_to_luma(&[255, 0, 0])[0];
        assert!(g > r && r > b);
    }

    #[test]
    fn otsu_splits_two_level_image() {
        let mut gray = vec![50u8; 50];
        gray.extend(vec![200u8; 50]);
        let binary = otsu_binarize(&gray);
        assert!(binary[..50].iter().all(|&p| p == 0));
        assert!(binary[50..].iter().all(|&p| p == 255));
    }

    #[test]
    fn adaptive_threshold_tracks_local_mean() {
        // A dark bar on a bright background goes black, background white.
        let width = 16;
        let height = 8;
        let mut gray = vec![220u8; width * height];
        for y in 0..height {
            for x in 6..10 {
                gray[y * width + x] = 30;
            }
        }
        let out = adaptive_threshold(&gray, width, height, 5, 2);
        assert_eq!(out[7 * width + 7], 0);
        assert_eq!(out[7 * width + 1], 255);
    }

    #[test]
    fn sharpen_is_identity_on_flat_regions() {
        let gray = vec![120u8; 64];
        assert_eq!(sharpen(&gray, 8, 8), gray);
    }

    #[test]
    fn blur_is_identity_on_flat_regions() {
        let gray = vec![77u8; 36];
        assert_eq!(box_blur(&gray, 6, 6), gray);
    }

    #[test]
    fn equalize_stretches_narrow_range() {
        let mut gray = vec![100u8; 32];
        gray.extend(vec![110u8; 32]);
        let out = equalize(&gray);
        assert!(out[..32].iter().all(|&p| p == 0));
        assert!(out[32..].iter().all(|&p| p == 255));
    }

    #[test]
    fn variant_set_is_fixed_and_ordered() {
        let preprocessor = Preprocessor::new(PreprocessConfig::default()).expect("valid config");
        let gray = vec![128u8; 16 * 16];
        let variants = preprocessor.variants(&gray, 16, 16);
        let names: Vec<_> = variants.iter().map(|v| v.name).collect();
        assert_eq!(
            names,
            [
                "grayscale",
                "blurred",
                "adaptive",
                "otsu",
                "equalized",
                "sharpened"
            ]
        );
        assert!(variants.iter().all(|v| v.data.len() == 256));
    }
}
