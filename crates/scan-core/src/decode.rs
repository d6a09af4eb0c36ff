//! Thin wrapper around the `rxing` multi-format reader.
//!
//! The pipeline feeds it one grayscale buffer per preprocessing variant.
//! Reader errors, including the "nothing found" case, are swallowed into an
//! empty detection list so a bad frame never takes down the loop.

use std::collections::HashMap;

use rxing::{DecodeHintType, DecodeHintValue, DecodingHintDictionary};
use tracing::trace;

use crate::symbology::Symbology;

/// A single decoded barcode observation from one image.
#[derive(Clone, Debug)]
pub struct Detection {
    pub text: String,
    pub symbology: Symbology,
    /// Result points reported by the reader: corner points for matrix codes,
    /// scan-line endpoints for linear ones.
    pub points: Vec<(f32, f32)>,
}

pub struct Decoder {
    try_harder: bool,
}

impl Decoder {
    pub fn new() -> Self {
        Self { try_harder: true }
    }

    /// Decode every barcode visible in a row-major grayscale buffer.
    pub fn decode_luma(&self, luma: Vec<u8>, width: u32, height: u32) -> Vec<Detection> {
        let mut hints: DecodingHintDictionary = HashMap::new();
        hints.insert(
            DecodeHintType::TRY_HARDER,
            DecodeHintValue::TryHarder(self.try_harder),
        );
        match rxing::helpers::detect_multiple_in_luma_with_hints(luma, width, height, &mut hints) {
            Ok(results) => results
                .iter()
                .map(|result| Detection {
                    text: result.getText().to_string(),
                    symbology: Symbology::from(result.getBarcodeFormat()),
                    points: result
                        .getRXingResultPoints()
                        .iter()
                        .map(|point| (point.x, point.y))
                        .collect(),
                })
                .collect(),
            Err(err) => {
                trace!("decode pass produced no result: {err}");
                Vec::new()
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULES_PER_SIDE_QUIET: usize = 9;
    const SCALE: usize = 4;

    /// Left odd-parity patterns for UPC/EAN digits; right patterns are the
    /// bitwise complements.
    const L_CODES: [u8; 10] = [
        0b0001101, 0b0011001, 0b0010011, 0b0111101, 0b0100011, 0b0110001, 0b0101111, 0b0111011,
        0b0110111, 0b0001011,
    ];

    fn push_bits(modules: &mut Vec<bool>, pattern: u8, bits: usize) {
        for shift in (0..bits).rev() {
            modules.push((pattern >> shift) & 1 == 1);
        }
    }

    /// Build an ideal square UPC-A image, black bars on white, full height.
    fn synthesize_upc_a(digits: &[u8; 12]) -> (Vec<u8>, u32) {
        let mut modules = Vec::with_capacity(95);
        push_bits(&mut modules, 0b101, 3);
        for &digit in &digits[..6] {
            push_bits(&mut modules, L_CODES[digit as usize], 7);
        }
        push_bits(&mut modules, 0b01010, 5);
        for &digit in &digits[6..] {
            push_bits(&mut modules, !L_CODES[digit as usize] & 0x7F, 7);
        }
        push_bits(&mut modules, 0b101, 3);
        assert_eq!(modules.len(), 95);

        let width = (modules.len() + 2 * MODULES_PER_SIDE_QUIET) * SCALE;
        let mut row = vec![255u8; width];
        for (index, &is_bar) in modules.iter().enumerate() {
            if is_bar {
                let start = (MODULES_PER_SIDE_QUIET + index) * SCALE;
                for pixel in &mut row[start..start + SCALE] {
                    *pixel = 0;
                }
            }
        }

        // Square canvas so the result is independent of axis order.
        let mut image = Vec::with_capacity(width * width);
        for _ in 0..width {
            image.extend_from_slice(&row);
        }
        (image, width as u32)
    }

    #[test]
    fn blank_image_yields_empty_list() {
        let decoder = Decoder::new();
        let side = 256u32;
        let blank = vec![255u8; (side * side) as usize];
        assert!(decoder.decode_luma(blank, side, side).is_empty());
    }

    #[test]
    fn decodes_known_upc_a_payload() {
        let decoder = Decoder::new();
        let digits = [0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 5];
        let (image, side) = synthesize_upc_a(&digits);
        let detections = decoder.decode_luma(image, side, side);

        assert_eq!(detections.len(), 1);
        let detection = &detections[0];
        // The reader may report the 12-digit UPC-A form or the 13-digit
        // EAN-13 form with a leading zero; both carry the same payload.
        assert!(
            detection.text == "012345678905" || detection.text == "0012345678905",
            "unexpected payload {:?}",
            detection.text
        );
        assert!(detection.symbology.is_linear());
        assert!(!detection.points.is_empty());
    }
}
