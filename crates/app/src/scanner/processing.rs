//! Per-frame scanning: the preprocessing sweep, decoding of every variant,
//! and deduplication into renderable scan summaries.
//!
//! Trying several filtered variants of the same frame recovers codes the
//! plain grayscale pass misses; the same physical code then shows up once
//! per variant that managed to decode it, so results are deduplicated by
//! (symbology, payload) with the first-producing variant recorded.

use std::collections::HashSet;

use scan_core::{Decoder, Detection, Preprocessor, Symbology, bgr_to_luma};
use tracing::debug;
use video_ingest::{Frame, FrameFormat};

use crate::scanner::data::ScanSummary;

/// Linear codes only report scan-line endpoints; pad the box so the overlay
/// is visible around the bars.
const LINEAR_PAD_X: f32 = 4.0;
const LINEAR_PAD_Y: f32 = 12.0;

/// Decode every barcode visible in a captured frame.
pub(crate) fn scan_frame(
    preprocessor: &Preprocessor,
    decoder: &Decoder,
    frame: &Frame,
) -> Vec<ScanSummary> {
    if !matches!(frame.format, FrameFormat::Bgr8) {
        debug!("unsupported frame format, treating as no detections");
        return Vec::new();
    }

    let width = frame.width as usize;
    let height = frame.height as usize;
    let luma = bgr_to_luma(&frame.data);

    let mut seen = HashSet::new();
    let mut summaries = Vec::new();
    for variant in preprocessor.variants(&luma, width, height) {
        let detections =
            decoder.decode_luma(variant.data, frame.width as u32, frame.height as u32);
        collect_detections(
            &mut summaries,
            &mut seen,
            detections,
            variant.name,
            frame.width as f32,
            frame.height as f32,
        );
    }
    summaries
}

/// Fold one variant's detections into the frame result, skipping payloads
/// already produced by an earlier variant.
pub(crate) fn collect_detections(
    summaries: &mut Vec<ScanSummary>,
    seen: &mut HashSet<(Symbology, String)>,
    detections: Vec<Detection>,
    variant: &'static str,
    width: f32,
    height: f32,
) {
    for detection in detections {
        if !seen.insert((detection.symbology, detection.text.clone())) {
            continue;
        }
        summaries.push(summary_from_detection(detection, variant, width, height));
    }
}

pub(crate) fn summary_from_detection(
    detection: Detection,
    variant: &'static str,
    width: f32,
    height: f32,
) -> ScanSummary {
    let corners: Vec<[f32; 2]> = detection.points.iter().map(|&(x, y)| [x, y]).collect();

    let bbox = if corners.is_empty() {
        // No geometry from the reader; box the whole frame so the scan is
        // still visible on the preview.
        [0.0, 0.0, width - 1.0, height - 1.0]
    } else {
        let mut left = f32::INFINITY;
        let mut top = f32::INFINITY;
        let mut right = f32::NEG_INFINITY;
        let mut bottom = f32::NEG_INFINITY;
        for corner in &corners {
            left = left.min(corner[0]);
            right = right.max(corner[0]);
            top = top.min(corner[1]);
            bottom = bottom.max(corner[1]);
        }
        if detection.symbology.is_linear() {
            left -= LINEAR_PAD_X;
            right += LINEAR_PAD_X;
            top -= LINEAR_PAD_Y;
            bottom += LINEAR_PAD_Y;
        }
        [
            left.clamp(0.0, width - 1.0),
            top.clamp(0.0, height - 1.0),
            right.clamp(0.0, width - 1.0),
            bottom.clamp(0.0, height - 1.0),
        ]
    };

    ScanSummary {
        code: detection.text,
        symbology: detection.symbology,
        bbox,
        corners,
        variant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(text: &str, symbology: Symbology, points: Vec<(f32, f32)>) -> Detection {
        Detection {
            text: text.to_string(),
            symbology,
            points,
        }
    }

    #[test]
    fn linear_endpoints_become_a_padded_box() {
        let summary = summary_from_detection(
            detection(
                "012345678905",
                Symbology::UpcA,
                vec![(100.0, 200.0), (300.0, 200.0)],
            ),
            "grayscale",
            640.0,
            480.0,
        );
        assert_eq!(summary.bbox, [96.0, 188.0, 304.0, 212.0]);
        assert_eq!(summary.variant, "grayscale");
    }

    #[test]
    fn matrix_corners_become_their_extent() {
        let summary = summary_from_detection(
            detection(
                "https://example.com",
                Symbology::QrCode,
                vec![(10.0, 10.0), (90.0, 12.0), (88.0, 94.0), (12.0, 92.0)],
            ),
            "adaptive",
            640.0,
            480.0,
        );
        assert_eq!(summary.bbox, [10.0, 10.0, 90.0, 94.0]);
        assert_eq!(summary.corners.len(), 4);
    }

    #[test]
    fn boxes_are_clamped_to_the_frame() {
        let summary = summary_from_detection(
            detection("x", Symbology::Code128, vec![(2.0, 2.0), (638.0, 2.0)]),
            "otsu",
            640.0,
            480.0,
        );
        assert_eq!(summary.bbox[0], 0.0);
        assert_eq!(summary.bbox[1], 0.0);
        assert_eq!(summary.bbox[2], 639.0);
    }

    #[test]
    fn duplicate_payloads_across_variants_collapse() {
        let mut summaries = Vec::new();
        let mut seen = HashSet::new();
        collect_detections(
            &mut summaries,
            &mut seen,
            vec![detection("a", Symbology::QrCode, vec![(0.0, 0.0)])],
            "grayscale",
            640.0,
            480.0,
        );
        collect_detections(
            &mut summaries,
            &mut seen,
            vec![
                detection("a", Symbology::QrCode, vec![(1.0, 1.0)]),
                detection("b", Symbology::QrCode, vec![(2.0, 2.0)]),
            ],
            "adaptive",
            640.0,
            480.0,
        );
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].code, "a");
        assert_eq!(summaries[0].variant, "grayscale");
        assert_eq!(summaries[1].code, "b");
        assert_eq!(summaries[1].variant, "adaptive");
    }

    #[test]
    fn same_payload_different_symbology_is_kept() {
        let mut summaries = Vec::new();
        let mut seen = HashSet::new();
        collect_detections(
            &mut summaries,
            &mut seen,
            vec![
                detection("012345678905", Symbology::UpcA, vec![(0.0, 0.0)]),
                detection("012345678905", Symbology::QrCode, vec![(5.0, 5.0)]),
            ],
            "grayscale",
            640.0,
            480.0,
        );
        assert_eq!(summaries.len(), 2);
    }
}
