use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use scan_core::Symbology;
use serde::Serialize;

use crate::scanner::{history::HistoryLog, lookup::ProductRecord};

pub(crate) const FRAME_HISTORY_CAPACITY: usize = 64;

#[derive(Clone)]
pub(crate) struct FramePacket {
    pub(crate) jpeg: Vec<u8>,
    pub(crate) scans: Vec<ScanSummary>,
    pub(crate) product: Option<ProductRecord>,
    pub(crate) timestamp_ms: i64,
    pub(crate) frame_number: u64,
    pub(crate) fps: f32,
}

#[derive(Clone, Serialize)]
pub(crate) struct ScanSummary {
    pub(crate) code: String,
    pub(crate) symbology: Symbology,
    /// Axis-aligned box `[left, top, right, bottom]` in frame pixels.
    pub(crate) bbox: [f32; 4],
    /// Raw result points reported by the decoder.
    pub(crate) corners: Vec<[f32; 2]>,
    /// Preprocessing variant that produced the decode.
    pub(crate) variant: &'static str,
}

impl ScanSummary {
    /// Cooldown and dedup key: the payload qualified by its symbology, so a
    /// QR code carrying an EAN payload is tracked separately.
    pub(crate) fn key(&self) -> String {
        format!("{}:{}", self.symbology.label(), self.code)
    }
}

#[derive(Serialize)]
pub(crate) struct ScansResponse<'a> {
    pub(crate) timestamp_ms: i64,
    pub(crate) frame_number: u64,
    pub(crate) fps: f32,
    pub(crate) scans: &'a [ScanSummary],
    pub(crate) product: Option<&'a ProductRecord>,
}

pub(crate) type SharedFrame = Arc<Mutex<Option<FramePacket>>>;
pub(crate) type FrameHistory = Arc<Mutex<VecDeque<FramePacket>>>;
pub(crate) type SharedHistory = Arc<Mutex<HistoryLog>>;
