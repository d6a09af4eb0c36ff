//! Live barcode scanning pipeline: captures frames, decodes every barcode
//! variant sweep can surface, enriches accepted scans with product data, and
//! exposes annotated previews over HTTP.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: Orchestrates the capture → scan → lookup → render loop.
//! - `processing`: Per-frame preprocessing sweep and detection dedup.
//! - `cooldown`: Re-scan suppression window.
//! - `lookup`: Product-data providers and the retrying client.
//! - `history`: Append-only scan log with optional JSON-lines mirror.
//! - `annotation`: Drawing primitives and JPEG packaging.
//! - `server`: Actix Web preview endpoints.
//! - `watchdog`: Health monitoring for pipeline stages.
//! - `telemetry`: Tracing subscribers and the metrics recorder.
//! - `data`: Shared structs passed between stages.

/// Re-export pipeline settings so callers can configure runs without reaching
/// into submodules.
pub use config::{ScanConfig, SourceKind};
/// Launch the scanning pipeline with a ready-made configuration.
pub use pipeline::run;

pub(crate) mod annotation;
mod config;
pub(crate) mod cooldown;
pub(crate) mod data;
pub(crate) mod history;
mod hud;
pub(crate) mod lookup;
mod pipeline;
pub(crate) mod processing;
mod server;
pub(crate) mod telemetry;
mod watchdog;

pub fn run_from_args(args: &[String]) -> anyhow::Result<()> {
    let config = ScanConfig::from_args(args)?;
    run(config)
}
