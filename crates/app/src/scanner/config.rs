use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use scan_core::PreprocessConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Local V4L camera devices.
    Device,
    /// Video files or network URIs decoded by FFmpeg.
    File,
    /// MJPEG byte streams (HTTP or growing file).
    Mjpeg,
}

impl SourceKind {
    pub(crate) fn from_uri(uri: &str) -> Self {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            SourceKind::Mjpeg
        } else if uri.ends_with(".mjpg") || uri.ends_with(".mjpeg") {
            SourceKind::Mjpeg
        } else if uri.parse::<i32>().is_ok() || uri.starts_with("/dev/video") {
            SourceKind::Device
        } else {
            SourceKind::File
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub source: String,
    pub source_kind: SourceKind,
    pub width: i32,
    pub height: i32,
    pub cooldown: Duration,
    pub history_file: Option<PathBuf>,
    pub jpeg_quality: i32,
    pub offline: bool,
    pub port: u16,
    pub verbose: bool,
    pub preprocess: PreprocessConfig,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing and runtime inspection.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
}

const SCAN_USAGE: &str = "Usage: scanlens scan [--source <uri>] [--width <px>] [--height <px>] \
[--cooldown <seconds>] [--history-file <path>] [--jpeg-quality <1-100>] [--offline] \
[--threshold-block <odd px>] [--threshold-delta <n>] [--port <port>] \
[--chrome-trace <path>] [--verbose]\n\nPositional form is also supported: \
scan <uri> [...flags...]. The source defaults to /dev/video0; bare integers \
select a camera index, http(s) URLs are read as MJPEG streams, anything else \
is handed to FFmpeg as a video file.";

impl ScanConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut source: Option<String> = None;
        let mut width: Option<i32> = None;
        let mut height: Option<i32> = None;
        let mut cooldown_secs: Option<f64> = None;
        let mut history_file: Option<PathBuf> = None;
        let mut jpeg_quality: Option<i32> = None;
        let mut offline = false;
        let mut threshold_block: Option<usize> = None;
        let mut threshold_delta: Option<i32> = None;
        let mut port: Option<u16> = None;
        let mut chrome_trace_path: Option<PathBuf> = None;
        let mut verbose = false;
        let mut positional: Vec<String> = Vec::new();

        let mut idx = 2;
        while idx < args.len() {
            match args[idx].as_str() {
                "--help" | "-h" => {
                    bail!(SCAN_USAGE);
                }
                "--source" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--source requires a value"))?
                        .clone();
                    source = Some(value);
                    idx += 1;
                }
                "--width" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--width requires a value"))?
                        .parse::<i32>()
                        .with_context(|| "--width must be an integer".to_string())?;
                    if value <= 0 {
                        bail!("--width must be a positive integer");
                    }
                    width = Some(value);
                    idx += 1;
                }
                "--height" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--height requires a value"))?
                        .parse::<i32>()
                        .with_context(|| "--height must be an integer".to_string())?;
                    if value <= 0 {
                        bail!("--height must be a positive integer");
                    }
                    height = Some(value);
                    idx += 1;
                }
                "--cooldown" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--cooldown requires a value"))?
                        .parse::<f64>()
                        .with_context(|| "--cooldown must be a number of seconds".to_string())?;
                    if !value.is_finite() || value <= 0.0 {
                        bail!("--cooldown must be a positive number of seconds");
                    }
                    cooldown_secs = Some(value);
                    idx += 1;
                }
                "--history-file" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--history-file requires a value"))?
                        .clone();
                    history_file = Some(PathBuf::from(value));
                    idx += 1;
                }
                "--jpeg-quality" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--jpeg-quality requires a value"))?
                        .parse::<i32>()
                        .with_context(|| {
                            "--jpeg-quality must be an integer between 1 and 100".to_string()
                        })?;
                    if !(1..=100).contains(&value) {
                        bail!("--jpeg-quality must be an integer between 1 and 100");
                    }
                    jpeg_quality = Some(value);
                    idx += 1;
                }
                "--offline" => {
                    offline = true;
                    idx += 1;
                }
                "--threshold-block" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--threshold-block requires a value"))?
                        .parse::<usize>()
                        .with_context(|| {
                            "--threshold-block must be an odd integer >= 3".to_string()
                        })?;
                    threshold_block = Some(value);
                    idx += 1;
                }
                "--threshold-delta" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--threshold-delta requires a value"))?
                        .parse::<i32>()
                        .with_context(|| "--threshold-delta must be an integer".to_string())?;
                    threshold_delta = Some(value);
                    idx += 1;
                }
                "--port" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--port requires a value"))?
                        .parse::<u16>()
                        .with_context(|| "--port must be a port number".to_string())?;
                    port = Some(value);
                    idx += 1;
                }
                "--chrome-trace" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--chrome-trace requires a value"))?
                        .clone();
                    chrome_trace_path = Some(PathBuf::from(value));
                    idx += 1;
                }
                "--verbose" => {
                    verbose = true;
                    idx += 1;
                }
                arg if arg.starts_with('-') => {
                    bail!("Unrecognised flag: {arg}\n\n{SCAN_USAGE}");
                }
                other => {
                    positional.push(other.to_string());
                    idx += 1;
                }
            }
        }

        let mut positional = positional.into_iter();
        if source.is_none() {
            source = positional.next();
        }
        if let Some(extra) = positional.next() {
            bail!("Unexpected argument: {extra}\n\n{SCAN_USAGE}");
        }

        let source = source.unwrap_or_else(|| "/dev/video0".to_string());
        let source_kind = SourceKind::from_uri(&source);
        let width = width.unwrap_or(1280);
        let height = height.unwrap_or(720);
        let cooldown = Duration::from_secs_f64(cooldown_secs.unwrap_or(2.0));
        let jpeg_quality = jpeg_quality.unwrap_or(85);
        let port = port.unwrap_or(8080);

        let defaults = PreprocessConfig::default();
        let preprocess = PreprocessConfig {
            adaptive_block: threshold_block.unwrap_or(defaults.adaptive_block),
            adaptive_delta: threshold_delta.unwrap_or(defaults.adaptive_delta),
        };
        preprocess
            .validate()
            .with_context(|| "invalid preprocessing configuration".to_string())?;

        Ok(Self {
            source,
            source_kind,
            width,
            height,
            cooldown,
            history_file,
            jpeg_quality,
            offline,
            port,
            verbose,
            preprocess,
            telemetry: TelemetryOptions { chrome_trace_path },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(rest: &[&str]) -> Vec<String> {
        let mut all = vec!["scanlens".to_string(), "scan".to_string()];
        all.extend(rest.iter().map(|s| s.to_string()));
        all
    }

    #[test]
    fn defaults_without_flags() {
        let config = ScanConfig::from_args(&args(&[])).expect("parses");
        assert_eq!(config.source, "/dev/video0");
        assert_eq!(config.source_kind, SourceKind::Device);
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert_eq!(config.cooldown, Duration::from_secs(2));
        assert_eq!(config.jpeg_quality, 85);
        assert_eq!(config.port, 8080);
        assert!(!config.offline);
    }

    #[test]
    fn positional_source_is_accepted() {
        let config = ScanConfig::from_args(&args(&["clip.mp4", "--offline"])).expect("parses");
        assert_eq!(config.source, "clip.mp4");
        assert_eq!(config.source_kind, SourceKind::File);
        assert!(config.offline);
    }

    #[test]
    fn source_kind_inference() {
        assert_eq!(SourceKind::from_uri("0"), SourceKind::Device);
        assert_eq!(SourceKind::from_uri("/dev/video1"), SourceKind::Device);
        assert_eq!(
            SourceKind::from_uri("http://127.0.0.1:8080/stream.mjpg"),
            SourceKind::Mjpeg
        );
        assert_eq!(SourceKind::from_uri("capture.mjpeg"), SourceKind::Mjpeg);
        assert_eq!(SourceKind::from_uri("clip.mp4"), SourceKind::File);
    }

    #[test]
    fn rejects_even_threshold_block() {
        let err = ScanConfig::from_args(&args(&["--threshold-block", "8"]))
            .expect_err("even block must fail");
        assert!(format!("{err:?}").contains("preprocessing"));
    }

    #[test]
    fn rejects_zero_cooldown() {
        assert!(ScanConfig::from_args(&args(&["--cooldown", "0"])).is_err());
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(ScanConfig::from_args(&args(&["--bogus"])).is_err());
    }

    #[test]
    fn rejects_out_of_range_quality() {
        assert!(ScanConfig::from_args(&args(&["--jpeg-quality", "0"])).is_err());
        assert!(ScanConfig::from_args(&args(&["--jpeg-quality", "101"])).is_err());
    }
}
