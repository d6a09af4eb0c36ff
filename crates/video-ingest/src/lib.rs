//! Frame ingestion for the scanning pipeline.
//!
//! Two source families are supported: FFmpeg child processes decoding V4L
//! camera devices or video files into raw BGR8, and MJPEG byte streams
//! (HTTP or file) split on JPEG markers. Every reader runs on a background
//! thread and hands frames over a small bounded channel so a slow consumer
//! backpressures capture instead of ballooning memory.

mod ffmpeg;
mod mjpeg;
mod types;

pub use ffmpeg::{spawn_camera_reader, spawn_file_reader};
pub use mjpeg::spawn_mjpeg_reader;
pub use types::{CaptureError, Frame, FrameFormat};
