use std::{
    io::Read,
    process::{Child, Command, Stdio},
    thread,
};

use anyhow::{Result, anyhow};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::types::{CaptureError, Frame, FrameFormat};

/// Spawns an FFmpeg process reading a V4L camera device and yields BGR8
/// frames via a background thread.
///
/// The buffer is intentionally small to backpressure the capture loop when
/// downstream consumers fall behind.
pub fn spawn_camera_reader(
    uri: &str,
    target_size: (i32, i32),
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let device = if let Some(index) = parse_device_index(uri) {
        format!("/dev/video{index}")
    } else {
        uri.to_string()
    };
    let scale_arg = format!("scale={}:{}", target_size.0, target_size.1);

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-f")
        .arg("video4linux2")
        .arg("-framerate")
        .arg("30")
        .arg("-i")
        .arg(&device)
        .arg("-vf")
        .arg(&scale_arg)
        .arg("-pix_fmt")
        .arg("bgr24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-");

    spawn_ffmpeg_reader(cmd, uri, target_size, 2)
}

/// Spawns an FFmpeg process reading a video file or network URI, paced at
/// its native frame rate so the pipeline sees it like a live feed.
pub fn spawn_file_reader(
    uri: &str,
    target_size: (i32, i32),
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let scale_arg = format!("scale={}:{}", target_size.0, target_size.1);

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-re")
        .arg("-i")
        .arg(uri)
        .arg("-an")
        .arg("-vf")
        .arg(&scale_arg)
        .arg("-pix_fmt")
        .arg("bgr24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-");

    spawn_ffmpeg_reader(cmd, uri, target_size, 2)
}

/// Parse a `/dev/videoX` style URI or bare index and return the zero-based
/// index if present.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<i32>() {
                return Some(index);
            }
        }
    }
    None
}

fn spawn_ffmpeg_reader(
    mut cmd: Command,
    uri: &str,
    target_size: (i32, i32),
    queue_size: usize,
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let (tx, rx) = bounded(queue_size);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let mut child = cmd.spawn().map_err(|err| {
        CaptureError::Other(anyhow!("failed to launch ffmpeg for {uri}: {err}"))
    })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;

    let uri = uri.to_string();
    thread::Builder::new()
        .name("ffmpeg-reader".into())
        .spawn(move || {
            let tx_clone = tx.clone();
            match ffmpeg_loop(stdout, child, &uri, target_size, tx_clone) {
                Ok(()) => {}
                Err(err) => {
                    let _ = tx.send(Err(err));
                }
            }
        })
        .map_err(|err| CaptureError::Other(err.into()))?;

    Ok(rx)
}

fn ffmpeg_loop(
    mut stdout: impl Read,
    mut child: Child,
    uri: &str,
    target_size: (i32, i32),
    tx: Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let frame_bytes = (target_size.0 as usize) * (target_size.1 as usize) * 3;
    let mut buffer = vec![0u8; frame_bytes];
    let mut frames: u64 = 0;
    let mut result = Ok(());

    loop {
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                frames = frames.wrapping_add(1);
                let timestamp_ms = Utc::now().timestamp_millis();
                if tx
                    .send(Ok(Frame {
                        data: buffer.clone(),
                        width: target_size.0,
                        height: target_size.1,
                        timestamp_ms,
                        format: FrameFormat::Bgr8,
                    }))
                    .is_err()
                {
                    break;
                }
            }
            Err(err) => {
                // EOF before the first frame means the source never opened.
                result = if frames == 0 {
                    Err(CaptureError::Open {
                        uri: uri.to_string(),
                    })
                } else if err.kind() == std::io::ErrorKind::UnexpectedEof {
                    Err(CaptureError::Eof {
                        uri: uri.to_string(),
                    })
                } else {
                    Err(CaptureError::Other(err.into()))
                };
                break;
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_index_from_bare_number() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("3"), Some(3));
    }

    #[test]
    fn device_index_from_dev_path() {
        assert_eq!(parse_device_index("/dev/video2"), Some(2));
        assert_eq!(parse_device_index("/dev/video12"), Some(12));
    }

    #[test]
    fn non_device_uris_have_no_index() {
        assert_eq!(parse_device_index("clip.mp4"), None);
        assert_eq!(parse_device_index("/dev/videoX"), None);
        assert_eq!(parse_device_index("http://host/stream.mjpg"), None);
    }
}
