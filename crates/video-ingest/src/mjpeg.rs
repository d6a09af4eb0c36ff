use std::{fs::File, io::BufReader, io::Read, thread, time::Duration};

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use reqwest::blocking::Client;
use tracing::{info, warn};

use crate::types::{CaptureError, Frame, FrameFormat};

const CHUNK_SIZE: usize = 64 * 1024;
const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Spawns a background thread that reads an MJPEG stream (HTTP URL or a
/// growing file) and yields decoded BGR8 frames.
///
/// The reader reconnects after stream errors. A source that never produces a
/// frame is reported as unopenable after a handful of attempts.
pub fn spawn_mjpeg_reader(
    uri: &str,
    target_size: (i32, i32),
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let (tx, rx) = bounded(2);
    let uri = uri.to_string();

    thread::Builder::new()
        .name("mjpeg-reader".into())
        .spawn(move || run_stream_reader(&uri, target_size, tx))
        .map_err(|err| CaptureError::Other(err.into()))?;

    Ok(rx)
}

/// Connection attempts allowed before a source that has never produced a
/// frame is reported as unopenable.
const MAX_INITIAL_FAILURES: u32 = 5;

fn run_stream_reader(uri: &str, target_size: (i32, i32), tx: Sender<Result<Frame, CaptureError>>) {
    let is_http = uri.starts_with("http://") || uri.starts_with("https://");
    let client = if is_http {
        match Client::builder().build() {
            Ok(client) => Some(client),
            Err(err) => {
                let _ = tx.send(Err(CaptureError::Other(err.into())));
                return;
            }
        }
    } else {
        None
    };

    let mut connected_once = false;
    let mut failures = 0u32;

    loop {
        let opened = if let Some(client) = client.as_ref() {
            match client.get(uri).send() {
                Ok(response) if response.status().is_success() => {
                    info!("Connected to MJPEG stream {uri}");
                    Some(stream_frames(BufReader::new(response), target_size, &tx))
                }
                Ok(response) => {
                    warn!("MJPEG stream {uri} responded with status {}", response.status());
                    None
                }
                Err(err) => {
                    warn!("Waiting for MJPEG stream {uri}: {err}");
                    None
                }
            }
        } else {
            match File::open(uri) {
                Ok(file) => {
                    info!("Opened MJPEG stream {uri}");
                    Some(stream_frames(BufReader::new(file), target_size, &tx))
                }
                Err(err) => {
                    warn!("Waiting for MJPEG stream {uri}: {err}");
                    None
                }
            }
        };

        match opened {
            Some(false) => {
                // Receiver dropped, shut the reader down.
                return;
            }
            Some(true) => {
                connected_once = true;
                failures = 0;
            }
            None => {
                failures += 1;
                if !connected_once && failures >= MAX_INITIAL_FAILURES {
                    let _ = tx.send(Err(CaptureError::Open {
                        uri: uri.to_string(),
                    }));
                    return;
                }
                thread::sleep(REOPEN_DELAY);
            }
        }
    }
}

/// Read JPEG frames out of the byte stream until it ends. Returns false when
/// the consumer went away.
fn stream_frames<R: Read>(
    mut reader: R,
    target_size: (i32, i32),
    tx: &Sender<Result<Frame, CaptureError>>,
) -> bool {
    let mut buffer = Vec::with_capacity(CHUNK_SIZE * 2);
    let mut chunk = [0u8; CHUNK_SIZE];

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return true,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                while let Some(jpeg) = extract_frame(&mut buffer) {
                    match decode_frame(&jpeg, target_size) {
                        Ok(frame) => {
                            if tx.send(Ok(frame)).is_err() {
                                return false;
                            }
                        }
                        Err(err) => {
                            warn!("Failed to decode MJPEG frame ({} bytes): {err}", jpeg.len());
                        }
                    }
                }
            }
            Err(err) => {
                warn!("MJPEG read error: {err}");
                thread::sleep(REOPEN_DELAY);
                return true;
            }
        }
    }
}

fn decode_frame(jpeg: &[u8], target_size: (i32, i32)) -> Result<Frame> {
    let dynamic = image::load_from_memory(jpeg)?;
    let (target_w, target_h) = (target_size.0 as u32, target_size.1 as u32);
    let dynamic = if dynamic.width() != target_w || dynamic.height() != target_h {
        dynamic.resize_exact(target_w, target_h, image::imageops::FilterType::Triangle)
    } else {
        dynamic
    };
    let rgb = dynamic.into_rgb8();

    let mut data = Vec::with_capacity((target_w * target_h * 3) as usize);
    for pixel in rgb.pixels() {
        data.push(pixel[2]);
        data.push(pixel[1]);
        data.push(pixel[0]);
    }

    Ok(Frame {
        data,
        width: target_size.0,
        height: target_size.1,
        timestamp_ms: Utc::now().timestamp_millis(),
        format: FrameFormat::Bgr8,
    })
}

/// Cut the next complete JPEG (SOI..EOI) out of the accumulation buffer.
fn extract_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let start = match find_marker(buffer, &[0xFF, 0xD8]) {
        Some(start) => start,
        None => {
            // Multipart boundaries and headers without a start marker are
            // garbage; cap what we keep of them.
            if buffer.len() > CHUNK_SIZE {
                buffer.clear();
            }
            return None;
        }
    };
    if start > 0 {
        buffer.drain(..start);
    }

    let end = match find_marker(buffer, &[0xFF, 0xD9]) {
        Some(end) => end,
        None => {
            if buffer.len() > CHUNK_SIZE * 16 {
                buffer.clear();
            }
            return None;
        }
    };

    let frame_end = (end + 2).min(buffer.len());
    let frame = buffer[..frame_end].to_vec();
    buffer.drain(..frame_end);
    Some(frame)
}

fn find_marker(buffer: &[u8], marker: &[u8]) -> Option<usize> {
    buffer
        .windows(marker.len())
        .position(|window| window == marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_frame_and_keeps_tail() {
        let mut buffer = vec![0x00, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0xFF, 0xD8];
        let frame = extract_frame(&mut buffer).expect("frame");
        assert_eq!(frame, vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
        assert_eq!(buffer, vec![0xFF, 0xD8]);
    }

    #[test]
    fn incomplete_frame_is_left_buffered() {
        let mut buffer = vec![0xFF, 0xD8, 0x01, 0x02];
        assert!(extract_frame(&mut buffer).is_none());
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn garbage_before_soi_is_discarded() {
        let mut buffer = vec![0xAA, 0xBB, 0xFF, 0xD8, 0xFF, 0xD9];
        let frame = extract_frame(&mut buffer).expect("frame");
        assert_eq!(frame, vec![0xFF, 0xD8, 0xFF, 0xD9]);
        assert!(buffer.is_empty());
    }
}
