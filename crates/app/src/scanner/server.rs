//! Actix Web preview server: the display surface of the scanner.
//!
//! The server runs on a dedicated thread to keep the pipeline hot path free
//! from Actix runtime concerns. It surfaces the annotated live frame, a
//! small frame ring, scan/product JSON with an SSE stream, the scan history,
//! the cooldown reset control, and Prometheus metrics.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use serde::Deserialize;
use serde_json::to_string;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::scanner::{
    data::{FrameHistory, FramePacket, ScansResponse, SharedFrame, SharedHistory},
    hud, telemetry,
};

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) latest: SharedFrame,
    pub(crate) frames: FrameHistory,
    pub(crate) scan_log: SharedHistory,
    pub(crate) rescan: Arc<AtomicBool>,
}

#[derive(Default)]
/// Handle for the preview server thread.
pub(crate) struct PreviewServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PreviewServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

#[derive(Deserialize)]
struct FrameQuery {
    frame: Option<u64>,
}

/// Spawn the preview server thread and return a handle that can stop it.
/// Binding the port happens on the caller thread so an occupied port is a
/// startup error, not a background log line.
pub(crate) fn spawn_preview_server(
    latest: SharedFrame,
    frames: FrameHistory,
    scan_log: SharedHistory,
    rescan: Arc<AtomicBool>,
    port: u16,
) -> Result<PreviewServer> {
    let listener = std::net::TcpListener::bind(("0.0.0.0", port))
        .with_context(|| format!("failed to bind preview server on port {port}"))?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = telemetry::spawn_thread("scan-preview-server", move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(ServerState {
                        latest: latest.clone(),
                        frames: frames.clone(),
                        scan_log: scan_log.clone(),
                        rescan: rescan.clone(),
                    }))
                    .route("/", web::get().to(index_route))
                    .route("/frame.jpg", web::get().to(frame_handler))
                    .route("/stream.mjpg", web::get().to(stream_handler))
                    .route("/scans", web::get().to(scans_handler))
                    .route("/stream_scans", web::get().to(stream_scans_handler))
                    .route("/history", web::get().to(history_handler))
                    .route("/rescan", web::post().to(rescan_handler))
                    .route("/metrics", web::get().to(metrics_handler))
            })
            .listen(listener)?
            .run();

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn preview server thread")?;
    Ok(PreviewServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

/// Fetch the latest encoded frame from the shared pointer.
fn latest_frame(shared: &SharedFrame) -> Option<FramePacket> {
    match shared.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => None,
    }
}

/// Retrieve a buffered frame by sequence number.
fn history_frame(frames: &FrameHistory, frame_number: u64) -> Option<FramePacket> {
    match frames.lock() {
        Ok(buffer) => buffer
            .iter()
            .find(|packet| packet.frame_number == frame_number)
            .cloned(),
        Err(_) => None,
    }
}

/// Serve the HUD page.
async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(hud::HUD_INDEX_HTML)
}

/// Return a single JPEG frame by sequence number or the latest frame.
async fn frame_handler(
    query: web::Query<FrameQuery>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    if let Some(requested) = query.frame {
        if let Some(packet) = history_frame(&state.frames, requested) {
            return HttpResponse::Ok()
                .content_type("image/jpeg")
                .body(packet.jpeg);
        } else if let Some(latest) = latest_frame(&state.latest) {
            return HttpResponse::Ok()
                .append_header((
                    header::WARNING,
                    format!(
                        "299 scanlens \"frame {} not buffered; returning latest {}\"",
                        requested, latest.frame_number
                    ),
                ))
                .content_type("image/jpeg")
                .body(latest.jpeg);
        } else {
            return HttpResponse::NoContent().finish();
        }
    }

    match latest_frame(&state.latest) {
        Some(packet) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .body(packet.jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Stream the MJPEG feed over a multipart response.
async fn stream_handler(state: web::Data<ServerState>) -> HttpResponse {
    let state = state.clone();
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(Duration::from_millis(33));
        loop {
            interval.tick().await;
            let frame = state
                .latest
                .lock()
                .ok()
                .and_then(|guard| guard.clone());
            if let Some(packet) = frame {
                let mut payload = Vec::with_capacity(packet.jpeg.len() + 64);
                payload.extend_from_slice(b"--frame\r\n");
                payload.extend_from_slice(
                    format!("X-Sequence: {}\r\n", packet.frame_number).as_bytes(),
                );
                payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
                payload.extend_from_slice(&packet.jpeg);
                payload.extend_from_slice(b"\r\n");
                yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .streaming(stream)
}

/// Return the most recent scan snapshot as JSON.
async fn scans_handler(state: web::Data<ServerState>) -> HttpResponse {
    let guard = match state.latest.lock() {
        Ok(guard) => guard,
        Err(err) => return HttpResponse::InternalServerError().body(err.to_string()),
    };
    if let Some(ref packet) = *guard {
        HttpResponse::Ok().json(ScansResponse {
            timestamp_ms: packet.timestamp_ms,
            frame_number: packet.frame_number,
            fps: packet.fps,
            scans: &packet.scans,
            product: packet.product.as_ref(),
        })
    } else {
        HttpResponse::NoContent().finish()
    }
}

/// Stream scan snapshots as Server-Sent Events.
async fn stream_scans_handler(state: web::Data<ServerState>) -> HttpResponse {
    let state = state.clone();
    let stream = stream! {
        yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b"retry: 500\n\n"));
        let mut interval = actix_web::rt::time::interval(Duration::from_millis(250));
        loop {
            interval.tick().await;
            let snapshot = state
                .latest
                .lock()
                .ok()
                .and_then(|guard| guard.clone());
            if let Some(packet) = snapshot {
                let payload = ScansResponse {
                    timestamp_ms: packet.timestamp_ms,
                    frame_number: packet.frame_number,
                    fps: packet.fps,
                    scans: &packet.scans,
                    product: packet.product.as_ref(),
                };
                match to_string(&payload) {
                    Ok(json) => {
                        let mut sse_chunk = String::with_capacity(json.len() + 32);
                        sse_chunk.push_str("id: ");
                        sse_chunk.push_str(&packet.frame_number.to_string());
                        sse_chunk.push('\n');
                        sse_chunk.push_str("data: ");
                        sse_chunk.push_str(&json);
                        sse_chunk.push_str("\n\n");
                        yield Ok::<Bytes, actix_web::Error>(Bytes::from(sse_chunk));
                    }
                    Err(err) => {
                        let error_chunk = format!("event: error\ndata: {}\n\n", err);
                        yield Ok::<Bytes, actix_web::Error>(Bytes::from(error_chunk));
                    }
                }
            } else {
                yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b": keep-alive\n\n"));
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "text/event-stream"))
        .append_header(("Connection", "keep-alive"))
        .streaming(stream)
}

/// Return the full scan history as JSON.
async fn history_handler(state: web::Data<ServerState>) -> HttpResponse {
    let guard = match state.scan_log.lock() {
        Ok(guard) => guard,
        Err(err) => return HttpResponse::InternalServerError().body(err.to_string()),
    };
    HttpResponse::Ok().json(guard.entries())
}

/// Clear the cooldown map so the same code can be scanned again immediately.
async fn rescan_handler(state: web::Data<ServerState>) -> HttpResponse {
    state.rescan.store(true, Ordering::SeqCst);
    info!("rescan requested, cooldown will be cleared");
    HttpResponse::Accepted().body("rescan requested\n")
}

/// Render Prometheus metrics.
async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not initialised\n"),
    }
}
