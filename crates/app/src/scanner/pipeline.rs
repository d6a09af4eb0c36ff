//! Pipeline supervisor tying together capture, scanning, product lookup,
//! history, and the preview server.
//!
//! Capture runs on its own thread behind a small bounded channel; everything
//! else happens in one synchronous loop: preprocess → decode → cooldown →
//! lookup → history → render → publish. A blocking lookup stalls the loop by
//! design, the channel backpressures capture meanwhile. The watchdog
//! requests a supervised restart when a stage stops heartbeating.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use crossbeam_channel::RecvTimeoutError;
use scan_core::{Decoder, Preprocessor};
use tracing::{debug, error, info, info_span, warn};
use video_ingest::CaptureError;

use crate::scanner::{
    ScanConfig, SourceKind,
    annotation::{ProductPanel, annotate_frame},
    cooldown::CooldownTracker,
    data::{FRAME_HISTORY_CAPACITY, FrameHistory, SharedFrame, SharedHistory},
    history::{HistoryEntry, HistoryLog},
    lookup::{LookupOutcome, ProductClient, ProductRecord},
    processing::scan_frame,
    server::spawn_preview_server,
    telemetry,
    watchdog::{HealthComponent, PipelineHealth, WatchdogState, spawn_watchdog},
};

/// Run the scanning pipeline, automatically restarting on recoverable
/// faults. Startup failures (camera missing, port occupied, bad filter
/// parameters) are fatal and propagate out.
pub fn run(config: ScanConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler({
            let handler_shutdown = handler_shutdown.clone();
            move || {
                handler_shutdown.store(true, Ordering::SeqCst);
            }
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    // The scan log outlives pipeline restarts.
    let scan_log: SharedHistory = Arc::new(Mutex::new(match config.history_file.as_deref() {
        Some(path) => HistoryLog::with_file(path)?,
        None => HistoryLog::in_memory(),
    }));

    let mut attempt: u32 = 0;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match run_pipeline_once(&config, shutdown.clone(), scan_log.clone())? {
            PipelineOutcome::Graceful => break,
            PipelineOutcome::Restart(reason) => {
                attempt = attempt.saturating_add(1);
                warn!("Pipeline requested restart (reason: {reason}), attempt #{attempt}");
                thread::sleep(Duration::from_secs(1));
            }
        }
    }

    if let Ok(log) = scan_log.lock() {
        info!("Scanner stopped. Total scans: {}", log.len());
    }
    Ok(())
}

/// Result of a single pipeline run attempt.
enum PipelineOutcome {
    Graceful,
    Restart(&'static str),
}

/// Execute the pipeline once, returning whether to exit or restart.
fn run_pipeline_once(
    config: &ScanConfig,
    shutdown: Arc<AtomicBool>,
    scan_log: SharedHistory,
) -> Result<PipelineOutcome> {
    if shutdown.load(Ordering::SeqCst) {
        return Ok(PipelineOutcome::Graceful);
    }

    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry);
    let _ = telemetry::init_metrics_recorder();
    let pipeline_span = info_span!(
        "scan.pipeline",
        source = %config.source,
        width = config.width,
        height = config.height,
        cooldown_ms = config.cooldown.as_millis() as u64,
        offline = config.offline,
    );
    let _pipeline_span_guard = pipeline_span.enter();

    let preprocessor =
        Preprocessor::new(config.preprocess).context("invalid preprocessing configuration")?;
    let decoder = Decoder::new();
    let product_client = if config.offline {
        info!("Product lookup disabled (--offline)");
        None
    } else {
        Some(ProductClient::from_env()?)
    };

    debug!(
        "Capture source: {} ({:?})",
        config.source, config.source_kind
    );

    let receiver = match config.source_kind {
        SourceKind::Device => {
            video_ingest::spawn_camera_reader(&config.source, (config.width, config.height))
                .with_context(|| "Failed to start camera capture".to_string())?
        }
        SourceKind::File => {
            video_ingest::spawn_file_reader(&config.source, (config.width, config.height))
                .with_context(|| "Failed to start file capture".to_string())?
        }
        SourceKind::Mjpeg => {
            video_ingest::spawn_mjpeg_reader(&config.source, (config.width, config.height))
                .with_context(|| "Failed to start MJPEG capture".to_string())?
        }
    };

    let shared: SharedFrame = Arc::new(Mutex::new(None));
    let frames: FrameHistory =
        Arc::new(Mutex::new(VecDeque::with_capacity(FRAME_HISTORY_CAPACITY)));
    let rescan = Arc::new(AtomicBool::new(false));

    let health = Arc::new(PipelineHealth::new());
    let pipeline_running = Arc::new(AtomicBool::new(true));
    let watchdog_state = Arc::new(WatchdogState::new());
    let watchdog_handle = spawn_watchdog(
        health.clone(),
        pipeline_running.clone(),
        shutdown.clone(),
        watchdog_state.clone(),
    );

    let preview_server = spawn_preview_server(
        shared.clone(),
        frames.clone(),
        scan_log.clone(),
        rescan.clone(),
        config.port,
    )
    .context("Failed to start preview server")?;

    info!(
        "HTTP preview available at http://127.0.0.1:{}/ (frame.jpg, stream.mjpg, scans)",
        config.port
    );
    if config.verbose {
        info!("Running scan pipeline — press Ctrl+C to stop");
    }

    let mut cooldown = CooldownTracker::new(config.cooldown);
    let mut last_product: Option<ProductRecord> = None;
    let mut last_missed: Option<String> = None;

    let mut frame_number: u64 = 0;
    let mut smoothed_fps: f32 = 0.0;
    let mut last_instant = Instant::now();
    let mut restart_reason: Option<&'static str> = None;
    let mut fatal_error: Option<anyhow::Error> = None;

    while pipeline_running.load(Ordering::Relaxed) {
        if shutdown.load(Ordering::Relaxed) {
            pipeline_running.store(false, Ordering::SeqCst);
            break;
        }

        // Bounded wait so watchdog restarts and Ctrl+C are honoured even
        // when the capture side stops delivering without closing the
        // channel.
        match receiver.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(frame)) => {
                frame_number = frame_number.wrapping_add(1);
                health.beat(HealthComponent::Capture);

                let now = Instant::now();
                let elapsed = now.duration_since(last_instant).as_secs_f32();
                last_instant = now;
                if elapsed > 0.0 {
                    let instant = 1.0 / elapsed;
                    smoothed_fps = if smoothed_fps == 0.0 {
                        instant
                    } else {
                        0.9 * smoothed_fps + 0.1 * instant
                    };
                    metrics::histogram!("scan_capture_frame_interval_seconds")
                        .record(elapsed as f64);
                }
                metrics::gauge!("scan_pipeline_fps").set(smoothed_fps as f64);

                if frame_number % 30 == 0 {
                    debug!(
                        "Capture heartbeat: frame #{}, {:.1} fps, ts={}",
                        frame_number, smoothed_fps, frame.timestamp_ms
                    );
                }

                if rescan.swap(false, Ordering::SeqCst) {
                    cooldown.reset();
                    info!("Cooldown cleared, ready to rescan");
                }

                let frame_span = info_span!("frame", frame = frame_number, ts = frame.timestamp_ms);
                let _frame_guard = frame_span.enter();

                let decode_start = Instant::now();
                let scans = scan_frame(&preprocessor, &decoder, &frame);
                metrics::histogram!("scan_stage_latency_seconds", "stage" => "decode")
                    .record(decode_start.elapsed().as_secs_f64());

                if !scans.is_empty() {
                    metrics::counter!("scan_detections_total").increment(scans.len() as u64);
                    if config.verbose {
                        debug!("frame #{frame_number}: {} detection(s)", scans.len());
                        for (idx, scan) in scans.iter().enumerate() {
                            debug!(
                                "  #{idx}: {} {} bbox={:?} via {}",
                                scan.symbology, scan.code, scan.bbox, scan.variant
                            );
                        }
                    }
                }

                for scan in &scans {
                    if !cooldown.should_process(&scan.key(), Instant::now()) {
                        metrics::counter!("scan_cooldown_suppressed_total").increment(1);
                        continue;
                    }

                    info!(
                        "Scanned {} {} (variant: {})",
                        scan.symbology.label(),
                        scan.code,
                        scan.variant
                    );
                    metrics::counter!("scan_accepted_total").increment(1);

                    let product = match &product_client {
                        Some(client) => {
                            let lookup_start = Instant::now();
                            let outcome = info_span!("lookup", code = %scan.code)
                                .in_scope(|| client.lookup(&scan.code));
                            metrics::histogram!("scan_stage_latency_seconds", "stage" => "lookup")
                                .record(lookup_start.elapsed().as_secs_f64());
                            match outcome {
                                LookupOutcome::Found(record) => {
                                    metrics::counter!("scan_lookups_total", "outcome" => "found")
                                        .increment(1);
                                    log_product(&record);
                                    Some(record)
                                }
                                LookupOutcome::NotFound => {
                                    metrics::counter!("scan_lookups_total", "outcome" => "miss")
                                        .increment(1);
                                    info!("No product data for {}", scan.code);
                                    None
                                }
                            }
                        }
                        None => None,
                    };

                    match &product {
                        Some(record) => {
                            last_product = Some(record.clone());
                            last_missed = None;
                        }
                        None => {
                            last_product = None;
                            last_missed = Some(scan.code.clone());
                        }
                    }

                    if let Ok(mut log) = scan_log.lock() {
                        log.append(HistoryEntry {
                            time: Utc::now(),
                            code: scan.code.clone(),
                            symbology: scan.symbology,
                            product,
                        });
                    }
                }

                let panel = match (&last_product, &last_missed) {
                    (Some(record), _) => Some(ProductPanel::Record(record)),
                    (None, Some(code)) => Some(ProductPanel::Unavailable(code)),
                    _ => None,
                };

                let render_start = Instant::now();
                match annotate_frame(
                    &frame,
                    frame_number,
                    smoothed_fps,
                    scans,
                    panel,
                    config.jpeg_quality,
                ) {
                    Ok(packet) => {
                        if let Ok(mut buffer) = frames.lock() {
                            buffer.push_back(packet.clone());
                            if buffer.len() > FRAME_HISTORY_CAPACITY {
                                buffer.pop_front();
                            }
                        }
                        if let Ok(mut guard) = shared.lock() {
                            *guard = Some(packet);
                        }
                    }
                    Err(err) => {
                        error!("Frame annotation error: {err:?}");
                    }
                }
                metrics::histogram!("scan_stage_latency_seconds", "stage" => "render")
                    .record(render_start.elapsed().as_secs_f64());

                health.beat(HealthComponent::Scanner);
            }
            Ok(Err(CaptureError::Open { uri })) => {
                fatal_error = Some(anyhow!(
                    "Could not access video source {uri:?}. Make sure the camera is connected and not in use."
                ));
                pipeline_running.store(false, Ordering::SeqCst);
                break;
            }
            Ok(Err(CaptureError::Eof { uri })) => {
                info!("Video source {uri:?} ended");
                pipeline_running.store(false, Ordering::SeqCst);
                break;
            }
            Ok(Err(err)) => {
                error!("Capture error: {err}");
                restart_reason = Some("capture error");
                pipeline_running.store(false, Ordering::SeqCst);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                error!("Frame channel closed");
                restart_reason = Some("capture channel closed");
                pipeline_running.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    debug!("Stopping scan pipeline");

    pipeline_running.store(false, Ordering::SeqCst);
    drop(receiver);
    let _ = watchdog_handle.join();
    preview_server.stop();

    if let Some(err) = fatal_error {
        return Err(err);
    }

    if watchdog_state.is_triggered() {
        let reason = watchdog_state
            .reason()
            .map(|component| component.label())
            .unwrap_or("watchdog");
        return Ok(PipelineOutcome::Restart(reason));
    }

    if let Some(reason) = restart_reason {
        return Ok(PipelineOutcome::Restart(reason));
    }

    Ok(PipelineOutcome::Graceful)
}

/// Mirror the product record into the log, the way the preview panel shows
/// it.
fn log_product(record: &ProductRecord) {
    info!(
        "Product: {}",
        record.name.as_deref().unwrap_or("(unnamed)")
    );
    if let Some(brand) = &record.brand {
        info!("  brand:    {brand}");
    }
    if let Some(category) = &record.category {
        info!("  category: {category}");
    }
    if let Some(origin) = &record.origin {
        info!("  origin:   {origin}");
    }
    if let Some(nutrition) = &record.nutrition {
        if let Some(energy) = nutrition.energy_kcal {
            info!("  energy:   {energy} kcal/100g");
        }
    }
    info!("  source:   {}", record.source);
}
