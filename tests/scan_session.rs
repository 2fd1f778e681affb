// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use canonical_error::{CanonicalError, failed_precondition_error};
use image::{Rgb, RgbImage};

use g2scan::code_render::render_centered_code;
use g2scan::frame_buffer::FrameBuffer;
use g2scan::frame_source::{CaptureParams, FrameRate, FrameSource};
use g2scan::image_source::ImageSource;
use g2scan::scan_config::{CalibrationMode, MarkerPolicy, ScanColumn, ScanConfig,
                          SchedulerTiming};
use g2scan::scan_engine::BitPattern;
use g2scan::scan_error::ScanError;
use g2scan::scan_session::ScanSession;

const WIDTH: u32 = 16;
const HEIGHT: u32 = 300;

fn fast_params() -> CaptureParams {
    CaptureParams{frame_rate: FrameRate::new(1000.0), ..CaptureParams::default()}
}

fn fast_config(workers: usize, target_scans: u64) -> ScanConfig {
    ScanConfig{workers, target_scans,
               timing: SchedulerTiming{acquire_backoff: Duration::from_millis(1),
                                       worker_wait: Duration::from_millis(25),
                                       drain_poll: Duration::from_millis(2)},
               ..ScanConfig::default()}
}

fn code(pattern: &BitPattern) -> RgbImage {
    render_centered_code(WIDTH, HEIGHT, pattern).unwrap()
}

fn blank() -> RgbImage {
    RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([240, 240, 240]))
}

// Wraps a source, failing fill number `fail_on` and recording the close.
struct FlakySource {
    inner: ImageSource,
    fills: Arc<AtomicU64>,
    fail_on: u64,
    closed: Arc<AtomicBool>,
}

impl FrameSource for FlakySource {
    fn model(&self) -> String { "FlakySource".to_string() }
    fn dimensions(&self) -> (u32, u32) { self.inner.dimensions() }
    fn capture_params(&self) -> CaptureParams { self.inner.capture_params() }

    fn fill(&mut self, frame: &mut FrameBuffer) -> Result<(), CanonicalError> {
        let n = self.fills.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(failed_precondition_error("sensor disconnected"));
        }
        self.inner.fill(frame)
    }

    fn close(&mut self) -> Result<(), CanonicalError> {
        self.closed.store(true, Ordering::SeqCst);
        self.inner.close()
    }
}

#[test]
fn test_reaches_exactly_target() {
    let pattern = BitPattern::from_gray_position(0x5a5a5);
    for workers in [1, 2, 4, 8] {
        let source = ImageSource::new(code(&pattern), fast_params()).unwrap();
        let session = ScanSession::new(fast_config(workers, 25), source).unwrap();
        let shared = session.shared();
        let report = session.run().unwrap();

        assert_eq!(report.scans, 25);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.latest, Some(pattern));
        assert_eq!(shared.scans(), 25);
        assert!(shared.all_idle());
        assert_eq!(shared.buffer_counts(), (workers, 0));
        assert!(report.scan_rate().is_some());
    }
}

#[test]
fn test_skip_policy_ignores_blank_frames() {
    let pattern = BitPattern::from_gray_position(4096);
    let frames = vec![code(&pattern), blank(), blank(), code(&pattern)];
    let source = ImageSource::from_frames(frames, fast_params()).unwrap();
    let config = ScanConfig{on_missing_markers: MarkerPolicy::Skip, ..fast_config(3, 12)};
    let report = ScanSession::new(config, source).unwrap().run().unwrap();

    assert_eq!(report.scans, 12);
    assert!(report.skipped > 0);
    assert_eq!(report.latest, Some(pattern));
}

#[test]
fn test_abort_policy_fails_session() {
    let source = ImageSource::new(blank(), fast_params()).unwrap();
    let session = ScanSession::new(fast_config(2, 10), source).unwrap();
    let shared = session.shared();
    match session.run() {
        Err(ScanError::MarkersNotFound{column, top_found, bottom_found}) => {
            assert_eq!(column, 8);
            assert!(!top_found);
            assert!(!bottom_found);
        },
        other => panic!("expected MarkersNotFound, got {:?}", other),
    }
    assert_eq!(shared.scans(), 0);
    assert!(shared.is_terminated());
    assert!(shared.all_idle());
}

#[test]
fn test_capture_failure_closes_after_join() {
    let pattern = BitPattern::from_gray_position(3);
    let fills = Arc::new(AtomicU64::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    let source = FlakySource{
        inner: ImageSource::new(code(&pattern), fast_params()).unwrap(),
        fills: Arc::clone(&fills),
        fail_on: 3,
        closed: Arc::clone(&closed)};
    let session = ScanSession::new(fast_config(2, 1000), source).unwrap();
    let shared = session.shared();

    match session.run() {
        Err(ScanError::CaptureDeviceFailure{operation, message}) => {
            assert_eq!(operation, "fill");
            assert!(message.contains("sensor disconnected"));
        },
        other => panic!("expected CaptureDeviceFailure, got {:?}", other),
    }
    assert_eq!(fills.load(Ordering::SeqCst), 3);
    assert!(closed.load(Ordering::SeqCst));
    assert!(shared.all_idle());
    // Frames filled before the failure may or may not have been decoded, but
    // nothing after it.
    assert!(shared.scans() <= 2);
}

#[test]
fn test_calibrate_once_with_edge_column() {
    let pattern = BitPattern::from_gray_position(271828);
    let source = ImageSource::new(code(&pattern), fast_params()).unwrap();
    let config = ScanConfig{calibration: CalibrationMode::Once,
                            scan_column: ScanColumn::EdgeDetected,
                            ..fast_config(4, 20)};
    let report = ScanSession::new(config, source).unwrap().run().unwrap();
    assert_eq!(report.scans, 20);
    assert_eq!(report.latest, Some(pattern));
}

#[test]
fn test_calibrate_once_failure_is_fatal() {
    let closed = Arc::new(AtomicBool::new(false));
    let source = FlakySource{
        inner: ImageSource::new(blank(), fast_params()).unwrap(),
        fills: Arc::new(AtomicU64::new(0)),
        fail_on: 0,
        closed: Arc::clone(&closed)};
    let config = ScanConfig{calibration: CalibrationMode::Once,
                            on_missing_markers: MarkerPolicy::Skip,
                            ..fast_config(2, 5)};
    let result = ScanSession::new(config, source).unwrap().run();
    assert!(matches!(result, Err(ScanError::MarkersNotFound{..})));
    assert!(closed.load(Ordering::SeqCst));
}

#[test]
fn test_diagnostics_written() {
    let dir = tempfile::tempdir().unwrap();
    let pattern = BitPattern::from_gray_position(1234);
    let source = ImageSource::new(code(&pattern), fast_params()).unwrap();
    let config = ScanConfig{calibration: CalibrationMode::Once,
                            diagnostics_dir: Some(dir.path().to_path_buf()),
                            ..fast_config(2, 4)};
    let report = ScanSession::new(config, source).unwrap().run().unwrap();
    assert_eq!(report.scans, 4);

    assert!(dir.path().join("bins.bmp").is_file());
    for scan_number in 1..=4 {
        let path = dir.path().join(format!("{}.bmp", scan_number));
        assert!(path.is_file(), "missing {}", path.display());
    }
    assert!(!dir.path().join("5.bmp").exists());
}
