// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;
use std::time::Duration;

use canonical_error::{CanonicalError, invalid_argument_error};

/// Which pixel column is sampled for luminance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScanColumn {
    Fixed(u32),
    /// Pick the column next to the strongest vertical edge in each
    /// calibrated frame.
    EdgeDetected,
}

/// How often bin boundaries are computed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CalibrationMode {
    /// Every frame is calibrated before it is decoded.
    PerFrame,
    /// One dedicated capture is calibrated before scanning starts and its
    /// layout is used for every subsequent frame.
    Once,
}

/// What a missing marker bar means for the session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MarkerPolicy {
    /// Stop issuing frames and fail the session with MarkersNotFound.
    Abort,
    /// Tally the frame as skipped and keep going; the scan count does not
    /// advance for it.
    Skip,
}

/// Polling intervals of the producer/worker handoff.
#[derive(Copy, Clone, Debug)]
pub struct SchedulerTiming {
    /// Producer sleep when no idle buffer is available.
    pub acquire_backoff: Duration,

    /// Upper bound on a worker's wait for its signal before it re-checks
    /// its stop flag.
    pub worker_wait: Duration,

    /// Orchestrator sleep while waiting for buffers to drain back at
    /// shutdown.
    pub drain_poll: Duration,
}

impl Default for SchedulerTiming {
    fn default() -> Self {
        SchedulerTiming{acquire_backoff: Duration::from_millis(5),
                        worker_wait: Duration::from_secs(1),
                        drain_poll: Duration::from_millis(100)}
    }
}

#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// Number of worker threads, and thus of frame buffers.
    pub workers: usize,

    /// The session ends once this many frames have been decoded.
    pub target_scans: u64,

    /// Rows with luminance below this are marker bar candidates.
    pub marker_threshold: f32,

    /// Bins with average luminance below this decode as 1.
    pub bit_threshold: f32,

    pub scan_column: ScanColumn,
    pub calibration: CalibrationMode,
    pub on_missing_markers: MarkerPolicy,

    /// When set, annotated frames are written here as BMP files.
    pub diagnostics_dir: Option<PathBuf>,

    pub timing: SchedulerTiming,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get()).unwrap_or(4);
        ScanConfig{workers,
                   target_scans: 30,
                   marker_threshold: 50.0,
                   bit_threshold: 95.0,
                   scan_column: ScanColumn::Fixed(8),
                   calibration: CalibrationMode::PerFrame,
                   on_missing_markers: MarkerPolicy::Abort,
                   diagnostics_dir: None,
                   timing: SchedulerTiming::default()}
    }
}

impl ScanConfig {
    /// Checks the configuration against the (width, height) of the frames
    /// the capture device produces.
    pub fn validate(&self, frame_dimensions: (u32, u32)) -> Result<(), CanonicalError> {
        let (width, height) = frame_dimensions;
        if self.workers < 1 {
            return Err(invalid_argument_error("workers must be at least 1"));
        }
        if self.target_scans < 1 {
            return Err(invalid_argument_error("target_scans must be at least 1"));
        }
        for (name, value) in [("marker_threshold", self.marker_threshold),
                              ("bit_threshold", self.bit_threshold)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid_argument_error(
                    format!("{} must be a positive number, got {}", name, value).as_str()));
            }
        }
        if width == 0 || height == 0 {
            return Err(invalid_argument_error(
                format!("frame dimensions {}x{} are empty", width, height).as_str()));
        }
        // 20 bins need 21 distinct boundary rows.
        if height < 21 {
            return Err(invalid_argument_error(
                format!("frame height {} is too small for 20 bins", height).as_str()));
        }
        if let ScanColumn::Fixed(column) = self.scan_column {
            if column >= width {
                return Err(invalid_argument_error(
                    format!("scan column {} outside frame width {}", column, width).as_str()));
            }
        }
        for (name, interval) in [("acquire_backoff", self.timing.acquire_backoff),
                                 ("worker_wait", self.timing.worker_wait),
                                 ("drain_poll", self.timing.drain_poll)] {
            if interval.is_zero() {
                return Err(invalid_argument_error(
                    format!("{} must be non-zero", name).as_str()));
            }
        }
        Ok(())
    }
}
