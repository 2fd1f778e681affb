// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use canonical_error::CanonicalError;
use thiserror::Error;

/// Failures of a scan session or of a single frame's calibrate/decode.
#[derive(Debug, Error)]
pub enum ScanError {
    /// No row in the scan column is darker than the marker threshold when
    /// scanning from the top and/or from the bottom.
    #[error("couldn't locate top/bottom marker bar in column {column} \
             (top found: {top_found}, bottom found: {bottom_found})")]
    MarkersNotFound { column: u32, top_found: bool, bottom_found: bool },

    /// The markers are so close together that nudging bin boundaries apart
    /// would run off the bottom of the frame.
    #[error("bin layout between rows {top} and {bottom} does not fit in {rows} rows")]
    DegenerateBinLayout { top: u32, bottom: u32, rows: u32 },

    #[error("capture device failed to {operation}: {message}")]
    CaptureDeviceFailure { operation: &'static str, message: String },

    #[error("invalid scan configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn worker {worker}: {source}")]
    WorkerSpawn { worker: usize, #[source] source: std::io::Error },

    /// A worker's signal channel is gone, so it can no longer take frames.
    #[error("worker {worker} is no longer accepting frames")]
    WorkerLost { worker: usize },

    #[error("worker {worker} panicked")]
    WorkerPanicked { worker: usize },
}

impl ScanError {
    pub fn capture(operation: &'static str, err: CanonicalError) -> Self {
        ScanError::CaptureDeviceFailure{operation, message: err.to_string()}
    }

    pub fn config(err: CanonicalError) -> Self {
        ScanError::InvalidConfig(err.to_string())
    }

    /// Errors that concern one frame only; everything else is about the
    /// session as a whole.
    pub fn is_frame_error(&self) -> bool {
        matches!(self, ScanError::MarkersNotFound{..} |
                       ScanError::DegenerateBinLayout{..})
    }
}
