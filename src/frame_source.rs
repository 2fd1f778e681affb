// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::time::Duration;

use canonical_error::CanonicalError;

use crate::frame_buffer::FrameBuffer;

/// Frames per second requested from the capture device. Must be positive.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FrameRate(f64);

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} Hz", self.0)
    }
}

impl FrameRate {
    pub fn new(hz: f64) -> FrameRate {
        assert!(hz.is_finite());
        assert!(hz > 0.0);
        FrameRate(hz)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Time between successive frames.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.0)
    }
}

/// Settings a capture device is opened with.
#[derive(Copy, Clone, Debug)]
pub struct CaptureParams {
    /// (width, height) of each frame.
    pub resolution: (u32, u32),

    pub frame_rate: FrameRate,

    /// Shutter time per frame. A short exposure keeps the moving code
    /// sharp.
    pub exposure_duration: Duration,
}

impl Default for CaptureParams {
    // A narrow 16x300 strip at 30 Hz with a 15ms shutter is what the scanner
    // rig runs with.
    fn default() -> Self {
        CaptureParams{resolution: (16, 300),
                      frame_rate: FrameRate::new(30.0),
                      exposure_duration: Duration::from_millis(15)}
    }
}

/// FrameSource models an opened capture device that writes RGB frames into
/// caller-provided FrameBuffers. Opening the device is up to each
/// implementation (see select_source::open_source()); the scan session only
/// fills and closes.
pub trait FrameSource {
    /// Returns a string identifying what kind of source this is, e.g.
    /// "ImageSource".
    fn model(&self) -> String;

    /// Returns the (width, height) of every frame this source produces.
    /// FrameBuffers handed to fill() always have these dimensions.
    fn dimensions(&self) -> (u32, u32);

    /// The parameters the source is actually running with, which may differ
    /// from those requested at open time.
    fn capture_params(&self) -> CaptureParams;

    /// Writes the next frame into `frame`'s pixel grid, in place.
    /// This function blocks until the frame is available; the wait is
    /// related to the frame rate.
    /// Returns InvalidArgument if `frame` has the wrong dimensions. Any other
    /// error means the device is unusable.
    fn fill(&mut self, frame: &mut FrameBuffer) -> Result<(), CanonicalError>;

    /// Releases the device. Called once, after all workers have exited.
    /// Implementations should tolerate being closed more than once.
    fn close(&mut self) -> Result<(), CanonicalError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn model(&self) -> String { (**self).model() }
    fn dimensions(&self) -> (u32, u32) { (**self).dimensions() }
    fn capture_params(&self) -> CaptureParams { (**self).capture_params() }
    fn fill(&mut self, frame: &mut FrameBuffer) -> Result<(), CanonicalError> {
        (**self).fill(frame)
    }
    fn close(&mut self) -> Result<(), CanonicalError> { (**self).close() }
}
