// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

// Fake capture device that replays fixed images. For testing and for running
// the scanner without camera hardware.

use std::path::Path;
use std::thread;
use std::time::Instant;

use canonical_error::{CanonicalError, failed_precondition_error,
                      invalid_argument_error, not_found_error};
use image::RgbImage;
use log::debug;

use crate::frame_buffer::FrameBuffer;
use crate::frame_source::{CaptureParams, FrameSource};

pub struct ImageSource {
    // Replayed in order, wrapping around.
    frames: Vec<RgbImage>,
    next: usize,

    params: CaptureParams,

    frame_id: u64,
    last_frame_time: Option<Instant>,
    closed: bool,
}

impl ImageSource {
    pub fn new(image: RgbImage, params: CaptureParams) -> Result<Self, CanonicalError> {
        Self::from_frames(vec![image], params)
    }

    /// All `frames` must have the same dimensions. The requested resolution
    /// is quietly replaced by the frames' own.
    pub fn from_frames(frames: Vec<RgbImage>, mut params: CaptureParams)
                       -> Result<Self, CanonicalError> {
        let Some(first) = frames.first() else {
            return Err(invalid_argument_error("ImageSource needs at least one frame"));
        };
        let dimensions = first.dimensions();
        if let Some(odd) = frames.iter().find(|f| f.dimensions() != dimensions) {
            return Err(invalid_argument_error(
                format!("frame dimensions {:?} differ from {:?}",
                        odd.dimensions(), dimensions).as_str()));
        }
        params.resolution = dimensions;
        Ok(ImageSource{frames, next: 0, params,
                       frame_id: 0,
                       last_frame_time: None,
                       closed: false})
    }

    /// Loads `path` (any format the image crate reads) as the frame to replay.
    pub fn open(path: &Path, params: CaptureParams) -> Result<Self, CanonicalError> {
        let image = match image::open(path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                return Err(not_found_error(
                    format!("could not load {}: {}", path.display(), e).as_str()));
            }
        };
        Self::new(image, params)
    }

    /// Number of frames delivered so far.
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl FrameSource for ImageSource {
    fn model(&self) -> String {
        "ImageSource".to_string()
    }

    fn dimensions(&self) -> (u32, u32) {
        self.params.resolution
    }

    fn capture_params(&self) -> CaptureParams {
        self.params
    }

    fn fill(&mut self, frame: &mut FrameBuffer) -> Result<(), CanonicalError> {
        if self.closed {
            return Err(failed_precondition_error("ImageSource is closed"));
        }
        if frame.dimensions() != self.params.resolution {
            return Err(invalid_argument_error(
                format!("frame buffer is {:?} but source produces {:?}",
                        frame.dimensions(), self.params.resolution).as_str()));
        }
        // Pace delivery like a camera running at the configured frame rate.
        if let Some(last) = self.last_frame_time {
            let next_frame_time = last + self.params.frame_rate.interval();
            let sleep_interval = next_frame_time.saturating_duration_since(Instant::now());
            if !sleep_interval.is_zero() {
                thread::sleep(sleep_interval);
            }
        }
        let source = &self.frames[self.next];
        frame.image_mut().copy_from_slice(source.as_raw());
        self.next = (self.next + 1) % self.frames.len();
        self.frame_id += 1;
        self.last_frame_time = Some(Instant::now());
        Ok(())
    }

    fn close(&mut self) -> Result<(), CanonicalError> {
        if !self.closed {
            debug!("ImageSource closed after {} frames", self.frame_id);
            self.closed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPool;
    use crate::frame_source::FrameRate;
    use image::Rgb;

    fn fast() -> CaptureParams {
        CaptureParams{frame_rate: FrameRate::new(1000.0), ..CaptureParams::default()}
    }

    #[test]
    fn test_replays_frames_in_order() {
        let a = RgbImage::from_pixel(4, 30, Rgb([1, 2, 3]));
        let b = RgbImage::from_pixel(4, 30, Rgb([9, 9, 9]));
        let mut source = ImageSource::from_frames(vec![a, b], fast()).unwrap();
        assert_eq!(source.dimensions(), (4, 30));

        let mut pool = BufferPool::new(1, 4, 30);
        let mut frame = pool.acquire().unwrap();
        for expected in [[1, 2, 3], [9, 9, 9], [1, 2, 3]] {
            source.fill(&mut frame).unwrap();
            assert_eq!(frame.image().get_pixel(3, 29).0, expected);
        }
        assert_eq!(source.frame_id(), 3);
        pool.release(frame);
    }

    #[test]
    fn test_rejects_wrong_dimensions() {
        let mut source = ImageSource::new(RgbImage::new(4, 30), fast()).unwrap();
        let mut pool = BufferPool::new(1, 5, 30);
        let mut frame = pool.acquire().unwrap();
        assert!(source.fill(&mut frame).is_err());
        pool.release(frame);
    }

    #[test]
    fn test_fill_after_close_fails() {
        let mut source = ImageSource::new(RgbImage::new(4, 30), fast()).unwrap();
        source.close().unwrap();
        source.close().unwrap();
        assert!(source.is_closed());
        let mut pool = BufferPool::new(1, 4, 30);
        let mut frame = pool.acquire().unwrap();
        assert!(source.fill(&mut frame).is_err());
        pool.release(frame);
    }

    #[test]
    fn test_mismatched_frames_rejected() {
        let frames = vec![RgbImage::new(4, 30), RgbImage::new(4, 31)];
        assert!(ImageSource::from_frames(frames, fast()).is_err());
        assert!(ImageSource::from_frames(vec![], fast()).is_err());
    }
}
