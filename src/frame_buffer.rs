// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::time::Instant;

use image::RgbImage;

/// Who currently has custody of a FrameBuffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Owner {
    /// Idle, sitting in the BufferPool.
    Pool,
    /// Withdrawn by the producer loop and being filled by the capture device.
    Producer,
    /// Handed to the worker with this index for calibrate/decode.
    Worker(usize),
}

/// One reusable frame of RGB pixel data (rows x columns x 3 channels).
///
/// FrameBuffers are allocated once when the BufferPool is built and are
/// recycled for the whole session. A FrameBuffer is neither Clone nor Copy;
/// custody passes between the pool, the producer and a worker by moving it.
pub struct FrameBuffer {
    // Index of the buffer within the pool; also the index of the worker that
    // processes frames captured into it.
    slot: usize,

    image: RgbImage,
    owner: Owner,

    // Filled by the capture device but not yet processed.
    dirty: bool,
    captured_at: Option<Instant>,
}

impl FrameBuffer {
    pub(crate) fn new(slot: usize, width: u32, height: u32) -> Self {
        FrameBuffer{slot,
                    image: RgbImage::new(width, height),
                    owner: Owner::Pool,
                    dirty: false,
                    captured_at: None}
    }

    pub fn slot(&self) -> usize { self.slot }

    pub fn owner(&self) -> Owner { self.owner }

    pub fn is_dirty(&self) -> bool { self.dirty }

    /// When the capture device finished filling this buffer, if it has been
    /// filled since it last left the pool.
    pub fn captured_at(&self) -> Option<Instant> { self.captured_at }

    /// (width, height) of the pixel grid.
    pub fn dimensions(&self) -> (u32, u32) { self.image.dimensions() }

    pub fn image(&self) -> &RgbImage { &self.image }

    /// Mutable pixel access for the capture device. The grid must not be
    /// resized; callers write in place.
    pub fn image_mut(&mut self) -> &mut RgbImage { &mut self.image }

    /// Called by the producer once the capture device has written a frame.
    pub fn mark_filled(&mut self) {
        self.dirty = true;
        self.captured_at = Some(Instant::now());
    }

    pub(crate) fn set_owner(&mut self, owner: Owner) {
        self.owner = owner;
    }

    // Returns the buffer to its idle condition; pixel data is left as is and
    // gets overwritten by the next capture.
    pub(crate) fn recycle(&mut self) {
        self.owner = Owner::Pool;
        self.dirty = false;
        self.captured_at = None;
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("slot", &self.slot)
            .field("dimensions", &self.image.dimensions())
            .field("owner", &self.owner)
            .field("dirty", &self.dirty)
            .finish()
    }
}
