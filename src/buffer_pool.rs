// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use log::debug;

use crate::frame_buffer::{FrameBuffer, Owner};

/// Fixed set of pre-allocated FrameBuffers.
///
/// BufferPool itself is not synchronized. It lives inside SharedState, whose
/// single lock covers both the idle set and the session bookkeeping, so the
/// check-then-remove in acquire() can never race with another caller.
///
/// Invariant: idle() + checked_out() == size(). Buffers are never created
/// after construction and never dropped while the pool is alive.
pub struct BufferPool {
    idle: Vec<FrameBuffer>,

    // checked_out[slot] is true while the buffer for `slot` is away from the
    // pool. Used to catch a second release of the same buffer.
    checked_out: Vec<bool>,

    width: u32,
    height: u32,

    total_acquires: u64,
    total_releases: u64,
}

impl BufferPool {
    /// Allocates `size` buffers of `width` x `height` RGB pixels. Buffer slot
    /// `n` belongs to worker `n`.
    pub fn new(size: usize, width: u32, height: u32) -> Self {
        assert!(size > 0, "pool size must be > 0");
        let idle: Vec<FrameBuffer> =
            (0..size).map(|slot| FrameBuffer::new(slot, width, height)).collect();
        debug!("BufferPool created with {} buffers of {}x{}", size, width, height);
        BufferPool{idle,
                   checked_out: vec![false; size],
                   width, height,
                   total_acquires: 0,
                   total_releases: 0}
    }

    /// Removes one idle buffer, or returns None if all are checked out. Never
    /// blocks; the caller decides whether to back off and retry.
    pub fn acquire(&mut self) -> Option<FrameBuffer> {
        let mut frame = self.idle.pop()?;
        self.checked_out[frame.slot()] = true;
        frame.set_owner(Owner::Producer);
        self.total_acquires += 1;
        Some(frame)
    }

    /// Puts a buffer back into the idle set.
    ///
    /// # Panics
    /// If the buffer is already idle (a use-after-release defect) or does not
    /// belong to this pool.
    pub fn release(&mut self, mut frame: FrameBuffer) {
        let slot = frame.slot();
        assert!(slot < self.checked_out.len(),
                "buffer slot {} does not belong to this pool", slot);
        assert!(self.checked_out[slot],
                "buffer slot {} released twice", slot);
        assert_eq!(frame.dimensions(), (self.width, self.height),
                   "buffer slot {} was resized", slot);
        self.checked_out[slot] = false;
        frame.recycle();
        self.idle.push(frame);
        self.total_releases += 1;
        debug_assert_eq!(self.idle.len() + self.checked_out(), self.size());
    }

    pub fn idle(&self) -> usize { self.idle.len() }

    pub fn checked_out(&self) -> usize {
        self.checked_out.iter().filter(|c| **c).count()
    }

    pub fn size(&self) -> usize { self.checked_out.len() }

    /// True when every buffer is back in the pool.
    pub fn is_full(&self) -> bool { self.idle.len() == self.size() }

    /// (width, height) shared by all buffers.
    pub fn frame_dimensions(&self) -> (u32, u32) { (self.width, self.height) }

    pub fn total_acquires(&self) -> u64 { self.total_acquires }

    pub fn total_releases(&self) -> u64 { self.total_releases }
}
