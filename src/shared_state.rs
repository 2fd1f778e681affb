// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::Instant;

use parking_lot::Mutex;

use crate::buffer_pool::BufferPool;
use crate::frame_buffer::FrameBuffer;
use crate::scan_config::MarkerPolicy;
use crate::scan_engine::BitPattern;
use crate::scan_error::ScanError;
use crate::session_state::{Commit, ScanReport, SessionState};

struct Guarded {
    pool: BufferPool,
    session: SessionState,
}

/// The idle buffer set and the session bookkeeping behind one lock.
///
/// Shared (via Arc) by the orchestrator and all workers. Every method takes
/// the lock for a short, bounded critical section; nothing here ever runs
/// calibrate or decode while holding it.
pub struct SharedState {
    inner: Mutex<Guarded>,
    pool_size: usize,
}

impl SharedState {
    pub fn new(pool: BufferPool, session: SessionState) -> Self {
        let pool_size = pool.size();
        SharedState{inner: Mutex::new(Guarded{pool, session}), pool_size}
    }

    /// Withdraws an idle buffer, or None when the pool is starved.
    pub fn acquire(&self) -> Option<FrameBuffer> {
        self.inner.lock().pool.acquire()
    }

    /// Returns a buffer to the pool. Panics on a second release of the same
    /// buffer.
    pub fn release(&self, frame: FrameBuffer) {
        self.inner.lock().pool.release(frame);
    }

    pub fn pool_size(&self) -> usize { self.pool_size }

    pub fn idle_buffers(&self) -> usize {
        self.inner.lock().pool.idle()
    }

    /// (idle, checked out) buffer counts, read atomically.
    pub fn buffer_counts(&self) -> (usize, usize) {
        let locked = self.inner.lock();
        (locked.pool.idle(), locked.pool.checked_out())
    }

    /// True once every buffer is back in the pool.
    pub fn all_idle(&self) -> bool {
        self.inner.lock().pool.is_full()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.lock().session.is_terminated()
    }

    /// Records one processed frame. The acceptance timestamp is taken inside
    /// the critical section so timestamps are in commit order.
    pub fn commit(&self, result: Result<BitPattern, ScanError>, policy: MarkerPolicy)
                  -> Commit {
        let mut locked = self.inner.lock();
        let now = Instant::now();
        locked.session.commit(result, policy, now)
    }

    pub fn note_discarded(&self) {
        self.inner.lock().session.note_discarded();
    }

    /// Terminates the session because of `err`.
    pub fn abort(&self, err: ScanError) {
        self.inner.lock().session.abort(err);
    }

    pub(crate) fn take_fatal(&self) -> Option<ScanError> {
        self.inner.lock().session.take_fatal()
    }

    pub fn scans(&self) -> u64 {
        self.inner.lock().session.scans()
    }

    pub fn report(&self) -> ScanReport {
        self.inner.lock().session.report()
    }
}
