// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use image::RgbImage;
use log::{debug, error, info, warn};

use crate::diagnostics::DiagnosticSink;
use crate::frame_buffer::{FrameBuffer, Owner};
use crate::scan_config::MarkerPolicy;
use crate::scan_engine::{BinLayout, BitPattern, ScanEngine};
use crate::scan_error::ScanError;
use crate::session_state::Commit;
use crate::shared_state::SharedState;

/// Everything a worker thread needs, handed over at start().
#[derive(Clone)]
pub struct WorkerContext {
    pub shared: Arc<SharedState>,
    pub engine: ScanEngine,

    /// Layout from a session-level calibration. When None every frame is
    /// calibrated on its own.
    pub session_layout: Option<Arc<BinLayout>>,

    pub policy: MarkerPolicy,
    pub diagnostics: Option<DiagnosticSink>,

    /// Bound on each wait for a frame, so a stop request is noticed even if
    /// no frame ever arrives.
    pub wait_timeout: Duration,
}

impl WorkerContext {
    fn scan<'a>(&'a self, image: &RgbImage)
                -> Result<(Cow<'a, BinLayout>, BitPattern), ScanError> {
        let layout = match &self.session_layout {
            Some(layout) => Cow::Borrowed(layout.as_ref()),
            None => Cow::Owned(self.engine.calibrate(image)?),
        };
        let pattern = self.engine.decode(image, &layout);
        Ok((layout, pattern))
    }

    fn process(&self, index: usize, frame: &FrameBuffer) {
        if self.shared.is_terminated() {
            // Filled just before the session ended; not worth decoding.
            self.shared.note_discarded();
            debug!("worker {}: session over, dropping frame", index);
            return;
        }
        let (scanned, result) = match self.scan(frame.image()) {
            Ok((layout, pattern)) => (Some((layout, pattern)), Ok(pattern)),
            Err(err) => (None, Err(err)),
        };
        match self.shared.commit(result, self.policy) {
            Commit::Accepted{scan_number} => {
                if let Some((layout, pattern)) = scanned {
                    self.publish(index, scan_number, frame, &layout, &pattern);
                }
            },
            Commit::Skipped(err) => {
                warn!("worker {}: skipping frame: {}", index, err);
            },
            Commit::Aborted => {
                error!("worker {}: frame failure ends the session", index);
            },
            Commit::Discarded => {
                debug!("worker {}: session ended while decoding, result dropped", index);
            },
        }
    }

    // Logging and optional image export for an accepted frame. Runs after the
    // result is committed, outside the lock.
    fn publish(&self, index: usize, scan_number: u64, frame: &FrameBuffer,
               layout: &BinLayout, pattern: &BitPattern) {
        info!("scan {}: {}", scan_number, pattern);
        debug!("worker {}: scan {} column {} markers {}..{} bins {:?}",
               index, scan_number, layout.scan_column(), layout.top_marker(),
               layout.bottom_marker(), layout.boundaries());
        if let Some(sink) = &self.diagnostics {
            sink.emit(&scan_number.to_string(), frame.image(), layout, Some(pattern));
        }
    }
}

// Custody of a frame inside the worker loop. Dropping the lease returns the
// frame to the pool, on every exit path including unwinding.
struct Lease<'a> {
    shared: &'a SharedState,
    frame: Option<FrameBuffer>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.shared.release(frame);
        }
    }
}

fn run(index: usize, context: WorkerContext, signal: Receiver<FrameBuffer>,
       stop: Arc<AtomicBool>) {
    debug!("worker {} started", index);
    while !stop.load(Ordering::Acquire) {
        let frame = match signal.recv_timeout(context.wait_timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let lease = Lease{shared: &context.shared, frame: Some(frame)};
        if let Some(frame) = &lease.frame {
            context.process(index, frame);
        }
    }
    debug!("worker {} exiting", index);
}

/// Handle to a long-lived scan thread. Each worker processes the frames
/// captured into the pool buffer with the same index.
pub struct Worker {
    index: usize,
    signal: Sender<FrameBuffer>,
    // Second handle on the signal channel, for frames the thread never took.
    pending: Receiver<FrameBuffer>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn start(index: usize, context: WorkerContext) -> Result<Worker, ScanError> {
        // Capacity one: a worker owns exactly one buffer, so at most one
        // frame can be in flight to it.
        let (sender, receiver) = bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let pending = receiver.clone();
        let handle = thread::Builder::new()
            .name(format!("scan-worker-{}", index))
            .spawn(move || run(index, context, receiver, thread_stop))
            .map_err(|source| ScanError::WorkerSpawn{worker: index, source})?;
        Ok(Worker{index, signal: sender, pending, stop, handle: Some(handle)})
    }

    pub fn index(&self) -> usize { self.index }

    /// Hands a filled frame to this worker. If the worker cannot take it the
    /// frame comes back in the Err, still owned by the producer.
    pub fn signal(&self, mut frame: FrameBuffer) -> Result<(), FrameBuffer> {
        if self.is_finished() {
            return Err(frame);
        }
        frame.set_owner(Owner::Worker(self.index));
        match self.signal.try_send(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut frame = e.into_inner();
                frame.set_owner(Owner::Producer);
                Err(frame)
            },
        }
    }

    /// Asks the worker to exit after its current frame, if any.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Takes back a frame that was signalled but never picked up, e.g.
    /// because the worker stopped first. Only meaningful once is_finished().
    pub fn reclaim(&self) -> Option<FrameBuffer> {
        let mut frame = self.pending.try_recv().ok()?;
        frame.set_owner(Owner::Producer);
        Some(frame)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Waits for the thread to exit. Call request_stop() first.
    pub fn join(mut self) -> Result<(), ScanError> {
        match self.handle.take() {
            Some(handle) => handle.join()
                .map_err(|_| ScanError::WorkerPanicked{worker: self.index}),
            None => Ok(()),
        }
    }
}

/// We arrange to stop and join the thread when a Worker goes out of scope
/// without join() having been called.
impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.request_stop();
            if handle.join().is_err() {
                error!("worker {} panicked", self.index);
            }
        }
    }
}
