// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::Arc;
use std::thread;

use log::{debug, error, info, trace, warn};

use crate::buffer_pool::BufferPool;
use crate::diagnostics::DiagnosticSink;
use crate::frame_source::FrameSource;
use crate::scan_config::{CalibrationMode, ScanConfig};
use crate::scan_engine::{BinLayout, ScanEngine};
use crate::scan_error::ScanError;
use crate::session_state::{ScanReport, SessionState};
use crate::shared_state::SharedState;
use crate::worker::{Worker, WorkerContext};

/// One scanning run: a pool of `config.workers` buffers and as many worker
/// threads, fed by `source` from the caller's thread until
/// `config.target_scans` frames have been decoded.
///
/// Buffer `i` is only ever processed by worker `i`, so a worker can be busy
/// with at most one frame while the producer fills the others.
pub struct ScanSession<S: FrameSource> {
    config: ScanConfig,
    source: S,
    engine: ScanEngine,
    shared: Arc<SharedState>,
    diagnostics: Option<DiagnosticSink>,
}

impl<S: FrameSource> ScanSession<S> {
    /// Validates `config` against the source's frame dimensions and
    /// allocates the buffer pool. No thread is started until run().
    pub fn new(config: ScanConfig, source: S) -> Result<Self, ScanError> {
        let (width, height) = source.dimensions();
        config.validate((width, height)).map_err(ScanError::config)?;
        let diagnostics = match &config.diagnostics_dir {
            Some(dir) => Some(DiagnosticSink::new(dir.clone()).map_err(ScanError::config)?),
            None => None,
        };
        let pool = BufferPool::new(config.workers, width, height);
        let shared = Arc::new(SharedState::new(pool, SessionState::new(config.target_scans)));
        info!("{} at {}x{} {}; {} workers, {} scans",
              source.model(), width, height, source.capture_params().frame_rate,
              config.workers, config.target_scans);
        Ok(ScanSession{engine: ScanEngine::from_config(&config),
                       config, source, shared, diagnostics})
    }

    /// Live view of the pool and session counters, e.g. for a progress
    /// display on another thread.
    pub fn shared(&self) -> Arc<SharedState> { Arc::clone(&self.shared) }

    /// Runs the session to completion and closes the source.
    ///
    /// Returns the first fatal error if the session stopped early: a missing
    /// marker bar under MarkerPolicy::Abort, a capture failure, or a worker
    /// failure. Whatever the outcome, all workers have been joined and the
    /// source closed when this returns.
    pub fn run(mut self) -> Result<ScanReport, ScanError> {
        let session_layout = match self.config.calibration {
            CalibrationMode::PerFrame => None,
            CalibrationMode::Once => match self.calibrate_session() {
                Ok(layout) => Some(Arc::new(layout)),
                Err(e) => {
                    error!("session calibration failed: {}", e);
                    if let Err(close_err) = self.source.close() {
                        warn!("closing {} failed: {}", self.source.model(), close_err);
                    }
                    return Err(e);
                },
            },
        };

        let context = WorkerContext{shared: Arc::clone(&self.shared),
                                    engine: self.engine,
                                    session_layout,
                                    policy: self.config.on_missing_markers,
                                    diagnostics: self.diagnostics.clone(),
                                    wait_timeout: self.config.timing.worker_wait};
        let mut workers = Vec::with_capacity(self.config.workers);
        for index in 0..self.config.workers {
            match Worker::start(index, context.clone()) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    self.shared.abort(e);
                    break;
                },
            }
        }
        drop(context);

        if workers.len() == self.config.workers {
            if let Err(e) = self.produce(&workers) {
                error!("stopping: {}", e);
                self.shared.abort(e);
            }
        }
        let shutdown = self.shutdown(workers);

        let report = self.shared.report();
        if let Some(fatal) = self.shared.take_fatal() {
            error!("session failed after {}: {}", report, fatal);
            return Err(fatal);
        }
        shutdown?;
        info!("{}", report);
        Ok(report)
    }

    // Uses one pool buffer for a dedicated calibration capture, returning it
    // before any worker exists. Failure here is fatal regardless of the
    // missing-marker policy: without a layout no frame can be decoded.
    fn calibrate_session(&mut self) -> Result<BinLayout, ScanError> {
        let mut frame = loop {
            match self.shared.acquire() {
                Some(frame) => break frame,
                None => thread::sleep(self.config.timing.acquire_backoff),
            }
        };
        let result = match self.source.fill(&mut frame) {
            Ok(()) => {
                frame.mark_filled();
                self.engine.calibrate(frame.image())
            },
            Err(e) => Err(ScanError::capture("fill", e)),
        };
        if let (Ok(layout), Some(sink)) = (&result, &self.diagnostics) {
            sink.emit("bins", frame.image(), layout, None);
        }
        self.shared.release(frame);
        let layout = result?;
        info!("calibrated: markers at rows {} and {}, scan column {}",
              layout.top_marker(), layout.bottom_marker(), layout.scan_column());
        debug!("bin boundaries {:?}", layout.boundaries());
        Ok(layout)
    }

    // The producer loop. Returns once the session is terminated, or with the
    // error that should terminate it.
    fn produce(&mut self, workers: &[Worker]) -> Result<(), ScanError> {
        let backoff = self.config.timing.acquire_backoff;
        while !self.shared.is_terminated() {
            let Some(mut frame) = self.shared.acquire() else {
                trace!("all buffers busy");
                thread::sleep(backoff);
                continue;
            };
            if let Err(e) = self.source.fill(&mut frame) {
                self.shared.release(frame);
                return Err(ScanError::capture("fill", e));
            }
            frame.mark_filled();
            let slot = frame.slot();
            if let Err(frame) = workers[slot].signal(frame) {
                self.shared.release(frame);
                return Err(ScanError::WorkerLost{worker: slot});
            }
        }
        Ok(())
    }

    // Waits for every buffer to come back, stops the workers, reclaims frames
    // none of them took, joins them, then closes the source. Returns the
    // first join or close failure.
    fn shutdown(&mut self, workers: Vec<Worker>) -> Result<(), ScanError> {
        while !self.shared.all_idle() {
            // A worker that died mid-frame may never return its buffer.
            if workers.iter().any(|w| w.is_finished()) {
                let (idle, checked_out) = self.shared.buffer_counts();
                warn!("worker exited early; {} idle, {} checked out", idle, checked_out);
                break;
            }
            thread::sleep(self.config.timing.drain_poll);
        }
        for worker in &workers {
            worker.request_stop();
        }
        while !workers.iter().all(|w| w.is_finished()) {
            thread::sleep(self.config.timing.drain_poll);
        }
        // A worker that stopped before taking its last frame leaves it
        // queued; the pool gets it back here.
        for worker in &workers {
            while let Some(frame) = worker.reclaim() {
                debug!("reclaimed buffer {} from worker {}", frame.slot(), worker.index());
                self.shared.note_discarded();
                self.shared.release(frame);
            }
        }
        let mut result = Ok(());
        for worker in workers {
            let index = worker.index();
            if let Err(e) = worker.join() {
                error!("joining worker {}: {}", index, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        debug!("all workers joined");
        if let Err(e) = self.source.close() {
            let e = ScanError::capture("close", e);
            error!("{}", e);
            if result.is_ok() {
                result = Err(e);
            }
        }
        result
    }
}
