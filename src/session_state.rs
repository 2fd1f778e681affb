// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::time::{Duration, Instant};

use crate::scan_config::MarkerPolicy;
use crate::scan_engine::BitPattern;
use crate::scan_error::ScanError;

/// What SessionState::commit() did with one processed frame.
#[derive(Debug)]
pub enum Commit {
    /// Counted; `scan_number` is 1-based.
    Accepted { scan_number: u64 },
    /// Frame-level failure tallied as a skip.
    Skipped(ScanError),
    /// The failure ended the session.
    Aborted,
    /// The session had already terminated; the frame was not counted.
    Discarded,
}

// Up-front room in the timestamp log; longer sessions grow it on demand.
const INITIAL_SCAN_TIMES: u64 = 4096;

/// Progress of a scan session. Only ever touched under SharedState's lock.
///
/// The scan count never exceeds `max_scans`; once it reaches it the session
/// is terminated for good.
#[derive(Debug)]
pub struct SessionState {
    max_scans: u64,
    scans: u64,

    // One entry per accepted frame, in acceptance order.
    scan_times: Vec<Instant>,

    terminated: bool,

    // Last-write-wins; no ordering beyond "most recently committed".
    latest: Option<BitPattern>,

    skipped: u64,
    discarded: u64,

    // Why the session stopped early, if it did.
    fatal: Option<ScanError>,

    started: Instant,
}

impl SessionState {
    pub fn new(max_scans: u64) -> Self {
        assert!(max_scans > 0);
        SessionState{max_scans,
                     scans: 0,
                     scan_times: Vec::with_capacity(
                         max_scans.min(INITIAL_SCAN_TIMES) as usize),
                     terminated: false,
                     latest: None,
                     skipped: 0,
                     discarded: 0,
                     fatal: None,
                     started: Instant::now()}
    }

    pub fn is_terminated(&self) -> bool { self.terminated }

    pub fn scans(&self) -> u64 { self.scans }

    pub fn max_scans(&self) -> u64 { self.max_scans }

    pub fn skipped(&self) -> u64 { self.skipped }

    pub fn discarded(&self) -> u64 { self.discarded }

    pub fn latest(&self) -> Option<BitPattern> { self.latest }

    pub fn scan_times(&self) -> &[Instant] { &self.scan_times }

    /// Records the outcome of one processed frame.
    pub fn commit(&mut self, result: Result<BitPattern, ScanError>,
                  policy: MarkerPolicy, now: Instant) -> Commit {
        if self.terminated {
            self.discarded += 1;
            return Commit::Discarded;
        }
        match result {
            Ok(pattern) => {
                self.scans += 1;
                self.scan_times.push(now);
                self.latest = Some(pattern);
                if self.scans >= self.max_scans {
                    self.terminated = true;
                }
                Commit::Accepted{scan_number: self.scans}
            },
            Err(err @ ScanError::MarkersNotFound{..}) if policy == MarkerPolicy::Abort => {
                self.abort(err);
                Commit::Aborted
            },
            Err(err) if err.is_frame_error() => {
                self.skipped += 1;
                Commit::Skipped(err)
            },
            Err(err) => {
                self.abort(err);
                Commit::Aborted
            },
        }
    }

    /// Frame handed to a worker after the session had terminated.
    pub fn note_discarded(&mut self) {
        self.discarded += 1;
    }

    /// Stops the session with `err` as its cause. The first cause wins.
    pub fn abort(&mut self, err: ScanError) {
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
        self.terminated = true;
    }

    pub(crate) fn take_fatal(&mut self) -> Option<ScanError> {
        self.fatal.take()
    }

    pub fn report(&self) -> ScanReport {
        let elapsed = match (self.scan_times.first(), self.scan_times.last()) {
            (Some(first), Some(last)) => last.duration_since(*first),
            _ => Duration::ZERO,
        };
        ScanReport{scans: self.scans,
                   skipped: self.skipped,
                   discarded: self.discarded,
                   latest: self.latest,
                   elapsed,
                   total: self.started.elapsed()}
    }
}

/// Summary of a finished session.
#[derive(Clone, Debug)]
pub struct ScanReport {
    pub scans: u64,
    pub skipped: u64,
    pub discarded: u64,
    pub latest: Option<BitPattern>,

    /// Time between the first and the last accepted frame.
    pub elapsed: Duration,

    /// Time since the session state was created.
    pub total: Duration,
}

impl ScanReport {
    /// Accepted frames per second over `elapsed`; None with fewer than two
    /// accepted frames.
    pub fn scan_rate(&self) -> Option<f64> {
        if self.scans < 2 || self.elapsed.is_zero() {
            return None;
        }
        Some(self.scans as f64 / self.elapsed.as_secs_f64())
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} scans ({} skipped, {} discarded) in {:.3}s",
               self.scans, self.skipped, self.discarded, self.total.as_secs_f64())?;
        if let Some(rate) = self.scan_rate() {
            write!(f, "; average scan rate {:.2} Hz", rate)?;
        }
        if let Some(latest) = self.latest {
            write!(f, "; latest pattern {}", latest)?;
        }
        Ok(())
    }
}
