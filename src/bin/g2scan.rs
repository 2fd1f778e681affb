// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;
use std::time::Duration;

use chrono::offset::Local;
use clap::{Parser, ValueEnum};
use env_logger;
use log::{error, info};

use g2scan::frame_source::{CaptureParams, FrameRate};
use g2scan::scan_config::{CalibrationMode, MarkerPolicy, ScanColumn, ScanConfig};
use g2scan::scan_engine::BitPattern;
use g2scan::scan_error::ScanError;
use g2scan::scan_session::ScanSession;
use g2scan::select_source::{SourceSpec, open_source};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MissingMarkers {
    /// End the session with an error.
    Abort,
    /// Skip the frame and keep scanning.
    Skip,
}

/// Reads a G2 gray-code strip from a stream of camera frames, decoding
/// frames in parallel until the requested number of scans is reached.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Image file to replay as the camera feed.
    #[arg(long, conflicts_with = "pattern")]
    image: Option<PathBuf>,

    /// 20-bit pattern (e.g. 10101010101010101010) to render as a synthetic
    /// camera feed. Used when no --image is given.
    #[arg(long, default_value = "10101010101010101010")]
    pattern: BitPattern,

    /// Width of the synthetic frames.
    #[arg(long, default_value_t = 16)]
    width: u32,

    /// Height of the synthetic frames.
    #[arg(long, default_value_t = 300)]
    height: u32,

    /// Frames per second delivered by the source.
    #[arg(long, default_value_t = 30.0)]
    frame_rate: f64,

    /// Exposure time, in milliseconds.
    #[arg(long, default_value_t = 15)]
    exposure_ms: u64,

    /// Number of worker threads. Defaults to the available parallelism.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Stop after this many decoded frames.
    #[arg(short, long, default_value_t = 30)]
    scans: u64,

    /// Luminance below which a row counts as a marker bar.
    #[arg(long, default_value_t = 50.0)]
    marker_threshold: f32,

    /// Average bin luminance below which a bit reads as 1.
    #[arg(long, default_value_t = 95.0)]
    bit_threshold: f32,

    /// Pixel column to sample.
    #[arg(long, default_value_t = 8, conflicts_with = "edge_detect")]
    scan_column: u32,

    /// Sample next to the strongest vertical edge instead of a fixed column.
    #[arg(long)]
    edge_detect: bool,

    /// Calibrate once on a dedicated capture rather than on every frame.
    #[arg(long)]
    calibrate_once: bool,

    /// What a frame without marker bars does to the session.
    #[arg(long, value_enum, default_value_t = MissingMarkers::Abort)]
    on_missing_markers: MissingMarkers,

    /// Directory to write annotated BMP frames to.
    #[arg(long)]
    diagnostics_dir: Option<PathBuf>,
}

impl Args {
    fn scan_config(&self) -> ScanConfig {
        let defaults = ScanConfig::default();
        ScanConfig{
            workers: self.workers.unwrap_or(defaults.workers),
            target_scans: self.scans,
            marker_threshold: self.marker_threshold,
            bit_threshold: self.bit_threshold,
            scan_column: if self.edge_detect {
                ScanColumn::EdgeDetected
            } else {
                ScanColumn::Fixed(self.scan_column)
            },
            calibration: if self.calibrate_once {
                CalibrationMode::Once
            } else {
                CalibrationMode::PerFrame
            },
            on_missing_markers: match self.on_missing_markers {
                MissingMarkers::Abort => MarkerPolicy::Abort,
                MissingMarkers::Skip => MarkerPolicy::Skip,
            },
            diagnostics_dir: self.diagnostics_dir.clone(),
            ..defaults
        }
    }

    fn source_spec(&self) -> SourceSpec {
        match &self.image {
            Some(path) => SourceSpec::Image(path.clone()),
            None => SourceSpec::Pattern(self.pattern),
        }
    }
}

fn describe(err: &ScanError) -> &'static str {
    match err {
        ScanError::MarkersNotFound{..} => "marker bars not found",
        ScanError::DegenerateBinLayout{..} => "marker bars too close together",
        ScanError::CaptureDeviceFailure{..} => "capture device failure",
        ScanError::InvalidConfig(_) => "invalid configuration",
        ScanError::WorkerSpawn{..} |
        ScanError::WorkerLost{..} |
        ScanError::WorkerPanicked{..} => "worker failure",
    }
}

fn main() {
    // If any thread panics, bail out.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Thread panicked: {}", panic_info);
        std::process::exit(1);
    }));
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if !(args.frame_rate.is_finite() && args.frame_rate > 0.0) {
        error!("--frame-rate must be positive, got {}", args.frame_rate);
        std::process::exit(2);
    }
    let params = CaptureParams{resolution: (args.width, args.height),
                               frame_rate: FrameRate::new(args.frame_rate),
                               exposure_duration: Duration::from_millis(args.exposure_ms)};
    let source = match open_source(&args.source_spec(), params) {
        Ok(source) => source,
        Err(e) => {
            let e = ScanError::capture("open", e);
            error!("{}: {}", describe(&e), e);
            std::process::exit(1);
        }
    };

    let session = match ScanSession::new(args.scan_config(), source) {
        Ok(session) => session,
        Err(e) => {
            error!("{}: {}", describe(&e), e);
            std::process::exit(2);
        }
    };
    info!("session started at {}", Local::now().format("%d/%m/%Y %T"));
    let result = session.run();
    info!("session ended at {}", Local::now().format("%d/%m/%Y %T"));
    match result {
        Ok(report) => {
            match report.latest {
                Some(pattern) => println!("{} (gray position {})",
                                          pattern, pattern.gray_decoded()),
                None => println!("no frame decoded"),
            }
        },
        Err(e) => {
            error!("scan aborted, {}: {}", describe(&e), e);
            std::process::exit(1);
        }
    }
}
