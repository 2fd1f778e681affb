// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::{Path, PathBuf};

use canonical_error::{CanonicalError, failed_precondition_error};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use log::{debug, warn};

use crate::scan_engine::{BinLayout, BitPattern, NUM_BINS};

const TOP_MARKER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOTTOM_MARKER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOUNDARY_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const SCAN_COLUMN_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BIT_COLOR: Rgb<u8> = Rgb([255, 0, 255]);

/// Returns a copy of `image` annotated with the marker rows, the inner bin
/// boundaries and the scan column. If `pattern` is given, every bin that
/// decoded as 1 gets a mark along the frame edge away from the scan column.
pub fn render_overlay(image: &RgbImage, layout: &BinLayout,
                      pattern: Option<&BitPattern>) -> RgbImage {
    let mut canvas = image.clone();
    let (width, height) = canvas.dimensions();
    let right = width.saturating_sub(1) as f32;

    if let Some(pattern) = pattern {
        let mark_x = if layout.scan_column() < width / 2 {
            width.saturating_sub(3)
        } else {
            1
        };
        for bin in 0..NUM_BINS {
            if pattern.bits()[bin] == 1 {
                let rows = layout.bin_rows(bin);
                draw_filled_rect_mut(&mut canvas,
                                     Rect::at(mark_x as i32, rows.start as i32)
                                     .of_size(2, rows.end - rows.start),
                                     BIT_COLOR);
            }
        }
    }
    for row in &layout.boundaries()[1..NUM_BINS] {
        let y = *row as f32;
        draw_line_segment_mut(&mut canvas, (0.0, y), (right, y), BOUNDARY_COLOR);
    }
    let top = layout.top_marker() as f32;
    draw_line_segment_mut(&mut canvas, (0.0, top), (right, top), TOP_MARKER_COLOR);
    let bottom = layout.bottom_marker() as f32;
    draw_line_segment_mut(&mut canvas, (0.0, bottom), (right, bottom), BOTTOM_MARKER_COLOR);
    let x = layout.scan_column() as f32;
    draw_line_segment_mut(&mut canvas, (x, 0.0), (x, height.saturating_sub(1) as f32),
                          SCAN_COLUMN_COLOR);
    canvas
}

/// Saves `image`; the format follows the file extension.
pub fn write_image(path: &Path, image: &RgbImage) -> Result<(), CanonicalError> {
    match image.save(path) {
        Ok(()) => Ok(()),
        Err(e) => Err(failed_precondition_error(
            format!("could not write {}: {}", path.display(), e).as_str())),
    }
}

/// Writes annotated BMP frames into a directory. Failures are logged and
/// otherwise ignored; diagnostics never affect scanning.
#[derive(Clone, Debug)]
pub struct DiagnosticSink {
    dir: PathBuf,
}

impl DiagnosticSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CanonicalError> {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            return Err(failed_precondition_error(
                format!("could not create {}: {}", dir.display(), e).as_str()));
        }
        Ok(DiagnosticSink{dir})
    }

    /// Writes `<name>.bmp`. Returns the path written, or None on failure.
    pub fn emit(&self, name: &str, image: &RgbImage, layout: &BinLayout,
                pattern: Option<&BitPattern>) -> Option<PathBuf> {
        let path = self.dir.join(format!("{}.bmp", name));
        let annotated = render_overlay(image, layout, pattern);
        match write_image(&path, &annotated) {
            Ok(()) => {
                debug!("wrote {}", path.display());
                Some(path)
            },
            Err(e) => {
                warn!("diagnostic image skipped: {}", e);
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_render::render_centered_code;
    use crate::scan_config::ScanColumn;
    use crate::scan_engine::ScanEngine;

    #[test]
    fn test_overlay_marks_layout() {
        let pattern: BitPattern = "10000000000000000001".parse().unwrap();
        let image = render_centered_code(16, 300, &pattern).unwrap();
        let engine = ScanEngine::new(50.0, 95.0, ScanColumn::Fixed(8));
        let layout = engine.calibrate(&image).unwrap();
        let overlay = render_overlay(&image, &layout, Some(&pattern));

        assert_eq!(overlay.dimensions(), image.dimensions());
        assert_eq!(*overlay.get_pixel(0, layout.top_marker()), TOP_MARKER_COLOR);
        assert_eq!(*overlay.get_pixel(0, layout.bottom_marker()), BOTTOM_MARKER_COLOR);
        assert_eq!(*overlay.get_pixel(0, layout.boundaries()[5]), BOUNDARY_COLOR);
        assert_eq!(*overlay.get_pixel(8, 5), SCAN_COLUMN_COLOR);
        // First bin decoded as 1; marks sit on the right since column 8 is
        // not left of center.
        let mid_first = layout.boundaries()[0] + 4;
        assert_eq!(*overlay.get_pixel(1, mid_first), BIT_COLOR);
        // Input untouched.
        assert_ne!(*image.get_pixel(8, 5), SCAN_COLUMN_COLOR);
    }

    #[test]
    fn test_sink_writes_bmp() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DiagnosticSink::new(dir.path().join("frames")).unwrap();
        let pattern = BitPattern::from_gray_position(12345);
        let image = render_centered_code(16, 300, &pattern).unwrap();
        let engine = ScanEngine::new(50.0, 95.0, ScanColumn::Fixed(8));
        let layout = engine.calibrate(&image).unwrap();

        let path = sink.emit("7", &image, &layout, Some(&pattern)).unwrap();
        assert_eq!(path, dir.path().join("frames").join("7.bmp"));
        let reloaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(reloaded.dimensions(), (16, 300));
    }
}
