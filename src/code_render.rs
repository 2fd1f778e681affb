// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

// Draws a synthetic G2 code: what the camera would see looking at a printed
// strip, minus the noise.

use image::{Rgb, RgbImage};

use crate::scan_engine::{BitPattern, NUM_BINS, partition_bins};
use crate::scan_error::ScanError;

pub const LIGHT: Rgb<u8> = Rgb([225, 225, 220]);
pub const DARK: Rgb<u8> = Rgb([12, 12, 16]);

/// Renders a `width` x `height` frame with full-width marker rows at `top`
/// and `bottom` and `pattern` painted into the bins between them. Bins use
/// the same boundaries calibration derives, so decoding the result yields
/// `pattern`.
pub fn render_code(width: u32, height: u32, top: u32, bottom: u32,
                   pattern: &BitPattern) -> Result<RgbImage, ScanError> {
    let boundaries = partition_bins(top, bottom, height)?;
    let mut image = RgbImage::from_pixel(width, height, LIGHT);
    for x in 0..width {
        image.put_pixel(x, top, DARK);
        image.put_pixel(x, bottom, DARK);
    }
    for bin in 0..NUM_BINS {
        if pattern.bits()[bin] == 0 {
            continue;
        }
        for y in boundaries[bin]..boundaries[bin + 1] {
            for x in 0..width {
                image.put_pixel(x, y, DARK);
            }
        }
    }
    Ok(image)
}

/// Like render_code() with markers placed 10% in from the frame edges.
pub fn render_centered_code(width: u32, height: u32, pattern: &BitPattern)
                            -> Result<RgbImage, ScanError> {
    let margin = height / 10;
    render_code(width, height, margin, height - 1 - margin, pattern)
}
