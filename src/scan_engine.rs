// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Calibration and decoding of a single G2 code frame.
//!
//! A G2 code is a vertical strip bounded by two dark marker bars. The rows
//! between the markers are split into 20 equal bins; a dark bin encodes 1 and
//! a light bin encodes 0. Everything here is a pure function of its inputs,
//! so workers can calibrate and decode different frames concurrently.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use image::{Rgb, RgbImage};
use imageproc::edges::canny;
use thiserror::Error;

use crate::scan_config::{ScanColumn, ScanConfig};
use crate::scan_error::ScanError;

pub const NUM_BINS: usize = 20;
pub const NUM_BOUNDARIES: usize = NUM_BINS + 1;

// Distance between the strongest vertical edge and the column we sample, so
// that luminance is read from bin interiors rather than from a transition.
const EDGE_OFFSET: u32 = 4;

// Hysteresis thresholds for the edge detector.
const CANNY_LOW: f32 = 60.0;
const CANNY_HIGH: f32 = 250.0;

/// Rec.601 weighted luminance, 0..=255.
pub fn luminance(pixel: &Rgb<u8>) -> f32 {
    let [r, g, b] = pixel.0;
    (299 * r as u32 + 587 * g as u32 + 114 * b as u32) as f32 / 1000.0
}

/// Bin boundary rows for one code, plus the column they were found in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinLayout {
    boundaries: [u32; NUM_BOUNDARIES],
    scan_column: u32,
    top_marker: u32,
    bottom_marker: u32,
}

impl BinLayout {
    /// Strictly increasing; boundaries()[0] is the top marker row and, unless
    /// the markers were fewer than 20 rows apart, boundaries()[20] is the
    /// bottom marker row.
    pub fn boundaries(&self) -> &[u32; NUM_BOUNDARIES] { &self.boundaries }

    pub fn scan_column(&self) -> u32 { self.scan_column }

    pub fn top_marker(&self) -> u32 { self.top_marker }

    pub fn bottom_marker(&self) -> u32 { self.bottom_marker }

    /// Rows covered by bin `bin`, top to bottom. Never empty.
    pub fn bin_rows(&self, bin: usize) -> Range<u32> {
        self.boundaries[bin]..self.boundaries[bin + 1]
    }
}

/// The 20 bits of one decoded frame, in top-to-bottom bin order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BitPattern([u8; NUM_BINS]);

impl BitPattern {
    /// Each entry must be 0 or 1.
    pub fn new(bits: [u8; NUM_BINS]) -> Self {
        assert!(bits.iter().all(|b| *b <= 1), "bits must be 0 or 1: {:?}", bits);
        BitPattern(bits)
    }

    pub fn bits(&self) -> &[u8; NUM_BINS] { &self.0 }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { false }

    /// The bits read as an unsigned integer, first bin most significant.
    pub fn value(&self) -> u32 {
        self.0.iter().fold(0, |acc, bit| (acc << 1) | *bit as u32)
    }

    /// Interprets the pattern as a reflected binary (Gray) code and returns
    /// the position it encodes.
    pub fn gray_decoded(&self) -> u32 {
        let mut binary = self.value();
        let mut shift = 1;
        while shift < 32 {
            binary ^= binary >> shift;
            shift *= 2;
        }
        binary
    }

    /// Gray code for `position` (only the low 20 bits are used).
    pub fn from_gray_position(position: u32) -> Self {
        let gray = position ^ (position >> 1);
        let mut bits = [0u8; NUM_BINS];
        for (i, bit) in bits.iter_mut().enumerate() {
            *bit = ((gray >> (NUM_BINS - 1 - i)) & 1) as u8;
        }
        BitPattern(bits)
    }
}

impl fmt::Display for BitPattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for bit in self.0 {
            write!(f, "{}", bit)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("expected 20 characters of '0' or '1', got {0:?}")]
pub struct ParsePatternError(String);

impl FromStr for BitPattern {
    type Err = ParsePatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bits = [0u8; NUM_BINS];
        let mut count = 0;
        for c in s.chars() {
            if count == NUM_BINS {
                return Err(ParsePatternError(s.to_string()));
            }
            bits[count] = match c {
                '0' => 0,
                '1' => 1,
                _ => return Err(ParsePatternError(s.to_string())),
            };
            count += 1;
        }
        if count != NUM_BINS {
            return Err(ParsePatternError(s.to_string()));
        }
        Ok(BitPattern(bits))
    }
}

/// Splits `[top, bottom]` into 20 bins: 21 evenly spaced boundary rows,
/// rounded to the nearest row.
///
/// When the markers are fewer than 20 rows apart rounding makes some
/// boundaries equal; each such boundary is pushed one row past its
/// predecessor so that no bin is empty. That can carry the last boundary
/// beyond `bottom`; if it would leave the frame (`rows` high) the layout is
/// degenerate.
pub fn partition_bins(top: u32, bottom: u32, rows: u32)
                      -> Result<[u32; NUM_BOUNDARIES], ScanError> {
    assert!(top <= bottom, "top marker {} below bottom marker {}", top, bottom);
    let span = (bottom - top) as f64;
    let mut boundaries = [0u32; NUM_BOUNDARIES];
    for (i, boundary) in boundaries.iter_mut().enumerate() {
        *boundary = top + (span * i as f64 / NUM_BINS as f64).round() as u32;
    }
    for i in 1..NUM_BOUNDARIES {
        if boundaries[i] <= boundaries[i - 1] {
            boundaries[i] = boundaries[i - 1] + 1;
        }
    }
    if boundaries[NUM_BINS] >= rows {
        return Err(ScanError::DegenerateBinLayout{top, bottom, rows});
    }
    Ok(boundaries)
}

/// Picks the scan column next to the strongest vertical edge of `image`.
///
/// Edge strength is summed per column; the column EDGE_OFFSET away from the
/// peak, towards the middle of the frame, is returned.
pub fn select_edge_column(image: &RgbImage) -> u32 {
    let gray = image::imageops::grayscale(image);
    let edges = canny(&gray, CANNY_LOW, CANNY_HIGH);
    let mut energy = vec![0u64; edges.width() as usize];
    for (x, _y, pixel) in edges.enumerate_pixels() {
        energy[x as usize] += pixel.0[0] as u64;
    }
    offset_from_edge(peak_column(&energy), image.width())
}

// First column holding the maximum energy.
fn peak_column(energy: &[u64]) -> u32 {
    let mut peak = 0;
    for (column, e) in energy.iter().enumerate() {
        if *e > energy[peak] {
            peak = column;
        }
    }
    peak as u32
}

// Peaks up to one column right of center still step right; on a 16-column
// frame the split is between columns 9 and 10.
fn offset_from_edge(peak: u32, width: u32) -> u32 {
    if peak > width / 2 + 1 {
        peak.saturating_sub(EDGE_OFFSET)
    } else {
        (peak + EDGE_OFFSET).min(width.saturating_sub(1))
    }
}

/// Marker/bit thresholds and column choice used for calibrate and decode.
#[derive(Copy, Clone, Debug)]
pub struct ScanEngine {
    marker_threshold: f32,
    bit_threshold: f32,
    scan_column: ScanColumn,
}

impl ScanEngine {
    pub fn new(marker_threshold: f32, bit_threshold: f32, scan_column: ScanColumn) -> Self {
        ScanEngine{marker_threshold, bit_threshold, scan_column}
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.marker_threshold, config.bit_threshold, config.scan_column)
    }

    /// The column that calibrate() samples for `image`.
    pub fn scan_column_for(&self, image: &RgbImage) -> u32 {
        match self.scan_column {
            ScanColumn::Fixed(column) => column.min(image.width().saturating_sub(1)),
            ScanColumn::EdgeDetected => select_edge_column(image),
        }
    }

    /// Locates the marker bars in the scan column and derives the bin
    /// boundaries between them.
    pub fn calibrate(&self, image: &RgbImage) -> Result<BinLayout, ScanError> {
        let rows = image.height();
        let column = self.scan_column_for(image);
        let is_dark = |row: u32| {
            luminance(image.get_pixel(column, row)) < self.marker_threshold
        };
        let top = (0..rows).find(|row| is_dark(*row));
        let bottom = (0..rows).rev().find(|row| is_dark(*row));
        let (top_marker, bottom_marker) = match (top, bottom) {
            (Some(t), Some(b)) => (t, b),
            _ => {
                return Err(ScanError::MarkersNotFound{column,
                                                      top_found: top.is_some(),
                                                      bottom_found: bottom.is_some()});
            }
        };
        let boundaries = partition_bins(top_marker, bottom_marker, rows)?;
        Ok(BinLayout{boundaries, scan_column: column, top_marker, bottom_marker})
    }

    /// Averages luminance over each bin of `layout` in its scan column and
    /// thresholds the averages into bits.
    pub fn decode(&self, image: &RgbImage, layout: &BinLayout) -> BitPattern {
        let column = layout.scan_column;
        let mut bits = [0u8; NUM_BINS];
        for (bin, bit) in bits.iter_mut().enumerate() {
            let rows = layout.bin_rows(bin);
            let row_count = (rows.end - rows.start) as f32;
            let sum: f32 = rows.map(|row| luminance(image.get_pixel(column, row))).sum();
            if sum / row_count < self.bit_threshold {
                *bit = 1;
            }
        }
        BitPattern(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const WHITE: Rgb<u8> = Rgb([230, 230, 230]);
    const BLACK: Rgb<u8> = Rgb([10, 10, 10]);

    fn engine() -> ScanEngine {
        ScanEngine::new(50.0, 95.0, ScanColumn::Fixed(8))
    }

    // Light frame with dark rows at `top`, `bottom` and inside each bin whose
    // bit is set. Bins are exactly `bin_height` rows.
    fn code_frame(top: u32, bin_height: u32, bits: &[u8; NUM_BINS]) -> RgbImage {
        let bottom = top + bin_height * NUM_BINS as u32;
        let mut image = RgbImage::from_pixel(16, bottom + 20, WHITE);
        for x in 0..16 {
            image.put_pixel(x, top, BLACK);
            image.put_pixel(x, bottom, BLACK);
            for (bin, bit) in bits.iter().enumerate() {
                if *bit == 1 {
                    let start = top + bin as u32 * bin_height;
                    for y in start..start + bin_height {
                        image.put_pixel(x, y, BLACK);
                    }
                }
            }
        }
        image
    }

    #[test]
    fn test_luminance() {
        assert_eq!(luminance(&Rgb([0, 0, 0])), 0.0);
        assert_eq!(luminance(&Rgb([255, 255, 255])), 255.0);
        assert_eq!(luminance(&Rgb([100, 0, 0])), 29.9);
    }

    #[test]
    fn test_alternating_round_trip() {
        let expected: BitPattern = "10101010101010101010".parse().unwrap();
        let image = code_frame(10, 10, expected.bits());
        let layout = engine().calibrate(&image).unwrap();
        assert_eq!(layout.top_marker(), 10);
        assert_eq!(layout.bottom_marker(), 210);
        let pattern = engine().decode(&image, &layout);
        assert_eq!(pattern.len(), NUM_BINS);
        assert_eq!(pattern, expected);
        assert_eq!(pattern.to_string(), "10101010101010101010");
    }

    #[test]
    fn test_uneven_bins_decode() {
        // 207 rows between markers: bins differ in height by one row.
        let mut image = RgbImage::from_pixel(16, 260, WHITE);
        let (top, bottom) = (13, 220);
        let boundaries = partition_bins(top, bottom, 260).unwrap();
        let expected: BitPattern = "11001110000111110100".parse().unwrap();
        for x in 0..16 {
            image.put_pixel(x, top, BLACK);
            image.put_pixel(x, bottom, BLACK);
            for bin in 0..NUM_BINS {
                if expected.bits()[bin] == 1 {
                    for y in boundaries[bin]..boundaries[bin + 1] {
                        image.put_pixel(x, y, BLACK);
                    }
                }
            }
        }
        let layout = engine().calibrate(&image).unwrap();
        assert_eq!(engine().decode(&image, &layout), expected);
    }

    #[test]
    fn test_layout_invariants() {
        for (top, bottom) in [(0, 20), (5, 299), (13, 220), (40, 61), (100, 101)] {
            let boundaries = partition_bins(top, bottom, 300).unwrap();
            assert_eq!(boundaries.len(), NUM_BOUNDARIES);
            assert_eq!(boundaries[0], top);
            for pair in boundaries.windows(2) {
                assert!(pair[0] < pair[1], "{:?}", boundaries);
            }
            assert!(boundaries[NUM_BINS] < 300);
            if bottom - top >= NUM_BINS as u32 {
                assert_eq!(boundaries[NUM_BINS], bottom);
            }
        }
    }

    #[test]
    fn test_degenerate_markers_are_nudged() {
        // Markers one row apart.
        let mut image = RgbImage::from_pixel(16, 60, WHITE);
        for x in 0..16 {
            image.put_pixel(x, 5, BLACK);
            image.put_pixel(x, 6, BLACK);
        }
        let layout = engine().calibrate(&image).unwrap();
        assert_eq!(layout.top_marker(), 5);
        assert_eq!(layout.bottom_marker(), 6);
        let expected: Vec<u32> = (5..26).collect();
        assert_eq!(layout.boundaries().to_vec(), expected);
        for bin in 0..NUM_BINS {
            assert_eq!(layout.bin_rows(bin).len(), 1);
        }
        let pattern = engine().decode(&image, &layout);
        assert_eq!(pattern.to_string(), "11000000000000000000");
    }

    #[test]
    fn test_degenerate_layout_off_frame() {
        let result = partition_bins(20, 21, 30);
        assert!(matches!(result, Err(ScanError::DegenerateBinLayout{top: 20, bottom: 21, rows: 30})));
    }

    #[test]
    fn test_markers_not_found() {
        let image = RgbImage::from_pixel(16, 300, WHITE);
        match engine().calibrate(&image) {
            Err(ScanError::MarkersNotFound{column, top_found, bottom_found}) => {
                assert_eq!(column, 8);
                assert!(!top_found);
                assert!(!bottom_found);
            },
            other => panic!("expected MarkersNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_calibrate_is_deterministic() {
        let bits: BitPattern = "01100011110000011101".parse().unwrap();
        let image = code_frame(7, 12, bits.bits());
        let first = engine().calibrate(&image).unwrap();
        let second = engine().calibrate(&image).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_fixed_column_is_clamped() {
        let engine = ScanEngine::new(50.0, 95.0, ScanColumn::Fixed(40));
        let image = RgbImage::from_pixel(16, 30, WHITE);
        assert_eq!(engine.scan_column_for(&image), 15);
    }

    #[test]
    fn test_edge_offset() {
        assert_eq!(offset_from_edge(12, 16), 8);
        assert_eq!(offset_from_edge(2, 16), 6);
        assert_eq!(offset_from_edge(15, 16), 11);
        assert_eq!(offset_from_edge(0, 3), 2);
        assert_eq!(offset_from_edge(8, 16), 12);
        assert_eq!(offset_from_edge(9, 16), 13);
        assert_eq!(offset_from_edge(10, 16), 6);
        assert_eq!(peak_column(&[3, 9, 9, 1]), 1);
        assert_eq!(peak_column(&[0, 0, 0]), 0);
    }

    #[test]
    fn test_edge_column_selection() {
        // Bright left part, dark right part: one strong vertical edge
        // around column 20.
        let mut image = RgbImage::from_pixel(32, 64, Rgb([200, 200, 200]));
        for y in 0..64 {
            for x in 20..32 {
                image.put_pixel(x, y, Rgb([20, 20, 20]));
            }
        }
        let column = select_edge_column(&image);
        assert!((14..=17).contains(&column), "column {}", column);
    }

    #[test]
    fn test_pattern_parse_and_gray() {
        assert!("0101".parse::<BitPattern>().is_err());
        assert!("010101010101010101012".parse::<BitPattern>().is_err());
        assert!("0101010101010101010x".parse::<BitPattern>().is_err());

        let pattern: BitPattern = "00000000000000000011".parse().unwrap();
        assert_eq!(pattern.value(), 3);
        assert_eq!(pattern.gray_decoded(), 2);

        for position in [0, 1, 2, 77, 1000, (1 << 20) - 1] {
            assert_eq!(BitPattern::from_gray_position(position).gray_decoded(), position);
        }
    }
}
