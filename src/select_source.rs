// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;

use canonical_error::{CanonicalError, invalid_argument_error};

use crate::code_render::render_centered_code;
use crate::frame_source::{CaptureParams, FrameSource};
use crate::image_source::ImageSource;
use crate::scan_engine::BitPattern;

#[derive(Clone, Debug, PartialEq)]
pub enum SourceSpec {
    /// Replay a still image file; its size overrides the requested
    /// resolution.
    Image(PathBuf),

    /// Replay a synthetic code strip showing the given pattern, rendered at
    /// the requested resolution.
    Pattern(BitPattern),
}

// Opens the frame source described by `spec`, configured with `params`.
// Returns NotFound if an image file cannot be loaded and InvalidArgument if
// the requested resolution cannot hold a code strip.
pub fn open_source(spec: &SourceSpec, params: CaptureParams)
                   -> Result<Box<dyn FrameSource + Send>, CanonicalError> {
    match spec {
        SourceSpec::Image(path) => {
            Ok(Box::new(ImageSource::open(path, params)?))
        },
        SourceSpec::Pattern(pattern) => {
            let (width, height) = params.resolution;
            if width == 0 {
                return Err(invalid_argument_error("frame width must be positive"));
            }
            let image = match render_centered_code(width, height, pattern) {
                Ok(image) => image,
                Err(e) => {
                    return Err(invalid_argument_error(
                        format!("cannot render {}x{} code strip: {}",
                                width, height, e).as_str()));
                }
            };
            Ok(Box::new(ImageSource::new(image, params)?))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::write_image;

    #[test]
    fn test_pattern_source() {
        let pattern = BitPattern::from_gray_position(99);
        let source = open_source(&SourceSpec::Pattern(pattern),
                                 CaptureParams::default()).unwrap();
        assert_eq!(source.model(), "ImageSource");
        assert_eq!(source.dimensions(), (16, 300));
    }

    #[test]
    fn test_image_source_takes_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strip.png");
        let pattern = BitPattern::from_gray_position(99);
        write_image(&path, &render_centered_code(24, 200, &pattern).unwrap()).unwrap();

        let source = open_source(&SourceSpec::Image(path),
                                 CaptureParams::default()).unwrap();
        assert_eq!(source.dimensions(), (24, 200));
    }

    #[test]
    fn test_errors() {
        let missing = SourceSpec::Image(PathBuf::from("/nonexistent/strip.png"));
        assert!(open_source(&missing, CaptureParams::default()).is_err());

        let tiny = CaptureParams{resolution: (16, 10), ..CaptureParams::default()};
        let pattern = SourceSpec::Pattern(BitPattern::from_gray_position(1));
        assert!(open_source(&pattern, tiny).is_err());
    }
}
