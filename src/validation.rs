//! Checks for known test patterns in captured frames.
//!
//! Used by hardware tests against virtual cameras (vivid) and by the CLI to
//! sanity-check a capture.

use std::fmt;

use crate::frame::Frame;

/// Expected RGB values for the 100% SMPTE color bars, left to right.
///
/// White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235),
    (235, 235, 11),
    (12, 236, 237),
    (13, 237, 13),
    (237, 13, 237),
    (238, 14, 13),
    (15, 15, 239),
    (16, 16, 16),
];

/// Per-channel tolerance; absorbs YUV->RGB rounding and chroma subsampling.
const COLOR_TOLERANCE: u8 = 15;

/// Minimum luminance rise across a gradient.
const MIN_GRADIENT_RISE: f32 = 50.0;

/// A frame did not contain the expected content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ValidationError {}

/// Result of a frame check.
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Check frame geometry and that the byte count matches it.
pub fn validate_dimensions(frame: &Frame, width: u32, height: u32) -> Result<()> {
    if frame.width() != width || frame.height() != height {
        return Err(ValidationError(format!(
            "expected {width}x{height}, got {}x{}",
            frame.width(),
            frame.height()
        )));
    }

    let expected = width as usize * height as usize * 3;
    if frame.bytes().len() != expected {
        return Err(ValidationError(format!(
            "expected {expected} bytes, got {}",
            frame.bytes().len()
        )));
    }

    Ok(())
}

/// Check that a frame shows eight vertical SMPTE color bars.
///
/// Samples the center of each bar on the middle row.
pub fn validate_color_bars(frame: &Frame) -> Result<()> {
    let bar_width = frame.width() / 8;
    let center_y = frame.height() / 2;

    for (bar, expected) in (0u32..).zip(SMPTE_COLOR_BARS) {
        let x = bar * bar_width + bar_width / 2;
        let actual = sample(frame, x, center_y)?;

        if !colors_match(actual, expected, COLOR_TOLERANCE) {
            return Err(ValidationError(format!(
                "color bar {bar} mismatch at ({x}, {center_y}): \
                 expected RGB{expected:?}, got RGB{actual:?}"
            )));
        }
    }

    Ok(())
}

/// Check that luminance rises from left to right along the middle row.
pub fn validate_gradient(frame: &Frame) -> Result<()> {
    let center_y = frame.height() / 2;
    let mut first = None;
    let mut prev: Option<f32> = None;

    for x in (0..frame.width()).step_by(10) {
        let luminance = luma(sample(frame, x, center_y)?);

        if let Some(prev) = prev {
            // Small dips are rounding
            if luminance < prev - 1.0 {
                return Err(ValidationError(format!(
                    "gradient falls at x={x}: luminance {luminance} < previous {prev}"
                )));
            }
        }

        first.get_or_insert(luminance);
        prev = Some(luminance);
    }

    let rise = prev.zip(first).map_or(0.0, |(last, first)| last - first);
    if rise < MIN_GRADIENT_RISE {
        return Err(ValidationError(format!(
            "luminance rises by {rise}, expected at least {MIN_GRADIENT_RISE}"
        )));
    }

    Ok(())
}

/// Check that frames came from consecutive driver buffers.
pub fn validate_frame_sequence(frames: &[Frame]) -> Result<()> {
    if frames.is_empty() {
        return Err(ValidationError("no frames to validate".to_owned()));
    }

    for (index, pair) in frames.windows(2).enumerate() {
        if let [prev, curr] = pair {
            let expected = prev.sequence().wrapping_add(1);
            if curr.sequence() != expected {
                return Err(ValidationError(format!(
                    "sequence gap at frame {}: expected {expected}, got {}",
                    index + 1,
                    curr.sequence()
                )));
            }
        }
    }

    Ok(())
}

fn sample(frame: &Frame, x: u32, y: u32) -> Result<(u8, u8, u8)> {
    frame
        .pixel_at(x, y)
        .ok_or_else(|| ValidationError(format!("pixel ({x}, {y}) outside frame")))
}

/// Rec. 601 luma.
fn luma((r, g, b): (u8, u8, u8)) -> f32 {
    0.114f32.mul_add(f32::from(b), 0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)))
}

/// Whether every channel of `actual` is within `tolerance` of `expected`.
pub fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    actual.0.abs_diff(expected.0) <= tolerance
        && actual.1.abs_diff(expected.1) <= tolerance
        && actual.2.abs_diff(expected.2) <= tolerance
}
