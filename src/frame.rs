//! Owned RGB frames returned by capture sessions.

use crate::format::{FourCC, PixelFormatDescriptor};

/// A captured frame in packed RGB24 layout.
///
/// The bytes are a deep copy; a frame outlives the device and the kernel
/// buffers it came from. Cloning duplicates the pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    format: PixelFormatDescriptor,
    bytes: Vec<u8>,
    sequence: u32,
}

impl Frame {
    /// Wrap converted RGB24 bytes.
    ///
    /// Returns `None` when `bytes` is not exactly `width * height * 3` long,
    /// or when that size does not fit in `u32`.
    pub fn from_rgb24(width: u32, height: u32, bytes: Vec<u8>) -> Option<Self> {
        let format = PixelFormatDescriptor::rgb24(width, height)?;
        (bytes.len() == format.buffer_size as usize).then_some(Self {
            format,
            bytes,
            sequence: 0,
        })
    }

    #[must_use]
    pub(crate) const fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Frame format; always RGB3 with `buffer_size == bytes().len()`.
    pub const fn format(&self) -> &PixelFormatDescriptor {
        &self.format
    }

    /// Width in pixels.
    pub const fn width(&self) -> u32 {
        self.format.width
    }

    /// Height in pixels.
    pub const fn height(&self) -> u32 {
        self.format.height
    }

    /// Bytes per row.
    pub const fn stride(&self) -> u32 {
        self.format.stride
    }

    /// Pixel format code, always [`FourCC::RGB3`].
    pub const fn fourcc(&self) -> FourCC {
        self.format.fourcc
    }

    /// Driver sequence number of the buffer this frame was copied from.
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Raw RGB bytes, row-major.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Take ownership of the RGB bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Get RGB values for a pixel at the specified coordinates.
    ///
    /// Returns `None` if the coordinates are outside the frame.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let offset = (y as usize * self.stride() as usize) + x as usize * 3;
        match self.bytes.get(offset..offset + 3)? {
            [r, g, b] => Some((*r, *g, *b)),
            _ => None,
        }
    }
}
