//! Pixel formats and the per-device format catalog.

use std::fmt;
use std::path::Path;

use log::{debug, trace};

use crate::error::{ErrorKind, Result, ResultExt};
use crate::traits::{FrameSizeKind, VideoDriver};

/// Pixel format code (e.g., YUYV, MJPG, GREY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// Create a `FourCC` from the little-endian `u32` used by the kernel.
    #[must_use]
    pub const fn from_u32(code: u32) -> Self {
        Self(code.to_le_bytes())
    }

    /// The kernel's `u32` representation.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// 8-bit greyscale, the usual infrared sensor output.
    pub const GREY: Self = Self::new(b"GREY");
    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// UYVY pixel format (4:2:2 packed, chroma first).
    pub const UYVY: Self = Self::new(b"UYVY");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB), the canonical frame layout.
    pub const RGB3: Self = Self::new(b"RGB3");
    /// BGR3 pixel format (24-bit BGR).
    pub const BGR3: Self = Self::new(b"BGR3");
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            self.0.iter().try_for_each(|b| write!(f, "{}", char::from(*b)))
        } else {
            write!(f, "{:#010x}", self.as_u32())
        }
    }
}

impl std::str::FromStr for FourCC {
    type Err = String;

    /// Parse up to four ASCII characters; short codes are space padded.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 4 || !s.is_ascii() {
            return Err(format!("invalid FourCC {s:?}: expected 1-4 ASCII characters"));
        }
        let mut code = [b' '; 4];
        for (slot, byte) in code.iter_mut().zip(s.bytes()) {
            *slot = byte;
        }
        Ok(Self(code))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// A pixel format at a given resolution.
///
/// `stride` and `buffer_size` are whatever the driver reported for the
/// combination. A caller building a request leaves them at zero. Drivers may
/// round `buffer_size` up past `stride * height`, so rows are located by
/// `stride` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormatDescriptor {
    /// Pixel format.
    pub fourcc: FourCC,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Driver-reported bytes per line, zero for compressed formats.
    pub stride: u32,
    /// Driver-reported image size in bytes.
    pub buffer_size: u32,
}

impl PixelFormatDescriptor {
    /// A format request; the driver fills in the buffer size.
    #[must_use]
    pub const fn new(fourcc: FourCC, width: u32, height: u32) -> Self {
        Self {
            fourcc,
            width,
            height,
            stride: 0,
            buffer_size: 0,
        }
    }

    /// The canonical packed RGB24 layout at the given size.
    ///
    /// Returns `None` if the image size does not fit in `u32`.
    #[must_use]
    pub const fn rgb24(width: u32, height: u32) -> Option<Self> {
        let Some(stride) = width.checked_mul(3) else {
            return None;
        };
        let Some(buffer_size) = stride.checked_mul(height) else {
            return None;
        };
        Some(Self {
            fourcc: FourCC::RGB3,
            width,
            height,
            stride,
            buffer_size,
        })
    }
}

impl fmt::Display for PixelFormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} ({} bytes)",
            self.fourcc, self.width, self.height, self.buffer_size
        )
    }
}

/// Every discrete format/resolution pair a capture device advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatCatalog {
    formats: Vec<PixelFormatDescriptor>,
}

impl FormatCatalog {
    /// Walk the driver's formats and discrete frame sizes.
    ///
    /// Each pair is confirmed with a non-committing try-format so the
    /// recorded buffer size is the driver's own figure. Stepwise and
    /// continuous frame sizes are skipped.
    pub fn probe<D: VideoDriver>(driver: &mut D, path: &Path) -> Result<Self> {
        let mut formats = Vec::new();

        let fourccs = driver
            .enum_formats()
            .or_capture(ErrorKind::FormatProbeFailed, path, "VIDIOC_ENUM_FMT")?;

        for fourcc in fourccs {
            let sizes = driver.enum_frame_sizes(fourcc).or_capture(
                ErrorKind::FormatProbeFailed,
                path,
                "VIDIOC_ENUM_FRAMESIZES",
            )?;

            for size in sizes {
                let FrameSizeKind::Discrete { width, height } = size else {
                    trace!("{}: skipping non-discrete frame sizes for {fourcc}", path.display());
                    continue;
                };

                let tried = driver
                    .try_format(&PixelFormatDescriptor::new(fourcc, width, height))
                    .or_capture(ErrorKind::FormatProbeFailed, path, "VIDIOC_TRY_FMT")?;

                formats.push(PixelFormatDescriptor {
                    fourcc,
                    width,
                    height,
                    stride: tried.stride,
                    buffer_size: tried.buffer_size,
                });
            }
        }

        debug!("{}: {} format(s) in catalog", path.display(), formats.len());
        Ok(Self { formats })
    }

    /// All recorded formats, in driver enumeration order.
    pub fn formats(&self) -> &[PixelFormatDescriptor] {
        &self.formats
    }

    /// Iterate over the recorded formats.
    pub fn iter(&self) -> std::slice::Iter<'_, PixelFormatDescriptor> {
        self.formats.iter()
    }

    /// Number of recorded formats.
    pub fn len(&self) -> usize {
        self.formats.len()
    }

    /// Whether the catalog is empty (always true for non-capture devices).
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Look up an exact format/resolution pair.
    pub fn find(&self, fourcc: FourCC, width: u32, height: u32) -> Option<&PixelFormatDescriptor> {
        self.formats
            .iter()
            .find(|f| f.fourcc == fourcc && f.width == width && f.height == height)
    }

    /// Whether any resolution is advertised for `fourcc`.
    pub fn supports(&self, fourcc: FourCC) -> bool {
        self.formats.iter().any(|f| f.fourcc == fourcc)
    }
}

impl<'a> IntoIterator for &'a FormatCatalog {
    type Item = &'a PixelFormatDescriptor;
    type IntoIter = std::slice::Iter<'a, PixelFormatDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.formats.iter()
    }
}
