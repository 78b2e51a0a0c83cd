//! Seams between the capture core and the outside world.
//!
//! [`VideoDriver`] is the driver protocol surface: one method per ioctl the
//! capture pipeline issues. [`FormatConverter`] is the pixel conversion
//! service. Production code uses [`crate::v4l2::V4l2Driver`] and
//! [`crate::convert::RgbConverter`]; tests substitute a mock driver.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::format::{FourCC, PixelFormatDescriptor};

/// Capability report returned by `VIDIOC_QUERYCAP`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// `V4L2_CAP_VIDEO_CAPTURE` is set.
    pub video_capture: bool,
    /// `V4L2_CAP_STREAMING` is set (memory-mapped buffers).
    pub streaming: bool,
}

/// One entry of `VIDIOC_ENUM_FRAMESIZES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSizeKind {
    /// A fixed resolution.
    Discrete {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// A continuous or stepwise range.
    Stepwise,
}

/// Mapping parameters returned by `VIDIOC_QUERYBUF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// Buffer index.
    pub index: u32,
    /// Offset to pass to `mmap`.
    pub offset: u32,
    /// Length of the buffer in bytes.
    pub length: u32,
}

/// A buffer handed back by `VIDIOC_DQBUF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Buffer index.
    pub index: u32,
    /// Bytes of payload the driver wrote.
    pub bytes_used: u32,
    /// Driver frame sequence number.
    pub sequence: u32,
}

/// A driver buffer mapped into the process.
///
/// Dropping the value unmaps it.
pub trait MappedRegion {
    /// The mapped bytes.
    fn as_slice(&self) -> &[u8];
}

/// Abstraction over the V4L2 ioctl protocol for one open device.
///
/// Every call blocks. Errors carry the driver's errno.
pub trait VideoDriver: Send {
    /// Mapping type produced by [`VideoDriver::map_buffer`].
    type Mapping: MappedRegion;

    /// `VIDIOC_QUERYCAP`.
    fn query_capabilities(&mut self) -> io::Result<DriverCapabilities>;

    /// `VIDIOC_ENUM_FMT` for the capture queue.
    fn enum_formats(&mut self) -> io::Result<Vec<FourCC>>;

    /// `VIDIOC_ENUM_FRAMESIZES` for one pixel format.
    fn enum_frame_sizes(&mut self, fourcc: FourCC) -> io::Result<Vec<FrameSizeKind>>;

    /// `VIDIOC_TRY_FMT`. Does not change device state.
    fn try_format(&mut self, request: &PixelFormatDescriptor) -> io::Result<PixelFormatDescriptor>;

    /// `VIDIOC_S_FMT`. Returns the format the driver actually applied.
    fn set_format(&mut self, request: &PixelFormatDescriptor) -> io::Result<PixelFormatDescriptor>;

    /// `VIDIOC_REQBUFS` with `V4L2_MEMORY_MMAP`. Returns the granted count.
    /// A count of zero releases every buffer.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// `VIDIOC_QUERYBUF`.
    fn query_buffer(&mut self, index: u32) -> io::Result<BufferLayout>;

    /// `mmap` a buffer described by [`VideoDriver::query_buffer`].
    fn map_buffer(&mut self, layout: &BufferLayout) -> io::Result<Self::Mapping>;

    /// `VIDIOC_QBUF`.
    fn enqueue(&mut self, index: u32) -> io::Result<()>;

    /// `VIDIOC_STREAMON`.
    fn stream_on(&mut self) -> io::Result<()>;

    /// Wait up to `timeout` for a filled buffer, then `VIDIOC_DQBUF`.
    fn dequeue(&mut self, timeout: Duration) -> io::Result<DequeuedBuffer>;

    /// `VIDIOC_STREAMOFF`.
    fn stream_off(&mut self) -> io::Result<()>;
}

/// Error returned by a [`FormatConverter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionError(pub String);

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConversionError {}

/// Pixel conversion service producing packed RGB24.
pub trait FormatConverter: Send + Sync {
    /// Convert `data`, laid out as `format`, into `width * height * 3` RGB bytes.
    fn to_rgb24(
        &self,
        format: &PixelFormatDescriptor,
        data: &[u8],
    ) -> Result<Vec<u8>, ConversionError>;
}
