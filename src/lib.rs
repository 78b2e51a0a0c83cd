//! ircam-capture: V4L2 frame capture for face-authentication cameras
//!
//! Discovers capture devices, negotiates a pixel format with the driver and
//! returns frames as owned RGB24 buffers. Every driver call goes through the
//! [`VideoDriver`] trait, so sessions can run against real hardware
//! ([`V4l2Driver`]) or an in-crate mock in tests.
//!
//! ```no_run
//! use ircam_capture::{DeviceRegistry, FourCC, PixelFormatDescriptor};
//!
//! let registry = DeviceRegistry::scan()?;
//! let device = registry.lookup_by_ordinal(0)?;
//! let frame = device.grab(&PixelFormatDescriptor::new(FourCC::YUYV, 640, 480))?;
//! println!("{}x{}", frame.width(), frame.height());
//! # Ok::<(), ircam_capture::CaptureError>(())
//! ```

pub mod config;
pub mod convert;
pub mod device;
pub mod error;
pub mod format;
pub mod frame;
pub mod probe;
pub mod registry;
pub mod session;
pub mod traits;
pub mod v4l2;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use config::{CaptureConfig, RegistryConfig, WarmupPolicy};
pub use convert::RgbConverter;
pub use device::Device;
pub use error::{CaptureError, ErrorKind, Result};
pub use format::{FormatCatalog, FourCC, PixelFormatDescriptor};
pub use frame::Frame;
pub use probe::DeviceCapabilities;
pub use registry::DeviceRegistry;
pub use session::CaptureSession;
pub use traits::{ConversionError, FormatConverter, MappedRegion, VideoDriver};
pub use v4l2::V4l2Driver;
