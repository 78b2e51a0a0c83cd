//! An opened capture device: capabilities, format catalog and capture entry points.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::debug;

use crate::config::CaptureConfig;
use crate::convert::RgbConverter;
use crate::error::{CaptureError, ErrorKind, Result};
use crate::format::{FormatCatalog, PixelFormatDescriptor};
use crate::frame::Frame;
use crate::probe::DeviceCapabilities;
use crate::session::CaptureSession;
use crate::traits::{FormatConverter, VideoDriver};
use crate::v4l2::V4l2Driver;

/// A video device bound to one open file descriptor.
///
/// Capabilities and the format catalog are probed once at open time. Capture
/// calls take `&self`; an internal lock gives each session exclusive use of
/// the descriptor, so a `Device` can be shared between threads while sessions
/// on it run one at a time.
pub struct Device<D: VideoDriver = V4l2Driver> {
    path: PathBuf,
    capabilities: DeviceCapabilities,
    catalog: FormatCatalog,
    config: CaptureConfig,
    converter: Box<dyn FormatConverter>,
    driver: Mutex<D>,
}

impl Device<V4l2Driver> {
    /// Open a V4L2 device node (e.g., `/dev/video0`).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, CaptureConfig::default())
    }

    /// Open a V4L2 device node with explicit session parameters.
    pub fn open_with<P: AsRef<Path>>(path: P, config: CaptureConfig) -> Result<Self> {
        let path = path.as_ref();
        let driver = V4l2Driver::open(path)?;
        Self::from_driver(path, driver, config)
    }
}

impl<D: VideoDriver> Device<D> {
    /// Probe an already opened driver.
    ///
    /// Devices that cannot capture are accepted with an empty catalog.
    pub fn from_driver<P: Into<PathBuf>>(path: P, mut driver: D, config: CaptureConfig) -> Result<Self> {
        let path = path.into();
        let capabilities = DeviceCapabilities::probe(&mut driver, &path)?;

        let catalog = if capabilities.is_capture_capable {
            FormatCatalog::probe(&mut driver, &path)?
        } else {
            debug!("{}: not a capture device, skipping format probe", path.display());
            FormatCatalog::default()
        };

        Ok(Self {
            path,
            capabilities,
            catalog,
            config,
            converter: Box::new(RgbConverter),
            driver: Mutex::new(driver),
        })
    }

    /// Replace the pixel conversion service.
    #[must_use]
    pub fn with_converter<C: FormatConverter + 'static>(mut self, converter: C) -> Self {
        self.converter = Box::new(converter);
        self
    }

    /// Device node path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Capabilities probed at open time.
    pub const fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Formats probed at open time.
    pub const fn formats(&self) -> &FormatCatalog {
        &self.catalog
    }

    /// Session parameters.
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Capture a single frame.
    ///
    /// `request` is advisory: the frame has the size the driver negotiated.
    pub fn grab(&self, request: &PixelFormatDescriptor) -> Result<Frame> {
        let mut session = self.grab_multiple(request, 1)?;
        let frame = match session.next() {
            Some(frame) => frame?,
            None => {
                return Err(CaptureError::new(
                    ErrorKind::NoFrameData,
                    &self.path,
                    "capture ended without a frame",
                ))
            }
        };
        session.finish()?;
        Ok(frame)
    }

    /// Start a session yielding up to `count` frames.
    ///
    /// Setup runs before this returns; frames are dequeued as the session is
    /// iterated. The device stays locked until the session is exhausted or
    /// dropped.
    pub fn grab_multiple(
        &self,
        request: &PixelFormatDescriptor,
        count: usize,
    ) -> Result<CaptureSession<'_, D>> {
        if !self.capabilities.is_capture_capable {
            return Err(CaptureError::new(
                ErrorKind::NegotiationFailed,
                &self.path,
                "device is not capture-capable",
            ));
        }

        // A panicking session still tears down from Drop, so the driver
        // state behind a poisoned lock is consistent
        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        CaptureSession::start(
            driver,
            &self.path,
            self.converter.as_ref(),
            &self.config,
            self.capabilities.is_infrared_sensor,
            request,
            count,
        )
    }
}

impl<D: VideoDriver> fmt::Debug for Device<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("path", &self.path)
            .field("capabilities", &self.capabilities)
            .field("formats", &self.catalog.len())
            .finish_non_exhaustive()
    }
}
