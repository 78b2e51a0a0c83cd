//! Capability probing and device classification.

use std::path::Path;

use log::debug;

use crate::error::{CaptureError, ErrorKind, Result, ResultExt};
use crate::traits::{DriverCapabilities, VideoDriver};

/// Marker looked for in the card name of infrared sensors.
pub const INFRARED_MARKER: &str = "IR";

/// Classification of an opened device, fixed at open time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub is_capture_capable: bool,
    /// Whether the device supports memory-mapped streaming.
    pub supports_memory_mapping: bool,
    /// Whether the device looks like an infrared sensor.
    ///
    /// Best effort: derived from the card name containing `"IR"`. Drivers do
    /// not report sensor type, so a mislabelled card is misclassified.
    pub is_infrared_sensor: bool,
}

impl DeviceCapabilities {
    /// Classify a raw capability report.
    pub fn from_report(report: DriverCapabilities) -> Self {
        let is_infrared_sensor = report.card.contains(INFRARED_MARKER);
        Self {
            driver: report.driver,
            card: report.card,
            bus_info: report.bus_info,
            is_capture_capable: report.video_capture,
            supports_memory_mapping: report.streaming,
            is_infrared_sensor,
        }
    }

    /// Query and classify an open device.
    ///
    /// Devices without memory-mapped streaming are rejected because every
    /// capture session relies on mapped buffers.
    pub fn probe<D: VideoDriver>(driver: &mut D, path: &Path) -> Result<Self> {
        let report = driver
            .query_capabilities()
            .or_capture(ErrorKind::QueryFailed, path, "VIDIOC_QUERYCAP")?;
        let caps = Self::from_report(report);

        debug!(
            "{}: card={:?} driver={:?} capture={} mmap={} ir={}",
            path.display(),
            caps.card,
            caps.driver,
            caps.is_capture_capable,
            caps.supports_memory_mapping,
            caps.is_infrared_sensor
        );

        if !caps.supports_memory_mapping {
            return Err(CaptureError::new(
                ErrorKind::UnsupportedTransport,
                path,
                "V4L2_CAP_STREAMING not reported",
            ));
        }
        Ok(caps)
    }
}
