//! Discovery of capture devices.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

use log::debug;

use crate::config::RegistryConfig;
use crate::device::Device;
use crate::error::{CaptureError, ErrorKind, Result, ResultExt};
use crate::traits::VideoDriver;
use crate::v4l2::V4l2Driver;

/// List character devices in `dir` whose file name starts with `prefix`.
///
/// Paths are sorted so ordinals are stable between scans.
pub fn list_device_paths(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let kind = |err: &io::Error| {
        if err.kind() == io::ErrorKind::NotFound {
            ErrorKind::NotFound
        } else {
            ErrorKind::OpenFailed
        }
    };
    let entries = fs::read_dir(dir).map_err(|err| CaptureError::os(kind(&err), dir, "read_dir", err))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.or_capture(ErrorKind::OpenFailed, dir, "read_dir")?;
        if !entry.file_name().to_string_lossy().starts_with(prefix) {
            continue;
        }
        // Follows symlinks such as /dev/v4l/by-id entries
        match fs::metadata(entry.path()) {
            Ok(meta) if meta.file_type().is_char_device() => paths.push(entry.path()),
            Ok(_) => debug!("{}: not a character device", entry.path().display()),
            Err(err) => debug!("{}: {err}", entry.path().display()),
        }
    }

    paths.sort();
    Ok(paths)
}

/// Capture-capable devices found on the system, in path order.
///
/// Built once and read-only afterwards; share it by reference. Capture
/// sessions on different devices may run in parallel.
pub struct DeviceRegistry<D: VideoDriver = V4l2Driver> {
    devices: Vec<Device<D>>,
}

impl DeviceRegistry<V4l2Driver> {
    /// Scan `/dev/video*`.
    pub fn scan() -> Result<Self> {
        Self::scan_with(&RegistryConfig::default())
    }

    /// Scan with explicit discovery and session parameters.
    pub fn scan_with(config: &RegistryConfig) -> Result<Self> {
        let paths = list_device_paths(&config.device_dir, &config.name_prefix)?;
        Ok(Self::build(paths, |path| {
            Device::open_with(path, config.capture.clone())
        }))
    }

    /// Process-wide registry, scanned on first use.
    ///
    /// Later calls return the same instance without rescanning. A failed
    /// scan is not cached.
    pub fn shared() -> Result<&'static Self> {
        static REGISTRY: OnceLock<DeviceRegistry> = OnceLock::new();
        static INIT: Mutex<()> = Mutex::new(());

        if let Some(registry) = REGISTRY.get() {
            return Ok(registry);
        }
        let _init = INIT.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(registry) = REGISTRY.get() {
            return Ok(registry);
        }
        let registry = Self::scan()?;
        Ok(REGISTRY.get_or_init(|| registry))
    }
}

impl<D: VideoDriver> DeviceRegistry<D> {
    /// Open every path with `open`, keeping the capture-capable devices.
    ///
    /// Open and probe failures are expected outcomes (busy nodes, metadata
    /// nodes, unsupported transports) and only logged.
    pub fn build<I, F>(paths: I, mut open: F) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
        F: FnMut(&Path) -> Result<Device<D>>,
    {
        let devices = paths
            .into_iter()
            .filter_map(|path| match open(&path) {
                Ok(device) if device.capabilities().is_capture_capable => Some(device),
                Ok(_) => {
                    debug!("{}: not a capture device, skipping", path.display());
                    None
                }
                Err(err) => {
                    debug!("skipping device: {err}");
                    None
                }
            })
            .collect();

        Self { devices }
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no capture device was found.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Iterate over devices in ordinal order.
    pub fn iter(&self) -> std::slice::Iter<'_, Device<D>> {
        self.devices.iter()
    }

    /// Device at position `ordinal`.
    pub fn lookup_by_ordinal(&self, ordinal: usize) -> Result<&Device<D>> {
        self.devices.get(ordinal).ok_or_else(|| {
            CaptureError::new(
                ErrorKind::IndexOutOfRange,
                "",
                format!("device ordinal {ordinal} of {}", self.devices.len()),
            )
        })
    }

    /// Device registered under exactly `path`.
    pub fn lookup_by_path<P: AsRef<Path>>(&self, path: P) -> Result<&Device<D>> {
        let path = path.as_ref();
        self.devices
            .iter()
            .find(|device| device.path() == path)
            .ok_or_else(|| CaptureError::new(ErrorKind::NotFound, path, "registry lookup"))
    }
}

impl<'a, D: VideoDriver> IntoIterator for &'a DeviceRegistry<D> {
    type Item = &'a Device<D>;
    type IntoIter = std::slice::Iter<'a, Device<D>>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

impl<D: VideoDriver> std::fmt::Debug for DeviceRegistry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.devices.iter().map(Device::path)).finish()
    }
}
