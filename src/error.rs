//! Error type shared by device probing, capture sessions and the registry.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Failure category of a [`CaptureError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Device path (or registry entry) does not exist.
    NotFound,
    /// The device node could not be opened.
    OpenFailed,
    /// `VIDIOC_QUERYCAP` failed.
    QueryFailed,
    /// The device does not support memory-mapped streaming.
    UnsupportedTransport,
    /// Format or frame size enumeration, or a try-format query, failed.
    FormatProbeFailed,
    /// The driver rejected the set-format request.
    NegotiationFailed,
    /// The driver could not allocate the requested buffers.
    BufferRequestFailed,
    /// A buffer could not be queried or mapped.
    BufferMapFailed,
    /// A buffer could not be queued.
    EnqueueFailed,
    /// `VIDIOC_STREAMON` failed.
    StreamStartFailed,
    /// `VIDIOC_DQBUF` failed or timed out.
    DequeueFailed,
    /// No dequeued buffer carried usable data.
    NoFrameData,
    /// Native pixel data could not be converted to RGB.
    ConversionFailed,
    /// `VIDIOC_STREAMOFF` failed.
    StreamStopFailed,
    /// Returning the buffers to the driver failed.
    BufferReleaseFailed,
    /// Registry ordinal past the end.
    IndexOutOfRange,
}

impl ErrorKind {
    /// Short human readable description.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "device not found",
            Self::OpenFailed => "failed to open device",
            Self::QueryFailed => "capability query failed",
            Self::UnsupportedTransport => "memory-mapped streaming not supported",
            Self::FormatProbeFailed => "format probe failed",
            Self::NegotiationFailed => "format negotiation failed",
            Self::BufferRequestFailed => "buffer request failed",
            Self::BufferMapFailed => "buffer mapping failed",
            Self::EnqueueFailed => "buffer enqueue failed",
            Self::StreamStartFailed => "stream start failed",
            Self::DequeueFailed => "buffer dequeue failed",
            Self::NoFrameData => "no frame data",
            Self::ConversionFailed => "pixel format conversion failed",
            Self::StreamStopFailed => "stream stop failed",
            Self::BufferReleaseFailed => "buffer release failed",
            Self::IndexOutOfRange => "device index out of range",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for capture operations.
///
/// Carries the device path and the failing operation (usually the ioctl name)
/// together with the OS error, when the driver reported one.
#[derive(Debug)]
pub struct CaptureError {
    kind: ErrorKind,
    path: PathBuf,
    operation: String,
    source: Option<io::Error>,
}

impl CaptureError {
    /// Create an error without an underlying OS error.
    pub fn new<P: Into<PathBuf>, O: Into<String>>(kind: ErrorKind, path: P, operation: O) -> Self {
        Self {
            kind,
            path: path.into(),
            operation: operation.into(),
            source: None,
        }
    }

    /// Create an error caused by a failed system call.
    pub fn os<P: Into<PathBuf>, O: Into<String>>(
        kind: ErrorKind,
        path: P,
        operation: O,
        source: io::Error,
    ) -> Self {
        Self {
            source: Some(source),
            ..Self::new(kind, path, operation)
        }
    }

    /// Failure category.
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Device path the error refers to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Operation that failed.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Underlying OS error, if any.
    pub const fn os_error(&self) -> Option<&io::Error> {
        self.source.as_ref()
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({})",
            self.path.display(),
            self.kind,
            self.operation
        )?;
        if let Some(err) = &self.source {
            write!(f, ": {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Attach device context to driver-level `io::Result`s.
pub(crate) trait ResultExt<T> {
    fn or_capture(self, kind: ErrorKind, path: &Path, operation: &str) -> Result<T>;
}

impl<T> ResultExt<T> for io::Result<T> {
    fn or_capture(self, kind: ErrorKind, path: &Path, operation: &str) -> Result<T> {
        self.map_err(|err| CaptureError::os(kind, path, operation, err))
    }
}
