//! Tunables for capture sessions and device discovery.

use std::path::PathBuf;
use std::time::Duration;

/// Number of kernel buffers requested per session.
pub const DEFAULT_BUFFER_COUNT: u32 = 10;

/// Dequeues discarded on non-infrared sensors while exposure settles.
///
/// Sensor specific and not verified against every camera; tune per device.
pub const DEFAULT_WARMUP_FRAMES: u32 = 8;

/// How long a single dequeue waits for the driver.
pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Which dequeued buffers a session may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmupPolicy {
    /// Leading dequeues discarded on non-infrared sensors.
    pub discard_frames: u32,
    /// Whether infrared sensors skip the warm-up discard.
    pub infrared_exempt: bool,
}

impl Default for WarmupPolicy {
    fn default() -> Self {
        Self {
            discard_frames: DEFAULT_WARMUP_FRAMES,
            infrared_exempt: true,
        }
    }
}

impl WarmupPolicy {
    /// Policy that accepts the first valid buffer from any sensor.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            discard_frames: 0,
            infrared_exempt: true,
        }
    }

    /// Dequeues to throw away before accepting anything.
    pub const fn discard_count(&self, infrared: bool) -> u32 {
        if infrared && self.infrared_exempt {
            0
        } else {
            self.discard_frames
        }
    }

    /// Whether the dequeue at zero-based `attempt` may be accepted.
    pub const fn is_eligible(&self, attempt: u32, infrared: bool) -> bool {
        attempt >= self.discard_count(infrared)
    }
}

/// Parameters of one capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Buffers requested from the driver; also the dequeue budget.
    pub buffer_count: u32,
    /// Warm-up discard policy.
    pub warmup: WarmupPolicy,
    /// Upper bound on one dequeue.
    pub dequeue_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            warmup: WarmupPolicy::default(),
            dequeue_timeout: DEFAULT_DEQUEUE_TIMEOUT,
        }
    }
}

impl CaptureConfig {
    /// Set the number of buffers.
    #[must_use]
    pub const fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    /// Set the warm-up policy.
    #[must_use]
    pub const fn with_warmup(mut self, warmup: WarmupPolicy) -> Self {
        self.warmup = warmup;
        self
    }

    /// Set the dequeue timeout.
    #[must_use]
    pub const fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }
}

/// Where the registry looks for device nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Directory scanned for device nodes.
    pub device_dir: PathBuf,
    /// File name prefix of candidate nodes.
    pub name_prefix: String,
    /// Session parameters given to every opened device.
    pub capture: CaptureConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            device_dir: PathBuf::from("/dev"),
            name_prefix: "video".to_owned(),
            capture: CaptureConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Scan a different directory.
    #[must_use]
    pub fn with_device_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.device_dir = dir.into();
        self
    }

    /// Match a different file name prefix.
    #[must_use]
    pub fn with_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Session parameters for the opened devices.
    #[must_use]
    pub fn with_capture(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }
}
