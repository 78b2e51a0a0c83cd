//! One bounded capture against an open device.
//!
//! A [`CaptureSession`] walks the streaming I/O protocol:
//!
//! 1. `VIDIOC_S_FMT` with the caller's request; the driver's answer wins
//! 2. `VIDIOC_REQBUFS` for the configured number of mmap buffers
//! 3. `VIDIOC_QUERYBUF` + `mmap` + `VIDIOC_QBUF` for each buffer
//! 4. `VIDIOC_STREAMON`
//! 5. up to `buffer_count` `VIDIOC_DQBUF`s, filtered by the warm-up policy
//! 6. `VIDIOC_STREAMOFF`, `munmap` of every buffer, `VIDIOC_REQBUFS(0)`
//!
//! Teardown is tracked by flags on the session and runs from `Drop`, so every
//! exit path releases exactly what setup acquired, once.

use std::iter::FusedIterator;
use std::path::Path;
use std::sync::MutexGuard;

use log::{debug, trace, warn};

use crate::config::CaptureConfig;
use crate::error::{CaptureError, ErrorKind, Result, ResultExt};
use crate::format::PixelFormatDescriptor;
use crate::frame::Frame;
use crate::traits::{DequeuedBuffer, FormatConverter, MappedRegion, VideoDriver};

/// A running capture holding exclusive access to its device.
///
/// Yields converted frames lazily, in dequeue order, until `count` frames
/// were produced or the dequeue budget is spent. The stream is torn down as
/// soon as the sequence ends, on error, or when the session is dropped.
pub struct CaptureSession<'a, D: VideoDriver> {
    driver: MutexGuard<'a, D>,
    path: &'a Path,
    converter: &'a dyn FormatConverter,
    config: &'a CaptureConfig,
    infrared: bool,
    negotiated: PixelFormatDescriptor,
    mappings: Vec<D::Mapping>,
    allocated: bool,
    streaming: bool,
    attempts: u32,
    wanted: usize,
    yielded: usize,
    done: bool,
}

impl<'a, D: VideoDriver> CaptureSession<'a, D> {
    /// Run setup (steps 1-4) and return a session ready to dequeue.
    pub(crate) fn start(
        driver: MutexGuard<'a, D>,
        path: &'a Path,
        converter: &'a dyn FormatConverter,
        config: &'a CaptureConfig,
        infrared: bool,
        request: &PixelFormatDescriptor,
        count: usize,
    ) -> Result<Self> {
        let mut session = Self {
            driver,
            path,
            converter,
            config,
            infrared,
            negotiated: *request,
            mappings: Vec::new(),
            allocated: false,
            streaming: false,
            attempts: 0,
            wanted: count,
            yielded: 0,
            done: false,
        };

        // An early return drops `session`, which tears down whatever was set up
        session.negotiate(request)?;
        session.allocate()?;
        session.map_and_enqueue()?;
        session.stream_on()?;
        Ok(session)
    }

    /// The format the driver actually applied.
    pub const fn negotiated_format(&self) -> &PixelFormatDescriptor {
        &self.negotiated
    }

    /// Dequeues performed so far.
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Stop early and release every driver resource.
    ///
    /// Reports `StreamStopFailed` or `BufferReleaseFailed` if teardown fails.
    pub fn finish(mut self) -> Result<()> {
        self.done = true;
        self.teardown()
    }

    fn negotiate(&mut self, request: &PixelFormatDescriptor) -> Result<()> {
        let wanted = PixelFormatDescriptor::new(request.fourcc, request.width, request.height);
        let applied = self
            .driver
            .set_format(&wanted)
            .or_capture(ErrorKind::NegotiationFailed, self.path, "VIDIOC_S_FMT")?;

        if applied.fourcc != wanted.fourcc
            || applied.width != wanted.width
            || applied.height != wanted.height
        {
            debug!(
                "{}: requested {} {}x{}, driver applied {}",
                self.path.display(),
                wanted.fourcc,
                wanted.width,
                wanted.height,
                applied
            );
        }
        self.negotiated = applied;
        Ok(())
    }

    fn allocate(&mut self) -> Result<()> {
        let count = self.config.buffer_count;
        if count == 0 {
            return Err(CaptureError::new(
                ErrorKind::BufferRequestFailed,
                self.path,
                "VIDIOC_REQBUFS: buffer count must be non-zero",
            ));
        }

        let granted = self.driver.request_buffers(count).or_capture(
            ErrorKind::BufferRequestFailed,
            self.path,
            "VIDIOC_REQBUFS",
        )?;
        self.allocated = true;

        if granted < count {
            return Err(CaptureError::new(
                ErrorKind::BufferRequestFailed,
                self.path,
                format!("VIDIOC_REQBUFS granted {granted} of {count} buffers"),
            ));
        }
        trace!("{}: {granted} buffer(s) allocated", self.path.display());
        Ok(())
    }

    fn map_and_enqueue(&mut self) -> Result<()> {
        for index in 0..self.config.buffer_count {
            let layout = self.driver.query_buffer(index).or_capture(
                ErrorKind::BufferMapFailed,
                self.path,
                "VIDIOC_QUERYBUF",
            )?;
            let mapping = self
                .driver
                .map_buffer(&layout)
                .or_capture(ErrorKind::BufferMapFailed, self.path, "mmap")?;
            self.mappings.push(mapping);

            self.driver
                .enqueue(index)
                .or_capture(ErrorKind::EnqueueFailed, self.path, "VIDIOC_QBUF")?;
        }
        Ok(())
    }

    fn stream_on(&mut self) -> Result<()> {
        self.driver.stream_on().or_capture(
            ErrorKind::StreamStartFailed,
            self.path,
            "VIDIOC_STREAMON",
        )?;
        self.streaming = true;
        Ok(())
    }

    /// Dequeue until a buffer passes the warm-up policy and carries data.
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.yielded >= self.wanted {
            return Ok(None);
        }

        while self.attempts < self.config.buffer_count {
            let attempt = self.attempts;
            self.attempts += 1;

            let buffer = self
                .driver
                .dequeue(self.config.dequeue_timeout)
                .or_capture(ErrorKind::DequeueFailed, self.path, "VIDIOC_DQBUF")?;

            if !self.config.warmup.is_eligible(attempt, self.infrared) {
                trace!("{}: discarding warm-up dequeue {attempt}", self.path.display());
                continue;
            }
            if buffer.bytes_used == 0 {
                trace!("{}: dequeue {attempt} carried no data", self.path.display());
                continue;
            }

            let frame = self.convert(&buffer)?;
            self.yielded += 1;
            return Ok(Some(frame));
        }
        Ok(None)
    }

    /// Copy a dequeued buffer out of its mapping and convert it to RGB.
    fn convert(&self, buffer: &DequeuedBuffer) -> Result<Frame> {
        let mapping = self.mappings.get(buffer.index as usize).ok_or_else(|| {
            CaptureError::new(
                ErrorKind::DequeueFailed,
                self.path,
                format!("VIDIOC_DQBUF returned unknown buffer {}", buffer.index),
            )
        })?;
        let mapped = mapping.as_slice();
        let used = (buffer.bytes_used as usize).min(mapped.len());
        let raw = mapped.get(..used).unwrap_or(mapped).to_vec();

        let rgb = self
            .converter
            .to_rgb24(&self.negotiated, &raw)
            .map_err(|err| {
                CaptureError::new(
                    ErrorKind::ConversionFailed,
                    self.path,
                    format!("{} to RGB3: {err}", self.negotiated.fourcc),
                )
            })?;

        let (width, height) = (self.negotiated.width, self.negotiated.height);
        let produced = rgb.len();
        Frame::from_rgb24(width, height, rgb)
            .map(|frame| frame.with_sequence(buffer.sequence))
            .ok_or_else(|| {
                CaptureError::new(
                    ErrorKind::ConversionFailed,
                    self.path,
                    format!("converter produced {produced} bytes for {width}x{height}"),
                )
            })
    }

    /// Stream off, unmap, release. Safe to call repeatedly.
    ///
    /// Every step runs even if an earlier one failed; the first failure is
    /// returned.
    fn teardown(&mut self) -> Result<()> {
        let mut first_error = None;

        if self.streaming {
            self.streaming = false;
            if let Err(err) = self.driver.stream_off() {
                first_error.get_or_insert(CaptureError::os(
                    ErrorKind::StreamStopFailed,
                    self.path,
                    "VIDIOC_STREAMOFF",
                    err,
                ));
            }
        }

        if !self.mappings.is_empty() {
            trace!("{}: unmapping {} buffer(s)", self.path.display(), self.mappings.len());
            self.mappings.clear();
        }

        if self.allocated {
            self.allocated = false;
            if let Err(err) = self.driver.request_buffers(0) {
                first_error.get_or_insert(CaptureError::os(
                    ErrorKind::BufferReleaseFailed,
                    self.path,
                    "VIDIOC_REQBUFS(0)",
                    err,
                ));
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl<D: VideoDriver> Iterator for CaptureSession<'_, D> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                let teardown = self.teardown();
                if self.yielded == 0 && self.wanted > 0 {
                    if let Err(err) = teardown {
                        warn!("{err}");
                    }
                    Some(Err(CaptureError::new(
                        ErrorKind::NoFrameData,
                        self.path,
                        format!("no valid buffer in {} dequeue(s)", self.attempts),
                    )))
                } else {
                    teardown.err().map(Err)
                }
            }
            Err(err) => {
                self.done = true;
                if let Err(teardown) = self.teardown() {
                    warn!("{teardown}");
                }
                Some(Err(err))
            }
        }
    }
}

impl<D: VideoDriver> FusedIterator for CaptureSession<'_, D> {}

impl<D: VideoDriver> Drop for CaptureSession<'_, D> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            warn!("{err}");
        }
    }
}
