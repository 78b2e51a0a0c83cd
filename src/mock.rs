//! Mock driver implementation for testing without hardware.
//!
//! Mimics the parts of the V4L2 buffer protocol the capture pipeline relies
//! on, including the kernel's refusal to release buffers that are still
//! mapped, and counts every map, unmap and release so tests can check that
//! sessions never leak or double-free.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::format::{FourCC, PixelFormatDescriptor};
use crate::traits::{
    BufferLayout, DequeuedBuffer, DriverCapabilities, FrameSizeKind, MappedRegion, VideoDriver,
};

/// Bytes of padding the mock adds to every line.
const LINE_PADDING: u32 = 16;

/// Driver call to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `VIDIOC_QUERYCAP`.
    QueryCapabilities,
    /// `VIDIOC_ENUM_FMT`.
    EnumFormats,
    /// `VIDIOC_ENUM_FRAMESIZES`.
    EnumFrameSizes,
    /// `VIDIOC_TRY_FMT`.
    TryFormat,
    /// `VIDIOC_S_FMT`.
    SetFormat,
    /// `VIDIOC_REQBUFS` with a non-zero count.
    RequestBuffers,
    /// `mmap` of the buffer with this index.
    MapBuffer(u32),
    /// `VIDIOC_QBUF` of the buffer with this index.
    Enqueue(u32),
    /// `VIDIOC_STREAMON`.
    StreamOn,
    /// The dequeue with this zero-based attempt number.
    Dequeue(u32),
    /// `VIDIOC_STREAMOFF`.
    StreamOff,
    /// `VIDIOC_REQBUFS` with a zero count.
    Release,
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Every pixel has this luma.
    Solid(u8),
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
}

/// Counters shared between a mock driver and its mappings.
#[derive(Debug, Default)]
pub struct Tracker {
    maps: AtomicUsize,
    unmaps: AtomicUsize,
    live_mappings: AtomicIsize,
    allocations: AtomicUsize,
    releases: AtomicUsize,
    stream_ons: AtomicUsize,
    stream_offs: AtomicUsize,
    dequeues: AtomicUsize,
}

impl Tracker {
    /// Buffers mapped so far.
    pub fn maps(&self) -> usize {
        self.maps.load(Ordering::SeqCst)
    }

    /// Buffers unmapped so far.
    pub fn unmaps(&self) -> usize {
        self.unmaps.load(Ordering::SeqCst)
    }

    /// Mappings currently alive.
    pub fn live_mappings(&self) -> isize {
        self.live_mappings.load(Ordering::SeqCst)
    }

    /// Successful non-zero buffer requests.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Successful zero-count buffer requests.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Successful stream starts.
    pub fn stream_ons(&self) -> usize {
        self.stream_ons.load(Ordering::SeqCst)
    }

    /// Stream stops, failed ones included.
    pub fn stream_offs(&self) -> usize {
        self.stream_offs.load(Ordering::SeqCst)
    }

    /// Dequeue calls, failed ones included.
    pub fn dequeues(&self) -> usize {
        self.dequeues.load(Ordering::SeqCst)
    }
}

/// A fake mapping holding a copy of the buffer contents.
pub struct MockMapping {
    data: Vec<u8>,
    tracker: Arc<Tracker>,
}

impl MappedRegion for MockMapping {
    fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for MockMapping {
    fn drop(&mut self) {
        self.tracker.unmaps.fetch_add(1, Ordering::SeqCst);
        self.tracker.live_mappings.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock driver for testing without hardware.
pub struct MockDriver {
    capabilities: DriverCapabilities,
    formats: Vec<(FourCC, Vec<FrameSizeKind>)>,
    faults: Vec<Fault>,
    payloads: Vec<u32>,
    pattern: TestPattern,
    max_buffers: u32,
    image_slack: u32,
    current: Option<PixelFormatDescriptor>,
    allocated: u32,
    queued: VecDeque<u32>,
    streaming: bool,
    attempts: u32,
    tracker: Arc<Tracker>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create a capture-capable mock driver with no formats.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DriverCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                video_capture: true,
                streaming: true,
            },
            formats: Vec::new(),
            faults: Vec::new(),
            payloads: Vec::new(),
            pattern: TestPattern::Solid(0x80),
            max_buffers: 32,
            image_slack: 0,
            current: None,
            allocated: 0,
            queued: VecDeque::new(),
            streaming: false,
            attempts: 0,
            tracker: Arc::new(Tracker::default()),
        }
    }

    /// A healthy camera offering GREY and YUYV at 640x480 and 352x288.
    #[must_use]
    pub fn camera() -> Self {
        Self::new()
            .with_format(FourCC::GREY, &[(640, 480), (352, 288)])
            .with_format(FourCC::YUYV, &[(640, 480), (352, 288)])
    }

    /// Advertise a pixel format with discrete sizes.
    #[must_use]
    pub fn with_format(mut self, fourcc: FourCC, sizes: &[(u32, u32)]) -> Self {
        let sizes = sizes
            .iter()
            .map(|&(width, height)| FrameSizeKind::Discrete { width, height });
        if let Some((_, existing)) = self.formats.iter_mut().find(|(f, _)| *f == fourcc) {
            existing.extend(sizes);
        } else {
            self.formats.push((fourcc, sizes.collect()));
        }
        self
    }

    /// Advertise a stepwise size range for a pixel format.
    #[must_use]
    pub fn with_stepwise(mut self, fourcc: FourCC) -> Self {
        if let Some((_, existing)) = self.formats.iter_mut().find(|(f, _)| *f == fourcc) {
            existing.push(FrameSizeKind::Stepwise);
        } else {
            self.formats.push((fourcc, vec![FrameSizeKind::Stepwise]));
        }
        self
    }

    /// Replace the capability report.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DriverCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Rename the card, e.g. to make it look like an infrared sensor.
    #[must_use]
    pub fn with_card(mut self, card: &str) -> Self {
        self.capabilities.card = card.to_owned();
        self
    }

    /// Fail one driver call.
    #[must_use]
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Bytes used reported by successive dequeues of a session.
    ///
    /// Dequeues past the end of the script report a full image.
    #[must_use]
    pub fn with_payloads(mut self, payloads: &[u32]) -> Self {
        self.payloads = payloads.to_vec();
        self
    }

    /// Fill buffers with a test pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Grant at most this many buffers.
    #[must_use]
    pub fn with_max_buffers(mut self, max_buffers: u32) -> Self {
        self.max_buffers = max_buffers;
        self
    }

    /// Report image sizes this many bytes larger than `stride * height`,
    /// the way drivers that round up to a page boundary do.
    #[must_use]
    pub fn with_image_slack(mut self, bytes: u32) -> Self {
        self.image_slack = bytes;
        self
    }

    /// Shared counters, usable after the driver has been moved.
    pub fn tracker(&self) -> Arc<Tracker> {
        Arc::clone(&self.tracker)
    }

    /// Image size the mock reports for a format.
    pub fn image_size(&self, fourcc: FourCC, width: u32, height: u32) -> u32 {
        let packed = match bytes_per_pixel(fourcc) {
            Some(_) => self.line_stride(fourcc, width) * height,
            None => width * height * 2,
        };
        packed + self.image_slack
    }

    /// Bytes per line the mock reports; zero for compressed formats.
    #[allow(clippy::unused_self)]
    pub fn line_stride(&self, fourcc: FourCC, width: u32) -> u32 {
        bytes_per_pixel(fourcc).map_or(0, |bpp| width * bpp + LINE_PADDING)
    }

    fn fails(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }

    fn nearest(&self, request: &PixelFormatDescriptor) -> io::Result<PixelFormatDescriptor> {
        let (fourcc, sizes) = self
            .formats
            .iter()
            .find(|(f, _)| *f == request.fourcc)
            .or_else(|| self.formats.first())
            .ok_or_else(einval)?;

        let (width, height) = sizes
            .iter()
            .filter_map(|size| match *size {
                FrameSizeKind::Discrete { width, height } => Some((width, height)),
                FrameSizeKind::Stepwise => None,
            })
            .min_by_key(|&(w, h)| w.abs_diff(request.width) + h.abs_diff(request.height))
            .ok_or_else(einval)?;

        Ok(PixelFormatDescriptor {
            fourcc: *fourcc,
            width,
            height,
            stride: self.line_stride(*fourcc, width),
            buffer_size: self.image_size(*fourcc, width, height),
        })
    }
}

impl VideoDriver for MockDriver {
    type Mapping = MockMapping;

    fn query_capabilities(&mut self) -> io::Result<DriverCapabilities> {
        if self.fails(Fault::QueryCapabilities) {
            return Err(io::Error::from_raw_os_error(libc::ENOTTY));
        }
        Ok(self.capabilities.clone())
    }

    fn enum_formats(&mut self) -> io::Result<Vec<FourCC>> {
        if self.fails(Fault::EnumFormats) {
            return Err(einval());
        }
        Ok(self.formats.iter().map(|(fourcc, _)| *fourcc).collect())
    }

    fn enum_frame_sizes(&mut self, fourcc: FourCC) -> io::Result<Vec<FrameSizeKind>> {
        if self.fails(Fault::EnumFrameSizes) {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        Ok(self
            .formats
            .iter()
            .find(|(f, _)| *f == fourcc)
            .map(|(_, sizes)| sizes.clone())
            .unwrap_or_default())
    }

    fn try_format(&mut self, request: &PixelFormatDescriptor) -> io::Result<PixelFormatDescriptor> {
        if self.fails(Fault::TryFormat) {
            return Err(einval());
        }
        self.nearest(request)
    }

    fn set_format(&mut self, request: &PixelFormatDescriptor) -> io::Result<PixelFormatDescriptor> {
        if self.fails(Fault::SetFormat) || self.allocated > 0 {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        let applied = self.nearest(request)?;
        self.current = Some(applied);
        Ok(applied)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        if count == 0 {
            if self.fails(Fault::Release) || self.tracker.live_mappings() > 0 || self.streaming {
                return Err(io::Error::from_raw_os_error(libc::EBUSY));
            }
            self.allocated = 0;
            self.tracker.releases.fetch_add(1, Ordering::SeqCst);
            return Ok(0);
        }

        if self.fails(Fault::RequestBuffers) {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        if self.allocated > 0 || self.current.is_none() {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        self.allocated = count.min(self.max_buffers);
        self.tracker.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(self.allocated)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferLayout> {
        let format = self.current.ok_or_else(einval)?;
        if index >= self.allocated {
            return Err(einval());
        }
        Ok(BufferLayout {
            index,
            offset: index * format.buffer_size,
            length: format.buffer_size,
        })
    }

    fn map_buffer(&mut self, layout: &BufferLayout) -> io::Result<Self::Mapping> {
        if self.fails(Fault::MapBuffer(layout.index)) {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        let format = self.current.ok_or_else(einval)?;

        self.tracker.maps.fetch_add(1, Ordering::SeqCst);
        self.tracker.live_mappings.fetch_add(1, Ordering::SeqCst);
        Ok(MockMapping {
            data: generate_test_frame(&format, self.pattern),
            tracker: Arc::clone(&self.tracker),
        })
    }

    fn enqueue(&mut self, index: u32) -> io::Result<()> {
        if self.fails(Fault::Enqueue(index)) || index >= self.allocated {
            return Err(einval());
        }
        self.queued.push_back(index);
        Ok(())
    }

    fn stream_on(&mut self) -> io::Result<()> {
        if self.fails(Fault::StreamOn) || self.queued.is_empty() {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        self.streaming = true;
        self.attempts = 0;
        self.tracker.stream_ons.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dequeue(&mut self, _timeout: Duration) -> io::Result<DequeuedBuffer> {
        self.tracker.dequeues.fetch_add(1, Ordering::SeqCst);
        let attempt = self.attempts;
        self.attempts += 1;

        if !self.streaming {
            return Err(einval());
        }
        if self.fails(Fault::Dequeue(attempt)) {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        let index = self
            .queued
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::TimedOut))?;
        let full = self.current.map_or(0, |f| f.buffer_size);

        Ok(DequeuedBuffer {
            index,
            bytes_used: self.payloads.get(attempt as usize).copied().unwrap_or(full),
            sequence: attempt,
        })
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.tracker.stream_offs.fetch_add(1, Ordering::SeqCst);
        if self.fails(Fault::StreamOff) {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        self.streaming = false;
        self.queued.clear();
        Ok(())
    }
}

fn einval() -> io::Error {
    io::Error::from_raw_os_error(libc::EINVAL)
}

const fn bytes_per_pixel(fourcc: FourCC) -> Option<u32> {
    match fourcc {
        FourCC::GREY => Some(1),
        FourCC::YUYV | FourCC::UYVY => Some(2),
        FourCC::RGB3 | FourCC::BGR3 => Some(3),
        _ => None,
    }
}

/// Generate buffer contents for a format.
///
/// GREY and YUYV get the pattern; other formats are filled with the solid
/// luma or zeros.
pub fn generate_test_frame(format: &PixelFormatDescriptor, pattern: TestPattern) -> Vec<u8> {
    let mut data = vec![0u8; format.buffer_size as usize];
    let stride = (format.stride as usize).max(1);
    let height = format.height as usize;

    match (format.fourcc, pattern) {
        (_, TestPattern::Solid(y)) if format.fourcc != FourCC::YUYV => data.fill(y),
        (FourCC::YUYV, _) => {
            for line in data.chunks_mut(stride).take(height) {
                fill_yuyv_line(line, format.width, pattern);
            }
        }
        (FourCC::GREY, _) => {
            for line in data.chunks_mut(stride).take(height) {
                for (x, px) in line.iter_mut().take(format.width as usize).enumerate() {
                    #[allow(clippy::cast_possible_truncation)]
                    let x = x as u32;
                    *px = luma_at(x, format.width, pattern);
                }
            }
        }
        _ => {}
    }
    data
}

/// YUYV values for SMPTE bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black.
const COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

fn bar_at(x: u32, width: u32) -> (u8, u8, u8) {
    let bar_width = (width / 8).max(1);
    let index = (x / bar_width).min(7) as usize;
    COLOR_BARS.get(index).copied().unwrap_or((16, 128, 128))
}

fn luma_at(x: u32, width: u32, pattern: TestPattern) -> u8 {
    match pattern {
        TestPattern::Solid(y) => y,
        TestPattern::ColorBars => bar_at(x, width).0,
        #[allow(clippy::cast_possible_truncation)]
        TestPattern::Gradient => ((x * 255) / width.max(1)) as u8,
    }
}

fn fill_yuyv_line(line: &mut [u8], width: u32, pattern: TestPattern) {
    for (pair, group) in line.chunks_exact_mut(4).take(width as usize / 2).enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let x = pair as u32 * 2;
        let (y, u, v) = match pattern {
            TestPattern::ColorBars => bar_at(x, width),
            _ => (luma_at(x, width, pattern), 128, 128),
        };
        group.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_negotiates_nearest_size() {
        let mut driver = MockDriver::new().with_format(FourCC::GREY, &[(352, 288)]);
        let applied = driver
            .set_format(&PixelFormatDescriptor::new(FourCC::GREY, 640, 480))
            .expect("set_format should succeed");
        assert_eq!((applied.width, applied.height), (352, 288));
        assert_eq!(applied.stride, 352 + LINE_PADDING);
        assert_eq!(applied.buffer_size, (352 + LINE_PADDING) * 288);
    }

    #[test]
    fn test_image_slack_is_left_blank() {
        let mut driver = MockDriver::new()
            .with_format(FourCC::GREY, &[(64, 4)])
            .with_image_slack(100)
            .with_pattern(TestPattern::Gradient);
        let format = driver
            .set_format(&PixelFormatDescriptor::new(FourCC::GREY, 64, 4))
            .expect("set_format should succeed");
        assert_eq!(format.buffer_size, format.stride * 4 + 100);

        let data = generate_test_frame(&format, TestPattern::Gradient);
        let image_end = (format.stride * 4) as usize;
        assert!(data.get(image_end..).is_some_and(|tail| tail.iter().all(|&b| b == 0)));
        // Last row carries the pattern
        let last_row = image_end - format.stride as usize;
        assert!(data.get(last_row + 63).is_some_and(|&y| y > 200));
    }

    #[test]
    fn test_mock_refuses_release_while_mapped() {
        let mut driver = MockDriver::camera();
        driver
            .set_format(&PixelFormatDescriptor::new(FourCC::GREY, 352, 288))
            .expect("set_format should succeed");
        assert_eq!(driver.request_buffers(2).expect("reqbufs"), 2);

        let layout = driver.query_buffer(0).expect("querybuf");
        let mapping = driver.map_buffer(&layout).expect("mmap");
        assert_eq!(mapping.as_slice().len(), layout.length as usize);
        assert!(driver.request_buffers(0).is_err());

        drop(mapping);
        assert_eq!(driver.request_buffers(0).expect("release"), 0);
        assert_eq!(driver.tracker().unmaps(), 1);
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = PixelFormatDescriptor {
            fourcc: FourCC::YUYV,
            width: 640,
            height: 480,
            stride: 640 * 2,
            buffer_size: 640 * 480 * 2,
        };
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        assert_eq!(data.len(), (640 * 480 * 2) as usize);
        // First bar should be white (Y=235)
        assert_eq!(data.first(), Some(&235));
    }

    #[test]
    fn test_gradient_pattern() {
        let format = PixelFormatDescriptor {
            fourcc: FourCC::GREY,
            width: 256,
            height: 2,
            stride: 256,
            buffer_size: 256 * 2,
        };
        let data = generate_test_frame(&format, TestPattern::Gradient);

        assert!(data.first().is_some_and(|&y| y < 10));
        assert!(data.get(255).is_some_and(|&y| y > 200));
    }
}
