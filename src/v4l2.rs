//! V4L2 driver implementation using the v4l crate.
//!
//! Capability, format and streaming queries that the v4l crate exposes are
//! used as-is; the buffer protocol is driven with raw ioctls because the
//! session needs per-buffer control over mapping and release.
#![allow(unsafe_code)]

use std::io;
use std::os::raw::{c_int, c_void};
use std::path::Path;
use std::ptr::{self, NonNull};
use std::time::Duration;

use log::warn;
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::framesize::FrameSizeEnum;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l_sys;
use v4l::video::Capture;

use crate::error::{CaptureError, ErrorKind, Result, ResultExt};
use crate::format::{FourCC, PixelFormatDescriptor};
use crate::traits::{
    BufferLayout, DequeuedBuffer, DriverCapabilities, FrameSizeKind, MappedRegion, VideoDriver,
};

/// V4L2 device node opened read/write.
pub struct V4l2Driver {
    device: v4l::Device,
}

impl V4l2Driver {
    /// Open a device node.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CaptureError::new(ErrorKind::NotFound, path, "open"));
        }
        let device = v4l::Device::with_path(path).or_capture(ErrorKind::OpenFailed, path, "open")?;
        Ok(Self { device })
    }

    fn fd(&self) -> c_int {
        self.device.handle().fd()
    }

    /// Issue an ioctl on this device.
    ///
    /// # Safety
    ///
    /// `arg` must be the argument type the kernel expects for `request`.
    unsafe fn ioctl<T>(&self, request: v4l2::vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
        // SAFETY: the caller guarantees `arg` matches `request`
        unsafe { v4l2::ioctl(self.fd(), request, ptr::from_mut(arg).cast::<c_void>()) }
    }

    fn capture_buffer(index: u32) -> v4l_sys::v4l2_buffer {
        // SAFETY: v4l2_buffer is a plain C struct; all-zero is a valid value
        let mut buf: v4l_sys::v4l2_buffer = unsafe { std::mem::zeroed() };
        buf.index = index;
        buf.type_ = Type::VideoCapture as u32;
        buf.memory = Memory::Mmap as u32;
        buf
    }

    /// Wait until a buffer is ready to dequeue.
    fn wait_readable(&self, timeout: Duration) -> io::Result<()> {
        let mut pollfd = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);

        loop {
            // SAFETY: pollfd is a valid, exclusively borrowed array of one entry
            let ready = unsafe { libc::poll(&mut pollfd, 1, millis) };
            match ready {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no buffer ready within {timeout:?}"),
                    ))
                }
                n if n > 0 => return Ok(()),
                _ => {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                }
            }
        }
    }
}

/// `EINVAL` or `ENOTTY` terminate (or rule out) an enumeration.
fn is_end_of_enumeration(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EINVAL | libc::ENOTTY))
}

impl VideoDriver for V4l2Driver {
    type Mapping = V4l2Mapping;

    fn query_capabilities(&mut self) -> io::Result<DriverCapabilities> {
        // `capabilities` holds this node's device_caps, not the union over
        // every node of a multi-node driver
        let caps = self.device.query_caps()?;

        Ok(DriverCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            video_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            streaming: caps.capabilities.contains(Flags::STREAMING),
        })
    }

    fn enum_formats(&mut self) -> io::Result<Vec<FourCC>> {
        let formats = self.device.enum_formats()?;
        Ok(formats.into_iter().map(|desc| FourCC::from(desc.fourcc)).collect())
    }

    fn enum_frame_sizes(&mut self, fourcc: FourCC) -> io::Result<Vec<FrameSizeKind>> {
        match self.device.enum_framesizes(fourcc.into()) {
            Ok(sizes) => Ok(sizes
                .into_iter()
                .map(|frame_size| match frame_size.size {
                    FrameSizeEnum::Discrete(size) => FrameSizeKind::Discrete {
                        width: size.width,
                        height: size.height,
                    },
                    FrameSizeEnum::Stepwise(_) => FrameSizeKind::Stepwise,
                })
                .collect()),
            Err(err) if is_end_of_enumeration(&err) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    fn try_format(&mut self, request: &PixelFormatDescriptor) -> io::Result<PixelFormatDescriptor> {
        // SAFETY: v4l2_format is a plain C struct; all-zero is a valid value
        let mut fmt: v4l_sys::v4l2_format = unsafe { std::mem::zeroed() };
        fmt.type_ = Type::VideoCapture as u32;

        // SAFETY: `pix` is the active union member for VIDEO_CAPTURE, and
        // VIDIOC_TRY_FMT takes a v4l2_format
        unsafe {
            fmt.fmt.pix.width = request.width;
            fmt.fmt.pix.height = request.height;
            fmt.fmt.pix.pixelformat = request.fourcc.as_u32();
            self.ioctl(v4l2::vidioc::VIDIOC_TRY_FMT, &mut fmt)?;

            Ok(PixelFormatDescriptor {
                fourcc: FourCC::from_u32(fmt.fmt.pix.pixelformat),
                width: fmt.fmt.pix.width,
                height: fmt.fmt.pix.height,
                stride: fmt.fmt.pix.bytesperline,
                buffer_size: fmt.fmt.pix.sizeimage,
            })
        }
    }

    fn set_format(&mut self, request: &PixelFormatDescriptor) -> io::Result<PixelFormatDescriptor> {
        let mut fmt = self.device.format()?;

        fmt.width = request.width;
        fmt.height = request.height;
        fmt.fourcc = request.fourcc.into();

        let fmt = self.device.set_format(&fmt)?;

        Ok(PixelFormatDescriptor {
            fourcc: FourCC::from(fmt.fourcc),
            width: fmt.width,
            height: fmt.height,
            stride: fmt.stride,
            buffer_size: fmt.size,
        })
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        // SAFETY: v4l2_requestbuffers is a plain C struct; all-zero is a valid value
        let mut req: v4l_sys::v4l2_requestbuffers = unsafe { std::mem::zeroed() };
        req.count = count;
        req.type_ = Type::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;

        // SAFETY: VIDIOC_REQBUFS takes a v4l2_requestbuffers
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_REQBUFS, &mut req)? };
        Ok(req.count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferLayout> {
        let mut buf = Self::capture_buffer(index);
        // SAFETY: VIDIOC_QUERYBUF takes a v4l2_buffer; for MMAP memory the
        // driver fills `m.offset`
        unsafe {
            self.ioctl(v4l2::vidioc::VIDIOC_QUERYBUF, &mut buf)?;
            Ok(BufferLayout {
                index,
                offset: buf.m.offset,
                length: buf.length,
            })
        }
    }

    fn map_buffer(&mut self, layout: &BufferLayout) -> io::Result<Self::Mapping> {
        let len = layout.length as usize;
        let offset = libc::off_t::try_from(layout.offset)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

        // SAFETY: maps a fresh region chosen by the kernel; the offset and
        // length come from VIDIOC_QUERYBUF on the same descriptor
        let addr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd(),
                offset,
            )?
        };
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))?;

        Ok(V4l2Mapping { ptr, len })
    }

    fn enqueue(&mut self, index: u32) -> io::Result<()> {
        let mut buf = Self::capture_buffer(index);
        // SAFETY: VIDIOC_QBUF takes a v4l2_buffer
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_QBUF, &mut buf) }
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut typ = Type::VideoCapture as u32;
        // SAFETY: VIDIOC_STREAMON takes the buffer type as an int
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_STREAMON, &mut typ) }
    }

    fn dequeue(&mut self, timeout: Duration) -> io::Result<DequeuedBuffer> {
        self.wait_readable(timeout)?;

        let mut buf = Self::capture_buffer(0);
        // SAFETY: VIDIOC_DQBUF takes a v4l2_buffer
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_DQBUF, &mut buf)? };

        Ok(DequeuedBuffer {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
        })
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut typ = Type::VideoCapture as u32;
        // SAFETY: VIDIOC_STREAMOFF takes the buffer type as an int
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_STREAMOFF, &mut typ) }
    }
}

/// A driver buffer mapped with `mmap`; unmapped on drop.
pub struct V4l2Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl MappedRegion for V4l2Mapping {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: the region is mapped readable for `len` bytes until drop
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for V4l2Mapping {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe a live mapping created by `map_buffer`
        // and this is the only place it is unmapped
        let unmapped = unsafe { v4l2::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) };
        if let Err(err) = unmapped {
            warn!("munmap of {} bytes failed: {err}", self.len);
        }
    }
}
