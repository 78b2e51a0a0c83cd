//! Native pixel formats to packed RGB24.

use crate::format::{FourCC, PixelFormatDescriptor};
use crate::traits::{ConversionError, FormatConverter};

/// Default conversion service.
///
/// Handles RGB3, BGR3, GREY, YUYV, UYVY and MJPG. Lines are located by the
/// driver-reported stride; any bytes past the last line are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct RgbConverter;

impl FormatConverter for RgbConverter {
    fn to_rgb24(
        &self,
        format: &PixelFormatDescriptor,
        data: &[u8],
    ) -> Result<Vec<u8>, ConversionError> {
        match format.fourcc {
            FourCC::RGB3 => convert_rows(format, data, 3, |row, out| out.extend_from_slice(row)),
            FourCC::BGR3 => convert_rows(format, data, 3, |row, out| {
                for px in row.chunks_exact(3) {
                    out.extend(px.iter().rev());
                }
            }),
            FourCC::GREY => convert_rows(format, data, 1, |row, out| {
                for &luma in row {
                    out.extend_from_slice(&[luma, luma, luma]);
                }
            }),
            FourCC::YUYV => convert_rows(format, data, 2, |row, out| {
                packed_422_row(row, out, [0, 1, 2, 3]);
            }),
            FourCC::UYVY => convert_rows(format, data, 2, |row, out| {
                packed_422_row(row, out, [1, 0, 3, 2]);
            }),
            FourCC::MJPG => decode_jpeg(format, data),
            other => Err(ConversionError(format!("unsupported pixel format {other}"))),
        }
    }
}

/// Bytes between the start of consecutive lines.
///
/// A stride shorter than a packed row (including an unreported zero) means
/// the lines are packed.
fn line_stride(format: &PixelFormatDescriptor, row_len: usize) -> usize {
    (format.stride as usize).max(row_len)
}

fn convert_rows<F>(
    format: &PixelFormatDescriptor,
    data: &[u8],
    bytes_per_pixel: usize,
    mut convert_row: F,
) -> Result<Vec<u8>, ConversionError>
where
    F: FnMut(&[u8], &mut Vec<u8>),
{
    let width = format.width as usize;
    let height = format.height as usize;
    let row_len = width * bytes_per_pixel;
    let stride = line_stride(format, row_len);

    let needed = if height == 0 {
        0
    } else {
        stride * (height - 1) + row_len
    };
    if data.len() < needed {
        return Err(ConversionError(format!(
            "{} {width}x{height}: expected at least {needed} bytes, got {}",
            format.fourcc,
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(width * height * 3);
    for line in data.chunks(stride.max(1)).take(height) {
        let row = line.get(..row_len).unwrap_or(line);
        convert_row(row, &mut out);
    }
    Ok(out)
}

/// Convert one line of 4:2:2 packed pixels.
///
/// `order` gives the positions of Y0, U, Y1 and V inside each 4-byte group.
fn packed_422_row(row: &[u8], out: &mut Vec<u8>, order: [usize; 4]) {
    let [y0_at, u_at, y1_at, v_at] = order;
    for group in row.chunks(4) {
        let u = group.get(u_at).copied().unwrap_or(128);
        let v = group.get(v_at).copied().unwrap_or(128);
        if let Some(&y0) = group.get(y0_at) {
            out.extend_from_slice(&yuv_to_rgb(y0, u, v));
        }
        if group.len() == 4 {
            if let Some(&y1) = group.get(y1_at) {
                out.extend_from_slice(&yuv_to_rgb(y1, u, v));
            }
        }
    }
}

fn decode_jpeg(format: &PixelFormatDescriptor, data: &[u8]) -> Result<Vec<u8>, ConversionError> {
    let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(|err| ConversionError(format!("MJPG decode failed: {err}")))?
        .to_rgb8();

    if decoded.width() != format.width || decoded.height() != format.height {
        return Err(ConversionError(format!(
            "MJPG frame is {}x{}, negotiated {}x{}",
            decoded.width(),
            decoded.height(),
            format.width,
            format.height
        )));
    }
    Ok(decoded.into_raw())
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |val: f32| -> u8 { val.clamp(0.0, 255.0) as u8 };

    [clamp(r), clamp(g), clamp(b)]
}
