//! Pixel format conversion for frames downloaded in a format other than the
//! one the caller asked for.
//!
//! Hardware usually downloads NV12 only. When the configured output format is
//! something else the decoder downloads NV12 (or yuv420p) into a scratch frame
//! and converts it here.

use crate::{DecodeError, PixelFormat, SoftwareFrame};

/// Returns true if frames in `format` can be converted to any output format.
#[must_use]
pub fn is_convertible_source(format: PixelFormat) -> bool {
    format.is_yuv420()
}

/// Convert `src` into `dst` as `target`, reshaping `dst` as needed.
pub fn convert(src: &SoftwareFrame, dst: &mut SoftwareFrame, target: PixelFormat) -> Result<(), DecodeError> {
    if !is_convertible_source(src.format()) {
        return Err(DecodeError::conversion(format!(
            "conversion from {} not implemented",
            src.format()
        )));
    }

    dst.reshape(src.width(), src.height(), target)
        .map_err(|e| DecodeError::conversion(e.to_string()))?;
    dst.set_pts(src.pts());

    match (src.format(), target) {
        (from, to) if from == to => {
            dst.data_mut().copy_from_slice(src.data());
        }
        (PixelFormat::Nv12, PixelFormat::Yuv420p) => nv12_to_yuv420p(src, dst),
        (PixelFormat::Yuv420p, PixelFormat::Nv12) => yuv420p_to_nv12(src, dst),
        (_, packed) => yuv420_to_packed(src, dst, PackedOrder::of(packed)),
    }
    Ok(())
}

/// Split the interleaved UV plane into U and V.
fn nv12_to_yuv420p(src: &SoftwareFrame, dst: &mut SoftwareFrame) {
    dst.plane_mut(0).copy_from_slice(src.plane(0));
    let uv = src.plane(1);
    for (i, pair) in uv.chunks_exact(2).enumerate() {
        dst.plane_mut(1)[i] = pair[0];
        dst.plane_mut(2)[i] = pair[1];
    }
}

/// Interleave U and V planes.
fn yuv420p_to_nv12(src: &SoftwareFrame, dst: &mut SoftwareFrame) {
    dst.plane_mut(0).copy_from_slice(src.plane(0));
    let u_plane = src.plane(1);
    let v_plane = src.plane(2);
    let uv = dst.plane_mut(1);
    for (i, (&u, &v)) in u_plane.iter().zip(v_plane).enumerate() {
        uv[i * 2] = u;
        uv[i * 2 + 1] = v;
    }
}

/// Byte positions of each channel inside a packed pixel.
#[derive(Debug, Clone, Copy)]
struct PackedOrder {
    bytes_per_pixel: usize,
    r: usize,
    g: usize,
    b: usize,
    /// Fourth byte and the value written to it.
    fill: Option<(usize, u8)>,
}

impl PackedOrder {
    fn of(format: PixelFormat) -> Self {
        let (bytes_per_pixel, r, g, b, fill) = match format {
            PixelFormat::Bgr24 => (3, 2, 1, 0, None),
            PixelFormat::Rgb0 => (4, 0, 1, 2, Some((3, 0))),
            PixelFormat::Bgr0 => (4, 2, 1, 0, Some((3, 0))),
            PixelFormat::Rgba => (4, 0, 1, 2, Some((3, 255))),
            PixelFormat::Bgra => (4, 2, 1, 0, Some((3, 255))),
            _ => (3, 0, 1, 2, None),
        };
        Self {
            bytes_per_pixel,
            r,
            g,
            b,
            fill,
        }
    }
}

/// BT.601 limited-range YUV 4:2:0 to packed RGB.
fn yuv420_to_packed(src: &SoftwareFrame, dst: &mut SoftwareFrame, order: PackedOrder) {
    let width = src.width() as usize;
    let height = src.height() as usize;
    let interleaved = src.format() == PixelFormat::Nv12;
    let y_plane = src.plane(0);
    let y_stride = src.linesize(0);
    let c_stride = src.linesize(1);
    let out_stride = dst.linesize(0);
    let out = dst.plane_mut(0);

    for row in 0..height {
        for col in 0..width {
            let y = y_plane[row * y_stride + col] as i32;
            let (u, v) = if interleaved {
                let idx = (row / 2) * c_stride + (col / 2) * 2;
                let uv = src.plane(1);
                (uv[idx] as i32, uv[idx + 1] as i32)
            } else {
                let idx = (row / 2) * c_stride + col / 2;
                (src.plane(1)[idx] as i32, src.plane(2)[idx] as i32)
            };

            let c = y - 16;
            let d = u - 128;
            let e = v - 128;
            let r = (298 * c + 409 * e + 128) >> 8;
            let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
            let b = (298 * c + 516 * d + 128) >> 8;

            let px = row * out_stride + col * order.bytes_per_pixel;
            out[px + order.r] = r.clamp(0, 255) as u8;
            out[px + order.g] = g.clamp(0, 255) as u8;
            out[px + order.b] = b.clamp(0, 255) as u8;
            if let Some((offset, value)) = order.fill {
                out[px + offset] = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nv12_frame(width: u32, height: u32, y: u8, u: u8, v: u8) -> SoftwareFrame {
        let mut frame = SoftwareFrame::allocate(width, height, PixelFormat::Nv12).unwrap();
        frame.plane_mut(0).fill(y);
        for pair in frame.plane_mut(1).chunks_exact_mut(2) {
            pair[0] = u;
            pair[1] = v;
        }
        frame
    }

    #[test]
    fn test_nv12_to_yuv420p_and_back() {
        let mut src = SoftwareFrame::allocate(4, 4, PixelFormat::Nv12).unwrap();
        src.plane_mut(0).copy_from_slice(&[16; 16]);
        src.plane_mut(1).copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut planar = SoftwareFrame::default();
        convert(&src, &mut planar, PixelFormat::Yuv420p).unwrap();
        assert_eq!(planar.plane(0), &[16; 16]);
        assert_eq!(planar.plane(1), &[1, 3, 5, 7]);
        assert_eq!(planar.plane(2), &[2, 4, 6, 8]);

        let mut back = SoftwareFrame::default();
        convert(&planar, &mut back, PixelFormat::Nv12).unwrap();
        assert_eq!(back.data(), src.data());
    }

    #[test]
    fn test_black_and_white_to_rgb() {
        let black = nv12_frame(2, 2, 16, 128, 128);
        let mut rgb = SoftwareFrame::default();
        convert(&black, &mut rgb, PixelFormat::Rgb24).unwrap();
        assert_eq!(rgb.data(), &[0; 12]);

        let white = nv12_frame(2, 2, 235, 128, 128);
        convert(&white, &mut rgb, PixelFormat::Rgba).unwrap();
        assert_eq!(&rgb.data()[..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_channel_order() {
        // Pure red in BT.601 limited range
        let red = nv12_frame(2, 2, 81, 90, 240);
        let mut out = SoftwareFrame::default();

        convert(&red, &mut out, PixelFormat::Rgb0).unwrap();
        let px = &out.data()[..4];
        assert!(px[0] > 240 && px[1] < 16 && px[2] < 16);
        assert_eq!(px[3], 0);

        convert(&red, &mut out, PixelFormat::Bgra).unwrap();
        let px = &out.data()[..4];
        assert!(px[2] > 240 && px[1] < 16 && px[0] < 16);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn test_rejects_packed_source() {
        let src = SoftwareFrame::allocate(2, 2, PixelFormat::Rgb24).unwrap();
        let mut dst = SoftwareFrame::default();
        assert!(convert(&src, &mut dst, PixelFormat::Nv12).is_err());
    }
}
