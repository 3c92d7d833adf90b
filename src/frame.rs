//! Decoded frame buffers in system memory.

use crate::{BackendError, PixelFormat};

/// Location of one plane inside a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneLayout {
    /// Byte offset of the first row.
    pub offset: usize,
    /// Bytes per row (linesize).
    pub stride: usize,
    /// Number of rows.
    pub rows: usize,
}

impl PlaneLayout {
    #[must_use]
    pub fn len(&self) -> usize {
        self.stride * self.rows
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tightly packed plane layout for a given format and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameLayout {
    planes: [PlaneLayout; 3],
    count: usize,
}

impl FrameLayout {
    /// Layout of a `width`x`height` frame in `format`, or `None` if its size
    /// does not fit in `usize`.
    #[must_use]
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Option<Self> {
        let w = usize::try_from(width).ok()?;
        let h = usize::try_from(height).ok()?;
        // 4:2:0 chroma rounds up for odd dimensions
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);

        let shapes = match format {
            PixelFormat::Nv12 => [(w, h), (cw.checked_mul(2)?, ch), (0, 0)],
            PixelFormat::Yuv420p => [(w, h), (cw, ch), (cw, ch)],
            packed => {
                let bpp = packed.packed_bytes_per_pixel().unwrap_or(4);
                [(w.checked_mul(bpp)?, h), (0, 0), (0, 0)]
            }
        };

        let count = format.plane_count();
        let mut planes = [PlaneLayout::default(); 3];
        let mut offset = 0usize;
        for (plane, &(stride, rows)) in planes.iter_mut().zip(&shapes).take(count) {
            let len = stride.checked_mul(rows)?;
            *plane = PlaneLayout { offset, stride, rows };
            offset = offset.checked_add(len)?;
        }

        Some(Self { planes, count })
    }

    /// Layouts of the planes in use.
    #[must_use]
    pub fn planes(&self) -> &[PlaneLayout] {
        &self.planes[..self.count]
    }

    /// Total bytes needed for the frame.
    #[must_use]
    pub fn size(&self) -> usize {
        self.planes()
            .last()
            .map(|p| p.offset + p.len())
            .unwrap_or(0)
    }
}

/// Calculate expected frame size for given dimensions and format.
///
/// Saturates at `usize::MAX` for frames too large to address.
#[must_use]
pub fn expected_frame_size(width: u32, height: u32, format: PixelFormat) -> usize {
    FrameLayout::new(width, height, format).map_or(usize::MAX, |layout| layout.size())
}

/// A decoded frame in system memory, owned and reused by the decoder.
///
/// The decoder overwrites it on every
/// [`receive_frame`](crate::Decoder::receive_frame) call, so a reference to it
/// is only valid until the next call. Use [`copy_out`](Self::copy_out) to keep
/// the pixels.
#[derive(Debug, Default)]
pub struct SoftwareFrame {
    width: u32,
    height: u32,
    format: PixelFormat,
    layout: FrameLayout,
    data: Vec<u8>,
    pts: Option<i64>,
}

impl SoftwareFrame {
    /// Allocate a frame, failing instead of aborting when memory is short or
    /// the frame is too large to address.
    pub fn allocate(width: u32, height: u32, format: PixelFormat) -> Result<Self, BackendError> {
        let mut frame = Self::default();
        frame.reshape(width, height, format)?;
        Ok(frame)
    }

    /// Change format and size, reusing the existing allocation when possible.
    ///
    /// On error the frame is left unchanged.
    pub fn reshape(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<(), BackendError> {
        if self.width == width && self.height == height && self.format == format && !self.data.is_empty() {
            return Ok(());
        }
        let layout = FrameLayout::new(width, height, format).ok_or(BackendError::OutOfMemory)?;
        let size = layout.size();
        self.data
            .try_reserve_exact(size.saturating_sub(self.data.len()))
            .map_err(|_| BackendError::OutOfMemory)?;
        self.data.resize(size, 0);
        self.width = width;
        self.height = height;
        self.format = format;
        self.layout = layout;
        Ok(())
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Presentation timestamp reported by the backend, if any.
    #[must_use]
    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.pts = pts;
    }

    /// The whole frame buffer, planes back to back.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[must_use]
    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    #[must_use]
    pub fn plane_count(&self) -> usize {
        self.layout.planes().len()
    }

    /// Bytes per row of plane `index`, 0 for planes the format doesn't have.
    #[must_use]
    pub fn linesize(&self, index: usize) -> usize {
        self.layout.planes().get(index).map_or(0, |p| p.stride)
    }

    /// Pixel data of plane `index`, empty for planes the format doesn't have.
    #[must_use]
    pub fn plane(&self, index: usize) -> &[u8] {
        match self.layout.planes().get(index) {
            Some(p) => &self.data[p.offset..p.offset + p.len()],
            None => &[],
        }
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut [u8] {
        match self.layout.planes().get(index).copied() {
            Some(p) => &mut self.data[p.offset..p.offset + p.len()],
            None => &mut [],
        }
    }

    /// Copy a plane from a strided source, dropping row padding.
    ///
    /// Backends use this to download pitched device surfaces.
    pub fn write_plane(&mut self, index: usize, src: &[u8], src_stride: usize) -> Result<(), BackendError> {
        let Some(p) = self.layout.planes().get(index).copied() else {
            return Err(BackendError::transfer(format!(
                "{} has no plane {}",
                self.format, index
            )));
        };
        if p.rows == 0 || p.stride == 0 {
            return Ok(());
        }
        if src_stride < p.stride || src.len() < src_stride * (p.rows - 1) + p.stride {
            return Err(BackendError::transfer(format!(
                "plane {} source too small: {} bytes at stride {}, need {} rows of {}",
                index,
                src.len(),
                src_stride,
                p.rows,
                p.stride
            )));
        }

        let dst = &mut self.data[p.offset..p.offset + p.len()];
        if src_stride == p.stride {
            // Fast path: stride matches width, single memcpy
            dst.copy_from_slice(&src[..p.len()]);
        } else {
            for (row, out) in dst.chunks_exact_mut(p.stride).enumerate() {
                let start = row * src_stride;
                out.copy_from_slice(&src[start..start + p.stride]);
            }
        }
        Ok(())
    }

    pub(crate) fn swap(&mut self, other: &mut SoftwareFrame) {
        std::mem::swap(self, other);
    }

    /// Copy the frame out of the decoder-owned buffer.
    #[must_use]
    pub fn copy_out(&self) -> VideoFrame {
        VideoFrame {
            width: self.width,
            height: self.height,
            pixel_format: self.format,
            data: self.data.clone(),
            pts: self.pts,
        }
    }
}

/// A decoded frame owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of the frame data.
    pub pixel_format: PixelFormat,
    /// Raw pixel data, planes back to back without row padding.
    pub data: Vec<u8>,
    /// Presentation timestamp, if the backend reported one.
    pub pts: Option<i64>,
}

impl VideoFrame {
    /// Expected data size for the current dimensions and pixel format.
    #[must_use]
    pub fn expected_data_size(&self) -> usize {
        expected_frame_size(self.width, self.height, self.pixel_format)
    }

    /// Pixel data of plane `index`.
    #[must_use]
    pub fn plane(&self, index: usize) -> &[u8] {
        let layout = FrameLayout::new(self.width, self.height, self.pixel_format).unwrap_or_default();
        match layout.planes().get(index) {
            Some(p) if p.offset + p.len() <= self.data.len() => &self.data[p.offset..p.offset + p.len()],
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_frame_size() {
        assert_eq!(expected_frame_size(1920, 1080, PixelFormat::Rgb24), 1920 * 1080 * 3);
        assert_eq!(expected_frame_size(1920, 1080, PixelFormat::Bgr0), 1920 * 1080 * 4);
        assert_eq!(expected_frame_size(1920, 1080, PixelFormat::Nv12), 1920 * 1080 * 3 / 2);
        assert_eq!(expected_frame_size(1920, 1080, PixelFormat::Yuv420p), 1920 * 1080 * 3 / 2);
        // odd sizes round the chroma planes up
        assert_eq!(expected_frame_size(3, 3, PixelFormat::Yuv420p), 9 + 4 + 4);
        assert_eq!(expected_frame_size(3, 3, PixelFormat::Nv12), 9 + 8);
    }

    #[test]
    fn test_plane_layout() {
        let layout = FrameLayout::new(4, 4, PixelFormat::Yuv420p).unwrap();
        let planes = layout.planes();
        assert_eq!(planes.len(), 3);
        assert_eq!(planes[0], PlaneLayout { offset: 0, stride: 4, rows: 4 });
        assert_eq!(planes[1], PlaneLayout { offset: 16, stride: 2, rows: 2 });
        assert_eq!(planes[2], PlaneLayout { offset: 20, stride: 2, rows: 2 });

        let layout = FrameLayout::new(4, 2, PixelFormat::Rgb24).unwrap();
        assert_eq!(layout.planes(), &[PlaneLayout { offset: 0, stride: 12, rows: 2 }]);
    }

    #[test]
    fn test_reshape_reuses_buffer() {
        let mut frame = SoftwareFrame::allocate(8, 8, PixelFormat::Rgba).unwrap();
        let capacity = frame.data.capacity();
        frame.reshape(8, 8, PixelFormat::Nv12).unwrap();
        assert_eq!(frame.data().len(), 96);
        assert_eq!(frame.data.capacity(), capacity);
        assert_eq!(frame.plane_count(), 2);
        assert_eq!(frame.linesize(1), 8);
        assert_eq!(frame.linesize(2), 0);
        assert!(frame.plane(2).is_empty());
    }

    #[test]
    fn test_oversized_frames_are_rejected() {
        assert!(FrameLayout::new(u32::MAX, u32::MAX, PixelFormat::Rgb24).is_none());
        assert!(FrameLayout::new(u32::MAX, u32::MAX, PixelFormat::Nv12).is_none());
        assert_eq!(expected_frame_size(u32::MAX, u32::MAX, PixelFormat::Bgra), usize::MAX);

        assert_eq!(
            SoftwareFrame::allocate(u32::MAX, u32::MAX, PixelFormat::Rgba).unwrap_err(),
            BackendError::OutOfMemory
        );

        // a failed reshape keeps the old frame intact
        let mut frame = SoftwareFrame::allocate(2, 2, PixelFormat::Nv12).unwrap();
        assert!(frame.reshape(u32::MAX, u32::MAX, PixelFormat::Rgb24).is_err());
        assert_eq!((frame.width(), frame.height(), frame.format()), (2, 2, PixelFormat::Nv12));
        assert_eq!(frame.data().len(), 6);
    }

    #[test]
    fn test_write_plane_strips_padding() {
        let mut frame = SoftwareFrame::allocate(2, 2, PixelFormat::Nv12).unwrap();
        // pitch 4, two rows: only the first two bytes of each row are pixels
        let src = [1, 2, 0xEE, 0xEE, 3, 4, 0xEE, 0xEE];
        frame.write_plane(0, &src, 4).unwrap();
        assert_eq!(frame.plane(0), &[1, 2, 3, 4]);

        // last row does not need trailing padding
        frame.write_plane(1, &[7, 8], 2).unwrap();
        assert_eq!(frame.plane(1), &[7, 8]);

        assert!(frame.write_plane(0, &[1, 2, 3], 2).is_err());
        assert!(frame.write_plane(2, &[], 2).is_err());
    }

    #[test]
    fn test_copy_out_is_independent() {
        let mut frame = SoftwareFrame::allocate(2, 2, PixelFormat::Yuv420p).unwrap();
        frame.plane_mut(0).copy_from_slice(&[10, 20, 30, 40]);
        frame.set_pts(Some(42));
        let owned = frame.copy_out();
        frame.plane_mut(0).fill(0);

        assert_eq!(owned.plane(0), &[10, 20, 30, 40]);
        assert_eq!(owned.pts, Some(42));
        assert_eq!(owned.data.len(), owned.expected_data_size());
    }
}
