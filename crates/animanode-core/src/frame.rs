use serde::{Deserialize, Serialize};

/// Pixel format of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGBA (4 bytes per pixel).
    Rgba8,
    /// 8-bit RGB (3 bytes per pixel, no alpha).
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// The pixel format name ffmpeg uses for raw input.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Rgba8 => "rgba",
            PixelFormat::Rgb8 => "rgb24",
        }
    }
}

/// A captured frame as a raw pixel buffer.
///
/// Rows are `stride` bytes apart; `stride` may exceed `width * bytes_per_pixel`
/// when the buffer comes from a GPU readback with row alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes between the starts of consecutive rows.
    pub stride: usize,
    pub format: PixelFormat,
}

impl FrameBuffer {
    /// Create a frame buffer filled with zeros (transparent black), tightly packed.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width as usize * format.bytes_per_pixel();
        Self {
            data: vec![0u8; stride * height as usize],
            width,
            height,
            stride,
            format,
        }
    }

    /// Create an RGBA frame buffer filled with a solid color.
    pub fn solid(width: u32, height: u32, color: &crate::Color) -> Self {
        let pixel = color.to_rgba8();
        let pixel_count = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixel_count * 4);
        for _ in 0..pixel_count {
            data.extend_from_slice(&pixel);
        }
        Self {
            data,
            width,
            height,
            stride: width as usize * 4,
            format: PixelFormat::Rgba8,
        }
    }

    /// Wrap padded rows (e.g. a GPU readback) without copying.
    pub fn from_padded(
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    ) -> Result<Self, crate::AnimaError> {
        let row = width as usize * format.bytes_per_pixel();
        if stride < row || data.len() < stride * height as usize {
            return Err(crate::AnimaError::InvalidArgument(format!(
                "buffer of {} bytes cannot hold {}x{} rows with stride {}",
                data.len(),
                width,
                height,
                stride
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
            format,
        })
    }

    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.stride + x as usize * self.format.bytes_per_pixel()
    }

    /// RGBA value at a pixel coordinate, or `None` if out of bounds.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let o = self.offset(x, y);
        match self.format {
            PixelFormat::Rgba8 => Some([
                self.data[o],
                self.data[o + 1],
                self.data[o + 2],
                self.data[o + 3],
            ]),
            PixelFormat::Rgb8 => Some([self.data[o], self.data[o + 1], self.data[o + 2], 255]),
        }
    }

    /// Overwrite a pixel. No-op if out of bounds.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let o = self.offset(x, y);
        let bpp = self.format.bytes_per_pixel();
        self.data[o..o + bpp].copy_from_slice(&rgba[..bpp]);
    }

    /// Tightly packed rows, dropping any stride padding.
    pub fn packed_rows(&self) -> impl Iterator<Item = &[u8]> {
        let row = self.width as usize * self.format.bytes_per_pixel();
        self.data
            .chunks(self.stride.max(1))
            .take(self.height as usize)
            .map(move |r| &r[..row])
    }

    /// Copy out a tightly packed buffer (stride == row length).
    pub fn to_packed(&self) -> FrameBuffer {
        let row = self.width as usize * self.format.bytes_per_pixel();
        if self.stride == row {
            return self.clone();
        }
        let mut data = Vec::with_capacity(row * self.height as usize);
        for r in self.packed_rows() {
            data.extend_from_slice(r);
        }
        FrameBuffer {
            data,
            width: self.width,
            height: self.height,
            stride: row,
            format: self.format,
        }
    }

    /// Convert to packed RGB, discarding alpha.
    pub fn to_rgb8(&self) -> FrameBuffer {
        if self.format == PixelFormat::Rgb8 {
            return self.to_packed();
        }
        let mut data = Vec::with_capacity(self.pixel_count() * 3);
        for r in self.packed_rows() {
            for px in r.chunks_exact(4) {
                data.extend_from_slice(&px[..3]);
            }
        }
        FrameBuffer {
            data,
            width: self.width,
            height: self.height,
            stride: self.width as usize * 3,
            format: PixelFormat::Rgb8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Color;

    #[test]
    fn test_frame_buffer_new() {
        let fb = FrameBuffer::new(1920, 1080, PixelFormat::Rgba8);
        assert_eq!(fb.byte_size(), 1920 * 1080 * 4);
        assert_eq!(fb.stride, 1920 * 4);
        assert_eq!(fb.pixel_count(), 1920 * 1080);
    }

    #[test]
    fn test_frame_buffer_solid() {
        let fb = FrameBuffer::solid(2, 2, &Color::RED);
        assert_eq!(fb.get_pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(fb.get_pixel(1, 1), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_frame_buffer_get_set_pixel() {
        let mut fb = FrameBuffer::new(10, 10, PixelFormat::Rgba8);
        fb.set_pixel(5, 5, [128, 64, 32, 255]);
        assert_eq!(fb.get_pixel(5, 5), Some([128, 64, 32, 255]));
        assert_eq!(fb.get_pixel(10, 0), None);
        assert_eq!(fb.get_pixel(0, 10), None);
    }

    #[test]
    fn test_padded_rows_are_packed() {
        // 2x2 RGBA with 4 bytes of padding per row.
        let mut data = vec![0u8; 12 * 2];
        data[0..4].copy_from_slice(&[1, 2, 3, 4]);
        data[12..16].copy_from_slice(&[5, 6, 7, 8]);
        let fb = FrameBuffer::from_padded(data, 2, 2, 12, PixelFormat::Rgba8).unwrap();
        assert_eq!(fb.get_pixel(0, 1), Some([5, 6, 7, 8]));

        let packed = fb.to_packed();
        assert_eq!(packed.stride, 8);
        assert_eq!(packed.byte_size(), 16);
        assert_eq!(packed.get_pixel(0, 1), Some([5, 6, 7, 8]));
    }

    #[test]
    fn test_from_padded_rejects_short_buffer() {
        assert!(FrameBuffer::from_padded(vec![0; 10], 2, 2, 8, PixelFormat::Rgba8).is_err());
        assert!(FrameBuffer::from_padded(vec![0; 64], 4, 2, 8, PixelFormat::Rgba8).is_err());
    }

    #[test]
    fn test_to_rgb8_drops_alpha() {
        let fb = FrameBuffer::solid(3, 1, &Color::rgba(0.0, 1.0, 0.0, 0.5));
        let rgb = fb.to_rgb8();
        assert_eq!(rgb.format, PixelFormat::Rgb8);
        assert_eq!(rgb.data, vec![0, 255, 0, 0, 255, 0, 0, 255, 0]);
    }
}
