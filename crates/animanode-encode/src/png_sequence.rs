use std::path::{Path, PathBuf};

use animanode_core::{AnimaError, AnimaResult, FrameBuffer, PixelFormat};

use crate::encoder::{EncodeSummary, FrameEncoder};

/// Writes each frame as `frame_NNNNNN.png` into a directory.
///
/// File numbers follow the frame index, so a dropped frame leaves a hole in
/// the numbering rather than shifting later frames.
pub struct PngSequenceEncoder {
    dir: PathBuf,
    frames: u64,
    bytes_written: u64,
}

impl PngSequenceEncoder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            frames: 0,
            bytes_written: 0,
        }
    }

    /// Path the frame with `index` is written to.
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", index))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FrameEncoder for PngSequenceEncoder {
    fn name(&self) -> &str {
        "png-sequence"
    }

    fn encode_frame(&mut self, frame: &FrameBuffer, index: u64) -> AnimaResult<()> {
        if self.frames == 0 {
            std::fs::create_dir_all(&self.dir)?;
        }
        let packed = frame.to_packed();
        let path = self.frame_path(index);
        let color = match packed.format {
            PixelFormat::Rgba8 => image::ExtendedColorType::Rgba8,
            PixelFormat::Rgb8 => image::ExtendedColorType::Rgb8,
        };
        image::save_buffer(&path, &packed.data, packed.width, packed.height, color).map_err(
            |e| AnimaError::Encode(format!("failed to write {}: {}", path.display(), e)),
        )?;

        self.bytes_written += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        self.frames += 1;
        Ok(())
    }

    fn finalize(&mut self) -> AnimaResult<EncodeSummary> {
        tracing::info!(
            "Wrote {} PNG frames to {}",
            self.frames,
            self.dir.display()
        );
        Ok(EncodeSummary {
            frames: self.frames,
            bytes_written: self.bytes_written,
            output: Some(self.dir.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use animanode_core::Color;

    #[test]
    fn test_frame_paths_are_zero_padded() {
        let encoder = PngSequenceEncoder::new("frames");
        assert_eq!(encoder.frame_path(7), PathBuf::from("frames/frame_000007.png"));
    }

    #[test]
    fn test_writes_readable_pngs() {
        let dir = std::env::temp_dir().join(format!("animanode-png-{}", std::process::id()));
        let mut encoder = PngSequenceEncoder::new(&dir);
        encoder
            .encode_frame(&FrameBuffer::solid(4, 3, &Color::RED), 0)
            .unwrap();
        encoder
            .encode_frame(&FrameBuffer::solid(4, 3, &Color::BLUE).to_rgb8(), 2)
            .unwrap();
        let summary = encoder.finalize().unwrap();
        assert_eq!(summary.frames, 2);
        assert!(summary.bytes_written > 0);

        let first = image::open(dir.join("frame_000000.png")).unwrap().to_rgba8();
        assert_eq!(first.dimensions(), (4, 3));
        assert_eq!(first.get_pixel(1, 1).0, [255, 0, 0, 255]);
        assert!(!dir.join("frame_000001.png").exists());
        let third = image::open(dir.join("frame_000002.png")).unwrap().to_rgba8();
        assert_eq!(third.get_pixel(0, 0).0, [0, 0, 255, 255]);
        std::fs::remove_dir_all(&dir).ok();
    }
}
