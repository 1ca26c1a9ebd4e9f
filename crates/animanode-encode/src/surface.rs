use animanode_core::{AnimaResult, FrameBuffer};

use crate::encoder::{EncodeSummary, FrameEncoder};

/// A drawable surface of a given size, supplied by the windowing layer.
///
/// Only the size and presentation are consumed here; resizes are reported
/// to the frame scheduler separately.
pub trait PresentSurface: Send + 'static {
    /// Current drawable size in pixels.
    fn size(&self) -> (u32, u32);

    /// Show `frame` on the surface.
    fn present(&mut self, frame: &FrameBuffer, index: u64) -> AnimaResult<()>;
}

/// Encoder that presents frames to a live surface instead of writing a file.
pub struct SurfacePresenter<S> {
    surface: S,
    presented: u64,
    mismatched: u64,
}

impl<S: PresentSurface> SurfacePresenter<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            presented: 0,
            mismatched: 0,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}

impl<S: PresentSurface> FrameEncoder for SurfacePresenter<S> {
    fn name(&self) -> &str {
        "surface"
    }

    fn encode_frame(&mut self, frame: &FrameBuffer, index: u64) -> AnimaResult<()> {
        let (w, h) = self.surface.size();
        if (w, h) != (frame.width, frame.height) {
            // Frames rendered before a resize reached the scheduler.
            self.mismatched += 1;
            tracing::debug!(
                "Frame {} is {}x{}, surface is {}x{}",
                index,
                frame.width,
                frame.height,
                w,
                h
            );
        }
        self.surface.present(frame, index)?;
        self.presented += 1;
        Ok(())
    }

    fn finalize(&mut self) -> AnimaResult<EncodeSummary> {
        if self.mismatched > 0 {
            tracing::warn!(
                "{} of {} frames did not match the surface size",
                self.mismatched,
                self.presented
            );
        }
        Ok(EncodeSummary {
            frames: self.presented,
            bytes_written: 0,
            output: None,
        })
    }
}
