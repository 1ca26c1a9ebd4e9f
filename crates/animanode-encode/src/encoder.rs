use std::path::PathBuf;

use animanode_core::{AnimaResult, FrameBuffer};

/// Consumes frames in index order and produces some output.
///
/// Encoders run on a blocking worker owned by the
/// [`ExportSink`](crate::sink::ExportSink), so they may do synchronous I/O.
pub trait FrameEncoder: Send + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Encode one frame. `index` is the frame's position in the sequence;
    /// indices arrive strictly increasing but may skip dropped frames.
    fn encode_frame(&mut self, frame: &FrameBuffer, index: u64) -> AnimaResult<()>;

    /// Flush and close the output. Called exactly once, after the last frame.
    fn finalize(&mut self) -> AnimaResult<EncodeSummary>;
}

/// What an encoder wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeSummary {
    pub frames: u64,
    pub bytes_written: u64,
    /// File or directory the output went to, if any.
    pub output: Option<PathBuf>,
}

impl<E: FrameEncoder + ?Sized> FrameEncoder for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn encode_frame(&mut self, frame: &FrameBuffer, index: u64) -> AnimaResult<()> {
        (**self).encode_frame(frame, index)
    }

    fn finalize(&mut self) -> AnimaResult<EncodeSummary> {
        (**self).finalize()
    }
}
