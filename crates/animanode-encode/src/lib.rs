//! # animanode-encode
//!
//! Export side of the pipeline: an ordered sink that buffers out-of-order
//! frames and applies backpressure, and the encoders it feeds. MP4 output
//! shells out to FFmpeg; PNG sequences are written with `image`.

pub mod collector;
pub mod encoder;
pub mod ffmpeg;
pub mod png_sequence;
pub mod sink;
pub mod surface;

pub use collector::{CollectedFrames, FrameCollector};
pub use encoder::{EncodeSummary, FrameEncoder};
pub use ffmpeg::{FfmpegEncoder, FfmpegOptions};
pub use png_sequence::PngSequenceEncoder;
pub use sink::{ExportSink, OverflowPolicy, SinkConfig, SinkReport};
pub use surface::{PresentSurface, SurfacePresenter};
