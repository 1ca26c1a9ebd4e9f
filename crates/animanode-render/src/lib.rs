//! # animanode-render
//!
//! The AnimaNode render graph. Compiles evaluated frames into ordered GPU
//! command lists, runs them on a [`GpuBackend`] (a CPU rasterizer or a
//! headless wgpu device) and paces whole runs with the [`FrameScheduler`],
//! which streams read-back frames into an export sink.

pub mod compiler;
pub mod gpu;
pub mod material;
pub mod resources;
pub mod scheduler;
pub mod software;
pub mod submit;
pub mod wgpu_backend;

pub use compiler::{compile, compile_with_stats, CompileStats, RenderCommand, RenderTarget};
pub use gpu::{
    fence, BufferHandle, BufferUsage, FenceSignal, GpuBackend, GpuFence, TextureDesc,
    TextureHandle, Vertex,
};
pub use material::{Material, MaterialUniform};
pub use resources::{MeshResource, ResourceSet};
pub use scheduler::{
    FrameScheduler, PacingMode, RunSummary, SchedulerConfig, SchedulerState, StopHandle,
    TickOutcome, TickReport,
};
pub use software::SoftwareBackend;
pub use submit::{Acceptance, CancelToken, SubmissionQueue};
pub use wgpu_backend::{GpuContext, TexturePool, WgpuBackend};
