//! The GPU capability set the renderer is written against.
//!
//! A backend creates buffers and render targets, accepts compiled command
//! lists and signals completion through a [`GpuFence`]. Submission never
//! blocks on the device; the caller awaits the fence instead.

use tokio::sync::{oneshot, OwnedSemaphorePermit};

use animanode_core::{AnimaError, AnimaResult, FrameBuffer};

use crate::compiler::RenderCommand;

/// Opaque handle to a backend buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// Opaque handle to a backend render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    Instance,
}

/// An RGBA8 render target with a depth attachment, readable after a pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl TextureDesc {
    pub fn render_target(width: u32, height: u32) -> Self {
        Self {
            label: Some("animanode_target".to_string()),
            width,
            height,
        }
    }

    pub(crate) fn validate(&self) -> AnimaResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(AnimaError::InvalidArgument(format!(
                "render target must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Vertex layout shared by every backend: position then UV, both in
/// mesh-local units.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

/// Completion signal for one submitted frame. Resolves to the read-back
/// pixels of the frame's render target.
///
/// While held, a fence may keep a slot of the submission queue's GPU depth
/// occupied; the slot frees when the fence is consumed or dropped.
#[derive(Debug)]
pub struct GpuFence {
    frame_index: u64,
    rx: oneshot::Receiver<AnimaResult<FrameBuffer>>,
    permit: Option<OwnedSemaphorePermit>,
}

/// Backend side of a [`GpuFence`].
#[derive(Debug)]
pub struct FenceSignal {
    frame_index: u64,
    tx: oneshot::Sender<AnimaResult<FrameBuffer>>,
}

/// Create a connected signal/fence pair for `frame_index`.
pub fn fence(frame_index: u64) -> (FenceSignal, GpuFence) {
    let (tx, rx) = oneshot::channel();
    (
        FenceSignal { frame_index, tx },
        GpuFence {
            frame_index,
            rx,
            permit: None,
        },
    )
}

impl FenceSignal {
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn complete(self, result: AnimaResult<FrameBuffer>) {
        if self.tx.send(result).is_err() {
            tracing::debug!("Fence for frame {} dropped before completion", self.frame_index);
        }
    }
}

impl GpuFence {
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub(crate) fn hold(&mut self, permit: OwnedSemaphorePermit) {
        self.permit = Some(permit);
    }

    /// Non-blocking check. `None` while the GPU is still working.
    pub fn try_complete(&mut self) -> Option<AnimaResult<FrameBuffer>> {
        match self.rx.try_recv() {
            Ok(result) => {
                self.permit = None;
                Some(result)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.permit = None;
                Some(Err(self.abandoned()))
            }
        }
    }

    /// Suspend until readback is complete.
    pub async fn wait(mut self) -> AnimaResult<FrameBuffer> {
        let result = (&mut self.rx).await;
        self.permit = None;
        result.map_err(|_| self.abandoned())?
    }

    fn abandoned(&self) -> AnimaError {
        AnimaError::gpu(self.frame_index, "backend dropped the frame before completing it")
    }
}

/// The opaque GPU capability set: resource creation, submission and
/// completion polling.
pub trait GpuBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn create_buffer(
        &self,
        label: &str,
        usage: BufferUsage,
        contents: &[u8],
    ) -> AnimaResult<BufferHandle>;

    fn create_texture(&self, desc: &TextureDesc) -> AnimaResult<TextureHandle>;

    /// Return a render target to the backend. Unknown handles are ignored.
    fn release_texture(&self, texture: TextureHandle);

    /// Queue a compiled command list for `frame_index`. Must not block on the
    /// device; errors here mean the command stream was rejected.
    fn submit(&self, frame_index: u64, commands: Vec<RenderCommand>) -> AnimaResult<GpuFence>;

    /// Give the backend a chance to signal finished work.
    fn poll_completion(&self);
}
