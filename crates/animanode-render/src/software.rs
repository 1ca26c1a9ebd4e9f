//! CPU rasterizer behind the [`GpuBackend`] seam.
//!
//! Always available and bit-reproducible: the same command list produces the
//! same bytes on every run. Rows are shaded in parallel with rayon; each row
//! walks the triangles of a draw in submission order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;

use animanode_core::{AnimaError, AnimaResult, BlendMode, Color, FrameBuffer, PixelFormat};

use crate::compiler::RenderCommand;
use crate::gpu::{
    fence, BufferHandle, BufferUsage, GpuBackend, GpuFence, TextureDesc, TextureHandle, Vertex,
};
use crate::material::MaterialUniform;

struct StoredBuffer {
    usage: BufferUsage,
    bytes: Arc<Vec<u8>>,
}

pub struct SoftwareBackend {
    next_id: AtomicU64,
    buffers: DashMap<BufferHandle, StoredBuffer>,
    targets: DashMap<TextureHandle, TextureDesc>,
    submitted: AtomicU64,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            buffers: DashMap::new(),
            targets: DashMap::new(),
            submitted: AtomicU64::new(0),
        }
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    fn buffer(&self, frame_index: u64, handle: BufferHandle, usage: BufferUsage) -> AnimaResult<Arc<Vec<u8>>> {
        self.buffers
            .get(&handle)
            .filter(|b| b.usage == usage)
            .map(|b| Arc::clone(&b.bytes))
            .ok_or_else(|| {
                AnimaError::gpu(
                    frame_index,
                    format!("buffer {} is not a {:?} buffer of this device", handle.0, usage),
                )
            })
    }

    /// Check the command stream and capture the buffers it references.
    fn prepare(&self, frame_index: u64, commands: Vec<RenderCommand>) -> AnimaResult<RasterJob> {
        let reject = |message: &str| AnimaError::gpu(frame_index, message);
        let mut pass: Option<(u32, u32, Option<Color>)> = None;
        let mut ended = false;
        let mut mesh_bound = false;
        let mut ops = Vec::with_capacity(commands.len());

        for command in commands {
            match command {
                RenderCommand::BeginPass {
                    target,
                    width,
                    height,
                    clear,
                } => {
                    if pass.is_some() {
                        return Err(reject("only one render pass per submission is supported"));
                    }
                    let desc = self
                        .targets
                        .get(&target)
                        .ok_or_else(|| reject("unknown render target"))?;
                    if desc.width != width || desc.height != height {
                        return Err(AnimaError::gpu(
                            frame_index,
                            format!(
                                "pass is {}x{} but the target is {}x{}",
                                width, height, desc.width, desc.height
                            ),
                        ));
                    }
                    pass = Some((width, height, clear));
                }
                _ if pass.is_none() || ended => {
                    return Err(reject("command recorded outside of a render pass"));
                }
                RenderCommand::SetPipeline { blend, depth_write } => {
                    ops.push(RasterOp::Pipeline { blend, depth_write })
                }
                // Colour travels in the per-draw uniform.
                RenderCommand::BindMaterial { .. } => {}
                RenderCommand::BindMesh {
                    vertices,
                    indices,
                    index_count,
                    ..
                } => {
                    let vertices = self.buffer(frame_index, vertices, BufferUsage::Vertex)?;
                    let indices = self.buffer(frame_index, indices, BufferUsage::Index)?;
                    if index_count as usize * 4 > indices.len() {
                        return Err(reject("index count exceeds the index buffer"));
                    }
                    ops.push(RasterOp::Mesh {
                        vertices,
                        indices,
                        index_count,
                    });
                    mesh_bound = true;
                }
                RenderCommand::Draw { uniform, .. } => {
                    if !mesh_bound {
                        return Err(reject("draw without a bound mesh"));
                    }
                    ops.push(RasterOp::Draw {
                        uniform,
                        instances: None,
                    });
                }
                RenderCommand::DrawInstanced {
                    uniform, instances, ..
                } => {
                    if !mesh_bound {
                        return Err(reject("draw without a bound mesh"));
                    }
                    ops.push(RasterOp::Draw {
                        uniform,
                        instances: Some(instances),
                    });
                }
                RenderCommand::EndPass => ended = true,
            }
        }

        let Some((width, height, clear)) = pass else {
            return Err(reject("command list has no render pass"));
        };
        if !ended {
            return Err(reject("render pass was never ended"));
        }
        Ok(RasterJob {
            frame_index,
            width,
            height,
            clear,
            ops,
        })
    }
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn create_buffer(
        &self,
        _label: &str,
        usage: BufferUsage,
        contents: &[u8],
    ) -> AnimaResult<BufferHandle> {
        let handle = BufferHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.buffers.insert(
            handle,
            StoredBuffer {
                usage,
                bytes: Arc::new(contents.to_vec()),
            },
        );
        Ok(handle)
    }

    fn create_texture(&self, desc: &TextureDesc) -> AnimaResult<TextureHandle> {
        desc.validate()?;
        let handle = TextureHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.targets.insert(handle, desc.clone());
        Ok(handle)
    }

    fn release_texture(&self, texture: TextureHandle) {
        self.targets.remove(&texture);
    }

    fn submit(&self, frame_index: u64, commands: Vec<RenderCommand>) -> AnimaResult<GpuFence> {
        let job = self.prepare(frame_index, commands)?;
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let (signal, fence) = fence(frame_index);
        rayon::spawn(move || signal.complete(job.run()));
        Ok(fence)
    }

    fn poll_completion(&self) {
        // Work completes on the rayon pool without polling.
    }
}

enum RasterOp {
    Pipeline {
        blend: BlendMode,
        depth_write: bool,
    },
    Mesh {
        vertices: Arc<Vec<u8>>,
        indices: Arc<Vec<u8>>,
        index_count: u32,
    },
    Draw {
        uniform: MaterialUniform,
        instances: Option<Vec<[f32; 2]>>,
    },
}

struct RasterJob {
    frame_index: u64,
    width: u32,
    height: u32,
    clear: Option<Color>,
    ops: Vec<RasterOp>,
}

struct Canvas {
    width: usize,
    height: usize,
    color: Vec<[f32; 4]>,
    depth: Vec<f32>,
}

impl RasterJob {
    fn run(self) -> AnimaResult<FrameBuffer> {
        let (w, h) = (self.width as usize, self.height as usize);
        let clear = self.clear.unwrap_or(Color::TRANSPARENT).to_array();
        let mut canvas = Canvas {
            width: w,
            height: h,
            color: vec![clear; w * h],
            depth: vec![1.0; w * h],
        };

        let mut pipeline = (BlendMode::Opaque, true);
        let mut mesh: Option<(Vec<[f32; 2]>, &[u8], u32)> = None;
        for op in &self.ops {
            match op {
                RasterOp::Pipeline { blend, depth_write } => pipeline = (*blend, *depth_write),
                RasterOp::Mesh {
                    vertices,
                    indices,
                    index_count,
                } => {
                    let positions = vertices
                        .chunks_exact(std::mem::size_of::<Vertex>())
                        .map(|chunk| bytemuck::pod_read_unaligned::<Vertex>(chunk).position)
                        .collect();
                    mesh = Some((positions, indices.as_slice(), *index_count));
                }
                RasterOp::Draw { uniform, instances } => {
                    let Some((positions, indices, index_count)) = &mesh else {
                        return Err(AnimaError::gpu(self.frame_index, "draw without a bound mesh"));
                    };
                    let offsets: &[[f32; 2]] = instances.as_deref().unwrap_or(&[[0.0, 0.0]]);
                    let triangles = self.setup_triangles(
                        positions,
                        &indices[..*index_count as usize * 4],
                        uniform,
                        offsets,
                    )?;
                    canvas.fill(&triangles, uniform, pipeline);
                }
            }
        }
        Ok(canvas.into_frame())
    }

    fn setup_triangles(
        &self,
        positions: &[[f32; 2]],
        indices: &[u8],
        uniform: &MaterialUniform,
        offsets: &[[f32; 2]],
    ) -> AnimaResult<Vec<Triangle>> {
        let indices: Vec<u32> = indices
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<u32>)
            .collect();
        let (w, h) = (self.width as f32, self.height as f32);
        let scale = uniform.particle_scale;
        let mut triangles = Vec::with_capacity(offsets.len() * indices.len() / 3);
        for offset in offsets {
            for tri in indices.chunks_exact(3) {
                let mut corners = [[0.0f32; 2]; 3];
                for (corner, &i) in corners.iter_mut().zip(tri) {
                    let p = positions.get(i as usize).ok_or_else(|| {
                        AnimaError::gpu(self.frame_index, format!("index {} out of range", i))
                    })?;
                    let local = [p[0] * scale + offset[0], p[1] * scale + offset[1]];
                    let clip = uniform.transform_point(local);
                    *corner = [(clip[0] + 1.0) * 0.5 * w, (1.0 - clip[1]) * 0.5 * h];
                }
                if let Some(t) = Triangle::new(corners) {
                    triangles.push(t);
                }
            }
        }
        Ok(triangles)
    }
}

/// Sub-pixel precision of the rasterizer: coordinates snap to 1/256 pixel
/// so edge functions are exact integers.
const SUBPIXEL: i64 = 256;
const HALF_PIXEL: i64 = SUBPIXEL / 2;
/// Keeps edge products inside `i64`.
const COORD_LIMIT: f32 = (1i64 << 28) as f32;

fn snap(v: f32) -> i64 {
    (v * SUBPIXEL as f32).round().clamp(-COORD_LIMIT, COORD_LIMIT) as i64
}

/// A screen-space triangle with positive orientation under [`edge`].
struct Triangle {
    v: [[i64; 2]; 3],
    min: [i64; 2],
    max: [i64; 2],
}

fn edge(a: [i64; 2], b: [i64; 2], p: [i64; 2]) -> i64 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// Shared-edge rule: a pixel centre exactly on an edge belongs to exactly
/// one of the two triangles sharing it.
fn owns_edge(a: [i64; 2], b: [i64; 2]) -> bool {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    dy > 0 || (dy == 0 && dx < 0)
}

impl Triangle {
    fn new(corners: [[f32; 2]; 3]) -> Option<Self> {
        if corners.iter().flatten().any(|c| !c.is_finite()) {
            return None;
        }
        let v = corners.map(|c| [snap(c[0]), snap(c[1])]);
        let area = edge(v[0], v[1], v[2]);
        if area == 0 {
            return None;
        }
        let v = if area < 0 { [v[0], v[2], v[1]] } else { v };
        let min = [
            v[0][0].min(v[1][0]).min(v[2][0]),
            v[0][1].min(v[1][1]).min(v[2][1]),
        ];
        let max = [
            v[0][0].max(v[1][0]).max(v[2][0]),
            v[0][1].max(v[1][1]).max(v[2][1]),
        ];
        Some(Self { v, min, max })
    }

    fn covers(&self, p: [i64; 2]) -> bool {
        for (a, b) in [(0, 1), (1, 2), (2, 0)] {
            let w = edge(self.v[a], self.v[b], p);
            if w < 0 || (w == 0 && !owns_edge(self.v[a], self.v[b])) {
                return false;
            }
        }
        true
    }

    /// Pixel columns whose centres fall inside the bounding box.
    fn columns(&self, width: usize) -> Option<(usize, usize)> {
        let first = -((HALF_PIXEL - self.min[0]).div_euclid(SUBPIXEL));
        let last = (self.max[0] - HALF_PIXEL).div_euclid(SUBPIXEL);
        let first = first.max(0);
        let last = last.min(width as i64 - 1);
        (first <= last).then(|| (first as usize, last as usize))
    }
}

fn blend(dst: [f32; 4], src: [f32; 4], mode: BlendMode) -> [f32; 4] {
    let sa = src[3];
    match mode {
        BlendMode::Opaque => src,
        BlendMode::Alpha => [
            src[0] * sa + dst[0] * (1.0 - sa),
            src[1] * sa + dst[1] * (1.0 - sa),
            src[2] * sa + dst[2] * (1.0 - sa),
            sa + dst[3] * (1.0 - sa),
        ],
        BlendMode::Add => [
            (src[0] * sa + dst[0]).min(1.0),
            (src[1] * sa + dst[1]).min(1.0),
            (src[2] * sa + dst[2]).min(1.0),
            (sa + dst[3]).min(1.0),
        ],
    }
}

impl Canvas {
    fn fill(&mut self, triangles: &[Triangle], uniform: &MaterialUniform, pipeline: (BlendMode, bool)) {
        if triangles.is_empty() {
            return;
        }
        let (mode, depth_write) = pipeline;
        let width = self.width;
        let depth = uniform.depth;
        let src = uniform.color;

        self.color
            .par_chunks_mut(width)
            .zip(self.depth.par_chunks_mut(width))
            .enumerate()
            .for_each(|(y, (colors, depths))| {
                let py = y as i64 * SUBPIXEL + HALF_PIXEL;
                for t in triangles {
                    if py < t.min[1] || py > t.max[1] {
                        continue;
                    }
                    let Some((x0, x1)) = t.columns(width) else { continue };
                    for x in x0..=x1 {
                        let px = x as i64 * SUBPIXEL + HALF_PIXEL;
                        if !t.covers([px, py]) || !(depth < depths[x]) {
                            continue;
                        }
                        if depth_write {
                            depths[x] = depth;
                        }
                        colors[x] = blend(colors[x], src, mode);
                    }
                }
            });
    }

    fn into_frame(self) -> FrameBuffer {
        let mut data = Vec::with_capacity(self.width * self.height * 4);
        for px in &self.color {
            data.extend(px.iter().map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8));
        }
        FrameBuffer {
            data,
            width: self.width as u32,
            height: self.height as u32,
            stride: self.width * 4,
            format: PixelFormat::Rgba8,
        }
    }
}
