//! Headless wgpu implementation of [`GpuBackend`].
//!
//! Draws into an offscreen RGBA8 texture with a depth attachment and reads it
//! back with `map_async`. The device is polled from the rayon pool, so
//! `submit` returns as soon as the command buffer is queued.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use dashmap::DashMap;
use wgpu::util::DeviceExt;
use wgpu::{
    Adapter, Device, Extent3d, Instance, Queue, Texture, TextureDescriptor, TextureFormat,
    TextureUsages,
};

use animanode_core::{AnimaError, AnimaResult, BlendMode, FrameBuffer, PixelFormat};

use crate::compiler::RenderCommand;
use crate::gpu::{
    fence, BufferHandle, BufferUsage, GpuBackend, GpuFence, TextureDesc, TextureHandle, Vertex,
};
use crate::material::MaterialUniform;

const COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];
const INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![2 => Float32x2];

#[derive(Hash, Eq, PartialEq, Clone)]
struct TextureDescKey {
    width: u32,
    height: u32,
    format: TextureFormat,
    usage: TextureUsages,
}

/// Reuses render targets of the same size and format across resizes and runs.
pub struct TexturePool {
    free_textures: Mutex<HashMap<TextureDescKey, Vec<Texture>>>,
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}

impl TexturePool {
    pub fn new() -> Self {
        Self {
            free_textures: Mutex::new(HashMap::new()),
        }
    }

    pub fn acquire(
        &self,
        device: &Device,
        label: Option<&str>,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsages,
    ) -> Texture {
        let key = TextureDescKey {
            width,
            height,
            format,
            usage,
        };
        {
            let mut pool = self
                .free_textures
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(texture) = pool.get_mut(&key).and_then(Vec::pop) {
                return texture;
            }
        }

        device.create_texture(&TextureDescriptor {
            label,
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        })
    }

    pub fn release(&self, texture: Texture) {
        let key = TextureDescKey {
            width: texture.width(),
            height: texture.height(),
            format: texture.format(),
            usage: texture.usage(),
        };
        let mut pool = self
            .free_textures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pool.entry(key).or_default().push(texture);
    }

    pub fn idle_count(&self) -> usize {
        self.free_textures
            .lock()
            .map(|pool| pool.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

/// Device, queue and texture pool shared by everything drawn with wgpu.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    pub texture_pool: TexturePool,
}

impl GpuContext {
    /// Initializes WGPU, selecting the best available backend (Metal, Vulkan, DX12, etc.)
    pub fn init() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None, // Headless rendering
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow::anyhow!("Failed to find suitable wgpu adapter"))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("AnimaNode Headless GPU Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))?;

        tracing::info!("Using wgpu adapter {:?}", adapter.get_info().name);
        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            texture_pool: TexturePool::new(),
        })
    }
}

struct TargetTextures {
    color: Texture,
    depth: Texture,
    width: u32,
    height: u32,
}

enum Step {
    Pipeline(Arc<wgpu::RenderPipeline>),
    Mesh {
        vertices: Arc<wgpu::Buffer>,
        indices: Arc<wgpu::Buffer>,
        index_count: u32,
    },
    Draw {
        uniform_offset: u32,
        instances: Range<u32>,
    },
}

pub struct WgpuBackend {
    ctx: Arc<GpuContext>,
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: Mutex<HashMap<(BlendMode, bool), Arc<wgpu::RenderPipeline>>>,
    buffers: DashMap<BufferHandle, (BufferUsage, Arc<wgpu::Buffer>)>,
    targets: DashMap<TextureHandle, Arc<TargetTextures>>,
    next_id: AtomicU64,
    uniform_stride: u64,
}

impl WgpuBackend {
    /// Open a headless device. Fails when no adapter is available.
    pub fn new() -> AnimaResult<Self> {
        let ctx = GpuContext::init().map_err(|e| {
            AnimaError::InvalidState(format!("Failed to initialize WGPU context: {:#}", e))
        })?;
        Ok(Self::with_context(Arc::new(ctx)))
    }

    pub fn with_context(ctx: Arc<GpuContext>) -> Self {
        let device = &ctx.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("animanode_solid"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/solid.wgsl").into()),
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("animanode_material_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(MaterialUniform::SIZE),
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("animanode_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let align = device.limits().min_uniform_buffer_offset_alignment as u64;
        let uniform_stride = MaterialUniform::SIZE.div_ceil(align) * align;

        Self {
            ctx,
            shader,
            bind_group_layout,
            pipeline_layout,
            pipelines: Mutex::new(HashMap::new()),
            buffers: DashMap::new(),
            targets: DashMap::new(),
            next_id: AtomicU64::new(1),
            uniform_stride,
        }
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    fn pipeline(&self, blend: BlendMode, depth_write: bool) -> Arc<wgpu::RenderPipeline> {
        let mut cache = self
            .pipelines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pipeline) = cache.get(&(blend, depth_write)) {
            return Arc::clone(pipeline);
        }

        let blend_state = match blend {
            BlendMode::Opaque => wgpu::BlendState::REPLACE,
            BlendMode::Alpha => wgpu::BlendState::ALPHA_BLENDING,
            BlendMode::Add => wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            },
        };
        let pipeline = self
            .ctx
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("animanode_solid_pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &self.shader,
                    entry_point: "vs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[
                        wgpu::VertexBufferLayout {
                            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &VERTEX_ATTRIBUTES,
                        },
                        wgpu::VertexBufferLayout {
                            array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                            step_mode: wgpu::VertexStepMode::Instance,
                            attributes: &INSTANCE_ATTRIBUTES,
                        },
                    ],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &self.shader,
                    entry_point: "fs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: Some(blend_state),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    // Negative scales flip winding; draw both faces.
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: depth_write,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
        let pipeline = Arc::new(pipeline);
        cache.insert((blend, depth_write), Arc::clone(&pipeline));
        pipeline
    }

    fn buffer(
        &self,
        frame_index: u64,
        handle: BufferHandle,
        usage: BufferUsage,
    ) -> AnimaResult<Arc<wgpu::Buffer>> {
        self.buffers
            .get(&handle)
            .filter(|entry| entry.0 == usage)
            .map(|entry| Arc::clone(&entry.1))
            .ok_or_else(|| {
                AnimaError::gpu(
                    frame_index,
                    format!("buffer {} is not a {:?} buffer of this device", handle.0, usage),
                )
            })
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_buffer(
        &self,
        label: &str,
        usage: BufferUsage,
        contents: &[u8],
    ) -> AnimaResult<BufferHandle> {
        let wgpu_usage = match usage {
            BufferUsage::Vertex | BufferUsage::Instance => wgpu::BufferUsages::VERTEX,
            BufferUsage::Index => wgpu::BufferUsages::INDEX,
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM,
        };
        let buffer = self
            .ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu_usage | wgpu::BufferUsages::COPY_DST,
            });
        let handle = BufferHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.buffers.insert(handle, (usage, Arc::new(buffer)));
        Ok(handle)
    }

    fn create_texture(&self, desc: &TextureDesc) -> AnimaResult<TextureHandle> {
        desc.validate()?;
        let pool = &self.ctx.texture_pool;
        let color = pool.acquire(
            &self.ctx.device,
            desc.label.as_deref(),
            desc.width,
            desc.height,
            COLOR_FORMAT,
            TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
        );
        let depth = pool.acquire(
            &self.ctx.device,
            Some("animanode_depth"),
            desc.width,
            desc.height,
            DEPTH_FORMAT,
            TextureUsages::RENDER_ATTACHMENT,
        );
        let handle = TextureHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.targets.insert(
            handle,
            Arc::new(TargetTextures {
                color,
                depth,
                width: desc.width,
                height: desc.height,
            }),
        );
        Ok(handle)
    }

    fn release_texture(&self, texture: TextureHandle) {
        let Some((_, target)) = self.targets.remove(&texture) else {
            return;
        };
        if let Ok(target) = Arc::try_unwrap(target) {
            self.ctx.texture_pool.release(target.color);
            self.ctx.texture_pool.release(target.depth);
        }
    }

    fn submit(&self, frame_index: u64, commands: Vec<RenderCommand>) -> AnimaResult<GpuFence> {
        let reject = |message: &str| AnimaError::gpu(frame_index, message);
        let device = &self.ctx.device;
        let stride = self.uniform_stride as usize;

        let mut pass = None;
        let mut ended = false;
        let mut mesh_bound = false;
        let mut steps = Vec::with_capacity(commands.len());
        let mut uniforms: Vec<u8> = Vec::new();
        // Instance 0 is the zero offset used by plain draws.
        let mut offsets: Vec<[f32; 2]> = vec![[0.0, 0.0]];

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
                    let textures = self
                        .targets
                        .get(&target)
                        .map(|t| Arc::clone(&t))
                        .ok_or_else(|| reject("unknown render target"))?;
                    if textures.width != width || textures.height != height {
                        return Err(reject("pass size does not match the render target"));
                    }
                    pass = Some((textures, clear));
                }
                _ if pass.is_none() || ended => {
                    return Err(reject("command recorded outside of a render pass"));
                }
                RenderCommand::SetPipeline { blend, depth_write } => {
                    steps.push(Step::Pipeline(self.pipeline(blend, depth_write)));
                }
                RenderCommand::BindMaterial { .. } => {}
                RenderCommand::BindMesh {
                    vertices,
                    indices,
                    index_count,
                    ..
                } => {
                    steps.push(Step::Mesh {
                        vertices: self.buffer(frame_index, vertices, BufferUsage::Vertex)?,
                        indices: self.buffer(frame_index, indices, BufferUsage::Index)?,
                        index_count,
                    });
                    mesh_bound = true;
                }
                RenderCommand::Draw { uniform, .. } => {
                    if !mesh_bound {
                        return Err(reject("draw without a bound mesh"));
                    }
                    let uniform_offset = push_uniform(&mut uniforms, &uniform, stride);
                    steps.push(Step::Draw {
                        uniform_offset,
                        instances: 0..1,
                    });
                }
                RenderCommand::DrawInstanced {
                    uniform, instances, ..
                } => {
                    if !mesh_bound {
                        return Err(reject("draw without a bound mesh"));
                    }
                    let uniform_offset = push_uniform(&mut uniforms, &uniform, stride);
                    let first = offsets.len() as u32;
                    offsets.extend(instances);
                    steps.push(Step::Draw {
                        uniform_offset,
                        instances: first..offsets.len() as u32,
                    });
                }
                RenderCommand::EndPass => ended = true,
            }
        }
        let Some((target, clear)) = pass else {
            return Err(reject("command list has no render pass"));
        };
        if !ended {
            return Err(reject("render pass was never ended"));
        }
        if uniforms.is_empty() {
            uniforms.resize(stride, 0);
        }

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("animanode_uniforms"),
            contents: &uniforms,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let instance_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("animanode_instances"),
            contents: bytemuck::cast_slice(&offsets),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("animanode_material_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &uniform_buffer,
                    offset: 0,
                    size: NonZeroU64::new(MaterialUniform::SIZE),
                }),
            }],
        });

        let color_view = target
            .color
            .create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = target
            .depth
            .create_view(&wgpu::TextureViewDescriptor::default());
        let (color_load, depth_load) = match clear {
            Some(c) => (
                wgpu::LoadOp::Clear(wgpu::Color {
                    r: c.r as f64,
                    g: c.g as f64,
                    b: c.b as f64,
                    a: c.a as f64,
                }),
                wgpu::LoadOp::Clear(1.0),
            ),
            None => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("animanode_frame"),
        });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("animanode_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_vertex_buffer(1, instance_buffer.slice(..));
            let mut index_count = 0;
            for step in &steps {
                match step {
                    Step::Pipeline(pipeline) => rpass.set_pipeline(pipeline.as_ref()),
                    Step::Mesh {
                        vertices,
                        indices,
                        index_count: count,
                    } => {
                        rpass.set_vertex_buffer(0, vertices.slice(..));
                        rpass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                        index_count = *count;
                    }
                    Step::Draw {
                        uniform_offset,
                        instances,
                    } => {
                        rpass.set_bind_group(0, &bind_group, &[*uniform_offset]);
                        rpass.draw_indexed(0..index_count, 0, instances.clone());
                    }
                }
            }
        }

        let (width, height) = (target.width, target.height);
        let padded_bytes_per_row = (width * 4 + 255) & !255;
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("animanode_readback"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.ctx.queue.submit(Some(encoder.finish()));

        let (signal, fence) = fence(frame_index);
        let (tx, rx) = std::sync::mpsc::channel();
        readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        let ctx = Arc::clone(&self.ctx);
        rayon::spawn(move || {
            ctx.device.poll(wgpu::Maintain::Wait);
            let result = match rx.recv() {
                Ok(Ok(())) => {
                    let frame = {
                        let data = readback.slice(..).get_mapped_range();
                        FrameBuffer::from_padded(
                            data.to_vec(),
                            width,
                            height,
                            padded_bytes_per_row as usize,
                            PixelFormat::Rgba8,
                        )
                    };
                    readback.unmap();
                    frame.map(|f| f.to_packed())
                }
                Ok(Err(e)) => Err(AnimaError::gpu(
                    frame_index,
                    format!("Failed to map readback buffer: {}", e),
                )),
                Err(_) => Err(AnimaError::gpu(frame_index, "readback callback was dropped")),
            };
            signal.complete(result);
        });
        Ok(fence)
    }

    fn poll_completion(&self) {
        self.ctx.device.poll(wgpu::Maintain::Poll);
    }
}

/// Append `uniform` at the next aligned slot and return its dynamic offset.
fn push_uniform(uniforms: &mut Vec<u8>, uniform: &MaterialUniform, stride: usize) -> u32 {
    let offset = uniforms.len();
    uniforms.extend_from_slice(bytemuck::bytes_of(uniform));
    uniforms.resize(offset + stride, 0);
    offset as u32
}
