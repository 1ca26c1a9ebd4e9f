//! Render graph compiler: turns an [`EvaluatedFrame`] into an ordered list of
//! GPU commands.
//!
//! Opaque draws come first, batched by `(material, mesh)` with depth writes
//! on. Transparent draws follow, sorted back-to-front by `z` with ties broken
//! by pre-order position, depth-tested but not depth-written. Every draw gets
//! a unique depth derived from `(z, pre-order)`, so the depth test reproduces
//! painter's order no matter how the opaque pass was batched.

use animanode_core::{AnimaError, AnimaResult, Affine2, BlendMode, Color};
use animanode_ir::{EvaluatedFrame, EvaluatedNode, MaterialId, MeshId, NodeId, Payload, Renderable};

use crate::gpu::{BufferHandle, TextureHandle};
use crate::material::{Material, MaterialUniform};
use crate::resources::{MeshResource, ResourceSet};

/// Where a frame is drawn. Canvas units are pixels with the origin at the
/// centre and y pointing up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTarget {
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub clear: Color,
}

/// One step of a compiled frame. Resources are referenced by handle.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    /// Start drawing into `target`, clearing colour and depth when `clear`
    /// is set.
    BeginPass {
        target: TextureHandle,
        width: u32,
        height: u32,
        clear: Option<Color>,
    },
    SetPipeline {
        blend: BlendMode,
        depth_write: bool,
    },
    BindMaterial {
        material: MaterialId,
    },
    BindMesh {
        mesh: MeshId,
        vertices: BufferHandle,
        indices: BufferHandle,
        index_count: u32,
    },
    Draw {
        node: NodeId,
        uniform: MaterialUniform,
    },
    /// Draw the bound mesh once per offset, in node-local units.
    DrawInstanced {
        node: NodeId,
        uniform: MaterialUniform,
        instances: Vec<[f32; 2]>,
    },
    EndPass,
}

/// Counters for one compiled frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileStats {
    pub draws: usize,
    pub instances: usize,
    pub opaque: usize,
    pub transparent: usize,
    pub pipeline_changes: usize,
    pub material_binds: usize,
    pub mesh_binds: usize,
}

impl CompileStats {
    pub fn state_changes(&self) -> usize {
        self.pipeline_changes + self.material_binds + self.mesh_binds
    }
}

struct DrawItem<'a> {
    node: &'a EvaluatedNode,
    renderable: &'a Renderable,
    material: &'a Material,
    mesh: &'a MeshResource,
    color: Color,
    transparent: bool,
    depth: f32,
}

impl DrawItem<'_> {
    fn pipeline(&self) -> (BlendMode, bool) {
        if !self.transparent {
            return (BlendMode::Opaque, true);
        }
        match self.material.blend {
            BlendMode::Opaque => (BlendMode::Alpha, false),
            blend => (blend, false),
        }
    }
}

/// Currently bound state; binds are emitted only on change.
#[derive(Default)]
struct Bindings<'a> {
    pipeline: Option<(BlendMode, bool)>,
    material: Option<&'a MaterialId>,
    mesh: Option<&'a MeshId>,
}

/// Compile `frame` into commands for `target`.
pub fn compile(
    frame: &EvaluatedFrame,
    resources: &ResourceSet,
    target: &RenderTarget,
) -> AnimaResult<Vec<RenderCommand>> {
    compile_with_stats(frame, resources, target).map(|(commands, _)| commands)
}

pub fn compile_with_stats(
    frame: &EvaluatedFrame,
    resources: &ResourceSet,
    target: &RenderTarget,
) -> AnimaResult<(Vec<RenderCommand>, CompileStats)> {
    if target.width == 0 || target.height == 0 {
        return Err(AnimaError::InvalidArgument(format!(
            "render target must be non-empty, got {}x{}",
            target.width, target.height
        )));
    }

    let mut items = Vec::new();
    for (node, renderable) in frame.drawables() {
        let material = resources.material(&renderable.material).ok_or_else(|| {
            AnimaError::MissingMaterial {
                node: node.id.raw(),
                material: renderable.material.0.clone(),
            }
        })?;
        let mesh_id = renderable.payload.mesh();
        let mesh = resources
            .mesh(mesh_id)
            .ok_or_else(|| AnimaError::MissingMesh {
                node: node.id.raw(),
                mesh: mesh_id.0.clone(),
            })?;
        if let Payload::ParticleBatch { instances, .. } = &renderable.payload {
            if instances.is_empty() {
                continue;
            }
        }

        let color = material.base_color.modulate(&node.material.effective_color());
        let transparent = renderable.transparent
            || node.material.opacity < 1.0
            || color.a < 1.0
            || material.blend != BlendMode::Opaque;
        items.push(DrawItem {
            node,
            renderable,
            material,
            mesh,
            color,
            transparent,
            depth: 0.0,
        });
    }

    assign_depths(&mut items);

    let (mut opaque, mut transparent): (Vec<&DrawItem>, Vec<&DrawItem>) =
        items.iter().partition(|item| !item.transparent);
    // Stable sorts keep pre-order within a batch.
    opaque.sort_by(|a, b| {
        (&a.renderable.material, a.renderable.payload.mesh())
            .cmp(&(&b.renderable.material, b.renderable.payload.mesh()))
    });
    transparent.sort_by(|a, b| {
        a.node
            .z
            .total_cmp(&b.node.z)
            .then(a.node.order.cmp(&b.node.order))
    });

    let mut stats = CompileStats {
        opaque: opaque.len(),
        transparent: transparent.len(),
        ..Default::default()
    };
    let view = Affine2::scale(2.0 / target.width as f64, 2.0 / target.height as f64);
    let mut commands = Vec::with_capacity(items.len() * 2 + 4);
    commands.push(RenderCommand::BeginPass {
        target: target.texture,
        width: target.width,
        height: target.height,
        clear: Some(target.clear),
    });
    let mut bound = Bindings::default();
    for item in opaque.into_iter().chain(transparent) {
        emit_draw(&mut commands, &mut bound, &mut stats, item, &view);
    }
    commands.push(RenderCommand::EndPass);

    tracing::trace!(
        "Compiled frame t={:.4}: {} draws, {} state changes",
        frame.time,
        stats.draws,
        stats.state_changes()
    );
    Ok((commands, stats))
}

/// Rank every draw by `(z, pre-order)` and map the rank into `(0, 1)`, later
/// draws nearer the camera. The depth test uses `Less`.
fn assign_depths(items: &mut [DrawItem<'_>]) {
    let mut ranked: Vec<usize> = (0..items.len()).collect();
    ranked.sort_by(|&a, &b| {
        items[a]
            .node
            .z
            .total_cmp(&items[b].node.z)
            .then(items[a].node.order.cmp(&items[b].node.order))
    });
    let n = items.len() as f64;
    for (rank, &i) in ranked.iter().enumerate() {
        items[i].depth = (1.0 - (rank as f64 + 1.0) / (n + 1.0)) as f32;
    }
}

fn emit_draw<'a>(
    commands: &mut Vec<RenderCommand>,
    bound: &mut Bindings<'a>,
    stats: &mut CompileStats,
    item: &DrawItem<'a>,
    view: &Affine2,
) {
    let pipeline = item.pipeline();
    if bound.pipeline != Some(pipeline) {
        commands.push(RenderCommand::SetPipeline {
            blend: pipeline.0,
            depth_write: pipeline.1,
        });
        bound.pipeline = Some(pipeline);
        stats.pipeline_changes += 1;
    }

    let material = &item.renderable.material;
    if bound.material != Some(material) {
        commands.push(RenderCommand::BindMaterial {
            material: material.clone(),
        });
        bound.material = Some(material);
        stats.material_binds += 1;
    }

    let mesh = item.renderable.payload.mesh();
    if bound.mesh != Some(mesh) {
        commands.push(RenderCommand::BindMesh {
            mesh: mesh.clone(),
            vertices: item.mesh.vertices,
            indices: item.mesh.indices,
            index_count: item.mesh.index_count,
        });
        bound.mesh = Some(mesh);
        stats.mesh_binds += 1;
    }

    let uniform = MaterialUniform::new(&view.multiply(&item.node.world), item.color, item.depth);
    stats.draws += 1;
    match &item.renderable.payload {
        Payload::Mesh { .. } => {
            stats.instances += 1;
            commands.push(RenderCommand::Draw {
                node: item.node.id,
                uniform,
            });
        }
        Payload::ParticleBatch {
            instances,
            particle_scale,
            ..
        } => {
            stats.instances += instances.len();
            commands.push(RenderCommand::DrawInstanced {
                node: item.node.id,
                uniform: uniform.with_particle_scale(*particle_scale as f32),
                instances: instances.iter().map(|p| [p.x as f32, p.y as f32]).collect(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwareBackend;
    use animanode_core::Point2D;
    use animanode_ir::{Node, SceneGraph, Timeline};

    fn resources() -> ResourceSet {
        let backend = SoftwareBackend::new();
        let mut r = ResourceSet::new().with_builtin_meshes(&backend).unwrap();
        r.add_material("red", Material::solid(Color::RED));
        r.add_material("blue", Material::solid(Color::BLUE));
        r.add_material("glow", Material::blended(Color::WHITE, BlendMode::Add));
        r
    }

    fn target() -> RenderTarget {
        RenderTarget {
            texture: TextureHandle(1),
            width: 200,
            height: 100,
            clear: Color::BLACK,
        }
    }

    fn draw_nodes(commands: &[RenderCommand]) -> Vec<NodeId> {
        commands
            .iter()
            .filter_map(|c| match c {
                RenderCommand::Draw { node, .. } | RenderCommand::DrawInstanced { node, .. } => {
                    Some(*node)
                }
                _ => None,
            })
            .collect()
    }

    fn uniform_of(commands: &[RenderCommand], id: NodeId) -> MaterialUniform {
        commands
            .iter()
            .find_map(|c| match c {
                RenderCommand::Draw { node, uniform }
                | RenderCommand::DrawInstanced { node, uniform, .. }
                    if *node == id =>
                {
                    Some(*uniform)
                }
                _ => None,
            })
            .unwrap()
    }

    fn quad(material: &str) -> Node {
        Node::new(material).with_renderable(Renderable::mesh("quad", material))
    }

    #[test]
    fn test_empty_frame_clears() {
        let graph = SceneGraph::new();
        let frame = Timeline::new().evaluate(&graph, 0.0);
        let commands = compile(&frame, &resources(), &target()).unwrap();
        assert_eq!(
            commands,
            vec![
                RenderCommand::BeginPass {
                    target: TextureHandle(1),
                    width: 200,
                    height: 100,
                    clear: Some(Color::BLACK),
                },
                RenderCommand::EndPass,
            ]
        );
    }

    #[test]
    fn test_missing_material_and_mesh() {
        let mut graph = SceneGraph::new();
        let id = graph
            .add_node(
                NodeId::ROOT,
                Node::new("n").with_renderable(Renderable::mesh("hexagon", "chrome")),
            )
            .unwrap();
        let frame = Timeline::new().evaluate(&graph, 0.0);
        let err = compile(&frame, &resources(), &target()).unwrap_err();
        assert!(matches!(err, AnimaError::MissingMaterial { node, .. } if node == id.raw()));

        graph.get_mut(id).unwrap().renderable = Some(Renderable::mesh("hexagon", "red"));
        let frame = Timeline::new().evaluate(&graph, 0.0);
        let err = compile(&frame, &resources(), &target()).unwrap_err();
        assert!(matches!(err, AnimaError::MissingMesh { ref mesh, .. } if mesh == "hexagon"));
    }

    #[test]
    fn test_hidden_and_plain_nodes_skipped() {
        let mut graph = SceneGraph::new();
        let group = graph.add_node(NodeId::ROOT, Node::new("group").hidden()).unwrap();
        graph.add_node(group, quad("red")).unwrap();
        let plain = graph.add_node(NodeId::ROOT, Node::new("plain")).unwrap();
        let shown = graph.add_node(plain, quad("blue")).unwrap();

        let frame = Timeline::new().evaluate(&graph, 0.0);
        let (commands, stats) = compile_with_stats(&frame, &resources(), &target()).unwrap();
        assert_eq!(draw_nodes(&commands), vec![shown]);
        assert_eq!(stats.draws, 1);
    }

    #[test]
    fn test_opaque_pass_batches_by_material_and_mesh() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(NodeId::ROOT, quad("red")).unwrap();
        let b = graph.add_node(NodeId::ROOT, quad("blue")).unwrap();
        let c = graph.add_node(NodeId::ROOT, quad("red")).unwrap();

        let frame = Timeline::new().evaluate(&graph, 0.0);
        let (commands, stats) = compile_with_stats(&frame, &resources(), &target()).unwrap();
        assert_eq!(draw_nodes(&commands), vec![b, a, c]);
        assert_eq!(stats.material_binds, 2);
        assert_eq!(stats.mesh_binds, 1);
        assert_eq!(stats.pipeline_changes, 1);
        assert_eq!(stats.opaque, 3);

        // Later pre-order draws are nearer even though batching reordered them.
        let da = uniform_of(&commands, a).depth;
        let db = uniform_of(&commands, b).depth;
        let dc = uniform_of(&commands, c).depth;
        assert!(da > db && db > dc);
    }

    #[test]
    fn test_transparent_pass_sorted_back_to_front() {
        let mut graph = SceneGraph::new();
        let far = quad("red").with_z(0.0).with_opacity(0.5);
        let near = quad("red").with_z(2.0).with_opacity(0.5);
        let mid = quad("red").with_z(1.0).with_opacity(0.5);
        let n_near = graph.add_node(NodeId::ROOT, near).unwrap();
        let n_far = graph.add_node(NodeId::ROOT, far).unwrap();
        let n_mid = graph.add_node(NodeId::ROOT, mid).unwrap();
        let solid = graph.add_node(NodeId::ROOT, quad("blue").with_z(5.0)).unwrap();

        let frame = Timeline::new().evaluate(&graph, 0.0);
        let (commands, stats) = compile_with_stats(&frame, &resources(), &target()).unwrap();
        assert_eq!(draw_nodes(&commands), vec![solid, n_far, n_mid, n_near]);
        assert_eq!(stats.transparent, 3);

        let first_transparent_pipeline = commands
            .iter()
            .filter_map(|c| match c {
                RenderCommand::SetPipeline { blend, depth_write } => Some((*blend, *depth_write)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            first_transparent_pipeline,
            vec![(BlendMode::Opaque, true), (BlendMode::Alpha, false)]
        );

        // The opaque node has the largest z, so it is nearest.
        assert!(uniform_of(&commands, solid).depth < uniform_of(&commands, n_near).depth);
    }

    #[test]
    fn test_transparency_triggers() {
        let mut graph = SceneGraph::new();
        let flagged = graph
            .add_node(
                NodeId::ROOT,
                Node::new("f").with_renderable(Renderable::mesh("quad", "red").with_transparent(true)),
            )
            .unwrap();
        let tinted = graph
            .add_node(NodeId::ROOT, quad("red").with_tint(Color::WHITE.with_alpha(0.5)))
            .unwrap();
        let additive = graph.add_node(NodeId::ROOT, quad("glow")).unwrap();
        let parent = graph.add_node(NodeId::ROOT, Node::new("fade").with_opacity(0.5)).unwrap();
        let inherited = graph.add_node(parent, quad("red")).unwrap();
        let opaque = graph.add_node(NodeId::ROOT, quad("red")).unwrap();

        let frame = Timeline::new().evaluate(&graph, 0.0);
        let (commands, stats) = compile_with_stats(&frame, &resources(), &target()).unwrap();
        assert_eq!(stats.opaque, 1);
        assert_eq!(stats.transparent, 4);
        assert_eq!(draw_nodes(&commands)[0], opaque);

        assert_eq!(uniform_of(&commands, tinted).color[3], 0.5);
        assert_eq!(uniform_of(&commands, inherited).color[3], 0.5);
        assert_eq!(uniform_of(&commands, flagged).color[3], 1.0);
        assert!(commands.contains(&RenderCommand::SetPipeline {
            blend: BlendMode::Add,
            depth_write: false
        }));
        assert!(draw_nodes(&commands).contains(&additive));
    }

    #[test]
    fn test_particle_batch_instanced() {
        let mut graph = SceneGraph::new();
        let id = graph
            .add_node(
                NodeId::ROOT,
                Node::new("sparks").with_renderable(Renderable::particles(
                    "circle",
                    "red",
                    vec![Point2D::new(1.0, 2.0), Point2D::new(-3.0, 4.0)],
                    0.25,
                )),
            )
            .unwrap();
        graph
            .add_node(
                NodeId::ROOT,
                Node::new("empty").with_renderable(Renderable::particles("circle", "red", vec![], 1.0)),
            )
            .unwrap();

        let frame = Timeline::new().evaluate(&graph, 0.0);
        let (commands, stats) = compile_with_stats(&frame, &resources(), &target()).unwrap();
        assert_eq!(stats.draws, 1);
        assert_eq!(stats.instances, 2);
        let instanced = commands
            .iter()
            .find_map(|c| match c {
                RenderCommand::DrawInstanced {
                    node,
                    uniform,
                    instances,
                } if *node == id => Some((uniform.particle_scale, instances.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(instanced.0, 0.25);
        assert_eq!(instanced.1, vec![[1.0, 2.0], [-3.0, 4.0]]);
    }

    #[test]
    fn test_view_maps_pixels_to_clip_space() {
        let mut graph = SceneGraph::new();
        let id = graph
            .add_node(NodeId::ROOT, quad("red").with_translation(100.0, -50.0))
            .unwrap();
        let frame = Timeline::new().evaluate(&graph, 0.0);
        let commands = compile(&frame, &resources(), &target()).unwrap();
        let u = uniform_of(&commands, id);
        assert_eq!(u.transform_point([0.0, 0.0]), [1.0, -1.0]);
    }

    #[test]
    fn test_zero_target_rejected() {
        let graph = SceneGraph::new();
        let frame = Timeline::new().evaluate(&graph, 0.0);
        let mut t = target();
        t.height = 0;
        assert!(matches!(
            compile(&frame, &resources(), &t),
            Err(AnimaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let mut graph = SceneGraph::new();
        for i in 0..20 {
            let material = if i % 3 == 0 { "blue" } else { "red" };
            let node = quad(material)
                .with_translation(i as f64, 0.0)
                .with_z((i % 4) as f64)
                .with_opacity(if i % 5 == 0 { 0.5 } else { 1.0 });
            graph.add_node(NodeId::ROOT, node).unwrap();
        }
        let frame = Timeline::new().evaluate(&graph, 0.0);
        let r = resources();
        assert_eq!(
            compile(&frame, &r, &target()).unwrap(),
            compile(&frame, &r, &target()).unwrap()
        );
    }
}
