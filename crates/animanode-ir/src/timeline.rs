//! Timeline evaluation: turns a scene graph plus a time into an
//! [`EvaluatedFrame`], the immutable snapshot the render compiler consumes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use animanode_core::{Affine2, Color, ContentHash, ContentHasher, Duration, Transform2D};

use crate::graph::SceneGraph;
use crate::node::{Node, NodeId, Payload, Renderable, ScalarProperty, TrackBinding};

/// Material inputs after tracks and inheritance are applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMaterial {
    pub tint: Color,
    /// Product of the opacities from the root down to this node.
    pub opacity: f64,
    pub params: BTreeMap<String, f64>,
}

impl ResolvedMaterial {
    /// Tint with the world opacity folded into alpha.
    pub fn effective_color(&self) -> Color {
        let alpha = (self.tint.a as f64 * self.opacity) as f32;
        self.tint.with_alpha(alpha)
    }
}

/// One node's resolved state at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    /// Position in the pre-order walk; breaks ties in draw order.
    pub order: usize,
    pub local: Transform2D,
    pub world: Affine2,
    pub material: ResolvedMaterial,
    /// False if this node or any ancestor is hidden.
    pub visible: bool,
    pub z: f64,
    pub renderable: Option<Renderable>,
}

/// Snapshot of the whole scene at time `t`.
///
/// Owns all of its data, so it can be moved to a worker thread for
/// compilation while the graph is mutated again.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedFrame {
    pub time: f64,
    nodes: Vec<EvaluatedNode>,
    index: HashMap<NodeId, usize>,
}

impl EvaluatedFrame {
    /// Nodes in pre-order.
    pub fn nodes(&self) -> &[EvaluatedNode] {
        &self.nodes
    }

    pub fn get(&self, id: NodeId) -> Option<&EvaluatedNode> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn world_transform(&self, id: NodeId) -> Option<Affine2> {
        self.get(id).map(|n| n.world)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Visible nodes that carry a renderable, in pre-order.
    pub fn drawables(&self) -> impl Iterator<Item = (&EvaluatedNode, &Renderable)> {
        self.nodes
            .iter()
            .filter(|n| n.visible)
            .filter_map(|n| n.renderable.as_ref().map(|r| (n, r)))
    }

    /// SHA-256 over the bit patterns of everything in the frame.
    ///
    /// Two evaluations of the same graph at the same time produce the same
    /// fingerprint.
    pub fn fingerprint(&self) -> ContentHash {
        let mut h = ContentHasher::new();
        h.update_f64(self.time).update_u64(self.nodes.len() as u64);
        for n in &self.nodes {
            h.update_u64(n.id.0)
                .update_u64(n.parent.map_or(u64::MAX, |p| p.0))
                .update_u64(n.order as u64);
            for bits in n.world.to_bits() {
                h.update_u64(bits);
            }
            h.update_f64(n.local.translation.x)
                .update_f64(n.local.translation.y)
                .update_f64(n.local.rotation)
                .update_f64(n.local.scale.x)
                .update_f64(n.local.scale.y);
            for c in n.material.tint.to_array() {
                h.update_f32(c);
            }
            h.update_f64(n.material.opacity)
                .update_u64(n.material.params.len() as u64);
            for (name, v) in &n.material.params {
                h.update_str(name).update_f64(*v);
            }
            h.update_u64(n.visible as u64).update_f64(n.z);
            match &n.renderable {
                None => {
                    h.update_u64(0);
                }
                Some(r) => {
                    h.update_u64(1)
                        .update_str(&r.material.0)
                        .update_u64(r.transparent as u64)
                        .update_str(r.payload.kind_name())
                        .update_str(&r.payload.mesh().0);
                    if let Payload::ParticleBatch {
                        instances,
                        particle_scale,
                        ..
                    } = &r.payload
                    {
                        h.update_f64(*particle_scale)
                            .update_u64(instances.len() as u64);
                        for p in instances {
                            h.update_f64(p.x).update_f64(p.y);
                        }
                    }
                }
            }
        }
        h.finish()
    }
}

/// Animated state of one node, before inheritance.
struct LocalState {
    transform: Transform2D,
    visible: bool,
    opacity: f64,
    z: f64,
    tint: Color,
    params: BTreeMap<String, f64>,
}

fn sample_node(node: &Node, t: f64) -> LocalState {
    let mut s = LocalState {
        transform: node.transform,
        visible: node.visible,
        opacity: node.opacity,
        z: node.z,
        tint: node.tint,
        params: node.params.clone(),
    };
    for binding in node.tracks() {
        match binding {
            TrackBinding::Scalar { property, track } => {
                let Some(v) = track.evaluate(t) else { continue };
                match property {
                    ScalarProperty::TranslationX => s.transform.translation.x = v,
                    ScalarProperty::TranslationY => s.transform.translation.y = v,
                    ScalarProperty::Rotation => s.transform.rotation = v,
                    ScalarProperty::ScaleX => s.transform.scale.x = v,
                    ScalarProperty::ScaleY => s.transform.scale.y = v,
                    ScalarProperty::Opacity => s.opacity = v,
                    ScalarProperty::Z => s.z = v,
                }
            }
            TrackBinding::Translation(track) => {
                if let Some(p) = track.evaluate(t) {
                    s.transform.translation = p;
                }
            }
            TrackBinding::Scale(track) => {
                if let Some(p) = track.evaluate(t) {
                    s.transform.scale = p;
                }
            }
            TrackBinding::Tint(track) => {
                if let Some(c) = track.evaluate(t) {
                    s.tint = c;
                }
            }
            TrackBinding::Visible(track) => {
                if let Some(v) = track.evaluate(t) {
                    s.visible = v;
                }
            }
            TrackBinding::Param { name, track } => {
                if let Some(v) = track.evaluate(t) {
                    s.params.insert(name.clone(), v);
                }
            }
        }
    }
    s
}

/// Evaluates a scene graph over time.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    duration: Option<f64>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the timeline length instead of deriving it from the tracks.
    pub fn with_duration(seconds: f64) -> Self {
        Self {
            duration: Some(seconds.max(0.0)),
        }
    }

    /// Resolve every reachable node at time `t` in a single pre-order pass.
    pub fn evaluate(&self, graph: &SceneGraph, t: f64) -> EvaluatedFrame {
        let mut nodes = Vec::with_capacity(graph.len());
        let mut index = HashMap::with_capacity(graph.len());

        // (id, parent index into `nodes`)
        let mut stack: Vec<(NodeId, Option<usize>)> = vec![(graph.root(), None)];
        while let Some((id, parent_idx)) = stack.pop() {
            let Some(node) = graph.get(id) else { continue };
            let s = sample_node(node, t);

            let (parent, parent_world, parent_opacity, parent_visible) = match parent_idx {
                Some(i) => {
                    let p: &EvaluatedNode = &nodes[i];
                    (Some(p.id), p.world, p.material.opacity, p.visible)
                }
                None => (None, Affine2::IDENTITY, 1.0, true),
            };

            let order = nodes.len();
            index.insert(id, order);
            nodes.push(EvaluatedNode {
                id,
                parent,
                order,
                local: s.transform,
                world: parent_world * s.transform.to_matrix(),
                material: ResolvedMaterial {
                    tint: s.tint,
                    opacity: parent_opacity * s.opacity,
                    params: s.params,
                },
                visible: parent_visible && s.visible,
                z: s.z,
                renderable: node.renderable.clone(),
            });

            for child in graph.children(id).iter().rev() {
                stack.push((*child, Some(order)));
            }
        }

        EvaluatedFrame {
            time: t,
            nodes,
            index,
        }
    }

    /// Explicit duration, or the latest key time over every bound track.
    pub fn duration(&self, graph: &SceneGraph) -> Duration {
        if let Some(d) = self.duration {
            return Duration::from_seconds(d);
        }
        let latest = graph
            .traverse()
            .filter_map(|id| graph.get(id))
            .flat_map(|n| n.tracks().iter().filter_map(|b| b.domain()))
            .map(|(_, end)| end)
            .fold(0.0_f64, f64::max);
        Duration::from_seconds(latest)
    }

    /// Frames needed to cover the timeline at `fps`; at least one.
    pub fn frame_count(&self, graph: &SceneGraph, fps: f64) -> u64 {
        self.duration(graph).frame_count(fps).max(1)
    }

    /// Simulated time of frame `index` at `fps`.
    pub fn frame_time(index: u64, fps: f64) -> f64 {
        index as f64 / fps
    }
}
