use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::track::KeyframeTrack;
use animanode_core::{Color, Point2D, Transform2D};

/// Identifier of a node in a [`SceneGraph`](crate::graph::SceneGraph).
///
/// Allocated monotonically by the graph and never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The root node every graph is created with.
    pub const ROOT: NodeId = NodeId(0);

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Name of a material registered with the renderer's resource set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterialId(pub String);

impl MaterialId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for MaterialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a mesh registered with the renderer's resource set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MeshId(pub String);

impl MeshId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for MeshId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a renderable node draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// A single mesh instance.
    Mesh { mesh: MeshId },
    /// The same mesh drawn once per instance offset (in node-local units).
    ParticleBatch {
        mesh: MeshId,
        instances: Vec<Point2D>,
        /// Uniform scale applied to each particle before its offset.
        particle_scale: f64,
    },
}

impl Payload {
    pub fn mesh(&self) -> &MeshId {
        match self {
            Payload::Mesh { mesh } | Payload::ParticleBatch { mesh, .. } => mesh,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Payload::Mesh { .. } => "mesh",
            Payload::ParticleBatch { .. } => "particle_batch",
        }
    }
}

/// A drawable payload plus the material it is drawn with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Renderable {
    pub payload: Payload,
    pub material: MaterialId,
    /// Force the node into the back-to-front transparent pass.
    pub transparent: bool,
}

impl Renderable {
    pub fn mesh(mesh: impl Into<String>, material: impl Into<String>) -> Self {
        Self {
            payload: Payload::Mesh {
                mesh: MeshId::new(mesh),
            },
            material: MaterialId::new(material),
            transparent: false,
        }
    }

    pub fn particles(
        mesh: impl Into<String>,
        material: impl Into<String>,
        instances: Vec<Point2D>,
        particle_scale: f64,
    ) -> Self {
        Self {
            payload: Payload::ParticleBatch {
                mesh: MeshId::new(mesh),
                instances,
                particle_scale,
            },
            material: MaterialId::new(material),
            transparent: false,
        }
    }

    pub fn with_transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }
}

/// Scalar node properties a `f64` track can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScalarProperty {
    TranslationX,
    TranslationY,
    Rotation,
    ScaleX,
    ScaleY,
    Opacity,
    Z,
}

impl std::fmt::Display for ScalarProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarProperty::TranslationX => write!(f, "translation.x"),
            ScalarProperty::TranslationY => write!(f, "translation.y"),
            ScalarProperty::Rotation => write!(f, "rotation"),
            ScalarProperty::ScaleX => write!(f, "scale.x"),
            ScalarProperty::ScaleY => write!(f, "scale.y"),
            ScalarProperty::Opacity => write!(f, "opacity"),
            ScalarProperty::Z => write!(f, "z"),
        }
    }
}

/// The property a [`TrackBinding`] animates. Each target owns at most one track.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BindingTarget {
    Scalar(ScalarProperty),
    Translation,
    Scale,
    Tint,
    Visible,
    Param(String),
}

impl std::fmt::Display for BindingTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingTarget::Scalar(p) => write!(f, "{}", p),
            BindingTarget::Translation => write!(f, "translation"),
            BindingTarget::Scale => write!(f, "scale"),
            BindingTarget::Tint => write!(f, "tint"),
            BindingTarget::Visible => write!(f, "visible"),
            BindingTarget::Param(name) => write!(f, "param.{}", name),
        }
    }
}

/// A keyframe track attached to one property of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackBinding {
    Scalar {
        property: ScalarProperty,
        track: KeyframeTrack<f64>,
    },
    Translation(KeyframeTrack<Point2D>),
    Scale(KeyframeTrack<Point2D>),
    Tint(KeyframeTrack<Color>),
    Visible(KeyframeTrack<bool>),
    /// Named material parameter, passed through to the resolved material.
    Param {
        name: String,
        track: KeyframeTrack<f64>,
    },
}

impl TrackBinding {
    pub fn target(&self) -> BindingTarget {
        match self {
            TrackBinding::Scalar { property, .. } => BindingTarget::Scalar(*property),
            TrackBinding::Translation(_) => BindingTarget::Translation,
            TrackBinding::Scale(_) => BindingTarget::Scale,
            TrackBinding::Tint(_) => BindingTarget::Tint,
            TrackBinding::Visible(_) => BindingTarget::Visible,
            TrackBinding::Param { name, .. } => BindingTarget::Param(name.clone()),
        }
    }

    /// First and last key times of the bound track.
    pub fn domain(&self) -> Option<(f64, f64)> {
        match self {
            TrackBinding::Scalar { track, .. } | TrackBinding::Param { track, .. } => {
                track.domain()
            }
            TrackBinding::Translation(track) | TrackBinding::Scale(track) => track.domain(),
            TrackBinding::Tint(track) => track.domain(),
            TrackBinding::Visible(track) => track.domain(),
        }
    }
}

/// A scene graph node: a local transform, optional renderable payload, and
/// the tracks that animate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// Transform relative to the parent node.
    pub transform: Transform2D,
    pub renderable: Option<Renderable>,
    /// Hidden nodes hide their whole subtree.
    pub visible: bool,
    /// Draw depth; larger values are nearer the viewer.
    pub z: f64,
    /// Multiplies down the tree.
    pub opacity: f64,
    /// Multiplied into the material's base colour.
    pub tint: Color,
    /// Static material parameters; tracks override entries by name.
    pub params: BTreeMap<String, f64>,
    tracks: Vec<TrackBinding>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Transform2D::identity(),
            renderable: None,
            visible: true,
            z: 0.0,
            opacity: 1.0,
            tint: Color::WHITE,
            params: BTreeMap::new(),
            tracks: Vec::new(),
        }
    }

    pub fn with_transform(mut self, transform: Transform2D) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_translation(mut self, x: f64, y: f64) -> Self {
        self.transform.translation = Point2D::new(x, y);
        self
    }

    pub fn with_renderable(mut self, renderable: Renderable) -> Self {
        self.renderable = Some(renderable);
        self
    }

    pub fn with_z(mut self, z: f64) -> Self {
        self.z = z;
        self
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_tint(mut self, tint: Color) -> Self {
        self.tint = tint;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Attach a track binding, chained form of [`Node::bind`].
    pub fn with_track(mut self, binding: TrackBinding) -> Self {
        self.bind(binding);
        self
    }

    /// Attach a track. A track already bound to the same target is replaced
    /// and returned.
    pub fn bind(&mut self, binding: TrackBinding) -> Option<TrackBinding> {
        let target = binding.target();
        match self.tracks.iter().position(|b| b.target() == target) {
            Some(pos) => Some(std::mem::replace(&mut self.tracks[pos], binding)),
            None => {
                self.tracks.push(binding);
                None
            }
        }
    }

    pub fn unbind(&mut self, target: &BindingTarget) -> Option<TrackBinding> {
        let pos = self.tracks.iter().position(|b| &b.target() == target)?;
        Some(self.tracks.remove(pos))
    }

    pub fn tracks(&self) -> &[TrackBinding] {
        &self.tracks
    }

    pub fn is_animated(&self) -> bool {
        !self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use animanode_core::Interpolation;

    fn ramp(to: f64) -> KeyframeTrack<f64> {
        KeyframeTrack::from_keys([
            (0.0, 0.0, Interpolation::Linear),
            (1.0, to, Interpolation::Linear),
        ])
        .unwrap()
    }

    #[test]
    fn test_node_defaults() {
        let node = Node::new("group");
        assert!(node.visible);
        assert_eq!(node.opacity, 1.0);
        assert_eq!(node.tint, Color::WHITE);
        assert!(node.renderable.is_none());
        assert!(!node.is_animated());
    }

    #[test]
    fn test_binding_same_target_replaces() {
        let mut node = Node::new("n");
        assert!(node
            .bind(TrackBinding::Scalar {
                property: ScalarProperty::Rotation,
                track: ramp(1.0),
            })
            .is_none());
        let replaced = node.bind(TrackBinding::Scalar {
            property: ScalarProperty::Rotation,
            track: ramp(2.0),
        });
        assert!(replaced.is_some());
        assert_eq!(node.tracks().len(), 1);

        node.bind(TrackBinding::Scalar {
            property: ScalarProperty::Opacity,
            track: ramp(1.0),
        });
        assert_eq!(node.tracks().len(), 2);
    }

    #[test]
    fn test_param_targets_are_distinct_by_name() {
        let node = Node::new("n")
            .with_track(TrackBinding::Param {
                name: "glow".into(),
                track: ramp(1.0),
            })
            .with_track(TrackBinding::Param {
                name: "size".into(),
                track: ramp(1.0),
            });
        assert_eq!(node.tracks().len(), 2);
    }

    #[test]
    fn test_unbind() {
        let mut node = Node::new("n").with_track(TrackBinding::Translation(KeyframeTrack::new()));
        assert!(node.unbind(&BindingTarget::Tint).is_none());
        assert!(node.unbind(&BindingTarget::Translation).is_some());
        assert!(node.tracks().is_empty());
    }

    #[test]
    fn test_payload_mesh_accessor() {
        let r = Renderable::particles("dot", "flat", vec![Point2D::zero()], 0.5);
        assert_eq!(r.payload.mesh(), &MeshId::new("dot"));
        assert_eq!(r.payload.kind_name(), "particle_batch");
        assert_eq!(format!("{}", BindingTarget::Param("glow".into())), "param.glow");
        assert_eq!(format!("{}", NodeId(7)), "#7");
    }

    #[test]
    fn test_node_serializes_with_tracks() {
        let node = Node::new("n")
            .with_renderable(Renderable::mesh("quad", "flat").with_transparent(true))
            .with_track(TrackBinding::Scalar {
                property: ScalarProperty::Opacity,
                track: ramp(0.5),
            });
        let json = serde_json::to_string(&node).unwrap();
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }
}
