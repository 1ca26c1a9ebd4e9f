//! # animanode-ir
//!
//! The AnimaNode scene description: keyframe tracks, the scene graph arena,
//! renderable payloads and mesh primitives, and the timeline that resolves
//! them into an [`EvaluatedFrame`] for a point in time.
//!
//! Everything the renderer consumes per frame flows through
//! [`Timeline::evaluate`].

pub mod builder;
pub mod geometry;
pub mod graph;
pub mod node;
pub mod timeline;
pub mod track;
pub mod validate;

pub use builder::{NodeBuilder, TrackBuilder};
pub use geometry::Mesh;
pub use graph::{NodeLinks, SceneGraph, SceneNode, Topology};
pub use node::{
    BindingTarget, MaterialId, MeshId, Node, NodeId, Payload, Renderable, ScalarProperty,
    TrackBinding,
};
pub use timeline::{EvaluatedFrame, EvaluatedNode, ResolvedMaterial, Timeline};
pub use track::{Animatable, Keyframe, KeyframeTrack};
pub use validate::validate_graph;
