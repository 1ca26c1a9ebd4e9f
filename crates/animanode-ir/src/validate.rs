use std::collections::HashSet;

use animanode_core::AnimaError;

use crate::graph::SceneGraph;
use crate::node::{NodeId, Payload};

/// Validate a scene graph for structural and numeric correctness.
///
/// The graph API keeps the structure consistent on its own; this pass is for
/// graphs that were edited through `get_mut` and for test assertions.
pub fn validate_graph(graph: &SceneGraph) -> Result<(), Vec<AnimaError>> {
    let mut errors = Vec::new();

    // Structure: every link is mirrored and every node is reachable.
    let reachable: HashSet<NodeId> = graph.traverse().collect();
    for id in graph.ids() {
        if !reachable.contains(&id) {
            errors.push(AnimaError::InvalidState(format!(
                "node {} is not reachable from the root",
                id
            )));
        }
        let Some(entry) = graph.entry(id) else { continue };
        match entry.parent() {
            None if id != NodeId::ROOT => errors.push(AnimaError::InvalidState(format!(
                "node {} has no parent",
                id
            ))),
            Some(p) if !graph.children(p).contains(&id) => {
                errors.push(AnimaError::InvalidState(format!(
                    "node {} is missing from the children of {}",
                    id, p
                )))
            }
            _ => {}
        }
        let mut seen = HashSet::new();
        for child in entry.children() {
            if !seen.insert(*child) {
                errors.push(AnimaError::InvalidState(format!(
                    "node {} lists child {} twice",
                    id, child
                )));
            }
            if graph.parent(*child) != Some(id) {
                errors.push(AnimaError::InvalidState(format!(
                    "child {} of {} points at a different parent",
                    child, id
                )));
            }
        }
    }

    // Values: transforms and opacity must be finite.
    for id in &reachable {
        let Some(node) = graph.get(*id) else { continue };
        let t = &node.transform;
        let fields = [
            t.translation.x,
            t.translation.y,
            t.rotation,
            t.scale.x,
            t.scale.y,
            node.z,
        ];
        if fields.iter().any(|v| !v.is_finite()) {
            errors.push(AnimaError::InvalidArgument(format!(
                "node {} ('{}') has a non-finite transform or depth",
                id, node.name
            )));
        }
        if !node.opacity.is_finite() || node.opacity < 0.0 {
            errors.push(AnimaError::InvalidArgument(format!(
                "node {} ('{}') has invalid opacity {}",
                id, node.name, node.opacity
            )));
        }
        if let Some(Payload::ParticleBatch { particle_scale, .. }) =
            node.renderable.as_ref().map(|r| &r.payload)
        {
            if !particle_scale.is_finite() || *particle_scale <= 0.0 {
                errors.push(AnimaError::InvalidArgument(format!(
                    "node {} has non-positive particle scale",
                    id
                )));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
