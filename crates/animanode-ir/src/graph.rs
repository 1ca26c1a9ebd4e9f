//! Scene graph arena.
//!
//! Nodes live in a flat map keyed by [`NodeId`]; parent/child relations are
//! stored as ids, so there is no shared ownership between nodes. The graph
//! always has exactly one root, created with the graph and never removed.

use std::collections::{BTreeMap, HashMap};

use animanode_core::{Affine2, AnimaError, AnimaResult, Transform2D};

use crate::node::{Node, NodeId};

/// Arena entry: a node plus its structural links.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub node: Node,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl SceneNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Structural links of one node, as captured by [`SceneGraph::topology`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLinks {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Snapshot of the whole graph structure, ordered by id.
pub type Topology = BTreeMap<NodeId, NodeLinks>;

/// Hierarchy of nodes rooted at [`NodeId::ROOT`].
#[derive(Debug, Clone)]
pub struct SceneGraph {
    nodes: HashMap<NodeId, SceneNode>,
    next_id: u64,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    /// Create a graph holding only the root node.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            NodeId::ROOT,
            SceneNode {
                node: Node::new("root"),
                parent: None,
                children: Vec::new(),
            },
        );
        Self { nodes, next_id: 1 }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Insert `node` as the last child of `parent` and return its new id.
    pub fn add_node(&mut self, parent: NodeId, node: Node) -> AnimaResult<NodeId> {
        if !self.nodes.contains_key(&parent) {
            return Err(AnimaError::UnknownParent(parent.0));
        }
        // A fresh id has no descendants, so attaching it cannot form a cycle.
        let id = NodeId(self.next_id);
        self.next_id += 1;

        self.nodes.insert(
            id,
            SceneNode {
                node,
                parent: Some(parent),
                children: Vec::new(),
            },
        );
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(id);
        }
        Ok(id)
    }

    /// Remove `id` and its whole subtree. Returns the removed ids in pre-order.
    pub fn remove_node(&mut self, id: NodeId) -> AnimaResult<Vec<NodeId>> {
        if id == NodeId::ROOT {
            return Err(AnimaError::CannotRemoveRoot);
        }
        let parent = self
            .nodes
            .get(&id)
            .ok_or(AnimaError::UnknownNode(id.0))?
            .parent;

        let removed = self.subtree(id);
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.retain(|c| *c != id);
        }
        for r in &removed {
            self.nodes.remove(r);
        }
        Ok(removed)
    }

    /// Move `id` (with its subtree) under `new_parent`, appended last.
    ///
    /// On error the graph is left untouched.
    pub fn reparent(&mut self, id: NodeId, new_parent: NodeId) -> AnimaResult<()> {
        if !self.nodes.contains_key(&id) {
            return Err(AnimaError::UnknownNode(id.0));
        }
        if !self.nodes.contains_key(&new_parent) {
            return Err(AnimaError::UnknownParent(new_parent.0));
        }
        self.ensure_acyclic(id, new_parent)?;

        let old_parent = self.nodes.get(&id).and_then(|n| n.parent);
        if let Some(p) = old_parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.retain(|c| *c != id);
        }
        if let Some(p) = self.nodes.get_mut(&new_parent) {
            p.children.push(id);
        }
        if let Some(n) = self.nodes.get_mut(&id) {
            n.parent = Some(new_parent);
        }
        Ok(())
    }

    /// Fails if attaching `node` under `parent` would make `node` its own ancestor.
    fn ensure_acyclic(&self, node: NodeId, parent: NodeId) -> AnimaResult<()> {
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == node {
                return Err(AnimaError::CycleDetected {
                    node: node.0,
                    parent: parent.0,
                });
            }
            cursor = self.nodes.get(&current).and_then(|n| n.parent);
        }
        Ok(())
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id).map(|n| &n.node)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id).map(|n| &mut n.node)
    }

    /// Like [`get`](Self::get), but an absent id is an error.
    pub fn node(&self, id: NodeId) -> AnimaResult<&Node> {
        self.get(id).ok_or(AnimaError::UnknownNode(id.0))
    }

    pub fn entry(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// Children in insertion order; empty for unknown ids.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root cannot be removed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes below `id`, pre-order, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = self.subtree(id);
        if !out.is_empty() {
            out.remove(0);
        }
        out
    }

    /// `id` followed by all of its descendants, pre-order.
    fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        if !self.contains(id) {
            return Vec::new();
        }
        PreOrder::new(self, id).collect()
    }

    /// Pre-order walk from the root. Children are visited in insertion order.
    pub fn traverse(&self) -> PreOrder<'_> {
        PreOrder::new(self, NodeId::ROOT)
    }

    /// Path from the root down to `id`, both inclusive.
    pub fn ancestry(&self, id: NodeId) -> AnimaResult<Vec<NodeId>> {
        if !self.contains(id) {
            return Err(AnimaError::UnknownNode(id.0));
        }
        let mut path = vec![id];
        let mut cursor = self.parent(id);
        while let Some(p) = cursor {
            path.push(p);
            cursor = self.parent(p);
        }
        path.reverse();
        Ok(path)
    }

    /// World transform of `id` from the static node transforms.
    pub fn world_transform(&self, id: NodeId) -> AnimaResult<Affine2> {
        self.world_transform_with(id, |_, node| node.transform)
    }

    /// World transform of `id`, taking each node's local transform from `local`.
    ///
    /// Composes `root * ... * parent * node`.
    pub fn world_transform_with<F>(&self, id: NodeId, local: F) -> AnimaResult<Affine2>
    where
        F: Fn(NodeId, &Node) -> Transform2D,
    {
        let mut world = Affine2::IDENTITY;
        for step in self.ancestry(id)? {
            let node = self.node(step)?;
            world = world * local(step, node).to_matrix();
        }
        Ok(world)
    }

    /// Structural snapshot, independent of insertion history and map order.
    pub fn topology(&self) -> Topology {
        self.nodes
            .iter()
            .map(|(id, n)| {
                (
                    *id,
                    NodeLinks {
                        parent: n.parent,
                        children: n.children.clone(),
                    },
                )
            })
            .collect()
    }

    /// Ids of every node, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }
}

/// Depth-first pre-order iterator over a subtree.
pub struct PreOrder<'a> {
    graph: &'a SceneGraph,
    stack: Vec<NodeId>,
}

impl<'a> PreOrder<'a> {
    fn new(graph: &'a SceneGraph, start: NodeId) -> Self {
        Self {
            graph,
            stack: vec![start],
        }
    }
}

impl Iterator for PreOrder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.graph.children(id).iter().rev().copied());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (SceneGraph, NodeId, NodeId) {
        let mut graph = SceneGraph::new();
        let a = graph
            .add_node(NodeId::ROOT, Node::new("a").with_translation(5.0, 0.0))
            .unwrap();
        let b = graph
            .add_node(a, Node::new("b").with_translation(3.0, 0.0))
            .unwrap();
        (graph, a, b)
    }

    #[test]
    fn test_new_graph_has_root() {
        let graph = SceneGraph::new();
        assert_eq!(graph.len(), 1);
        assert!(graph.contains(NodeId::ROOT));
        assert_eq!(graph.parent(NodeId::ROOT), None);
        assert_eq!(graph.traverse().collect::<Vec<_>>(), vec![NodeId::ROOT]);
    }

    #[test]
    fn test_world_translation_composes() {
        let (graph, _, b) = chain();
        let world = graph.world_transform(b).unwrap();
        assert_eq!(world.translation_part().x, 8.0);
        assert_eq!(world.translation_part().y, 0.0);
    }

    #[test]
    fn test_world_transform_parent_then_child() {
        let mut graph = SceneGraph::new();
        let parent = graph
            .add_node(
                NodeId::ROOT,
                Node::new("p").with_transform(
                    Transform2D::from_translation(10.0, 0.0)
                        .with_rotation(std::f64::consts::FRAC_PI_2),
                ),
            )
            .unwrap();
        let child = graph
            .add_node(parent, Node::new("c").with_translation(1.0, 0.0))
            .unwrap();
        // The child's offset is rotated by the parent before the parent's translation.
        let t = graph.world_transform(child).unwrap().translation_part();
        assert!((t.x - 10.0).abs() < 1e-12);
        assert!((t.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_add_unknown_parent() {
        let mut graph = SceneGraph::new();
        let err = graph.add_node(NodeId(42), Node::new("x")).unwrap_err();
        assert!(matches!(err, AnimaError::UnknownParent(42)));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_add_then_remove_round_trips_topology() {
        let (mut graph, a, _) = chain();
        let before = graph.topology();

        let leaf = graph.add_node(a, Node::new("leaf")).unwrap();
        let removed = graph.remove_node(leaf).unwrap();
        assert_eq!(removed, vec![leaf]);
        assert_eq!(graph.topology(), before);
    }

    #[test]
    fn test_remove_takes_subtree() {
        let (mut graph, a, b) = chain();
        let c = graph.add_node(b, Node::new("c")).unwrap();
        let removed = graph.remove_node(a).unwrap();
        assert_eq!(removed, vec![a, b, c]);
        assert_eq!(graph.len(), 1);
        assert!(graph.children(NodeId::ROOT).is_empty());
        assert!(matches!(
            graph.remove_node(a),
            Err(AnimaError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_cannot_remove_root() {
        let mut graph = SceneGraph::new();
        assert!(matches!(
            graph.remove_node(NodeId::ROOT),
            Err(AnimaError::CannotRemoveRoot)
        ));
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(NodeId::ROOT, Node::new("a")).unwrap();
        graph.remove_node(a).unwrap();
        let b = graph.add_node(NodeId::ROOT, Node::new("b")).unwrap();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_reparent_cycle_rejected_atomically() {
        let (mut graph, a, b) = chain();
        let before = graph.topology();

        for (node, parent) in [(a, b), (a, a), (NodeId::ROOT, a)] {
            let err = graph.reparent(node, parent).unwrap_err();
            assert!(matches!(err, AnimaError::CycleDetected { .. }));
            assert_eq!(graph.topology(), before);
        }
    }

    #[test]
    fn test_add_under_leaf_never_cycles() {
        let (mut graph, a, b) = chain();
        let leaf = graph.add_node(b, Node::new("leaf")).unwrap();
        assert_eq!(graph.parent(leaf), Some(b));
        assert_eq!(graph.descendants(a), vec![b, leaf]);
        assert!(matches!(
            graph.reparent(a, leaf),
            Err(AnimaError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_reparent_moves_subtree() {
        let (mut graph, a, b) = chain();
        let c = graph.add_node(NodeId::ROOT, Node::new("c")).unwrap();
        graph.reparent(b, c).unwrap();
        assert_eq!(graph.parent(b), Some(c));
        assert!(graph.children(a).is_empty());
        assert_eq!(graph.children(c), &[b]);
        assert_eq!(graph.world_transform(b).unwrap().translation_part().x, 3.0);
    }

    #[test]
    fn test_reparent_unknown_ids() {
        let (mut graph, a, _) = chain();
        assert!(matches!(
            graph.reparent(NodeId(99), a),
            Err(AnimaError::UnknownNode(99))
        ));
        assert!(matches!(
            graph.reparent(a, NodeId(99)),
            Err(AnimaError::UnknownParent(99))
        ));
    }

    #[test]
    fn test_traverse_is_pre_order() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(NodeId::ROOT, Node::new("a")).unwrap();
        let b = graph.add_node(NodeId::ROOT, Node::new("b")).unwrap();
        let a1 = graph.add_node(a, Node::new("a1")).unwrap();
        let a2 = graph.add_node(a, Node::new("a2")).unwrap();
        let b1 = graph.add_node(b, Node::new("b1")).unwrap();
        let order: Vec<NodeId> = graph.traverse().collect();
        assert_eq!(order, vec![NodeId::ROOT, a, a1, a2, b, b1]);
        assert_eq!(graph.descendants(a), vec![a1, a2]);
        assert_eq!(graph.ancestry(a2).unwrap(), vec![NodeId::ROOT, a, a2]);
    }

    #[test]
    fn test_world_transform_with_override() {
        let (graph, a, b) = chain();
        let world = graph
            .world_transform_with(b, |id, node| {
                if id == a {
                    Transform2D::from_translation(100.0, 0.0)
                } else {
                    node.transform
                }
            })
            .unwrap();
        assert_eq!(world.translation_part().x, 103.0);
    }
}
