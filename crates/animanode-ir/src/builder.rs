use animanode_core::{AnimaError, AnimaResult, Color, Interpolation, Point2D};

use crate::node::{Node, Renderable, ScalarProperty, TrackBinding};
use crate::track::{Animatable, KeyframeTrack};

/// A builder for keyframe tracks.
///
/// Insertion errors are deferred to [`build`](Self::build) so keys can be
/// chained without intermediate `?`.
pub struct TrackBuilder<V> {
    track: KeyframeTrack<V>,
    mode: Interpolation,
    error: Option<AnimaError>,
}

impl<V: Animatable> TrackBuilder<V> {
    /// Start a track whose keys default to `mode`.
    pub fn new(mode: Interpolation) -> Self {
        Self {
            track: KeyframeTrack::new(),
            mode,
            error: None,
        }
    }

    /// Add a key with the builder's default mode.
    pub fn key(&mut self, time: f64, value: V) -> &mut Self {
        let mode = self.mode;
        self.key_with(time, value, mode)
    }

    /// Add a key with an explicit mode for the segment it starts.
    pub fn key_with(&mut self, time: f64, value: V, mode: Interpolation) -> &mut Self {
        if self.error.is_none() {
            if let Err(e) = self.track.insert(time, value, mode) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Add a key that holds its value until the next key.
    pub fn hold(&mut self, time: f64, value: V) -> &mut Self {
        self.key_with(time, value, Interpolation::Step)
    }

    /// Return the track, or the first insertion error.
    pub fn build(&mut self) -> AnimaResult<KeyframeTrack<V>> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(std::mem::take(&mut self.track)),
        }
    }
}

/// A builder for constructing a Node with its tracks.
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            node: Node::new(name),
        }
    }

    pub fn position(&mut self, x: f64, y: f64) -> &mut Self {
        self.node.transform.translation = Point2D::new(x, y);
        self
    }

    pub fn scale(&mut self, s: f64) -> &mut Self {
        self.node.transform.scale = Point2D::new(s, s);
        self
    }

    pub fn scale_xy(&mut self, x: f64, y: f64) -> &mut Self {
        self.node.transform.scale = Point2D::new(x, y);
        self
    }

    /// Rotation in radians.
    pub fn rotation(&mut self, radians: f64) -> &mut Self {
        self.node.transform.rotation = radians;
        self
    }

    pub fn opacity(&mut self, opacity: f64) -> &mut Self {
        self.node.opacity = opacity;
        self
    }

    pub fn z(&mut self, z: f64) -> &mut Self {
        self.node.z = z;
        self
    }

    pub fn tint(&mut self, tint: Color) -> &mut Self {
        self.node.tint = tint;
        self
    }

    pub fn param(&mut self, name: impl Into<String>, value: f64) -> &mut Self {
        self.node.params.insert(name.into(), value);
        self
    }

    pub fn renderable(&mut self, renderable: Renderable) -> &mut Self {
        self.node.renderable = Some(renderable);
        self
    }

    /// Shorthand for a mesh renderable.
    pub fn mesh(&mut self, mesh: impl Into<String>, material: impl Into<String>) -> &mut Self {
        self.renderable(Renderable::mesh(mesh, material))
    }

    pub fn transparent(&mut self) -> &mut Self {
        if let Some(r) = self.node.renderable.as_mut() {
            r.transparent = true;
        }
        self
    }

    pub fn hidden(&mut self) -> &mut Self {
        self.node.visible = false;
        self
    }

    pub fn animate(&mut self, property: ScalarProperty, track: KeyframeTrack<f64>) -> &mut Self {
        self.node.bind(TrackBinding::Scalar { property, track });
        self
    }

    pub fn bind(&mut self, binding: TrackBinding) -> &mut Self {
        self.node.bind(binding);
        self
    }

    pub fn build(&self) -> Node {
        self.node.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Payload;

    #[test]
    fn test_track_builder() {
        let track = TrackBuilder::new(Interpolation::Linear)
            .key(0.0, 0.0)
            .key(2.0, 10.0)
            .hold(3.0, 10.0)
            .build()
            .unwrap();
        assert_eq!(track.len(), 3);
        assert_eq!(track.evaluate(1.0), Some(5.0));
    }

    #[test]
    fn test_track_builder_defers_first_error() {
        let err = TrackBuilder::new(Interpolation::Linear)
            .key(1.0, 0.0)
            .key(1.0, 2.0)
            .key(f64::NAN, 3.0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_node_builder() {
        let spin = TrackBuilder::new(Interpolation::Linear)
            .key(0.0, 0.0)
            .key(1.0, std::f64::consts::PI)
            .build()
            .unwrap();
        let node = NodeBuilder::new("spinner")
            .position(10.0, 20.0)
            .scale(2.0)
            .z(1.0)
            .mesh("quad", "flat")
            .transparent()
            .animate(ScalarProperty::Rotation, spin)
            .build();

        assert_eq!(node.transform.translation, Point2D::new(10.0, 20.0));
        assert_eq!(node.transform.scale, Point2D::new(2.0, 2.0));
        let r = node.renderable.as_ref().unwrap();
        assert!(r.transparent);
        assert!(matches!(r.payload, Payload::Mesh { .. }));
        assert_eq!(node.tracks().len(), 1);
    }
}
