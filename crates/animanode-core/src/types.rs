use serde::{Deserialize, Serialize};

/// How a keyframe segment is interpolated towards the next keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Hold the segment's start value until the next keyframe.
    Step,
    /// Straight-line interpolation between the two keyframes.
    Linear,
    /// Catmull-Rom spline through the surrounding four keyframes.
    Cubic,
}

impl Default for Interpolation {
    fn default() -> Self {
        Interpolation::Linear
    }
}

impl Interpolation {
    /// Whether this mode blends between values (as opposed to holding them).
    pub fn is_continuous(&self) -> bool {
        !matches!(self, Interpolation::Step)
    }
}

impl std::fmt::Display for Interpolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interpolation::Step => write!(f, "step"),
            Interpolation::Linear => write!(f, "linear"),
            Interpolation::Cubic => write!(f, "cubic"),
        }
    }
}

/// Blend mode a material draws with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    /// Replace the destination; depth-written.
    Opaque,
    /// Standard alpha blending (Porter-Duff "over").
    Alpha,
    /// Additive blending.
    Add,
}

impl Default for BlendMode {
    fn default() -> Self {
        BlendMode::Opaque
    }
}

impl std::fmt::Display for BlendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlendMode::Opaque => write!(f, "opaque"),
            BlendMode::Alpha => write!(f, "alpha"),
            BlendMode::Add => write!(f, "add"),
        }
    }
}
