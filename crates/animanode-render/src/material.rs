use animanode_core::{Affine2, BlendMode, Color};

/// A solid-colour material. The node's tint and opacity modulate
/// `base_color` per draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub base_color: Color,
    pub blend: BlendMode,
}

impl Material {
    pub fn solid(base_color: Color) -> Self {
        Self {
            base_color,
            blend: BlendMode::Opaque,
        }
    }

    pub fn blended(base_color: Color, blend: BlendMode) -> Self {
        Self { base_color, blend }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::solid(Color::WHITE)
    }
}

/// Per-draw uniform block.
///
/// Matches the WGSL struct
///
/// ```text
/// struct MaterialUniform {
///     transform: mat3x3<f32>,   // 48 bytes, columns padded to vec4
///     color: vec4<f32>,
///     depth: f32,
///     particle_scale: f32,
/// };
/// ```
///
/// which is 80 bytes with uniform-buffer alignment.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniform {
    pub transform: [[f32; 4]; 3],
    pub color: [f32; 4],
    pub depth: f32,
    pub particle_scale: f32,
    pub _pad: [f32; 2],
}

impl MaterialUniform {
    pub const SIZE: u64 = std::mem::size_of::<MaterialUniform>() as u64;

    /// `transform` maps mesh-local units to clip space.
    pub fn new(transform: &Affine2, color: Color, depth: f32) -> Self {
        Self {
            transform: transform.to_mat3_columns(),
            color: color.to_array(),
            depth,
            particle_scale: 1.0,
            _pad: [0.0; 2],
        }
    }

    pub fn with_particle_scale(mut self, scale: f32) -> Self {
        self.particle_scale = scale;
        self
    }

    /// Apply the uniform's transform to a mesh-local point, the way the
    /// vertex shader does.
    pub fn transform_point(&self, p: [f32; 2]) -> [f32; 2] {
        let [c0, c1, c2] = self.transform;
        [
            c0[0] * p[0] + c1[0] * p[1] + c2[0],
            c0[1] * p[0] + c1[1] * p[1] + c2[1],
        ]
    }

    pub fn color(&self) -> Color {
        let [r, g, b, a] = self.color;
        Color::rgba(r, g, b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_matches_wgsl_layout() {
        assert_eq!(MaterialUniform::SIZE, 80);
        assert_eq!(std::mem::offset_of!(MaterialUniform, color), 48);
        assert_eq!(std::mem::offset_of!(MaterialUniform, depth), 64);
        assert_eq!(std::mem::offset_of!(MaterialUniform, particle_scale), 68);
    }

    #[test]
    fn test_transform_point_matches_affine() {
        let m = Affine2::translation(3.0, -1.0)
            .multiply(&Affine2::rotation(0.5))
            .multiply(&Affine2::scale(2.0, 0.5));
        let u = MaterialUniform::new(&m, Color::WHITE, 0.5);
        let expected = m.transform_point(animanode_core::Point2D::new(1.5, 2.0));
        let got = u.transform_point([1.5, 2.0]);
        assert!((got[0] as f64 - expected.x).abs() < 1e-5);
        assert!((got[1] as f64 - expected.y).abs() < 1e-5);
    }

    #[test]
    fn test_default_material_is_opaque_white() {
        let m = Material::default();
        assert_eq!(m.base_color, Color::WHITE);
        assert_eq!(m.blend, BlendMode::Opaque);
    }
}
