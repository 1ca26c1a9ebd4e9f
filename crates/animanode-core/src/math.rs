use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// A 2D point (or vector).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    /// Linear interpolation between two points.
    pub fn lerp(&self, other: &Point2D, t: f64) -> Point2D {
        Point2D {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    /// Euclidean length of the vector from the origin.
    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

impl Default for Point2D {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add for Point2D {
    type Output = Point2D;
    fn add(self, rhs: Point2D) -> Point2D {
        Point2D::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point2D {
    type Output = Point2D;
    fn sub(self, rhs: Point2D) -> Point2D {
        Point2D::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point2D {
    type Output = Point2D;
    fn mul(self, rhs: f64) -> Point2D {
        Point2D::new(self.x * rhs, self.y * rhs)
    }
}

/// Local transform of a scene node: translation, rotation and scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform2D {
    /// Translation in canvas units.
    pub translation: Point2D,
    /// Rotation in radians, counter-clockwise.
    pub rotation: f64,
    /// Scale factors.
    pub scale: Point2D,
}

impl Transform2D {
    /// Identity transform: no translation, no rotation, unit scale.
    pub fn identity() -> Self {
        Self {
            translation: Point2D::zero(),
            rotation: 0.0,
            scale: Point2D::new(1.0, 1.0),
        }
    }

    pub fn from_translation(x: f64, y: f64) -> Self {
        Self {
            translation: Point2D::new(x, y),
            ..Self::identity()
        }
    }

    pub fn with_rotation(mut self, radians: f64) -> Self {
        self.rotation = radians;
        self
    }

    pub fn with_scale(mut self, sx: f64, sy: f64) -> Self {
        self.scale = Point2D::new(sx, sy);
        self
    }

    /// Build the matrix `T * R * S` for this transform.
    pub fn to_matrix(&self) -> Affine2 {
        Affine2::translation(self.translation.x, self.translation.y)
            * Affine2::rotation(self.rotation)
            * Affine2::scale(self.scale.x, self.scale.y)
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

/// A 2D affine matrix, stored as the top two rows of a 3x3 matrix:
///
/// ```text
/// | a  b  tx |
/// | c  d  ty |
/// | 0  0  1  |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine2 {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Affine2 {
    pub const IDENTITY: Affine2 = Affine2 {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn translation(x: f64, y: f64) -> Self {
        Self {
            tx: x,
            ty: y,
            ..Self::IDENTITY
        }
    }

    /// Counter-clockwise rotation by `radians`.
    pub fn rotation(radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            a: cos,
            b: -sin,
            c: sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    /// Matrix product `self * rhs` (apply `rhs` first, then `self`).
    pub fn multiply(&self, rhs: &Affine2) -> Affine2 {
        Affine2 {
            a: self.a * rhs.a + self.b * rhs.c,
            b: self.a * rhs.b + self.b * rhs.d,
            c: self.c * rhs.a + self.d * rhs.c,
            d: self.c * rhs.b + self.d * rhs.d,
            tx: self.a * rhs.tx + self.b * rhs.ty + self.tx,
            ty: self.c * rhs.tx + self.d * rhs.ty + self.ty,
        }
    }

    pub fn transform_point(&self, p: Point2D) -> Point2D {
        Point2D::new(
            self.a * p.x + self.b * p.y + self.tx,
            self.c * p.x + self.d * p.y + self.ty,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// Inverse matrix, or `None` if the matrix is singular.
    pub fn inverse(&self) -> Option<Affine2> {
        let det = self.determinant();
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        let a = self.d * inv_det;
        let b = -self.b * inv_det;
        let c = -self.c * inv_det;
        let d = self.a * inv_det;
        Some(Affine2 {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + b * self.ty),
            ty: -(c * self.tx + d * self.ty),
        })
    }

    /// The translation component.
    pub fn translation_part(&self) -> Point2D {
        Point2D::new(self.tx, self.ty)
    }

    /// Column-major 3x3 layout padded to `vec4` columns, as WGSL expects for
    /// a `mat3x3<f32>` uniform.
    pub fn to_mat3_columns(&self) -> [[f32; 4]; 3] {
        [
            [self.a as f32, self.c as f32, 0.0, 0.0],
            [self.b as f32, self.d as f32, 0.0, 0.0],
            [self.tx as f32, self.ty as f32, 1.0, 0.0],
        ]
    }

    /// Raw bit patterns of the six coefficients, for exact comparisons and hashing.
    pub fn to_bits(&self) -> [u64; 6] {
        [
            self.a.to_bits(),
            self.b.to_bits(),
            self.c.to_bits(),
            self.d.to_bits(),
            self.tx.to_bits(),
            self.ty.to_bits(),
        ]
    }
}

impl Default for Affine2 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Affine2 {
    type Output = Affine2;
    fn mul(self, rhs: Affine2) -> Affine2 {
        self.multiply(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_point_lerp() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(10.0, 20.0);
        let mid = a.lerp(&b, 0.5);
        assert!((mid.x - 5.0).abs() < 0.001);
        assert!((mid.y - 10.0).abs() < 0.001);
    }

    #[test]
    fn test_transform_identity() {
        let t = Transform2D::identity();
        assert_eq!(t.translation, Point2D::zero());
        assert_eq!(t.scale, Point2D::new(1.0, 1.0));
        assert_eq!(t.rotation, 0.0);
        assert_eq!(t.to_matrix(), Affine2::IDENTITY);
    }

    #[test]
    fn test_trs_order_scales_before_translating() {
        let t = Transform2D::from_translation(10.0, 0.0).with_scale(2.0, 2.0);
        let p = t.to_matrix().transform_point(Point2D::new(1.0, 0.0));
        assert!(approx(p.x, 12.0));
        assert!(approx(p.y, 0.0));
    }

    #[test]
    fn test_rotation_is_counter_clockwise() {
        let p = Affine2::rotation(FRAC_PI_2).transform_point(Point2D::new(1.0, 0.0));
        assert!(approx(p.x, 0.0));
        assert!(approx(p.y, 1.0));
    }

    #[test]
    fn test_multiply_is_not_commutative() {
        let t = Affine2::translation(5.0, 0.0);
        let r = Affine2::rotation(FRAC_PI_2);
        let tr = (t * r).transform_point(Point2D::new(1.0, 0.0));
        let rt = (r * t).transform_point(Point2D::new(1.0, 0.0));
        assert!(approx(tr.x, 5.0) && approx(tr.y, 1.0));
        assert!(approx(rt.x, 0.0) && approx(rt.y, 6.0));
    }

    #[test]
    fn test_inverse_round_trip() {
        let m = Transform2D::from_translation(3.0, -4.0)
            .with_rotation(0.7)
            .with_scale(2.0, 0.5)
            .to_matrix();
        let inv = m.inverse().unwrap();
        let p = Point2D::new(1.5, 2.5);
        let back = inv.transform_point(m.transform_point(p));
        assert!(approx(back.x, p.x) && approx(back.y, p.y));
        assert!(Affine2::scale(0.0, 1.0).inverse().is_none());
    }

    #[test]
    fn test_mat3_columns_layout() {
        let cols = Affine2::translation(7.0, 9.0).to_mat3_columns();
        assert_eq!(cols[2], [7.0, 9.0, 1.0, 0.0]);
        assert_eq!(cols[0], [1.0, 0.0, 0.0, 0.0]);
    }
}
