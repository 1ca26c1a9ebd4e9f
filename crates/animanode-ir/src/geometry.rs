//! 2D mesh primitives.
//!
//! Every generator produces indexed, counter-clockwise triangles in
//! mesh-local units, centred on the origin unless stated otherwise. UVs map
//! the shape's bounding box onto `[0, 1]`, with `v` pointing down.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use animanode_core::{AnimaError, AnimaResult, Point2D};

/// Indexed triangle list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub positions: Vec<[f32; 2]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Build a mesh from positions and indices, deriving bounding-box UVs.
    pub fn from_positions(positions: Vec<[f32; 2]>, indices: Vec<u32>) -> Self {
        let uvs = bounding_box_uvs(&positions);
        Self {
            positions,
            uvs,
            indices,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Axis-aligned bounds as `(min, max)`, or `None` for an empty mesh.
    pub fn bounds(&self) -> Option<([f32; 2], [f32; 2])> {
        let first = *self.positions.first()?;
        Some(self.positions.iter().fold((first, first), |(lo, hi), p| {
            (
                [lo[0].min(p[0]), lo[1].min(p[1])],
                [hi[0].max(p[0]), hi[1].max(p[1])],
            )
        }))
    }

    /// Check that the index list forms whole triangles over existing vertices.
    pub fn validate(&self) -> AnimaResult<()> {
        if self.indices.len() % 3 != 0 {
            return Err(AnimaError::InvalidArgument(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        if self.uvs.len() != self.positions.len() {
            return Err(AnimaError::InvalidArgument(
                "uv count does not match position count".into(),
            ));
        }
        if let Some(bad) = self
            .indices
            .iter()
            .find(|&&i| i as usize >= self.positions.len())
        {
            return Err(AnimaError::InvalidArgument(format!(
                "index {} out of range for {} vertices",
                bad,
                self.positions.len()
            )));
        }
        Ok(())
    }

    /// Triangles as position triples.
    pub fn triangles(&self) -> impl Iterator<Item = [[f32; 2]; 3]> + '_ {
        self.indices.chunks_exact(3).map(move |tri| {
            [
                self.positions[tri[0] as usize],
                self.positions[tri[1] as usize],
                self.positions[tri[2] as usize],
            ]
        })
    }

    /// Axis-aligned rectangle of `width` x `height`.
    pub fn rectangle(width: f64, height: f64) -> Self {
        let hw = (width * 0.5) as f32;
        let hh = (height * 0.5) as f32;
        Self {
            positions: vec![[-hw, -hh], [hw, -hh], [hw, hh], [-hw, hh]],
            uvs: vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    /// Rectangle of `width` x `height` split into a `columns` x `rows` grid
    /// of quads. Useful when per-vertex detail matters, e.g. for custom UVs.
    pub fn plane(width: f64, height: f64, columns: u32, rows: u32) -> Self {
        let (columns, rows) = (columns.max(1), rows.max(1));
        let stride = columns + 1;
        let mut positions = Vec::with_capacity((stride * (rows + 1)) as usize);
        for j in 0..=rows {
            let y = height * (j as f64 / rows as f64 - 0.5);
            for i in 0..=columns {
                let x = width * (i as f64 / columns as f64 - 0.5);
                positions.push([x as f32, y as f32]);
            }
        }
        let mut indices = Vec::with_capacity((columns * rows * 6) as usize);
        for j in 0..rows {
            for i in 0..columns {
                let bl = j * stride + i;
                let br = bl + 1;
                let tl = bl + stride;
                let tr = tl + 1;
                indices.extend_from_slice(&[bl, br, tr, bl, tr, tl]);
            }
        }
        Self::from_positions(positions, indices)
    }

    /// Unit square, the default quad for sprites and particles.
    pub fn quad() -> Self {
        Self::rectangle(1.0, 1.0)
    }

    /// Filled circle as a triangle fan around a centre vertex.
    pub fn circle(radius: f64, segments: u32) -> Self {
        Self::regular_polygon(radius, segments.max(3))
    }

    /// Regular polygon with `sides` vertices on a circle of `radius`, the
    /// first vertex on the positive x axis.
    pub fn regular_polygon(radius: f64, sides: u32) -> Self {
        let sides = sides.max(3);
        let mut positions = Vec::with_capacity(sides as usize + 1);
        positions.push([0.0, 0.0]);
        for i in 0..sides {
            let angle = TAU * i as f64 / sides as f64;
            positions.push([
                (radius * angle.cos()) as f32,
                (radius * angle.sin()) as f32,
            ]);
        }
        let mut indices = Vec::with_capacity(sides as usize * 3);
        for i in 0..sides {
            indices.extend_from_slice(&[0, i + 1, (i + 1) % sides + 1]);
        }
        Self::from_positions(positions, indices)
    }

    /// Annulus between `inner` and `outer` radius, one quad per segment.
    pub fn ring(inner: f64, outer: f64, segments: u32) -> Self {
        let segments = segments.max(3);
        let (inner, outer) = if inner <= outer {
            (inner, outer)
        } else {
            (outer, inner)
        };
        let mut positions = Vec::with_capacity(segments as usize * 2);
        for i in 0..segments {
            let angle = TAU * i as f64 / segments as f64;
            let (s, c) = angle.sin_cos();
            positions.push([(inner * c) as f32, (inner * s) as f32]);
            positions.push([(outer * c) as f32, (outer * s) as f32]);
        }
        let mut indices = Vec::with_capacity(segments as usize * 6);
        for i in 0..segments {
            let a_in = i * 2;
            let a_out = a_in + 1;
            let b_in = ((i + 1) % segments) * 2;
            let b_out = b_in + 1;
            indices.extend_from_slice(&[a_in, a_out, b_out, a_in, b_out, b_in]);
        }
        Self::from_positions(positions, indices)
    }

    /// Single triangle. Vertices are reordered if needed so the winding is
    /// counter-clockwise.
    pub fn triangle(a: Point2D, b: Point2D, c: Point2D) -> Self {
        let cross = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
        let (b, c) = if cross < 0.0 { (c, b) } else { (b, c) };
        let positions = [a, b, c]
            .iter()
            .map(|p| [p.x as f32, p.y as f32])
            .collect();
        Self::from_positions(positions, vec![0, 1, 2])
    }

    /// Equilateral triangle pointing up, inscribed in a circle of `radius`.
    pub fn equilateral(radius: f64) -> Self {
        let vertex = |deg: f64| {
            let r = deg.to_radians();
            Point2D::new(radius * r.cos(), radius * r.sin())
        };
        Self::triangle(vertex(90.0), vertex(210.0), vertex(330.0))
    }

    /// Straight segment from `from` to `to` extruded to `thickness`.
    ///
    /// Lines are drawn as thin quads; a zero-length segment yields an empty mesh.
    pub fn line(from: Point2D, to: Point2D, thickness: f64) -> Self {
        let dir = to - from;
        let len = dir.length();
        if len == 0.0 || thickness <= 0.0 {
            return Self::from_positions(Vec::new(), Vec::new());
        }
        let half = thickness * 0.5 / len;
        let normal = Point2D::new(-dir.y * half, dir.x * half);
        let corners = [from - normal, to - normal, to + normal, from + normal];
        let positions: Vec<[f32; 2]> = corners.iter().map(|p| [p.x as f32, p.y as f32]).collect();
        // UV u runs along the line, v across it.
        let uvs = vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];
        Self {
            positions,
            uvs,
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    /// Connected polyline through `points`, each segment extruded to `thickness`.
    pub fn polyline(points: &[Point2D], thickness: f64) -> Self {
        let mut mesh = Self::from_positions(Vec::new(), Vec::new());
        for pair in points.windows(2) {
            let seg = Self::line(pair[0], pair[1], thickness);
            let base = mesh.positions.len() as u32;
            mesh.positions.extend_from_slice(&seg.positions);
            mesh.uvs.extend_from_slice(&seg.uvs);
            mesh.indices.extend(seg.indices.iter().map(|i| i + base));
        }
        mesh
    }

    /// Stroke of the parametric curve `f` sampled at `divisions + 1` evenly
    /// spaced parameters in `[t_min, t_max]`.
    pub fn curve<F>(f: F, t_min: f64, t_max: f64, divisions: u32, thickness: f64) -> Self
    where
        F: Fn(f64) -> Point2D,
    {
        let divisions = divisions.max(1);
        let points: Vec<Point2D> = (0..=divisions)
            .map(|i| f(t_min + (t_max - t_min) * i as f64 / divisions as f64))
            .collect();
        Self::polyline(&points, thickness)
    }

    /// Stroke of the cubic Bezier curve with control points `p`.
    pub fn bezier(p: [Point2D; 4], divisions: u32, thickness: f64) -> Self {
        Self::curve(
            |t| {
                let u = 1.0 - t;
                p[0] * (u * u * u)
                    + p[1] * (3.0 * u * u * t)
                    + p[2] * (3.0 * u * t * t)
                    + p[3] * (t * t * t)
            },
            0.0,
            1.0,
            divisions,
            thickness,
        )
    }
}

fn bounding_box_uvs(positions: &[[f32; 2]]) -> Vec<[f32; 2]> {
    let Some(first) = positions.first() else {
        return Vec::new();
    };
    let (lo, hi) = positions.iter().fold((*first, *first), |(lo, hi), p| {
        (
            [lo[0].min(p[0]), lo[1].min(p[1])],
            [hi[0].max(p[0]), hi[1].max(p[1])],
        )
    });
    let w = (hi[0] - lo[0]).max(f32::EPSILON);
    let h = (hi[1] - lo[1]).max(f32::EPSILON);
    positions
        .iter()
        .map(|p| [(p[0] - lo[0]) / w, 1.0 - (p[1] - lo[1]) / h])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_area(tri: [[f32; 2]; 3]) -> f32 {
        let [a, b, c] = tri;
        ((b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])) * 0.5
    }

    fn assert_ccw(mesh: &Mesh) {
        mesh.validate().unwrap();
        assert!(mesh.triangle_count() > 0);
        for tri in mesh.triangles() {
            assert!(signed_area(tri) > 0.0, "clockwise triangle {:?}", tri);
        }
    }

    #[test]
    fn test_rectangle() {
        let mesh = Mesh::rectangle(4.0, 2.0);
        assert_ccw(&mesh);
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.bounds(), Some(([-2.0, -1.0], [2.0, 1.0])));
        let area: f32 = mesh.triangles().map(signed_area).sum();
        assert!((area - 8.0).abs() < 1e-5);
    }

    #[test]
    fn test_circle_area_approaches_pi() {
        let mesh = Mesh::circle(1.0, 256);
        assert_ccw(&mesh);
        let area: f32 = mesh.triangles().map(signed_area).sum();
        assert!((area - std::f32::consts::PI).abs() < 1e-3);
        assert_eq!(mesh.triangle_count(), 256);
    }

    #[test]
    fn test_polygon_clamps_sides() {
        let mesh = Mesh::regular_polygon(1.0, 1);
        assert_eq!(mesh.triangle_count(), 3);
        assert_ccw(&mesh);
    }

    #[test]
    fn test_ring() {
        let mesh = Mesh::ring(0.5, 1.0, 64);
        assert_ccw(&mesh);
        assert_eq!(mesh.triangle_count(), 128);
        let area: f32 = mesh.triangles().map(signed_area).sum();
        let expected = std::f32::consts::PI * (1.0 - 0.25);
        assert!((area - expected).abs() < 0.01);
        // Swapped radii give the same ring.
        assert_eq!(Mesh::ring(1.0, 0.5, 64), mesh);
    }

    #[test]
    fn test_triangle_rewinds_clockwise_input() {
        let mesh = Mesh::triangle(
            Point2D::new(0.0, 0.0),
            Point2D::new(0.0, 1.0),
            Point2D::new(1.0, 0.0),
        );
        assert_ccw(&mesh);
        assert_ccw(&Mesh::equilateral(1.0));
    }

    #[test]
    fn test_line_and_polyline() {
        let line = Mesh::line(Point2D::new(0.0, 0.0), Point2D::new(10.0, 0.0), 2.0);
        assert_ccw(&line);
        assert_eq!(line.bounds(), Some(([0.0, -1.0], [10.0, 1.0])));
        assert_eq!(Mesh::line(Point2D::zero(), Point2D::zero(), 1.0).triangle_count(), 0);

        let poly = Mesh::polyline(
            &[Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0), Point2D::new(1.0, 1.0)],
            0.1,
        );
        assert_ccw(&poly);
        assert_eq!(poly.triangle_count(), 4);
    }

    #[test]
    fn test_plane_grid() {
        let mesh = Mesh::plane(2.0, 1.0, 4, 2);
        assert_ccw(&mesh);
        assert_eq!(mesh.vertex_count(), 15);
        assert_eq!(mesh.triangle_count(), 16);
        assert_eq!(mesh.bounds(), Some(([-1.0, -0.5], [1.0, 0.5])));
        let area: f32 = mesh.triangles().map(signed_area).sum();
        assert!((area - 2.0).abs() < 1e-5);
        assert_eq!(Mesh::plane(1.0, 1.0, 0, 0).triangle_count(), 2);
    }

    #[test]
    fn test_curve_samples_parameter_range() {
        let arc = Mesh::curve(
            |t| Point2D::new(t.cos(), t.sin()),
            0.0,
            std::f64::consts::PI,
            32,
            0.05,
        );
        assert_ccw(&arc);
        assert_eq!(arc.triangle_count(), 64);
        let (lo, hi) = arc.bounds().unwrap();
        assert!(lo[0] < -1.0 && hi[0] > 1.0);
        assert!(lo[1] > -0.05 && hi[1] < 1.05);
    }

    #[test]
    fn test_bezier_hits_end_points() {
        let p = [
            Point2D::new(0.0, 0.0),
            Point2D::new(1.0, 2.0),
            Point2D::new(3.0, 2.0),
            Point2D::new(4.0, 0.0),
        ];
        let mesh = Mesh::bezier(p, 20, 0.1);
        assert_ccw(&mesh);
        let (lo, hi) = mesh.bounds().unwrap();
        assert!((lo[0] + 0.05).abs() < 0.06 && (hi[0] - 4.05).abs() < 0.06);
        // The curve peaks at t = 0.5, y = 1.5.
        assert!((hi[1] - 1.5).abs() < 0.06);
    }

    #[test]
    fn test_validate_rejects_bad_indices() {
        let mut mesh = Mesh::quad();
        mesh.indices.push(9);
        assert!(mesh.validate().is_err());
        mesh.indices.extend_from_slice(&[0, 1]);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_uvs_span_unit_square() {
        let mesh = Mesh::circle(3.0, 16);
        for uv in &mesh.uvs {
            assert!((0.0..=1.0).contains(&uv[0]));
            assert!((0.0..=1.0).contains(&uv[1]));
        }
    }
}
