//! CPU-side triangle geometry.
//!
//! Scripts build [`Geometry`] values through the engine handle: primitives,
//! raw buffers or OBJ text, then transform and merge them. Geometry is plain
//! data (`Send`), so a finished scene can leave the script thread and be
//! uploaded by any renderer.
//!
//! ## Normal Handling
//!
//! Primitives carry analytic normals. Raw buffers and OBJ meshes without
//! normals get area-weighted vertex normals.

use std::collections::{HashMap, HashSet};
use std::f32::consts::{PI, TAU};

use glam::{Mat3, Mat4, Quat, Vec3};

/// Upper bound on segment counts accepted by primitive generators.
pub const MAX_SEGMENTS: u32 = 512;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min: Vec3::ZERO,
            max: Vec3::ZERO,
        }
    }
}

impl BoundingBox {
    /// Bounding box of a set of points; zero-sized at the origin when empty.
    pub fn from_points(points: &[Vec3]) -> Self {
        let Some(first) = points.first() else {
            return Self::default();
        };
        points.iter().fold(
            Self {
                min: *first,
                max: *first,
            },
            |acc, p| Self {
                min: acc.min.min(*p),
                max: acc.max.max(*p),
            },
        )
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Indexed triangle list with per-vertex normals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl Geometry {
    /// Build from flat `[x, y, z, ...]` positions and triangle indices.
    ///
    /// An empty index list means the positions are an unindexed triangle soup.
    pub fn from_buffers(positions: &[f32], indices: &[u32]) -> Result<Self, String> {
        if positions.len() % 3 != 0 {
            return Err(format!(
                "position buffer length {} is not a multiple of 3",
                positions.len()
            ));
        }
        if positions.iter().any(|v| !v.is_finite()) {
            return Err("position buffer contains non-finite values".to_string());
        }

        let positions: Vec<Vec3> = positions
            .chunks_exact(3)
            .map(|c| Vec3::new(c[0], c[1], c[2]))
            .collect();
        let indices: Vec<u32> = if indices.is_empty() {
            (0..positions.len() as u32).collect()
        } else {
            indices.to_vec()
        };

        if indices.len() % 3 != 0 {
            return Err(format!(
                "index count {} is not a multiple of 3",
                indices.len()
            ));
        }
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= positions.len()) {
            return Err(format!(
                "index {} out of range for {} vertices",
                bad,
                positions.len()
            ));
        }

        let normals = compute_vertex_normals(&positions, &indices);
        Ok(Self {
            positions,
            normals,
            indices,
        })
    }

    /// Parse Wavefront OBJ text, merging every model into one geometry.
    ///
    /// Normals are used when every model provides them.
    pub fn from_obj(obj_content: &str) -> Result<Self, String> {
        let mut cursor = std::io::Cursor::new(obj_content.as_bytes());

        let load_options = tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        };

        let (models, _materials) =
            tobj::load_obj_buf(&mut cursor, &load_options, |_| Ok((vec![], HashMap::new())))
                .map_err(|e| format!("Failed to parse OBJ: {}", e))?;

        if models.is_empty() {
            return Err("OBJ text contains no models".to_string());
        }

        let mut positions = Vec::new();
        let mut normals = Vec::new();
        let mut indices = Vec::new();
        let mut has_normals = true;

        for model in &models {
            let mesh = &model.mesh;
            if mesh.positions.is_empty() {
                continue;
            }

            let offset = positions.len() as u32;
            positions.extend(
                mesh.positions
                    .chunks_exact(3)
                    .map(|c| Vec3::new(c[0], c[1], c[2])),
            );

            if mesh.normals.len() == mesh.positions.len() {
                normals.extend(
                    mesh.normals
                        .chunks_exact(3)
                        .map(|c| Vec3::new(c[0], c[1], c[2]).normalize_or_zero()),
                );
            } else {
                has_normals = false;
            }

            indices.extend(mesh.indices.iter().map(|i| offset + i));
        }

        if positions.is_empty() {
            return Err("OBJ text contains no vertices".to_string());
        }

        let normals = if has_normals && normals.len() == positions.len() {
            normals
        } else {
            compute_vertex_normals(&positions, &indices)
        };

        Ok(Self {
            positions,
            normals,
            indices,
        })
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    /// Axis-aligned box centered at the origin, one flat-shaded quad per face.
    pub fn cuboid(width: f32, height: f32, depth: f32) -> Self {
        let h = Vec3::new(width, height, depth) * 0.5;
        let faces: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        ];

        let mut geometry = Self::default();
        for (normal, u, v) in faces {
            let base = geometry.positions.len() as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                geometry
                    .positions
                    .push((normal + u * su + v * sv) * h);
                geometry.normals.push(normal);
            }
            geometry
                .indices
                .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        geometry
    }

    /// UV sphere centered at the origin.
    pub fn sphere(radius: f32, width_segments: u32, height_segments: u32) -> Self {
        let lon_segments = clamp_segments(width_segments, 3);
        let lat_segments = clamp_segments(height_segments, 2);

        let mut geometry = Self::default();
        for lat in 0..=lat_segments {
            let theta = PI * lat as f32 / lat_segments as f32;
            for lon in 0..=lon_segments {
                let phi = TAU * lon as f32 / lon_segments as f32;
                let normal = Vec3::new(phi.cos() * theta.sin(), theta.cos(), phi.sin() * theta.sin());
                geometry.positions.push(normal * radius);
                geometry.normals.push(normal);
            }
        }

        for lat in 0..lat_segments {
            for lon in 0..lon_segments {
                let first = lat * (lon_segments + 1) + lon;
                let second = first + lon_segments + 1;
                if lat != 0 {
                    geometry.indices.extend_from_slice(&[first, first + 1, second]);
                }
                if lat != lat_segments - 1 {
                    geometry.indices.extend_from_slice(&[second, first + 1, second + 1]);
                }
            }
        }
        geometry
    }

    /// Capped cylinder (or frustum) along Y, centered at the origin.
    pub fn cylinder(radius_top: f32, radius_bottom: f32, height: f32, radial_segments: u32) -> Self {
        let segments = clamp_segments(radial_segments, 3);
        let half = height * 0.5;
        let slope = (radius_bottom - radius_top) / height.max(f32::EPSILON);

        let mut geometry = Self::default();

        for row in 0..=1u32 {
            let y = if row == 0 { half } else { -half };
            let radius = if row == 0 { radius_top } else { radius_bottom };
            for s in 0..=segments {
                let theta = TAU * s as f32 / segments as f32;
                let (sin, cos) = theta.sin_cos();
                geometry.positions.push(Vec3::new(radius * sin, y, radius * cos));
                geometry
                    .normals
                    .push(Vec3::new(sin, slope, cos).normalize_or_zero());
            }
        }
        for s in 0..segments {
            let a = s;
            let b = s + segments + 1;
            geometry.indices.extend_from_slice(&[a, b, a + 1, b, b + 1, a + 1]);
        }

        if radius_top > 0.0 {
            geometry.push_cap(half, radius_top, segments, Vec3::Y);
        }
        if radius_bottom > 0.0 {
            geometry.push_cap(-half, radius_bottom, segments, Vec3::NEG_Y);
        }
        geometry
    }

    /// Cone with its base on `y = -height / 2`.
    pub fn cone(radius: f32, height: f32, radial_segments: u32) -> Self {
        Self::cylinder(0.0, radius, height, radial_segments)
    }

    /// Torus in the XY plane.
    pub fn torus(radius: f32, tube: f32, radial_segments: u32, tubular_segments: u32) -> Self {
        let radial = clamp_segments(radial_segments, 3);
        let tubular = clamp_segments(tubular_segments, 3);

        let mut geometry = Self::default();
        for j in 0..=radial {
            let v = TAU * j as f32 / radial as f32;
            for i in 0..=tubular {
                let u = TAU * i as f32 / tubular as f32;
                let center = Vec3::new(radius * u.cos(), radius * u.sin(), 0.0);
                let position = Vec3::new(
                    (radius + tube * v.cos()) * u.cos(),
                    (radius + tube * v.cos()) * u.sin(),
                    tube * v.sin(),
                );
                geometry.positions.push(position);
                geometry.normals.push((position - center).normalize_or_zero());
            }
        }

        for j in 1..=radial {
            for i in 1..=tubular {
                let a = (tubular + 1) * j + i - 1;
                let b = (tubular + 1) * (j - 1) + i - 1;
                let c = (tubular + 1) * (j - 1) + i;
                let d = (tubular + 1) * j + i;
                geometry.indices.extend_from_slice(&[a, b, d, b, c, d]);
            }
        }
        geometry
    }

    /// Plane in the XZ plane (Y up), centered at the origin.
    pub fn plane(width: f32, depth: f32) -> Self {
        let (w, d) = (width * 0.5, depth * 0.5);
        Self {
            positions: vec![
                Vec3::new(-w, 0.0, d),
                Vec3::new(w, 0.0, d),
                Vec3::new(w, 0.0, -d),
                Vec3::new(-w, 0.0, -d),
            ],
            normals: vec![Vec3::Y; 4],
            indices: vec![0, 1, 2, 2, 3, 0],
        }
    }

    fn push_cap(&mut self, y: f32, radius: f32, segments: u32, normal: Vec3) {
        let center = self.positions.len() as u32;
        self.positions.push(Vec3::new(0.0, y, 0.0));
        self.normals.push(normal);

        for s in 0..=segments {
            let theta = TAU * s as f32 / segments as f32;
            let (sin, cos) = theta.sin_cos();
            self.positions.push(Vec3::new(radius * sin, y, radius * cos));
            self.normals.push(normal);
        }
        for s in 0..segments {
            let a = center + 1 + s;
            if normal.y > 0.0 {
                self.indices.extend_from_slice(&[center, a, a + 1]);
            } else {
                self.indices.extend_from_slice(&[center, a + 1, a]);
            }
        }
    }

    // ========================================================================
    // Queries and transforms
    // ========================================================================

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::from_points(&self.positions)
    }

    /// Apply an affine transform to positions and normals.
    pub fn apply_matrix(&mut self, matrix: Mat4) {
        let normal_matrix = Mat3::from_mat4(matrix).inverse().transpose();
        for p in &mut self.positions {
            *p = matrix.transform_point3(*p);
        }
        for n in &mut self.normals {
            *n = (normal_matrix * *n).normalize_or_zero();
        }
        if matrix.determinant() < 0.0 {
            for tri in self.indices.chunks_exact_mut(3) {
                tri.swap(1, 2);
            }
        }
    }

    pub fn translate(&mut self, offset: Vec3) {
        for p in &mut self.positions {
            *p += offset;
        }
    }

    pub fn scale(&mut self, factors: Vec3) {
        self.apply_matrix(Mat4::from_scale(factors));
    }

    pub fn rotate(&mut self, rotation: Quat) {
        self.apply_matrix(Mat4::from_quat(rotation));
    }

    /// Append another geometry's triangles.
    pub fn merge(&mut self, other: &Geometry) {
        let offset = self.positions.len() as u32;
        self.positions.extend_from_slice(&other.positions);
        self.normals.extend_from_slice(&other.normals);
        self.indices.extend(other.indices.iter().map(|i| i + offset));
    }

    /// Unique undirected edges as index pairs, for wireframe rendering.
    pub fn edges(&self) -> Vec<u32> {
        extract_edges(&self.indices)
    }
}

fn clamp_segments(requested: u32, minimum: u32) -> u32 {
    requested.clamp(minimum, MAX_SEGMENTS)
}

/// Extract unique edges from triangle indices.
///
/// Returns a flat array of vertex index pairs: `[a0, b0, a1, b1, ...]`.
fn extract_edges(indices: &[u32]) -> Vec<u32> {
    let mut seen: HashSet<(u32, u32)> = HashSet::new();
    let mut edges = Vec::new();

    for tri in indices.chunks_exact(3) {
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            let edge = if a < b { (a, b) } else { (b, a) };
            if seen.insert(edge) {
                edges.extend_from_slice(&[edge.0, edge.1]);
            }
        }
    }
    edges
}

/// Area-weighted vertex normals; degenerate vertices fall back to Y-up.
fn compute_vertex_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];

    for tri in indices.chunks_exact(3) {
        let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        if i0 >= positions.len() || i1 >= positions.len() || i2 >= positions.len() {
            continue;
        }

        // Magnitude is twice the triangle area.
        let face_normal = (positions[i1] - positions[i0]).cross(positions[i2] - positions[i0]);
        for idx in [i0, i1, i2] {
            normals[idx] += face_normal;
        }
    }

    for normal in &mut normals {
        *normal = if normal.length_squared() > 1e-12 {
            normal.normalize()
        } else {
            Vec3::Y
        };
    }
    normals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_vec3_near(actual: Vec3, expected: Vec3) {
        assert!(
            actual.abs_diff_eq(expected, 1e-5),
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn cuboid_bounds_and_counts() {
        let g = Geometry::cuboid(2.0, 4.0, 6.0);
        assert_eq!(g.vertex_count(), 24);
        assert_eq!(g.triangle_count(), 12);
        let b = g.bounds();
        assert_vec3_near(b.min, Vec3::new(-1.0, -2.0, -3.0));
        assert_vec3_near(b.max, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn sphere_normals_point_outward() {
        let g = Geometry::sphere(2.0, 16, 8);
        for (p, n) in g.positions.iter().zip(&g.normals) {
            assert_vec3_near(*p, *n * 2.0);
        }
        assert!(g.indices.iter().all(|&i| (i as usize) < g.vertex_count()));
    }

    #[test]
    fn segment_counts_are_clamped() {
        let tiny = Geometry::sphere(1.0, 0, 0);
        assert_eq!(tiny.vertex_count(), (3 + 1) * (2 + 1));

        let huge = Geometry::torus(1.0, 0.2, u32::MAX, 3);
        assert_eq!(huge.vertex_count(), (MAX_SEGMENTS as usize + 1) * 4);
    }

    #[test]
    fn cone_has_apex_and_base() {
        let g = Geometry::cone(1.0, 2.0, 12);
        let b = g.bounds();
        assert!((b.min.y + 1.0).abs() < 1e-5);
        assert!((b.max.y - 1.0).abs() < 1e-5);
        assert!(g.indices.iter().all(|&i| (i as usize) < g.vertex_count()));
    }

    #[test]
    fn buffers_are_validated() {
        assert!(Geometry::from_buffers(&[0.0, 0.0], &[]).is_err());
        assert!(Geometry::from_buffers(&[0.0; 9], &[0, 1, 3]).is_err());
        assert!(Geometry::from_buffers(&[f32::NAN; 9], &[]).is_err());

        let soup = Geometry::from_buffers(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], &[]).unwrap();
        assert_eq!(soup.indices, vec![0, 1, 2]);
        assert_vec3_near(soup.normals[0], Vec3::Z);
    }

    #[test]
    fn transforms_and_merge() {
        let mut g = Geometry::plane(2.0, 2.0);
        g.translate(Vec3::new(0.0, 3.0, 0.0));
        g.scale(Vec3::splat(2.0));
        assert_vec3_near(g.bounds().min, Vec3::new(-2.0, 6.0, -2.0));

        g.rotate(Quat::from_rotation_x(PI));
        assert_vec3_near(g.normals[0], Vec3::NEG_Y);

        let before = g.vertex_count();
        g.merge(&Geometry::cuboid(1.0, 1.0, 1.0));
        assert_eq!(g.vertex_count(), before + 24);
        assert!(g.indices.iter().all(|&i| (i as usize) < g.vertex_count()));
    }

    #[test]
    fn mirrored_scale_keeps_winding_outward() {
        let mut g = Geometry::from_buffers(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], &[]).unwrap();
        g.scale(Vec3::new(-1.0, 1.0, 1.0));
        assert_eq!(g.indices, vec![0, 2, 1]);
    }

    #[test]
    fn edges_are_unique() {
        let g = Geometry::from_buffers(&[0.0; 12], &[0, 1, 2, 0, 1, 3]).unwrap();
        assert_eq!(g.edges().len(), 10);
    }

    #[test]
    fn obj_parsing() {
        let obj = r#"
            v 0 0 0
            v 1 0 0
            v 0 1 0
            f 1 2 3
        "#;
        let g = Geometry::from_obj(obj).unwrap();
        assert_eq!(g.vertex_count(), 3);
        assert_eq!(g.triangle_count(), 1);
        assert_vec3_near(g.normals[0], Vec3::Z);

        assert!(Geometry::from_obj("").is_err());
    }
}
