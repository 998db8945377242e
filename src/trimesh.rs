//! Triangle Arrays and Triangle Mesh Shapes
//!
//! A [`TriangleArray`] owns shared vertex/index buffers plus a per-triangle
//! cache (unit normal, edge vectors, barycentric constants). Arrays with at
//! least [`MESH_BVH_MIN_TRIANGLES`] triangles also carry a static BVH.
//!
//! Triangle meshes are static-only collision geometry. The narrow phase
//! walks candidate triangles and wraps each in an ephemeral
//! [`TriangleShape`] that borrows the parent vertex buffer.

use std::sync::Arc;

use glam::Vec3;

use crate::bvh::{BvhPrimitive, LinearBvh, MESH_BVH_MIN_TRIANGLES};
use crate::collider::{Support, AABB};
use crate::error::{PhysicsError, PhysicsResult};
use crate::raycast::{Ray, ShapeRayHit, RAY_PARALLEL_EPSILON};

/// Cached per-triangle data
#[derive(Clone, Copy, Debug, Default)]
pub struct TriangleCache {
    /// Vertex indices
    pub indices: [u32; 3],
    /// Unit normal, counter-clockwise winding; zero for degenerate triangles
    pub normal: Vec3,
    /// `v1 - v0`
    pub edge0: Vec3,
    /// `v2 - v0`
    pub edge1: Vec3,
    /// `edge0 . edge0`
    pub dot00: f32,
    /// `edge0 . edge1`
    pub dot01: f32,
    /// `edge1 . edge1`
    pub dot11: f32,
    /// `1 / (dot00 * dot11 - dot01^2)`
    pub inv_denom: f32,
}

impl TriangleCache {
    fn new(indices: [u32; 3], v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        let edge0 = v1 - v0;
        let edge1 = v2 - v0;
        let dot00 = edge0.dot(edge0);
        let dot01 = edge0.dot(edge1);
        let dot11 = edge1.dot(edge1);
        let denom = dot00 * dot11 - dot01 * dot01;
        let normal = edge0.cross(edge1).normalize_or_zero();
        Self {
            indices,
            normal,
            edge0,
            edge1,
            dot00,
            dot01,
            dot11,
            inv_denom: if denom.abs() > 1e-20 { 1.0 / denom } else { 0.0 },
        }
    }

    /// Whether the triangle has a usable normal
    #[inline]
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.normal == Vec3::ZERO
    }

    /// Barycentric `(v, w)` weights of `p - v0` for vertices 1 and 2
    #[inline]
    #[must_use]
    pub fn barycentric(&self, rel: Vec3) -> (f32, f32) {
        let d20 = rel.dot(self.edge0);
        let d21 = rel.dot(self.edge1);
        let v = (self.dot11 * d20 - self.dot01 * d21) * self.inv_denom;
        let w = (self.dot00 * d21 - self.dot01 * d20) * self.inv_denom;
        (v, w)
    }
}

/// Shared triangle soup with cached per-triangle data
#[derive(Clone, Debug)]
pub struct TriangleArray {
    vertices: Vec<Vec3>,
    triangles: Vec<TriangleCache>,
    bvh: Option<LinearBvh>,
    aabb: AABB,
}

impl TriangleArray {
    /// Build from a vertex buffer and a flat index buffer (3 per triangle)
    pub fn new(vertices: Vec<Vec3>, indices: &[u32]) -> PhysicsResult<Self> {
        if indices.is_empty() || indices.len() % 3 != 0 {
            return Err(PhysicsError::InvalidShape {
                reason: "triangle index count must be a non-zero multiple of 3",
            });
        }
        if vertices.iter().any(|v| !v.is_finite()) {
            return Err(PhysicsError::InvalidShape {
                reason: "triangle vertices must be finite",
            });
        }
        if indices.iter().any(|&i| i as usize >= vertices.len()) {
            return Err(PhysicsError::InvalidShape {
                reason: "triangle index out of range",
            });
        }

        let triangles: Vec<TriangleCache> = indices
            .chunks_exact(3)
            .map(|c| {
                let idx = [c[0], c[1], c[2]];
                TriangleCache::new(
                    idx,
                    vertices[c[0] as usize],
                    vertices[c[1] as usize],
                    vertices[c[2] as usize],
                )
            })
            .collect();

        let mut aabb = AABB::from_point(vertices[indices[0] as usize]);
        for &i in indices {
            aabb = aabb.grown(vertices[i as usize]);
        }

        let mut array = Self {
            vertices,
            triangles,
            bvh: None,
            aabb,
        };
        if array.triangles.len() >= MESH_BVH_MIN_TRIANGLES {
            let prims: Vec<BvhPrimitive> = (0..array.triangles.len())
                .map(|i| BvhPrimitive {
                    aabb: array.triangle_aabb(i),
                    index: i as u32,
                })
                .collect();
            array.bvh = Some(LinearBvh::build(&prims));
        }
        Ok(array)
    }

    /// Vertex buffer
    #[inline]
    #[must_use]
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// Per-triangle cache
    #[inline]
    #[must_use]
    pub fn triangles(&self) -> &[TriangleCache] {
        &self.triangles
    }

    /// Number of triangles
    #[inline]
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Whether a BVH was built
    #[inline]
    #[must_use]
    pub fn has_bvh(&self) -> bool {
        self.bvh.is_some()
    }

    /// Local bounds of all referenced vertices
    #[inline]
    #[must_use]
    pub fn aabb(&self) -> AABB {
        self.aabb
    }

    /// The three corners of triangle `tri`
    #[inline]
    #[must_use]
    pub fn corners(&self, tri: usize) -> [Vec3; 3] {
        let [a, b, c] = self.triangles[tri].indices;
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    /// Local bounds of triangle `tri`
    #[must_use]
    pub fn triangle_aabb(&self, tri: usize) -> AABB {
        let [a, b, c] = self.corners(tri);
        AABB::from_point(a).grown(b).grown(c)
    }

    /// Visit every triangle whose bounds overlap `aabb` (local frame)
    pub fn for_each_overlapping<F: FnMut(usize)>(&self, aabb: &AABB, mut f: F) {
        match &self.bvh {
            Some(bvh) => bvh.query_callback(aabb, |i| f(i as usize)),
            None => {
                for i in 0..self.triangles.len() {
                    if self.triangle_aabb(i).intersects(aabb) {
                        f(i);
                    }
                }
            }
        }
    }

    /// Nearest hit against any triangle
    ///
    /// `two_sided` reports back-face hits with the normal flipped towards the
    /// ray; otherwise only front faces (counter-clockwise) are hit.
    #[must_use]
    pub fn ray_test(&self, ray: &Ray, two_sided: bool) -> Option<ShapeRayHit> {
        let mut best: Option<ShapeRayHit> = None;
        let mut test = |tri: usize, limit: f32| -> f32 {
            match self.ray_triangle(ray.with_max_factor(limit), tri, two_sided) {
                Some(hit) if hit.factor < limit => {
                    best = Some(hit);
                    hit.factor
                }
                _ => limit,
            }
        };
        match &self.bvh {
            Some(bvh) => bvh.ray_callback(ray, |i, limit| test(i as usize, limit)),
            None => {
                let mut limit = ray.max_factor;
                for i in 0..self.triangles.len() {
                    limit = test(i, limit);
                }
            }
        }
        best
    }

    /// Ray against a single triangle, using the cached barycentric constants
    #[must_use]
    pub fn ray_triangle(&self, ray: Ray, tri: usize, two_sided: bool) -> Option<ShapeRayHit> {
        let cache = &self.triangles[tri];
        if cache.is_degenerate() {
            return None;
        }
        let v0 = self.vertices[cache.indices[0] as usize];
        let denom = ray.direction.dot(cache.normal);
        if denom.abs() < RAY_PARALLEL_EPSILON || (!two_sided && denom > 0.0) {
            return None;
        }
        let t = (v0 - ray.origin).dot(cache.normal) / denom;
        if t < 0.0 || t > ray.max_factor {
            return None;
        }
        let point = ray.at(t);
        let (v, w) = cache.barycentric(point - v0);
        if v < 0.0 || w < 0.0 || v + w > 1.0 {
            return None;
        }
        let normal = if denom < 0.0 { cache.normal } else { -cache.normal };
        Some(ShapeRayHit {
            factor: t,
            point,
            normal,
        })
    }
}

/// Static triangle mesh shape
#[derive(Clone, Debug)]
pub struct TriangleMeshShape {
    /// Shared triangle data
    pub array: Arc<TriangleArray>,
    /// Collision margin around each triangle
    pub margin: f32,
}

impl TriangleMeshShape {
    /// Wrap a triangle array
    pub fn new(array: Arc<TriangleArray>, margin: f32) -> PhysicsResult<Self> {
        if !(margin >= 0.0) {
            return Err(PhysicsError::InvalidShape {
                reason: "triangle mesh margin must be non-negative",
            });
        }
        Ok(Self { array, margin })
    }

    /// Ephemeral convex shape for triangle `index`
    #[inline]
    #[must_use]
    pub fn triangle(&self, index: usize) -> TriangleShape<'_> {
        TriangleShape {
            array: &self.array,
            index,
            margin: self.margin,
        }
    }

    /// Local ray test (two-sided)
    #[must_use]
    pub fn ray_test(&self, ray: &Ray) -> Option<ShapeRayHit> {
        self.array.ray_test(ray, true)
    }
}

/// A single mesh triangle viewed as a convex shape
#[derive(Clone, Copy, Debug)]
pub struct TriangleShape<'a> {
    array: &'a TriangleArray,
    /// Triangle index in the parent array
    pub index: usize,
    margin: f32,
}

impl TriangleShape<'_> {
    /// Cached data of this triangle
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &TriangleCache {
        &self.array.triangles[self.index]
    }

    /// Corners in the mesh frame
    #[inline]
    #[must_use]
    pub fn corners(&self) -> [Vec3; 3] {
        self.array.corners(self.index)
    }
}

impl Support for TriangleShape<'_> {
    fn local_support_without_margin(&self, direction: Vec3) -> Vec3 {
        let [a, b, c] = self.corners();
        let (da, db, dc) = (a.dot(direction), b.dot(direction), c.dot(direction));
        if da >= db && da >= dc {
            a
        } else if db >= dc {
            b
        } else {
            c
        }
    }

    fn margin(&self) -> f32 {
        self.margin
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Flat `n x n` grid of quads on the XZ plane, normals facing +Y
    pub(crate) fn grid(n: usize, size: f32) -> TriangleArray {
        let mut vertices = Vec::new();
        for z in 0..=n {
            for x in 0..=n {
                vertices.push(Vec3::new(x as f32 * size, 0.0, z as f32 * size));
            }
        }
        let mut indices = Vec::new();
        let row = (n + 1) as u32;
        for z in 0..n as u32 {
            for x in 0..n as u32 {
                let i = z * row + x;
                indices.extend_from_slice(&[i, i + row, i + 1]);
                indices.extend_from_slice(&[i + 1, i + row, i + row + 1]);
            }
        }
        TriangleArray::new(vertices, &indices).unwrap()
    }

    #[test]
    fn test_build_small_mesh_without_bvh() {
        let arr = TriangleArray::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Z],
            &[0, 2, 1],
        )
        .unwrap();
        assert_eq!(arr.triangle_count(), 1);
        assert!(!arr.has_bvh());
        assert!(arr.triangles()[0].normal.abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn test_large_mesh_gets_bvh() {
        let arr = grid(4, 1.0);
        assert_eq!(arr.triangle_count(), 32);
        assert!(arr.has_bvh());
        assert!(arr.triangles()[0].normal.abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn test_invalid_indices() {
        assert!(TriangleArray::new(vec![Vec3::ZERO, Vec3::X], &[0, 1, 2]).is_err());
        assert!(TriangleArray::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], &[0, 1]).is_err());
        assert!(TriangleArray::new(vec![Vec3::ZERO], &[]).is_err());
    }

    #[test]
    fn test_ray_hits_grid_from_above() {
        let arr = grid(4, 1.0);
        let ray = Ray::new(Vec3::new(2.3, 5.0, 1.7), -Vec3::Y, 10.0);
        let hit = arr.ray_test(&ray, false).unwrap();
        assert_abs_diff_eq!(hit.factor, 5.0, epsilon = 1e-5);
        assert_eq!(hit.normal, Vec3::Y);
    }

    #[test]
    fn test_one_sided_ray_misses_back_face() {
        let arr = grid(2, 1.0);
        let ray = Ray::new(Vec3::new(0.5, -5.0, 0.5), Vec3::Y, 10.0);
        assert!(arr.ray_test(&ray, false).is_none());
        let hit = arr.ray_test(&ray, true).unwrap();
        assert_eq!(hit.normal, -Vec3::Y);
    }

    #[test]
    fn test_overlap_query_linear_and_bvh_agree() {
        let small = grid(1, 1.0);
        let large = grid(6, 1.0);
        let query = AABB::new(Vec3::new(0.2, -0.1, 0.2), Vec3::new(0.4, 0.1, 0.4));
        let mut a = Vec::new();
        small.for_each_overlapping(&query, |i| a.push(i));
        let mut b = Vec::new();
        large.for_each_overlapping(&query, |i| b.push(i));
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, vec![0, 1]);
        assert_eq!(b, vec![0, 1]);
    }

    #[test]
    fn test_triangle_support() {
        let arr = Arc::new(grid(1, 2.0));
        let mesh = TriangleMeshShape::new(arr, 0.01).unwrap();
        let tri = mesh.triangle(0);
        let s = tri.local_support_without_margin(Vec3::new(0.0, 0.0, 1.0));
        assert_abs_diff_eq!(s.z, 2.0);
        assert_eq!(tri.margin(), 0.01);
    }
}
