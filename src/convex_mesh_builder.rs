//! Convex Hull Builder
//!
//! One-time shape-authoring utility: turns a raw point cloud into a
//! triangulated hull plus the vertex adjacency graph used by the hull's
//! hill-climbing support search.
//!
//! # Algorithm
//!
//! 1. Find an initial tetrahedron from 4 non-coplanar points
//! 2. For each remaining point, collect the faces it can see
//! 3. Remove visible faces and stitch the horizon edges to the new point
//!
//! Faces keep a consistent counter-clockwise winding (outward normals), so a
//! horizon edge is exactly an edge of a visible face whose reverse belongs to
//! a hidden face. Coplanar input falls back to a flat, double-sided polygon.

use glam::Vec3;

use crate::error::{PhysicsError, PhysicsResult};
use crate::math::tangent_basis;

/// Relative tolerance for visibility and coplanarity tests
const HULL_EPSILON: f32 = 1e-5;

/// Triangulated hull output
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HullMesh {
    /// Hull vertices (only points on the hull)
    pub vertices: Vec<Vec3>,
    /// Triangle indices, 3 per face, counter-clockwise seen from outside
    pub indices: Vec<u32>,
    /// True when the input was coplanar and the hull is a flat polygon
    pub flat: bool,
}

/// Face of the hull under construction
#[derive(Clone, Copy, Debug)]
struct HullFace {
    indices: [usize; 3],
    /// Unit outward normal
    normal: Vec3,
    /// Plane offset `normal . v0`
    offset: f32,
}

impl HullFace {
    fn new(verts: &[Vec3], indices: [usize; 3], interior: Vec3) -> Self {
        let [a, b, c] = indices.map(|i| verts[i]);
        let mut indices = indices;
        let mut normal = (b - a).cross(c - a).normalize_or_zero();
        if normal.dot(interior - a) > 0.0 {
            indices.swap(1, 2);
            normal = -normal;
        }
        Self {
            indices,
            normal,
            offset: normal.dot(a),
        }
    }

    #[inline]
    fn distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) - self.offset
    }
}

/// Compute the centroid (average) of a set of points
///
/// Returns the zero vector if the input slice is empty.
#[must_use]
pub fn compute_centroid(points: &[Vec3]) -> Vec3 {
    if points.is_empty() {
        return Vec3::ZERO;
    }
    points.iter().copied().sum::<Vec3>() / points.len() as f32
}

/// Build a convex hull from a set of points
///
/// Fails on fewer than 3 points, non-finite input, or when every point lies
/// on a single line.
pub fn build_convex_hull(points: &[Vec3]) -> PhysicsResult<HullMesh> {
    if points.len() < 3 {
        return Err(PhysicsError::InvalidShape {
            reason: "convex hull needs at least 3 vertices",
        });
    }
    if points.iter().any(|p| !p.is_finite()) {
        return Err(PhysicsError::InvalidShape {
            reason: "convex hull vertices must be finite",
        });
    }

    let scale = points
        .iter()
        .fold(0.0f32, |m, p| m.max(p.abs().max_element()))
        .max(1.0);
    let eps = HULL_EPSILON * scale;

    let Some([i0, i1, i2]) = find_initial_triangle(points, eps) else {
        return Err(PhysicsError::InvalidShape {
            reason: "convex hull points are collinear",
        });
    };
    let plane_normal = (points[i1] - points[i0]).cross(points[i2] - points[i0]).normalize();
    let i3 = (0..points.len())
        .filter(|&i| i != i0 && i != i1 && i != i2)
        .max_by(|&a, &b| {
            let da = (points[a] - points[i0]).dot(plane_normal).abs();
            let db = (points[b] - points[i0]).dot(plane_normal).abs();
            da.total_cmp(&db)
        });
    let i3 = match i3 {
        Some(i) if (points[i] - points[i0]).dot(plane_normal).abs() > eps => i,
        _ => return Ok(build_flat_hull(points, plane_normal)),
    };

    let mut verts: Vec<Vec3> = vec![points[i0], points[i1], points[i2], points[i3]];
    let interior = compute_centroid(&verts);
    let mut faces: Vec<HullFace> = [[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]]
        .into_iter()
        .map(|f| HullFace::new(&verts, f, interior))
        .collect();

    for (i, &p) in points.iter().enumerate() {
        if i == i0 || i == i1 || i == i2 || i == i3 {
            continue;
        }
        insert_point(&mut verts, &mut faces, p, interior, eps);
    }

    Ok(compact(&verts, &faces))
}

/// Two far-apart points plus the point farthest from their line
fn find_initial_triangle(points: &[Vec3], eps: f32) -> Option<[usize; 3]> {
    // Extreme points along X, Y and Z seed the first edge
    let mut i0 = 0;
    let mut i1 = 0;
    let mut best = -1.0f32;
    for axis in 0..3 {
        let (mut lo, mut hi) = (0, 0);
        for (i, p) in points.iter().enumerate() {
            if p[axis] < points[lo][axis] {
                lo = i;
            }
            if p[axis] > points[hi][axis] {
                hi = i;
            }
        }
        let d = points[hi].distance_squared(points[lo]);
        if d > best {
            best = d;
            i0 = lo;
            i1 = hi;
        }
    }
    if best <= eps * eps {
        return None;
    }

    let dir = points[i1] - points[i0];
    let (i2, area) = points
        .iter()
        .enumerate()
        .map(|(i, p)| (i, dir.cross(*p - points[i0]).length()))
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    if area <= eps * dir.length() {
        return None;
    }
    Some([i0, i1, i2])
}

/// Insert a point, replacing every face it sees
fn insert_point(
    verts: &mut Vec<Vec3>,
    faces: &mut Vec<HullFace>,
    point: Vec3,
    interior: Vec3,
    eps: f32,
) {
    let visible: Vec<bool> = faces.iter().map(|f| f.distance(point) > eps).collect();
    if !visible.iter().any(|&v| v) {
        return;
    }

    // Horizon: directed edges of visible faces whose reverse is not visible
    let mut horizon: Vec<(usize, usize)> = Vec::new();
    for (fi, face) in faces.iter().enumerate() {
        if !visible[fi] {
            continue;
        }
        for k in 0..3 {
            let (e0, e1) = (face.indices[k], face.indices[(k + 1) % 3]);
            let shared_with_visible = faces.iter().enumerate().any(|(oi, other)| {
                oi != fi
                    && visible[oi]
                    && (0..3).any(|m| other.indices[m] == e1 && other.indices[(m + 1) % 3] == e0)
            });
            if !shared_with_visible {
                horizon.push((e0, e1));
            }
        }
    }

    let mut keep = visible.iter().map(|v| !v);
    faces.retain(|_| keep.next().unwrap_or(true));

    let new_idx = verts.len();
    verts.push(point);
    for (e0, e1) in horizon {
        faces.push(HullFace::new(verts, [e0, e1, new_idx], interior));
    }
}

/// Drop unreferenced vertices and flatten face indices
fn compact(verts: &[Vec3], faces: &[HullFace]) -> HullMesh {
    let mut remap = vec![u32::MAX; verts.len()];
    let mut vertices = Vec::new();
    let mut indices = Vec::with_capacity(faces.len() * 3);
    for face in faces {
        for &i in &face.indices {
            if remap[i] == u32::MAX {
                remap[i] = vertices.len() as u32;
                vertices.push(verts[i]);
            }
            indices.push(remap[i]);
        }
    }
    HullMesh {
        vertices,
        indices,
        flat: false,
    }
}

/// Coplanar input: 2D monotone-chain hull, fan-triangulated on both sides
fn build_flat_hull(points: &[Vec3], normal: Vec3) -> HullMesh {
    let (u, v) = tangent_basis(normal);
    let mut projected: Vec<(f32, f32, usize)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| (p.dot(u), p.dot(v), i))
        .collect();
    projected.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let cross = |o: &(f32, f32, usize), a: &(f32, f32, usize), b: &(f32, f32, usize)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };
    let mut ring: Vec<(f32, f32, usize)> = Vec::with_capacity(projected.len() * 2);
    for p in projected.iter() {
        while ring.len() >= 2 && cross(&ring[ring.len() - 2], &ring[ring.len() - 1], p) <= 0.0 {
            ring.pop();
        }
        ring.push(*p);
    }
    let lower_len = ring.len() + 1;
    for p in projected.iter().rev().skip(1) {
        while ring.len() >= lower_len && cross(&ring[ring.len() - 2], &ring[ring.len() - 1], p) <= 0.0 {
            ring.pop();
        }
        ring.push(*p);
    }
    ring.pop();

    let vertices: Vec<Vec3> = ring.iter().map(|&(_, _, i)| points[i]).collect();
    let n = vertices.len() as u32;
    let mut indices = Vec::with_capacity(((n.saturating_sub(2)) * 6) as usize);
    for k in 1..n.saturating_sub(1) {
        // Counter-clockwise in (u, v) faces +normal; the reverse faces -normal
        indices.extend_from_slice(&[0, k, k + 1]);
        indices.extend_from_slice(&[0, k + 1, k]);
    }
    HullMesh {
        vertices,
        indices,
        flat: true,
    }
}

/// Vertex adjacency graph from triangle edges (sorted, deduplicated)
#[must_use]
pub fn hull_adjacency(vertex_count: usize, indices: &[u32]) -> Vec<Vec<u32>> {
    let mut adjacency = vec![Vec::new(); vertex_count];
    for tri in indices.chunks_exact(3) {
        for k in 0..3 {
            let a = tri[k];
            let b = tri[(k + 1) % 3];
            adjacency[a as usize].push(b);
            adjacency[b as usize].push(a);
        }
    }
    for list in &mut adjacency {
        list.sort_unstable();
        list.dedup();
    }
    adjacency
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_points() -> Vec<Vec3> {
        let mut pts = Vec::new();
        for i in 0..8 {
            pts.push(Vec3::new(
                if i & 1 != 0 { 1.0 } else { -1.0 },
                if i & 2 != 0 { 1.0 } else { -1.0 },
                if i & 4 != 0 { 1.0 } else { -1.0 },
            ));
        }
        pts
    }

    fn assert_outward(mesh: &HullMesh) {
        let c = compute_centroid(&mesh.vertices);
        for tri in mesh.indices.chunks_exact(3) {
            let [a, b, d] = [tri[0], tri[1], tri[2]].map(|i| mesh.vertices[i as usize]);
            let n = (b - a).cross(d - a);
            assert!(n.dot(a - c) > 0.0, "face must wind counter-clockwise from outside");
        }
    }

    #[test]
    fn test_compute_centroid_basic() {
        let c = compute_centroid(&[Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0), Vec3::new(0.0, 4.0, 0.0), Vec3::new(0.0, 0.0, 4.0)]);
        assert!(c.abs_diff_eq(Vec3::ONE, 1e-6));
        assert_eq!(compute_centroid(&[]), Vec3::ZERO);
    }

    #[test]
    fn test_build_convex_hull_tetrahedron() {
        let mesh = build_convex_hull(&[Vec3::ZERO, Vec3::X * 10.0, Vec3::Y * 10.0, Vec3::Z * 10.0]).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 12);
        assert_outward(&mesh);
    }

    #[test]
    fn test_build_convex_hull_cube() {
        let mesh = build_convex_hull(&cube_points()).unwrap();
        assert_eq!(mesh.vertices.len(), 8);
        // 6 quads, 2 triangles each
        assert_eq!(mesh.indices.len(), 36);
        assert!(!mesh.flat);
        assert_outward(&mesh);
    }

    #[test]
    fn test_build_convex_hull_with_interior_point() {
        let mut pts = cube_points();
        pts.push(Vec3::new(0.1, -0.2, 0.3));
        pts.push(Vec3::ZERO);
        let mesh = build_convex_hull(&pts).unwrap();
        assert_eq!(mesh.vertices.len(), 8);
    }

    #[test]
    fn test_too_few_points() {
        assert!(build_convex_hull(&[Vec3::ZERO, Vec3::X]).is_err());
    }

    #[test]
    fn test_collinear_points_rejected() {
        let pts = [Vec3::ZERO, Vec3::X, Vec3::X * 2.0, Vec3::X * 3.0];
        assert!(build_convex_hull(&pts).is_err());
    }

    #[test]
    fn test_flat_hull() {
        let pts = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.5, 0.0, 0.5),
        ];
        let mesh = build_convex_hull(&pts).unwrap();
        assert!(mesh.flat);
        assert_eq!(mesh.vertices.len(), 4, "interior point is dropped");
        assert_eq!(mesh.indices.len(), 12);
    }

    #[test]
    fn test_adjacency_of_tetrahedron_is_complete() {
        let mesh = build_convex_hull(&[Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z]).unwrap();
        let adj = hull_adjacency(mesh.vertices.len(), &mesh.indices);
        for (i, list) in adj.iter().enumerate() {
            assert_eq!(list.len(), 3);
            assert!(!list.contains(&(i as u32)));
        }
    }
}
