//! Collision Shapes
//!
//! Immutable shape descriptors shared between bodies through `Arc<Shape>`.
//!
//! # Shapes
//!
//! - Plane, sphere, box, capsule, cylinder, cone, triangle mesh, convex hull
//!
//! Every shape carries the same derived data: bounding radius (maximum
//! extent from the body origin, margin included), local AABB half-extents
//! and center, diagonal inertia per unit mass, and the collision margin.
//!
//! # Support function
//!
//! GJK works on a shrunken *core* and adds the margin back afterwards.
//! [`Support::local_support_without_margin`] returns the core's extreme
//! point. Spheres and capsules are a point and a segment with a margin equal
//! to their radius. Planes and raw meshes have no support function; the
//! narrow phase handles them separately.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use glam::{Mat3, Vec3};

use crate::box_collider::BoxShape;
use crate::cone::Cone;
use crate::convex_mesh_builder::{build_convex_hull, hull_adjacency};
use crate::cylinder::Cylinder;
use crate::error::{PhysicsError, PhysicsResult};
use crate::math::Transform;
use crate::plane_collider::PlaneShape;
use crate::raycast::{ray_capsule, ray_sphere, Ray, ShapeRayHit};
use crate::trimesh::{TriangleArray, TriangleMeshShape};

/// Default collision margin
pub const DEFAULT_MARGIN: f32 = 0.04;

/// Half-extent used for the bounds of infinite planes
pub const PLANE_EXTENT: f32 = 1.0e6;

/// Support mapping trait for GJK/EPA
pub trait Support {
    /// Local point of the core maximizing the dot product with `direction`
    fn local_support_without_margin(&self, direction: Vec3) -> Vec3;

    /// Margin wrapped around the core
    fn margin(&self) -> f32;
}

// ============================================================================
// AABB
// ============================================================================

/// Axis-Aligned Bounding Box
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AABB {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl AABB {
    /// Create a new AABB from min and max corners
    #[inline]
    #[must_use]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Degenerate box around a single point
    #[inline]
    #[must_use]
    pub fn from_point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    /// Create AABB from center and half-extents
    #[inline]
    #[must_use]
    pub fn from_center_half(center: Vec3, half: Vec3) -> Self {
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Check if two AABBs intersect (broad phase)
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &AABB) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Whether `other` lies entirely inside `self`
    #[inline]
    #[must_use]
    pub fn contains(&self, other: &AABB) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    /// Compute union of two AABBs
    #[inline]
    #[must_use]
    pub fn union(&self, other: &AABB) -> AABB {
        AABB {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Grow to include a point
    #[inline]
    #[must_use]
    pub fn grown(&self, p: Vec3) -> AABB {
        AABB {
            min: self.min.min(p),
            max: self.max.max(p),
        }
    }

    /// Inflate on every side
    #[inline]
    #[must_use]
    pub fn expanded(&self, margin: f32) -> AABB {
        AABB {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    /// Center point
    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half-extents
    #[inline]
    #[must_use]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Surface area (for BVH heuristics)
    #[inline]
    #[must_use]
    pub fn surface_area(&self) -> f32 {
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Bounds of this box after a rigid transform
    #[must_use]
    pub fn transformed(&self, transform: &Transform) -> AABB {
        let abs = Mat3::from_cols(
            transform.basis.x_axis.abs(),
            transform.basis.y_axis.abs(),
            transform.basis.z_axis.abs(),
        );
        AABB::from_center_half(transform.transform_point(self.center()), abs * self.half_extents())
    }
}

// ============================================================================
// Convex hull
// ============================================================================

/// Convex hull with hill-climbing support search
#[derive(Debug)]
pub struct ConvexHull {
    /// Hull vertices
    pub vertices: Vec<Vec3>,
    /// Triangulated surface, used for ray tests
    pub faces: TriangleArray,
    /// Vertex adjacency graph
    pub adjacency: Vec<Vec<u32>>,
    /// Collision margin, added outside the vertices
    pub margin: f32,
    /// Vertex returned by the previous support query
    last_support: AtomicU32,
}

impl Clone for ConvexHull {
    fn clone(&self) -> Self {
        Self {
            vertices: self.vertices.clone(),
            faces: self.faces.clone(),
            adjacency: self.adjacency.clone(),
            margin: self.margin,
            last_support: AtomicU32::new(self.last_support.load(Ordering::Relaxed)),
        }
    }
}

impl ConvexHull {
    /// Build from a point cloud
    pub fn from_points(points: &[Vec3], margin: f32) -> PhysicsResult<Self> {
        if !(margin >= 0.0) {
            return Err(PhysicsError::InvalidShape {
                reason: "convex hull margin must be non-negative",
            });
        }
        let mesh = build_convex_hull(points)?;
        let adjacency = hull_adjacency(mesh.vertices.len(), &mesh.indices);
        let faces = TriangleArray::new(mesh.vertices.clone(), &mesh.indices)?;
        Ok(Self {
            vertices: mesh.vertices,
            faces,
            adjacency,
            margin,
            last_support: AtomicU32::new(0),
        })
    }

    /// Index of the vertex maximizing `dot(v, direction)`
    ///
    /// Walks the adjacency graph from the previous answer; on a convex hull
    /// the first local maximum is the global one.
    #[must_use]
    pub fn support_index(&self, direction: Vec3) -> usize {
        let mut best = (self.last_support.load(Ordering::Relaxed) as usize).min(self.vertices.len() - 1);
        let mut best_dot = self.vertices[best].dot(direction);
        loop {
            let mut improved = false;
            for &n in &self.adjacency[best] {
                let d = self.vertices[n as usize].dot(direction);
                if d > best_dot {
                    best_dot = d;
                    best = n as usize;
                    improved = true;
                }
            }
            if !improved {
                break;
            }
        }
        self.last_support.store(best as u32, Ordering::Relaxed);
        best
    }

    /// Local bounds of the vertices
    #[must_use]
    pub fn aabb(&self) -> AABB {
        self.faces.aabb()
    }

    /// Local ray test against the outward faces
    #[must_use]
    pub fn ray_test(&self, ray: &Ray) -> Option<ShapeRayHit> {
        self.faces.ray_test(ray, false)
    }
}

// ============================================================================
// Shape
// ============================================================================

static NEXT_SHAPE_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique shape identifier, part of the arbiter key
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShapeId(pub u32);

impl ShapeId {
    fn next() -> Self {
        Self(NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Variant-specific geometry
#[derive(Clone, Debug)]
pub enum ShapeKind {
    /// Infinite plane, static only
    Plane(PlaneShape),
    /// Sphere centered at the origin
    Sphere {
        /// Sphere radius
        radius: f32,
    },
    /// Box centered at the origin
    Box(BoxShape),
    /// Y-axis capsule centered at the origin
    Capsule {
        /// Radius of the rounded ends
        radius: f32,
        /// Half the distance between the cap centers
        half_height: f32,
    },
    /// Y-axis cylinder
    Cylinder(Cylinder),
    /// Y-axis cone, apex up
    Cone(Cone),
    /// Static triangle mesh
    TriangleMesh(TriangleMeshShape),
    /// Convex hull of a point cloud
    ConvexHull(ConvexHull),
}

/// Immutable collision shape
#[derive(Clone, Debug)]
pub struct Shape {
    id: ShapeId,
    kind: ShapeKind,
    radius: f32,
    half_extents: Vec3,
    center: Vec3,
    inertia: Vec3,
    margin: f32,
}

impl Shape {
    fn from_kind(kind: ShapeKind) -> Self {
        let (radius, half_extents, center, inertia, margin) = match &kind {
            ShapeKind::Plane(_) => (f32::MAX, Vec3::splat(PLANE_EXTENT), Vec3::ZERO, Vec3::ZERO, 0.0),
            ShapeKind::Sphere { radius } => (
                *radius,
                Vec3::splat(*radius),
                Vec3::ZERO,
                Vec3::splat(0.4 * radius * radius),
                *radius,
            ),
            ShapeKind::Box(b) => (b.radius(), b.half_extents, Vec3::ZERO, b.inertia(), b.margin),
            ShapeKind::Capsule { radius, half_height } => {
                let he = Vec3::new(*radius, half_height + radius, *radius);
                // Cylinder of the full length plus two hemispheres
                let r2 = radius * radius;
                let h = 2.0 * half_height;
                let cyl = r2 * h;
                let sph = 4.0 / 3.0 * r2 * radius;
                let total = cyl + sph;
                let iyy = (cyl * 0.5 * r2 + sph * 0.4 * r2) / total;
                let ixx = (cyl * (r2 / 4.0 + h * h / 12.0)
                    + sph * (0.4 * r2 + half_height * half_height + 0.375 * radius * h))
                    / total;
                (half_height + radius, he, Vec3::ZERO, Vec3::new(ixx, iyy, ixx), *radius)
            }
            ShapeKind::Cylinder(c) => (
                c.half_extents().length(),
                c.half_extents(),
                Vec3::ZERO,
                c.inertia(),
                c.margin,
            ),
            ShapeKind::Cone(c) => (
                c.half_extents().length(),
                c.half_extents(),
                Vec3::ZERO,
                c.inertia(),
                c.margin,
            ),
            ShapeKind::TriangleMesh(m) => {
                let aabb = m.array.aabb();
                let radius = m
                    .array
                    .vertices()
                    .iter()
                    .fold(0.0f32, |r, v| r.max(v.length()));
                (
                    radius + m.margin,
                    aabb.half_extents() + Vec3::splat(m.margin),
                    aabb.center(),
                    Vec3::ZERO,
                    m.margin,
                )
            }
            ShapeKind::ConvexHull(h) => {
                let aabb = h.aabb();
                let radius = h.vertices.iter().fold(0.0f32, |r, v| r.max(v.length()));
                let he = aabb.half_extents() + Vec3::splat(h.margin);
                let h2 = he * he;
                let inertia = Vec3::new(h2.y + h2.z, h2.x + h2.z, h2.x + h2.y) / 3.0;
                (radius + h.margin, he, aabb.center(), inertia, h.margin)
            }
        };
        Self {
            id: ShapeId::next(),
            kind,
            radius,
            half_extents,
            center,
            inertia,
            margin,
        }
    }

    /// Infinite plane `normal . x = distance`
    pub fn plane(normal: Vec3, distance: f32) -> PhysicsResult<Self> {
        Ok(Self::from_kind(ShapeKind::Plane(PlaneShape::new(normal, distance)?)))
    }

    /// Sphere
    pub fn sphere(radius: f32) -> PhysicsResult<Self> {
        if !(radius > 0.0 && radius.is_finite()) {
            return Err(PhysicsError::InvalidShape {
                reason: "sphere radius must be positive",
            });
        }
        Ok(Self::from_kind(ShapeKind::Sphere { radius }))
    }

    /// Box with the given half-extents
    pub fn cuboid(half_extents: Vec3, margin: f32) -> PhysicsResult<Self> {
        Ok(Self::from_kind(ShapeKind::Box(BoxShape::new(half_extents, margin)?)))
    }

    /// Y-axis capsule; `half_height` is measured between the cap centers
    pub fn capsule(radius: f32, half_height: f32) -> PhysicsResult<Self> {
        if !(radius > 0.0 && radius.is_finite()) || !(half_height >= 0.0 && half_height.is_finite()) {
            return Err(PhysicsError::InvalidShape {
                reason: "capsule radius must be positive and half-height non-negative",
            });
        }
        Ok(Self::from_kind(ShapeKind::Capsule { radius, half_height }))
    }

    /// Y-axis cylinder
    pub fn cylinder(radius: f32, half_height: f32, margin: f32) -> PhysicsResult<Self> {
        Ok(Self::from_kind(ShapeKind::Cylinder(Cylinder::new(radius, half_height, margin)?)))
    }

    /// Y-axis cone, apex at `+half_height`
    pub fn cone(radius: f32, half_height: f32, margin: f32) -> PhysicsResult<Self> {
        Ok(Self::from_kind(ShapeKind::Cone(Cone::new(radius, half_height, margin)?)))
    }

    /// Static triangle mesh over a shared triangle array
    pub fn triangle_mesh(array: Arc<TriangleArray>, margin: f32) -> PhysicsResult<Self> {
        Ok(Self::from_kind(ShapeKind::TriangleMesh(TriangleMeshShape::new(array, margin)?)))
    }

    /// Convex hull of a point cloud (at least 3 points)
    pub fn convex_hull(points: &[Vec3], margin: f32) -> PhysicsResult<Self> {
        Ok(Self::from_kind(ShapeKind::ConvexHull(ConvexHull::from_points(points, margin)?)))
    }

    /// Identifier used in arbiter keys
    #[inline]
    #[must_use]
    pub fn id(&self) -> ShapeId {
        self.id
    }

    /// Variant data
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &ShapeKind {
        &self.kind
    }

    /// Maximum extent from the local origin, margin included
    #[inline]
    #[must_use]
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Local AABB half-extents
    #[inline]
    #[must_use]
    pub fn half_extents(&self) -> Vec3 {
        self.half_extents
    }

    /// Local AABB center offset
    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// Diagonal inertia per unit mass
    #[inline]
    #[must_use]
    pub fn inertia(&self) -> Vec3 {
        self.inertia
    }

    /// Collision margin
    #[inline]
    #[must_use]
    pub fn collision_margin(&self) -> f32 {
        self.margin
    }

    /// Whether GJK can query this shape directly
    #[inline]
    #[must_use]
    pub fn is_convex(&self) -> bool {
        !matches!(self.kind, ShapeKind::Plane(_) | ShapeKind::TriangleMesh(_))
    }

    /// Whether the shape may only be attached to static or kinematic objects
    #[inline]
    #[must_use]
    pub fn is_static_only(&self) -> bool {
        !self.is_convex()
    }

    /// Short type name
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ShapeKind::Plane(_) => "PLANE",
            ShapeKind::Sphere { .. } => "SPHERE",
            ShapeKind::Box(_) => "BOX",
            ShapeKind::Capsule { .. } => "CAPSULE",
            ShapeKind::Cylinder(_) => "CYLINDER",
            ShapeKind::Cone(_) => "CONE",
            ShapeKind::TriangleMesh(_) => "TRIANGLE_MESH",
            ShapeKind::ConvexHull(_) => "CONVEX_HULL",
        }
    }

    /// Local bounds
    #[inline]
    #[must_use]
    pub fn local_aabb(&self) -> AABB {
        AABB::from_center_half(self.center, self.half_extents)
    }

    /// World bounds under `transform`
    #[must_use]
    pub fn world_aabb(&self, transform: &Transform) -> AABB {
        match self.kind {
            ShapeKind::Plane(_) => AABB::from_center_half(Vec3::ZERO, Vec3::splat(PLANE_EXTENT)),
            ShapeKind::Sphere { radius } => AABB::from_center_half(transform.origin, Vec3::splat(radius)),
            _ => self.local_aabb().transformed(transform),
        }
    }

    /// Ray test in the shape's local frame
    #[must_use]
    pub fn ray_test(&self, ray: &Ray) -> Option<ShapeRayHit> {
        match &self.kind {
            ShapeKind::Plane(p) => p.ray_test(ray),
            ShapeKind::Sphere { radius } => ray_sphere(ray, Vec3::ZERO, *radius),
            ShapeKind::Box(b) => b.ray_test(ray),
            ShapeKind::Capsule { radius, half_height } => ray_capsule(ray, *radius, *half_height),
            ShapeKind::Cylinder(c) => c.ray_test(ray),
            ShapeKind::Cone(c) => c.ray_test(ray),
            ShapeKind::TriangleMesh(m) => m.ray_test(ray),
            ShapeKind::ConvexHull(h) => h.ray_test(ray),
        }
    }
}

impl Support for Shape {
    fn local_support_without_margin(&self, direction: Vec3) -> Vec3 {
        match &self.kind {
            ShapeKind::Sphere { .. } => Vec3::ZERO,
            ShapeKind::Capsule { half_height, .. } => {
                Vec3::new(0.0, if direction.y >= 0.0 { *half_height } else { -half_height }, 0.0)
            }
            ShapeKind::Box(b) => b.local_support_without_margin(direction),
            ShapeKind::Cylinder(c) => c.local_support_without_margin(direction),
            ShapeKind::Cone(c) => c.local_support_without_margin(direction),
            ShapeKind::ConvexHull(h) => h.vertices[h.support_index(direction)],
            // No support mapping; the narrow phase never asks
            ShapeKind::Plane(_) | ShapeKind::TriangleMesh(_) => Vec3::ZERO,
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
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_aabb_intersects_and_union() {
        let a = AABB::new(Vec3::ZERO, Vec3::splat(2.0));
        let b = AABB::new(Vec3::ONE, Vec3::splat(3.0));
        let c = AABB::new(Vec3::splat(5.0), Vec3::splat(6.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        let u = a.union(&c);
        assert!(u.contains(&a) && u.contains(&c));
        assert_abs_diff_eq!(AABB::new(Vec3::ZERO, Vec3::ONE).surface_area(), 6.0);
    }

    #[test]
    fn test_aabb_transformed_rotated() {
        let b = AABB::from_center_half(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        let t = Transform::from_axis_angle(Vec3::Z, std::f32::consts::FRAC_PI_2, Vec3::new(1.0, 0.0, 0.0));
        let w = b.transformed(&t);
        assert!(w.half_extents().abs_diff_eq(Vec3::new(1.0, 2.0, 1.0), 1e-5));
        assert!(w.center().abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-5));
    }

    #[test]
    fn test_sphere_derived_data() {
        let s = Shape::sphere(0.5).unwrap();
        assert_eq!(s.radius(), 0.5);
        assert_eq!(s.collision_margin(), 0.5);
        assert_eq!(s.local_support_without_margin(Vec3::X), Vec3::ZERO);
        assert_abs_diff_eq!(s.inertia().x, 0.1);
        assert!(Shape::sphere(0.0).is_err());
    }

    #[test]
    fn test_capsule_support_is_segment() {
        let c = Shape::capsule(0.25, 1.0).unwrap();
        assert_eq!(c.local_support_without_margin(Vec3::new(0.3, 0.1, 0.0)), Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(c.local_support_without_margin(-Vec3::Y), Vec3::new(0.0, -1.0, 0.0));
        assert_abs_diff_eq!(c.radius(), 1.25);
    }

    #[test]
    fn test_radius_includes_margin() {
        let b = Shape::cuboid(Vec3::new(1.0, 2.0, 2.0), 0.04).unwrap();
        assert_abs_diff_eq!(b.radius(), 3.0, epsilon = 1e-6);
        let h = Shape::convex_hull(&[Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z], 0.1).unwrap();
        assert_abs_diff_eq!(h.radius(), 1.1, epsilon = 1e-6);
    }

    #[test]
    fn test_hull_rejects_too_few_vertices() {
        let err = Shape::convex_hull(&[Vec3::ZERO, Vec3::X], 0.0).unwrap_err();
        assert!(matches!(err, PhysicsError::InvalidShape { .. }));
    }

    #[test]
    fn test_hull_support_matches_brute_force() {
        let mut pts = Vec::new();
        for i in 0..40 {
            let a = i as f32 * 0.7;
            let b = i as f32 * 1.3;
            pts.push(Vec3::new(a.cos() * b.sin(), a.sin() * b.sin(), b.cos()) * 2.0);
        }
        let shape = Shape::convex_hull(&pts, 0.0).unwrap();
        let ShapeKind::ConvexHull(hull) = shape.kind() else {
            panic!("expected hull");
        };
        for k in 0..25 {
            let d = Vec3::new((k as f32 * 0.37).sin(), (k as f32 * 0.91).cos(), (k as f32 * 0.13).sin() - 0.2);
            let fast = shape.local_support_without_margin(d).dot(d);
            let brute = hull.vertices.iter().map(|v| v.dot(d)).fold(f32::MIN, f32::max);
            assert_abs_diff_eq!(fast, brute, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_plane_and_mesh_are_static_only() {
        let p = Shape::plane(Vec3::Y, 0.0).unwrap();
        assert!(p.is_static_only());
        assert!(!Shape::sphere(1.0).unwrap().is_static_only());
        assert_eq!(p.type_name(), "PLANE");
    }

    #[test]
    fn test_shape_ids_unique() {
        let a = Shape::sphere(1.0).unwrap();
        let b = Shape::sphere(1.0).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_shape_ray_dispatch() {
        let s = Shape::cylinder(1.0, 1.0, 0.04).unwrap();
        let hit = s
            .ray_test(&Ray::new(Vec3::new(0.0, 0.0, -3.0), Vec3::Z, 10.0))
            .unwrap();
        assert_abs_diff_eq!(hit.factor, 2.0, epsilon = 1e-5);
    }
}
