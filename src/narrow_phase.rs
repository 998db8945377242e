//! Narrow Phase
//!
//! Per-pair contact generation on top of [`crate::gjk`].
//!
//! - **Convex pairs**: one GJK/EPA query; the arbiter accumulates a
//!   multi-point manifold over consecutive steps.
//! - **Plane pairs**: no GJK. The plane normal is taken into the other
//!   shape's frame and the support along the inverted normal gives the
//!   deepest point. Four slightly tilted directions add the corners of flat
//!   faces resting on the plane.
//! - **Mesh pairs**: the convex shape's bounds select candidate triangles;
//!   a plane-straddle test on both shapes' supports along the triangle
//!   normal rejects most of them before GJK runs on the rest. Mesh contacts
//!   are flagged concave.

use glam::Vec3;

use crate::collider::{Shape, ShapeKind, Support, AABB};
use crate::config::PhysicsConfig;
use crate::gjk::{gjk_distance, GjkResult, GjkStatus, Placed};
use crate::math::{tangent_basis, Transform};
use crate::plane_collider::PlaneShape;
use crate::trimesh::{TriangleMeshShape, TriangleShape};

/// Tangential weight of the tilted plane support directions
const PLANE_TILT: f32 = 0.1;

/// Candidate contact in world space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactCandidate {
    /// Point on A's surface
    pub point_a: Vec3,
    /// Point on B's surface
    pub point_b: Vec3,
    /// Unit normal from A toward B
    pub normal: Vec3,
    /// Signed separation along the normal
    pub distance: f32,
    /// Produced by a mesh triangle
    pub concave: bool,
}

impl ContactCandidate {
    fn from_result(r: &GjkResult, concave: bool) -> Self {
        Self {
            point_a: r.point_a,
            point_b: r.point_b,
            normal: r.normal,
            distance: r.distance,
            concave,
        }
    }

    fn flipped(self) -> Self {
        Self {
            point_a: self.point_b,
            point_b: self.point_a,
            normal: -self.normal,
            ..self
        }
    }
}

/// Something the narrow phase can measure against
#[derive(Clone, Copy)]
pub enum Collidable<'a> {
    /// Convex shape with a support mapping
    Convex(&'a Shape),
    /// Single triangle of a mesh
    Triangle(TriangleShape<'a>),
    /// Infinite plane
    Plane(&'a PlaneShape),
}

impl<'a> Collidable<'a> {
    /// Classify a shape; meshes have no single collidable view
    #[must_use]
    pub fn of_shape(shape: &'a Shape) -> Option<Self> {
        match shape.kind() {
            ShapeKind::Plane(p) => Some(Self::Plane(p)),
            ShapeKind::TriangleMesh(_) => None,
            _ => Some(Self::Convex(shape)),
        }
    }

    fn support(&self) -> Option<&dyn Support> {
        match self {
            Self::Convex(s) => Some(*s as &dyn Support),
            Self::Triangle(t) => Some(t as &dyn Support),
            Self::Plane(_) => None,
        }
    }
}

/// Signed distance between two collidables; `None` for plane/plane and
/// plane/triangle pairs
pub fn pair_distance(
    a: Collidable<'_>,
    ta: &Transform,
    b: Collidable<'_>,
    tb: &Transform,
    config: &PhysicsConfig,
) -> Option<GjkResult> {
    match (a.support(), b.support()) {
        (Some(sa), Some(sb)) => Some(gjk_distance(Placed::new(sa, ta), Placed::new(sb, tb), config)),
        (None, Some(sb)) => {
            let Collidable::Plane(plane) = a else { return None };
            plane_deepest(plane, ta, sb, tb, Vec3::ZERO).map(|c| c.to_result())
        }
        (Some(sa), None) => {
            let Collidable::Plane(plane) = b else { return None };
            plane_deepest(plane, tb, sa, ta, Vec3::ZERO).map(|c| c.flipped().to_result())
        }
        (None, None) => None,
    }
}

impl ContactCandidate {
    fn to_result(self) -> GjkResult {
        GjkResult {
            distance: self.distance,
            normal: self.normal,
            point_a: self.point_a,
            point_b: self.point_b,
            status: if self.distance < 0.0 {
                GjkStatus::Penetrating
            } else {
                GjkStatus::Separated
            },
            iterations: 0,
        }
    }
}

/// Deepest point of `other` against `plane`, with the plane as A
///
/// `tilt` is added to the inverted plane normal before the support query.
fn plane_deepest(
    plane: &PlaneShape,
    tp: &Transform,
    other: &dyn Support,
    to: &Transform,
    tilt: Vec3,
) -> Option<ContactCandidate> {
    let n = tp.transform_vector(plane.normal);
    let origin_on_plane = tp.transform_point(plane.normal * plane.distance);
    let dir_world = (tilt - n).try_normalize()?;
    let local_dir = to.inverse_transform_vector(dir_world);
    let core = to.transform_point(other.local_support_without_margin(local_dir));
    let surface = core - n * other.margin();
    let distance = n.dot(surface - origin_on_plane);
    Some(ContactCandidate {
        point_a: surface - n * distance,
        point_b: surface,
        normal: n,
        distance,
        concave: false,
    })
}

/// Plane (as A) against a convex shape: deepest point plus tilted corners
fn collide_plane(
    plane: &PlaneShape,
    tp: &Transform,
    other: &Shape,
    to: &Transform,
    config: &PhysicsConfig,
    out: &mut Vec<ContactCandidate>,
) {
    let first = out.len();
    let Some(deepest) = plane_deepest(plane, tp, other, to, Vec3::ZERO) else {
        return;
    };
    if deepest.distance > config.contact_distance {
        return;
    }
    out.push(deepest);

    let (t, b) = tangent_basis(deepest.normal);
    for k in 0..4 {
        let angle = (k as f32 + 0.5) * std::f32::consts::FRAC_PI_2;
        let tilt = (t * angle.cos() + b * angle.sin()) * PLANE_TILT;
        let Some(c) = plane_deepest(plane, tp, other, to, tilt) else {
            continue;
        };
        let duplicate = out[first..]
            .iter()
            .any(|e| e.point_b.distance_squared(c.point_b) <= config.contact_equal_sq);
        if c.distance <= config.contact_distance && !duplicate {
            out.push(c);
        }
    }
}

/// Indices of mesh triangles whose bounds overlap a world-space AABB
pub fn mesh_candidates(mesh: &TriangleMeshShape, tm: &Transform, world_aabb: &AABB, out: &mut Vec<usize>) {
    let local = world_aabb.transformed(&tm.inverse()).expanded(mesh.margin);
    mesh.array.for_each_overlapping(&local, |tri| out.push(tri));
}

/// Mesh (as A) against a convex shape
fn collide_mesh(
    mesh: &TriangleMeshShape,
    tm: &Transform,
    other: &Shape,
    to: &Transform,
    config: &PhysicsConfig,
    out: &mut Vec<ContactCandidate>,
) {
    let bounds = other.world_aabb(to).expanded(config.contact_distance);
    let mut candidates = Vec::new();
    mesh_candidates(mesh, tm, &bounds, &mut candidates);

    let other_placed = Placed::new(other, to);
    for tri in candidates {
        let shape = mesh.triangle(tri);
        let cache = shape.cache();
        if cache.is_degenerate() {
            continue;
        }
        if !straddles(&shape, tm, other_placed, config) {
            continue;
        }
        let r = gjk_distance(Placed::new(&shape, tm), other_placed, config);
        if r.in_range() && r.distance <= config.contact_distance {
            out.push(ContactCandidate::from_result(&r, true));
        }
    }
}

/// Whether the other shape reaches the triangle's slab
fn straddles(tri: &TriangleShape<'_>, tm: &Transform, other: Placed<'_, Shape>, config: &PhysicsConfig) -> bool {
    let n = tm.transform_vector(tri.cache().normal);
    let plane_d = n.dot(tm.transform_point(tri.corners()[0]));
    let reach = other.shape.margin() + tri.margin() + config.contact_distance;
    let hi = n.dot(world_support(other, n));
    let lo = n.dot(world_support(other, -n));
    lo <= plane_d + reach && hi >= plane_d - reach
}

fn world_support(p: Placed<'_, Shape>, dir: Vec3) -> Vec3 {
    let local = p.transform.inverse_transform_vector(dir);
    p.transform.transform_point(p.shape.local_support_without_margin(local))
}

/// Contact candidates for a shape pair, appended to `out`
///
/// Plane/plane, plane/mesh and mesh/mesh pairs produce nothing.
pub fn collide(
    a: &Shape,
    ta: &Transform,
    b: &Shape,
    tb: &Transform,
    config: &PhysicsConfig,
    out: &mut Vec<ContactCandidate>,
) {
    match (a.kind(), b.kind()) {
        (ShapeKind::Plane(_) | ShapeKind::TriangleMesh(_), ShapeKind::Plane(_) | ShapeKind::TriangleMesh(_)) => {}
        (ShapeKind::Plane(p), _) => collide_plane(p, ta, b, tb, config, out),
        (_, ShapeKind::Plane(p)) => {
            let start = out.len();
            collide_plane(p, tb, a, ta, config, out);
            flip_tail(out, start);
        }
        (ShapeKind::TriangleMesh(m), _) => collide_mesh(m, ta, b, tb, config, out),
        (_, ShapeKind::TriangleMesh(m)) => {
            let start = out.len();
            collide_mesh(m, tb, a, ta, config, out);
            flip_tail(out, start);
        }
        _ => {
            let r = gjk_distance(Placed::new(a, ta), Placed::new(b, tb), config);
            if r.in_range() && r.distance <= config.contact_distance {
                out.push(ContactCandidate::from_result(&r, false));
            }
        }
    }
}

fn flip_tail(out: &mut [ContactCandidate], start: usize) {
    for c in &mut out[start..] {
        *c = c.flipped();
    }
}

// ============================================================================
// Tests
// ============================================================================
