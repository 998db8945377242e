//! GJK Distance and EPA Penetration Depth
//!
//! Signed distance between two convex shapes placed by rigid transforms.
//!
//! # Algorithm
//!
//! - **GJK** runs on the margin-free cores. The simplex keeps up to four
//!   Minkowski points, each with its witness points on A and B, and is
//!   reduced to the sub-simplex closest to the origin every iteration.
//!   The core distance minus both margins is the surface separation.
//! - **EPA** takes over only when four points enclose the origin. It runs
//!   on the full (margin-inflated) supports, with bounded vertex and face
//!   pools, and grows the polytope by removing visible faces and stitching
//!   the horizon.
//!
//! # Conventions
//!
//! `normal` is a unit vector pointing from A toward B. `distance` is
//! `(point_b - point_a) . normal`: positive when separated, negative when
//! penetrating. Witness points lie on the shape surfaces (margins
//! included).

use glam::Vec3;
use tracing::{trace, warn};

use crate::collider::Support;
use crate::config::PhysicsConfig;
use crate::math::{Transform, EPSILON_SQ};

/// EPA vertex pool size
pub const EPA_MAX_VERTICES: usize = 64;

/// EPA face pool size
pub const EPA_MAX_FACES: usize = 128;

/// How a distance query ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GjkStatus {
    /// Cores are apart; distance and witnesses are exact up to tolerance
    Separated,
    /// Separation exceeds the contact distance; `distance` is a lower bound
    OutOfRange,
    /// Cores touch or nearly so; the last separating axis is used
    Touching,
    /// Cores overlap and EPA measured the penetration
    Penetrating,
}

/// Result of a distance query
#[derive(Clone, Copy, Debug)]
pub struct GjkResult {
    /// Signed surface separation (negative = penetration depth)
    pub distance: f32,
    /// Unit normal from A toward B
    pub normal: Vec3,
    /// Witness point on A (world space)
    pub point_a: Vec3,
    /// Witness point on B (world space)
    pub point_b: Vec3,
    /// Termination kind
    pub status: GjkStatus,
    /// GJK iterations performed
    pub iterations: u32,
}

impl GjkResult {
    /// Whether the shapes are within the contact distance
    #[inline]
    #[must_use]
    pub fn in_range(&self) -> bool {
        self.status != GjkStatus::OutOfRange
    }
}

/// Convex shape placed in the world
pub struct Placed<'a, S: Support + ?Sized> {
    /// Shape
    pub shape: &'a S,
    /// Placement
    pub transform: &'a Transform,
}

impl<S: Support + ?Sized> Clone for Placed<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: Support + ?Sized> Copy for Placed<'_, S> {}

impl<'a, S: Support + ?Sized> Placed<'a, S> {
    /// Pair a shape with a transform
    #[inline]
    pub fn new(shape: &'a S, transform: &'a Transform) -> Self {
        Self { shape, transform }
    }

    /// World-space core support along a world direction
    #[inline]
    fn core_support(&self, dir: Vec3) -> Vec3 {
        let local_dir = self.transform.basis.transpose() * dir;
        self.transform
            .transform_point(self.shape.local_support_without_margin(local_dir))
    }

    /// World-space support of the margin-inflated shape
    #[inline]
    fn full_support(&self, dir: Vec3) -> Vec3 {
        let p = self.core_support(dir);
        match dir.try_normalize() {
            Some(n) => p + n * self.shape.margin(),
            None => p,
        }
    }
}

// ============================================================================
// Simplex
// ============================================================================

/// Minkowski point with its witnesses
#[derive(Clone, Copy, Debug, Default)]
struct SupportPoint {
    w: Vec3,
    a: Vec3,
    b: Vec3,
}

/// Barycentric selection of simplex vertices
#[derive(Clone, Copy, Debug)]
struct SubSimplex {
    idx: [usize; 4],
    weight: [f32; 4],
    len: usize,
}

impl SubSimplex {
    fn vertex(i: usize) -> Self {
        Self {
            idx: [i, 0, 0, 0],
            weight: [1.0, 0.0, 0.0, 0.0],
            len: 1,
        }
    }

    fn edge(i: usize, j: usize, t: f32) -> Self {
        Self {
            idx: [i, j, 0, 0],
            weight: [1.0 - t, t, 0.0, 0.0],
            len: 2,
        }
    }

    fn face(i: usize, j: usize, k: usize, v: f32, w: f32) -> Self {
        Self {
            idx: [i, j, k, 0],
            weight: [1.0 - v - w, v, w, 0.0],
            len: 3,
        }
    }
}

enum Reduction {
    Closest(SubSimplex),
    ContainsOrigin,
    Degenerate,
}

#[derive(Clone, Copy, Debug, Default)]
struct Simplex {
    pts: [SupportPoint; 4],
    weight: [f32; 4],
    len: usize,
}

impl Simplex {
    fn contains(&self, w: Vec3) -> bool {
        self.pts[..self.len]
            .iter()
            .any(|p| p.w.distance_squared(w) <= EPSILON_SQ)
    }

    fn push(&mut self, p: SupportPoint) {
        self.pts[self.len] = p;
        self.len += 1;
    }

    fn closest(&self) -> Vec3 {
        (0..self.len).fold(Vec3::ZERO, |acc, i| acc + self.pts[i].w * self.weight[i])
    }

    fn witnesses(&self) -> (Vec3, Vec3) {
        (0..self.len).fold((Vec3::ZERO, Vec3::ZERO), |(a, b), i| {
            (a + self.pts[i].a * self.weight[i], b + self.pts[i].b * self.weight[i])
        })
    }

    fn apply(&mut self, sub: &SubSimplex) {
        let old = self.pts;
        for k in 0..sub.len {
            self.pts[k] = old[sub.idx[k]];
            self.weight[k] = sub.weight[k];
        }
        self.len = sub.len;
    }

    fn reduce(&self) -> Reduction {
        match self.len {
            1 => Reduction::Closest(SubSimplex::vertex(0)),
            2 => Reduction::Closest(closest_on_segment(&self.pts, 0, 1)),
            3 => Reduction::Closest(closest_on_triangle(&self.pts, 0, 1, 2)),
            _ => closest_on_tetrahedron(&self.pts),
        }
    }
}

fn sub_closest(pts: &[SupportPoint; 4], sub: &SubSimplex) -> Vec3 {
    (0..sub.len).fold(Vec3::ZERO, |acc, k| acc + pts[sub.idx[k]].w * sub.weight[k])
}

fn closest_on_segment(pts: &[SupportPoint; 4], i: usize, j: usize) -> SubSimplex {
    let a = pts[i].w;
    let ab = pts[j].w - a;
    let len_sq = ab.length_squared();
    if len_sq <= EPSILON_SQ {
        return SubSimplex::vertex(i);
    }
    let t = -a.dot(ab) / len_sq;
    if t <= 0.0 {
        SubSimplex::vertex(i)
    } else if t >= 1.0 {
        SubSimplex::vertex(j)
    } else {
        SubSimplex::edge(i, j, t)
    }
}

/// Closest point to the origin on triangle (i, j, k), by Voronoi regions
fn closest_on_triangle(pts: &[SupportPoint; 4], i: usize, j: usize, k: usize) -> SubSimplex {
    let (a, b, c) = (pts[i].w, pts[j].w, pts[k].w);
    let ab = b - a;
    let ac = c - a;

    if ab.cross(ac).length_squared() <= EPSILON_SQ {
        // Collinear: best of the edges
        let candidates = [
            closest_on_segment(pts, i, j),
            closest_on_segment(pts, i, k),
            closest_on_segment(pts, j, k),
        ];
        return candidates
            .into_iter()
            .min_by(|x, y| {
                sub_closest(pts, x)
                    .length_squared()
                    .total_cmp(&sub_closest(pts, y).length_squared())
            })
            .unwrap_or(SubSimplex::vertex(i));
    }

    let ap = -a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return SubSimplex::vertex(i);
    }

    let bp = -b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return SubSimplex::vertex(j);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return SubSimplex::edge(i, j, d1 / (d1 - d3));
    }

    let cp = -c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return SubSimplex::vertex(k);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return SubSimplex::edge(i, k, d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return SubSimplex::edge(j, k, (d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let denom = 1.0 / (va + vb + vc);
    SubSimplex::face(i, j, k, vb * denom, vc * denom)
}

/// Closest sub-simplex of a tetrahedron, or containment of the origin
fn closest_on_tetrahedron(pts: &[SupportPoint; 4]) -> Reduction {
    // (face, opposite vertex)
    const FACES: [([usize; 3], usize); 4] = [
        ([0, 1, 2], 3),
        ([0, 2, 3], 1),
        ([0, 3, 1], 2),
        ([1, 3, 2], 0),
    ];

    let mut best: Option<(SubSimplex, f32)> = None;
    let mut outside_any = false;
    for ([i, j, k], opp) in FACES {
        let a = pts[i].w;
        let n = (pts[j].w - a).cross(pts[k].w - a);
        let side_origin = (-a).dot(n);
        let side_opp = (pts[opp].w - a).dot(n);
        if side_opp * side_opp <= EPSILON_SQ * n.length_squared() {
            return Reduction::Degenerate;
        }
        if side_origin * side_opp < 0.0 {
            outside_any = true;
            let sub = closest_on_triangle(pts, i, j, k);
            let d = sub_closest(pts, &sub).length_squared();
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((sub, d));
            }
        }
    }

    match best {
        Some((sub, _)) if outside_any => Reduction::Closest(sub),
        _ => Reduction::ContainsOrigin,
    }
}

// ============================================================================
// GJK
// ============================================================================

/// Signed distance between two placed convex shapes
///
/// Terminates on a duplicate support point, insufficient fractional
/// progress, touching cores, a separating axis proving the pair is beyond
/// `contact_distance`, or the iteration cap. Touching cores are a terminal
/// result; EPA runs only once a full simplex encloses the origin.
pub fn gjk_distance<A, B>(a: Placed<'_, A>, b: Placed<'_, B>, config: &PhysicsConfig) -> GjkResult
where
    A: Support + ?Sized,
    B: Support + ?Sized,
{
    let margin_a = a.shape.margin();
    let margin_b = b.shape.margin();
    let margins = margin_a + margin_b;
    let range = margins + config.contact_distance;

    let mut v = a.transform.origin - b.transform.origin;
    if v.length_squared() <= EPSILON_SQ {
        v = Vec3::X;
    }
    let mut last_axis = v;
    let mut simplex = Simplex::default();
    let mut iterations = 0;

    let finish_separated = |simplex: &Simplex, v: Vec3, status: GjkStatus, iterations: u32| {
        let (pa, pb) = simplex.witnesses();
        let len = v.length();
        let normal = -v / len;
        GjkResult {
            distance: len - margins,
            normal,
            point_a: pa + normal * margin_a,
            point_b: pb - normal * margin_b,
            status,
            iterations,
        }
    };

    while iterations < config.gjk_max_iterations {
        iterations += 1;
        let pa = a.core_support(-v);
        let pb = b.core_support(v);
        let w = pa - pb;
        let v_sq = v.length_squared();
        let delta = v.dot(w);

        if delta > 0.0 && delta * delta > v_sq * range * range {
            let len = v_sq.sqrt();
            let normal = -v / len;
            return GjkResult {
                distance: delta / len - margins,
                normal,
                point_a: pa + normal * margin_a,
                point_b: pb - normal * margin_b,
                status: GjkStatus::OutOfRange,
                iterations,
            };
        }

        if simplex.len > 0 {
            if simplex.contains(w) || v_sq - delta <= v_sq * config.gjk_fractional_threshold {
                return finish_separated(&simplex, v, GjkStatus::Separated, iterations);
            }
        }

        simplex.push(SupportPoint { w, a: pa, b: pb });
        match simplex.reduce() {
            Reduction::ContainsOrigin => {
                return penetration(a, b, &simplex, last_axis, margins, iterations, config);
            }
            Reduction::Degenerate => {
                simplex.len -= 1;
                if v_sq <= config.gjk_touching_sq {
                    return touching(a, b, &simplex, last_axis, margins, iterations);
                }
                return finish_separated(&simplex, v, GjkStatus::Separated, iterations);
            }
            Reduction::Closest(sub) => {
                simplex.apply(&sub);
                let new_v = simplex.closest();
                let new_sq = new_v.length_squared();
                if new_sq <= config.gjk_touching_sq {
                    return touching(a, b, &simplex, last_axis, margins, iterations);
                }
                last_axis = new_v;
                let progress = v_sq - new_sq;
                v = new_v;
                if simplex.len > 1 && progress <= v_sq * f32::EPSILON * 4.0 {
                    return finish_separated(&simplex, v, GjkStatus::Separated, iterations);
                }
            }
        }
    }

    trace!(iterations, distance_sq = v.length_squared(), "GJK hit its iteration cap");
    finish_separated(&simplex, v, GjkStatus::Separated, iterations)
}

/// Overlapping cores: run EPA on the enclosing simplex, falling back to the
/// last separating axis
fn penetration<A, B>(
    a: Placed<'_, A>,
    b: Placed<'_, B>,
    simplex: &Simplex,
    axis: Vec3,
    margins: f32,
    iterations: u32,
    config: &PhysicsConfig,
) -> GjkResult
where
    A: Support + ?Sized,
    B: Support + ?Sized,
{
    match epa(a, b, simplex, config) {
        Some(r) => GjkResult { iterations, ..r },
        None => touching(a, b, simplex, axis, margins, iterations),
    }
}

/// Cores within the touching threshold: report the margin overlap along the
/// last separating axis
fn touching<A, B>(
    a: Placed<'_, A>,
    b: Placed<'_, B>,
    simplex: &Simplex,
    axis: Vec3,
    margins: f32,
    iterations: u32,
) -> GjkResult
where
    A: Support + ?Sized,
    B: Support + ?Sized,
{
    let (pa, pb) = if simplex.len > 0 {
        simplex.witnesses()
    } else {
        (a.transform.origin, b.transform.origin)
    };
    let v = simplex.closest();
    let normal = (-axis).try_normalize().unwrap_or(Vec3::Y);
    GjkResult {
        distance: v.length() - margins,
        normal,
        point_a: pa + normal * a.shape.margin(),
        point_b: pb - normal * b.shape.margin(),
        status: GjkStatus::Touching,
        iterations,
    }
}

// ============================================================================
// EPA
// ============================================================================

#[derive(Clone, Copy, Debug)]
struct EpaFace {
    indices: [usize; 3],
    normal: Vec3,
    distance: f32,
}

struct Polytope {
    vertices: Vec<SupportPoint>,
    faces: Vec<EpaFace>,
    interior: Vec3,
}

impl Polytope {
    /// Add face (i, j, k), oriented away from the interior point
    fn add_face(&mut self, i: usize, j: usize, k: usize) -> bool {
        let (a, b, c) = (self.vertices[i].w, self.vertices[j].w, self.vertices[k].w);
        let Some(mut normal) = (b - a).cross(c - a).try_normalize() else {
            return false;
        };
        let mut indices = [i, j, k];
        if normal.dot(a - self.interior) < 0.0 {
            normal = -normal;
            indices.swap(1, 2);
        }
        self.faces.push(EpaFace {
            indices,
            normal,
            distance: normal.dot(a),
        });
        true
    }

    fn closest_face(&self) -> Option<usize> {
        self.faces
            .iter()
            .enumerate()
            .min_by(|(_, x), (_, y)| x.distance.total_cmp(&y.distance))
            .map(|(i, _)| i)
    }
}

/// Penetration from a simplex that encloses the origin
fn epa<A, B>(a: Placed<'_, A>, b: Placed<'_, B>, simplex: &Simplex, config: &PhysicsConfig) -> Option<GjkResult>
where
    A: Support + ?Sized,
    B: Support + ?Sized,
{
    let full = |dir: Vec3| {
        let pa = a.full_support(dir);
        let pb = b.full_support(-dir);
        SupportPoint { w: pa - pb, a: pa, b: pb }
    };

    let interior = simplex.pts.iter().fold(Vec3::ZERO, |acc, p| acc + p.w) * 0.25;
    let mut poly = Polytope {
        vertices: Vec::with_capacity(EPA_MAX_VERTICES),
        faces: Vec::with_capacity(EPA_MAX_FACES),
        interior,
    };
    poly.vertices.extend_from_slice(&simplex.pts);
    let ok = poly.add_face(0, 1, 2) && poly.add_face(0, 3, 1) && poly.add_face(0, 2, 3) && poly.add_face(1, 3, 2);
    if !ok {
        return None;
    }

    let mut best = poly.closest_face()?;
    for _ in 0..config.epa_max_iterations {
        best = poly.closest_face()?;
        let face = poly.faces[best];
        let s = full(face.normal);
        let d = s.w.dot(face.normal);
        if d - face.distance < config.epa_tolerance {
            break;
        }
        if poly.vertices.len() >= EPA_MAX_VERTICES {
            warn!(vertices = poly.vertices.len(), "EPA vertex pool exhausted");
            break;
        }

        // Remove every face the new point sees; keep unmatched edges as horizon
        let mut horizon: Vec<(usize, usize)> = Vec::new();
        let vertices = &poly.vertices;
        poly.faces.retain(|f| {
            let visible = f.normal.dot(s.w - vertices[f.indices[0]].w) > 0.0;
            if visible {
                for e in 0..3 {
                    let edge = (f.indices[e], f.indices[(e + 1) % 3]);
                    if let Some(pos) = horizon.iter().position(|&h| h == (edge.1, edge.0)) {
                        horizon.swap_remove(pos);
                    } else {
                        horizon.push(edge);
                    }
                }
            }
            !visible
        });
        if horizon.is_empty() {
            return Some(face_result(&poly.vertices, face));
        }
        if poly.faces.len() + horizon.len() > EPA_MAX_FACES {
            warn!(faces = poly.faces.len(), "EPA face pool exhausted");
            return Some(face_result(&poly.vertices, face));
        }

        let new_index = poly.vertices.len();
        poly.vertices.push(s);
        for (i, j) in horizon {
            if !poly.add_face(i, j, new_index) {
                return Some(face_result(&poly.vertices, face));
            }
        }
        best = poly.closest_face()?;
    }

    Some(face_result(&poly.vertices, poly.faces[best]))
}

/// Witnesses from the barycentric coordinates of the origin's projection
fn face_result(vertices: &[SupportPoint], face: EpaFace) -> GjkResult {
    let [i, j, k] = face.indices;
    let (v0, v1, v2) = (vertices[i], vertices[j], vertices[k]);
    let p = face.normal * face.distance;

    let e0 = v1.w - v0.w;
    let e1 = v2.w - v0.w;
    let rel = p - v0.w;
    let d00 = e0.dot(e0);
    let d01 = e0.dot(e1);
    let d11 = e1.dot(e1);
    let d20 = rel.dot(e0);
    let d21 = rel.dot(e1);
    let denom = d00 * d11 - d01 * d01;
    let (u, v) = if denom.abs() > EPSILON_SQ {
        ((d11 * d20 - d01 * d21) / denom, (d00 * d21 - d01 * d20) / denom)
    } else {
        (0.0, 0.0)
    };
    let t = 1.0 - u - v;

    GjkResult {
        distance: -face.distance,
        normal: face.normal,
        point_a: v0.a * t + v1.a * u + v2.a * v,
        point_b: v0.b * t + v1.b * u + v2.b * v,
        status: GjkStatus::Penetrating,
        iterations: 0,
    }
}

// ============================================================================
// Tests
// ============================================================================
