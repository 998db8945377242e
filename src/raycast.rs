//! Ray Intersection Primitives
//!
//! Closed-form ray tests in a shape's local frame. Every test reports only
//! entering hits (surface normal facing against the ray) within
//! `[0, max_factor]`, and resolves parallel or degenerate cases to `None`.
//!
//! # Features
//!
//! - Ray-Sphere, Ray-AABB (slab), Ray-Plane
//! - Ray-Capsule with a two-pass test: side first, hemispherical caps second
//! - Shared quadratic helper used by the cylinder and cone tests

use glam::Vec3;

/// Ray-parallel threshold
pub(crate) const RAY_PARALLEL_EPSILON: f32 = 1e-7;

/// A ray with unit direction and a length limit
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    /// Ray origin point
    pub origin: Vec3,
    /// Unit direction
    pub direction: Vec3,
    /// Farthest distance along `direction` considered
    pub max_factor: f32,
}

impl Ray {
    /// Create a new ray (direction is normalized internally; zero falls back to +X)
    #[inline]
    #[must_use]
    pub fn new(origin: Vec3, direction: Vec3, max_factor: f32) -> Self {
        Self {
            origin,
            direction: direction.try_normalize().unwrap_or(Vec3::X),
            max_factor,
        }
    }

    /// Ray spanning the segment `from -> to`
    #[must_use]
    pub fn from_segment(from: Vec3, to: Vec3) -> Self {
        let delta = to - from;
        Self::new(from, delta, delta.length())
    }

    /// Point along the ray at distance `t`
    #[inline]
    #[must_use]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Copy with a shorter length limit
    #[inline]
    #[must_use]
    pub fn with_max_factor(&self, max_factor: f32) -> Self {
        Self { max_factor, ..*self }
    }
}

/// Result of a shape-local ray intersection
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShapeRayHit {
    /// Distance along the ray
    pub factor: f32,
    /// Hit point
    pub point: Vec3,
    /// Surface normal at the hit point
    pub normal: Vec3,
}

impl ShapeRayHit {
    #[inline]
    pub(crate) fn new(ray: &Ray, factor: f32, normal: Vec3) -> Self {
        Self {
            factor,
            point: ray.at(factor),
            normal,
        }
    }
}

/// Return the closer of two optional hits
#[inline]
#[must_use]
pub fn closer_hit(a: Option<ShapeRayHit>, b: Option<ShapeRayHit>) -> Option<ShapeRayHit> {
    match (a, b) {
        (Some(ha), Some(hb)) => Some(if ha.factor <= hb.factor { ha } else { hb }),
        (Some(h), None) | (None, Some(h)) => Some(h),
        (None, None) => None,
    }
}

/// Roots of `a t^2 + b t + c = 0` in ascending order
///
/// Falls back to the linear root when `a` vanishes.
#[must_use]
pub(crate) fn solve_quadratic(a: f32, b: f32, c: f32) -> Option<(f32, f32)> {
    if a.abs() < RAY_PARALLEL_EPSILON {
        if b.abs() < RAY_PARALLEL_EPSILON {
            return None;
        }
        let t = -c / b;
        return Some((t, t));
    }
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    let t0 = (-b - sq) / (2.0 * a);
    let t1 = (-b + sq) / (2.0 * a);
    Some(if t0 <= t1 { (t0, t1) } else { (t1, t0) })
}

#[inline]
fn in_range(ray: &Ray, t: f32) -> bool {
    t >= 0.0 && t <= ray.max_factor
}

/// Ray-Sphere intersection
#[must_use]
pub fn ray_sphere(ray: &Ray, center: Vec3, radius: f32) -> Option<ShapeRayHit> {
    let oc = ray.origin - center;
    let b = oc.dot(ray.direction);
    let c = oc.length_squared() - radius * radius;
    // Starting inside or pointing away
    if c < 0.0 || b > 0.0 {
        return None;
    }
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let t = -b - disc.sqrt();
    if !in_range(ray, t) {
        return None;
    }
    let point = ray.at(t);
    let normal = (point - center).try_normalize().unwrap_or(-ray.direction);
    Some(ShapeRayHit { factor: t, point, normal })
}

/// Ray-AABB slab interval `(t_enter, t_exit)` and the entering axis
#[must_use]
pub fn ray_aabb_interval(ray: &Ray, min: Vec3, max: Vec3) -> Option<(f32, f32, usize)> {
    let mut t_min = f32::NEG_INFINITY;
    let mut t_max = f32::INFINITY;
    let mut axis = 0;
    for i in 0..3 {
        let o = ray.origin[i];
        let d = ray.direction[i];
        if d.abs() < RAY_PARALLEL_EPSILON {
            if o < min[i] || o > max[i] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d;
        let mut t0 = (min[i] - o) * inv;
        let mut t1 = (max[i] - o) * inv;
        if t0 > t1 {
            core::mem::swap(&mut t0, &mut t1);
        }
        if t0 > t_min {
            t_min = t0;
            axis = i;
        }
        t_max = t_max.min(t1);
        if t_min > t_max {
            return None;
        }
    }
    Some((t_min, t_max, axis))
}

/// Ray against an origin-centered box with the given half-extents
#[must_use]
pub fn ray_box(ray: &Ray, half_extents: Vec3) -> Option<ShapeRayHit> {
    let (t_enter, _, axis) = ray_aabb_interval(ray, -half_extents, half_extents)?;
    if !in_range(ray, t_enter) || !t_enter.is_finite() {
        return None;
    }
    let mut normal = Vec3::ZERO;
    normal[axis] = -ray.direction[axis].signum();
    Some(ShapeRayHit::new(ray, t_enter, normal))
}

/// Ray-Plane intersection (`normal . x = distance`); the back side is solid
#[must_use]
pub fn ray_plane(ray: &Ray, normal: Vec3, distance: f32) -> Option<ShapeRayHit> {
    let denom = ray.direction.dot(normal);
    if denom > -RAY_PARALLEL_EPSILON {
        return None;
    }
    let t = (distance - ray.origin.dot(normal)) / denom;
    if !in_range(ray, t) {
        return None;
    }
    Some(ShapeRayHit::new(ray, t, normal))
}

/// Ray against a Y-axis capsule centered at the origin
///
/// The side (infinite cylinder clipped to `|y| <= half_height`) is tested
/// first; only when it misses are the two hemispherical caps tested.
#[must_use]
pub fn ray_capsule(ray: &Ray, radius: f32, half_height: f32) -> Option<ShapeRayHit> {
    if let Some(hit) = ray_cylinder_side(ray, radius, half_height) {
        return Some(hit);
    }
    let top = ray_sphere(ray, Vec3::new(0.0, half_height, 0.0), radius);
    let bottom = ray_sphere(ray, Vec3::new(0.0, -half_height, 0.0), radius);
    closer_hit(top, bottom)
}

/// Side of a Y-axis cylinder clipped to `|y| <= half_height`
#[must_use]
pub(crate) fn ray_cylinder_side(ray: &Ray, radius: f32, half_height: f32) -> Option<ShapeRayHit> {
    let (o, d) = (ray.origin, ray.direction);
    let a = d.x * d.x + d.z * d.z;
    if a < RAY_PARALLEL_EPSILON {
        return None;
    }
    let b = 2.0 * (o.x * d.x + o.z * d.z);
    let c = o.x * o.x + o.z * o.z - radius * radius;
    let (t, _) = solve_quadratic(a, b, c)?;
    if !in_range(ray, t) {
        return None;
    }
    let p = ray.at(t);
    if p.y.abs() > half_height {
        return None;
    }
    let normal = Vec3::new(p.x, 0.0, p.z).try_normalize()?;
    if normal.dot(d) >= 0.0 {
        return None;
    }
    Some(ShapeRayHit { factor: t, point: p, normal })
}

/// Flat circular cap at height `y` facing `facing` (+1 or -1 along Y)
#[must_use]
pub(crate) fn ray_disc(ray: &Ray, y: f32, facing: f32, radius: f32) -> Option<ShapeRayHit> {
    let normal = Vec3::new(0.0, facing, 0.0);
    let hit = ray_plane(ray, normal, y * facing)?;
    let p = hit.point;
    if p.x * p.x + p.z * p.z > radius * radius {
        return None;
    }
    Some(hit)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_ray_sphere_hit() {
        let ray = Ray::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::X, 100.0);
        let hit = ray_sphere(&ray, Vec3::ZERO, 1.0).unwrap();
        assert_abs_diff_eq!(hit.factor, 4.0, epsilon = 1e-5);
        assert!(hit.normal.abs_diff_eq(-Vec3::X, 1e-5));
    }

    #[test]
    fn test_ray_sphere_miss() {
        let ray = Ray::new(Vec3::new(-5.0, 5.0, 0.0), Vec3::X, 100.0);
        assert!(ray_sphere(&ray, Vec3::ZERO, 1.0).is_none());
    }

    #[test]
    fn test_ray_sphere_too_short() {
        let ray = Ray::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::X, 3.0);
        assert!(ray_sphere(&ray, Vec3::ZERO, 1.0).is_none());
    }

    #[test]
    fn test_ray_sphere_from_inside_ignored() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X, 10.0);
        assert!(ray_sphere(&ray, Vec3::ZERO, 1.0).is_none());
    }

    #[test]
    fn test_ray_box_hit_face() {
        let ray = Ray::new(Vec3::new(0.2, 5.0, -0.1), -Vec3::Y, 100.0);
        let hit = ray_box(&ray, Vec3::new(1.0, 0.5, 1.0)).unwrap();
        assert_abs_diff_eq!(hit.factor, 4.5, epsilon = 1e-5);
        assert_eq!(hit.normal, Vec3::Y);
    }

    #[test]
    fn test_ray_box_miss() {
        let ray = Ray::new(Vec3::new(-5.0, 5.0, 0.0), Vec3::X, 100.0);
        assert!(ray_box(&ray, Vec3::ONE).is_none());
    }

    #[test]
    fn test_ray_plane() {
        let ray = Ray::new(Vec3::new(0.0, 10.0, 0.0), -Vec3::Y, 100.0);
        let hit = ray_plane(&ray, Vec3::Y, 0.0).unwrap();
        assert_abs_diff_eq!(hit.factor, 10.0, epsilon = 1e-5);
        // From below the plane is solid; no entering hit
        let up = Ray::new(Vec3::new(0.0, -10.0, 0.0), Vec3::Y, 100.0);
        assert!(ray_plane(&up, Vec3::Y, 0.0).is_none());
    }

    #[test]
    fn test_ray_capsule_side_and_cap() {
        let side = Ray::new(Vec3::new(-5.0, 0.3, 0.0), Vec3::X, 100.0);
        let hit = ray_capsule(&side, 0.5, 1.0).unwrap();
        assert_abs_diff_eq!(hit.factor, 4.5, epsilon = 1e-5);

        let top = Ray::new(Vec3::new(0.0, 5.0, 0.0), -Vec3::Y, 100.0);
        let hit = ray_capsule(&top, 0.5, 1.0).unwrap();
        assert_abs_diff_eq!(hit.factor, 3.5, epsilon = 1e-5);
        assert!(hit.normal.abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    fn test_solve_quadratic_linear_fallback() {
        let (t0, t1) = solve_quadratic(0.0, 2.0, -4.0).unwrap();
        assert_abs_diff_eq!(t0, 2.0);
        assert_abs_diff_eq!(t1, 2.0);
        assert!(solve_quadratic(1.0, 0.0, 1.0).is_none());
    }

    #[test]
    fn test_from_segment() {
        let ray = Ray::from_segment(Vec3::ZERO, Vec3::new(0.0, 0.0, 4.0));
        assert_eq!(ray.direction, Vec3::Z);
        assert_abs_diff_eq!(ray.max_factor, 4.0);
    }
}
