//! Cone Collider
//!
//! Y-axis aligned cone centered at mid-height: apex at `+half_height`, base
//! disc of `radius` at `-half_height`.
//!
//! # Features
//!
//! - **GJK Support**: apex or base rim, chosen by the half-angle test
//! - **Ray test**: two passes, lateral surface first and base disc second

use glam::Vec3;

use crate::collider::Support;
use crate::error::{PhysicsError, PhysicsResult};
use crate::raycast::{closer_hit, ray_disc, solve_quadratic, Ray, ShapeRayHit};

/// Cone collider geometry
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cone {
    /// Base radius (including margin)
    pub radius: f32,
    /// Half of the apex-to-base height (including margin)
    pub half_height: f32,
    /// Collision margin
    pub margin: f32,
}

impl Cone {
    /// Create a new cone
    pub fn new(radius: f32, half_height: f32, margin: f32) -> PhysicsResult<Self> {
        if !(radius > 0.0 && half_height > 0.0) || !radius.is_finite() || !half_height.is_finite() {
            return Err(PhysicsError::InvalidShape {
                reason: "cone radius and half-height must be positive",
            });
        }
        if !(margin >= 0.0) || margin > radius.min(half_height) {
            return Err(PhysicsError::InvalidShape {
                reason: "cone margin must lie in [0, min(radius, half-height)]",
            });
        }
        Ok(Self {
            radius,
            half_height,
            margin,
        })
    }

    /// Apex in the local frame
    #[inline]
    #[must_use]
    pub fn apex(&self) -> Vec3 {
        Vec3::new(0.0, self.half_height, 0.0)
    }

    /// Local half-extents of the bounding box
    #[inline]
    #[must_use]
    pub fn half_extents(&self) -> Vec3 {
        Vec3::new(self.radius, self.half_height, self.radius)
    }

    /// Diagonal inertia per unit mass about the geometric center
    ///
    /// - Iyy = 3/10 r^2
    /// - Ixx = Izz = 3/20 r^2 + 1/10 h^2, with h the full height
    #[must_use]
    pub fn inertia(&self) -> Vec3 {
        let r2 = self.radius * self.radius;
        let h = 2.0 * self.half_height;
        let ixx = 0.15 * r2 + 0.1 * h * h;
        Vec3::new(ixx, 0.3 * r2, ixx)
    }

    /// Local ray test
    #[must_use]
    pub fn ray_test(&self, ray: &Ray) -> Option<ShapeRayHit> {
        let side = self.ray_side(ray);
        if side.is_some() {
            return side;
        }
        let base = ray_disc(ray, -self.half_height, -1.0, self.radius);
        closer_hit(side, base)
    }

    /// Lateral surface `x^2 + z^2 = k^2 (hh - y)^2` clipped to `|y| <= hh`
    fn ray_side(&self, ray: &Ray) -> Option<ShapeRayHit> {
        let hh = self.half_height;
        let k = self.radius / (2.0 * hh);
        let k2 = k * k;
        let (o, d) = (ray.origin, ray.direction);
        let q = hh - o.y;
        let a = d.x * d.x + d.z * d.z - k2 * d.y * d.y;
        let b = 2.0 * (o.x * d.x + o.z * d.z) + 2.0 * k2 * q * d.y;
        let c = o.x * o.x + o.z * o.z - k2 * q * q;
        let (t0, t1) = solve_quadratic(a, b, c)?;
        [t0, t1].into_iter().find_map(|t| {
            if t < 0.0 || t > ray.max_factor {
                return None;
            }
            let p = ray.at(t);
            if p.y < -hh || p.y > hh {
                return None;
            }
            let normal = Vec3::new(p.x, k2 * (hh - p.y), p.z)
                .try_normalize()
                .unwrap_or(-d);
            if normal.dot(d) >= 0.0 {
                return None;
            }
            Some(ShapeRayHit {
                factor: t,
                point: p,
                normal,
            })
        })
    }
}

impl Support for Cone {
    fn local_support_without_margin(&self, direction: Vec3) -> Vec3 {
        let r = self.radius - self.margin;
        let hh = self.half_height - self.margin;
        let sin_angle = r / (r * r + 4.0 * hh * hh).sqrt();
        let len = direction.length();
        if direction.y > len * sin_angle {
            return Vec3::new(0.0, hh, 0.0);
        }
        let xz_len = (direction.x * direction.x + direction.z * direction.z).sqrt();
        if xz_len > 1e-12 {
            let s = r / xz_len;
            Vec3::new(direction.x * s, -hh, direction.z * s)
        } else {
            Vec3::new(0.0, -hh, 0.0)
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
    fn test_cone_support_up() {
        let c = Cone::new(1.0, 1.0, 0.0).unwrap();
        assert_eq!(c.local_support_without_margin(Vec3::Y), Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_cone_support_down() {
        let c = Cone::new(1.0, 1.0, 0.0).unwrap();
        let s = c.local_support_without_margin(-Vec3::Y);
        assert_abs_diff_eq!(s.y, -1.0);
    }

    #[test]
    fn test_cone_support_side() {
        let c = Cone::new(1.0, 1.0, 0.0).unwrap();
        let s = c.local_support_without_margin(Vec3::X);
        assert!(s.abs_diff_eq(Vec3::new(1.0, -1.0, 0.0), 1e-6));
    }

    #[test]
    fn test_cone_ray_near_apex_from_above() {
        let c = Cone::new(1.0, 1.0, 0.0).unwrap();
        // Cone radius 0.1 is reached 0.2 below the apex
        let hit = c
            .ray_test(&Ray::new(Vec3::new(0.1, 5.0, 0.0), -Vec3::Y, 10.0))
            .unwrap();
        assert_abs_diff_eq!(hit.factor, 4.2, epsilon = 1e-3);
    }

    #[test]
    fn test_cone_ray_side() {
        let c = Cone::new(1.0, 1.0, 0.0).unwrap();
        // At y = 0 the cone radius is 0.5
        let hit = c
            .ray_test(&Ray::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::X, 10.0))
            .unwrap();
        assert_abs_diff_eq!(hit.factor, 4.5, epsilon = 1e-4);
        assert!(hit.normal.x < 0.0 && hit.normal.y > 0.0);
    }

    #[test]
    fn test_cone_ray_base() {
        let c = Cone::new(1.0, 1.0, 0.0).unwrap();
        let hit = c
            .ray_test(&Ray::new(Vec3::new(0.3, -5.0, 0.0), Vec3::Y, 10.0))
            .unwrap();
        assert_abs_diff_eq!(hit.factor, 4.0, epsilon = 1e-5);
        assert_eq!(hit.normal, -Vec3::Y);
    }

    #[test]
    fn test_cone_invalid() {
        assert!(Cone::new(-1.0, 1.0, 0.0).is_err());
    }
}
