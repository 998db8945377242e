//! Cylinder Collider
//!
//! Y-axis aligned cylinder centered at the body origin.
//!
//! # Features
//!
//! - **GJK Support**: rim point selected from the direction's XZ projection
//!   and the cap from its Y sign
//! - **Ray test**: two passes, curved side first and flat caps second

use glam::Vec3;

use crate::collider::Support;
use crate::error::{PhysicsError, PhysicsResult};
use crate::raycast::{closer_hit, ray_cylinder_side, ray_disc, Ray, ShapeRayHit};

/// Cylinder collider geometry
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cylinder {
    /// Radius of the circular cross-section (including margin)
    pub radius: f32,
    /// Half-height along local Y (including margin)
    pub half_height: f32,
    /// Collision margin
    pub margin: f32,
}

impl Cylinder {
    /// Create a new cylinder
    pub fn new(radius: f32, half_height: f32, margin: f32) -> PhysicsResult<Self> {
        if !(radius > 0.0 && half_height > 0.0) || !radius.is_finite() || !half_height.is_finite() {
            return Err(PhysicsError::InvalidShape {
                reason: "cylinder radius and half-height must be positive",
            });
        }
        if !(margin >= 0.0) || margin > radius.min(half_height) {
            return Err(PhysicsError::InvalidShape {
                reason: "cylinder margin must lie in [0, min(radius, half-height)]",
            });
        }
        Ok(Self {
            radius,
            half_height,
            margin,
        })
    }

    /// Local half-extents of the bounding box
    #[inline]
    #[must_use]
    pub fn half_extents(&self) -> Vec3 {
        Vec3::new(self.radius, self.half_height, self.radius)
    }

    /// Diagonal inertia per unit mass
    ///
    /// For a solid cylinder aligned along Y:
    /// - Ixx = Izz = (3*r^2 + h^2) / 12 where h = 2*`half_height`
    /// - Iyy = r^2 / 2
    #[must_use]
    pub fn inertia(&self) -> Vec3 {
        let r2 = self.radius * self.radius;
        let h = 2.0 * self.half_height;
        let ixx = (3.0 * r2 + h * h) / 12.0;
        Vec3::new(ixx, 0.5 * r2, ixx)
    }

    /// Local ray test
    #[must_use]
    pub fn ray_test(&self, ray: &Ray) -> Option<ShapeRayHit> {
        if let Some(hit) = ray_cylinder_side(ray, self.radius, self.half_height) {
            return Some(hit);
        }
        let top = ray_disc(ray, self.half_height, 1.0, self.radius);
        let bottom = ray_disc(ray, -self.half_height, -1.0, self.radius);
        closer_hit(top, bottom)
    }
}

impl Support for Cylinder {
    fn local_support_without_margin(&self, direction: Vec3) -> Vec3 {
        let r = self.radius - self.margin;
        let h = self.half_height - self.margin;
        let y = if direction.y >= 0.0 { h } else { -h };
        let xz_len = (direction.x * direction.x + direction.z * direction.z).sqrt();
        if xz_len > 1e-12 {
            let s = r / xz_len;
            Vec3::new(direction.x * s, y, direction.z * s)
        } else {
            Vec3::new(0.0, y, 0.0)
        }
    }

    fn margin(&self) -> f32 {
        self.margin
    }
}

// ============================================================================
// Tests
// ============================================================================
