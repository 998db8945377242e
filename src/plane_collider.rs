//! Infinite Plane Collider
//!
//! Planes do not use GJK (they are not bounded convex shapes); the narrow
//! phase evaluates the partner's supports along the plane normal directly.
//!
//! # Representation
//!
//! Hessian normal form in the owning body's frame: `dot(normal, p) = distance`.
//! Points with `dot(normal, p) > distance` are in front; the back side is
//! solid.

use glam::Vec3;

use crate::error::{PhysicsError, PhysicsResult};
use crate::raycast::{ray_plane, Ray, ShapeRayHit};

/// Infinite plane collider
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaneShape {
    /// Plane normal (unit length)
    pub normal: Vec3,
    /// Signed distance from origin along normal
    pub distance: f32,
}

impl PlaneShape {
    /// Create a plane; the normal is normalized and must not be zero
    pub fn new(normal: Vec3, distance: f32) -> PhysicsResult<Self> {
        let normal = normal.try_normalize().ok_or(PhysicsError::InvalidShape {
            reason: "plane normal must be non-zero",
        })?;
        if !distance.is_finite() {
            return Err(PhysicsError::InvalidShape {
                reason: "plane distance must be finite",
            });
        }
        Ok(Self { normal, distance })
    }

    /// Create a plane from a point on the plane and a normal direction
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> PhysicsResult<Self> {
        let plane = Self::new(normal, 0.0)?;
        Ok(Self {
            distance: plane.normal.dot(point),
            ..plane
        })
    }

    /// Signed distance from a point to the plane (positive in front)
    #[inline]
    #[must_use]
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.distance
    }

    /// Project a point onto the plane (closest point on plane)
    #[inline]
    #[must_use]
    pub fn project_point(&self, point: Vec3) -> Vec3 {
        point - self.normal * self.distance_to_point(point)
    }

    /// Local ray test; only rays arriving from the front side hit
    #[must_use]
    pub fn ray_test(&self, ray: &Ray) -> Option<ShapeRayHit> {
        ray_plane(ray, self.normal, self.distance)
    }
}

// ============================================================================
// Tests
// ============================================================================
