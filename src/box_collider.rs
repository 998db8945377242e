//! Box Collider
//!
//! Box centered at the body origin, axis-aligned in the body frame.
//!
//! # Features
//!
//! - **Rounded core**: the GJK core is the box shrunk by the collision
//!   margin, so core + margin reproduces the requested half-extents
//! - **GJK Support**: O(1) sign-select support
//! - **Ray test**: slab method in the local frame

use glam::Vec3;

use crate::collider::Support;
use crate::error::{PhysicsError, PhysicsResult};
use crate::raycast::{ray_box, Ray, ShapeRayHit};

/// Box collider geometry
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxShape {
    /// Half-extents including the margin
    pub half_extents: Vec3,
    /// Collision margin wrapped around the shrunken core
    pub margin: f32,
}

impl BoxShape {
    /// Create a box; the margin must fit inside the smallest half-extent
    pub fn new(half_extents: Vec3, margin: f32) -> PhysicsResult<Self> {
        if !half_extents.is_finite() || half_extents.min_element() <= 0.0 {
            return Err(PhysicsError::InvalidShape {
                reason: "box half-extents must be positive",
            });
        }
        if !(margin >= 0.0) || margin > half_extents.min_element() {
            return Err(PhysicsError::InvalidShape {
                reason: "box margin must lie in [0, smallest half-extent]",
            });
        }
        Ok(Self {
            half_extents,
            margin,
        })
    }

    /// Half-extents of the core used by GJK
    #[inline]
    #[must_use]
    pub fn core_half_extents(&self) -> Vec3 {
        self.half_extents - Vec3::splat(self.margin)
    }

    /// Corner `index` (bit 0: x, bit 1: y, bit 2: z; set bit = positive side)
    #[inline]
    #[must_use]
    pub fn corner(&self, index: usize) -> Vec3 {
        let h = self.half_extents;
        Vec3::new(
            if index & 1 != 0 { h.x } else { -h.x },
            if index & 2 != 0 { h.y } else { -h.y },
            if index & 4 != 0 { h.z } else { -h.z },
        )
    }

    /// Bounding radius
    #[inline]
    #[must_use]
    pub fn radius(&self) -> f32 {
        self.half_extents.length()
    }

    /// Diagonal inertia per unit mass
    ///
    /// Solid box: `Ixx = (hy^2 + hz^2) / 3`, and cyclic.
    #[must_use]
    pub fn inertia(&self) -> Vec3 {
        let h2 = self.half_extents * self.half_extents;
        Vec3::new(h2.y + h2.z, h2.x + h2.z, h2.x + h2.y) / 3.0
    }

    /// Local ray test
    #[must_use]
    pub fn ray_test(&self, ray: &Ray) -> Option<ShapeRayHit> {
        ray_box(ray, self.half_extents)
    }
}

impl Support for BoxShape {
    fn local_support_without_margin(&self, direction: Vec3) -> Vec3 {
        let h = self.core_half_extents();
        Vec3::new(
            if direction.x >= 0.0 { h.x } else { -h.x },
            if direction.y >= 0.0 { h.y } else { -h.y },
            if direction.z >= 0.0 { h.z } else { -h.z },
        )
    }

    fn margin(&self) -> f32 {
        self.margin
    }
}

// ============================================================================
// Tests
// ============================================================================
