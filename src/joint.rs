//! Point-to-Point Constraint
//!
//! Ball-and-socket constraint pinning an anchor on body A to an anchor on
//! body B, or to a fixed world point when B is absent.
//!
//! Solved with sequential impulses alongside the contacts, using a full 3x3
//! effective mass and a soft response:
//!
//! - `force`: fraction of the positional error removed per step
//! - `damping`: weight of the relative anchor velocity in each impulse
//! - `impulse_clamp`: per-iteration impulse limit (0 = unlimited)

use glam::{Mat3, Vec3};

use crate::error::{PhysicsError, PhysicsResult};
use crate::math::skew;
use crate::rigid_body::{BodyHandle, RigidBody};

/// Generational handle to a constraint inside a world
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstraintHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ConstraintHandle {
    /// Build a handle from raw parts
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index
    #[inline]
    pub const fn index(&self) -> u32 {
        self.index
    }
}

/// Ball-and-socket constraint (3 translational DOF removed)
#[derive(Clone, Debug)]
pub struct Point2PointConstraint {
    pub(crate) body_a: BodyHandle,
    pub(crate) body_b: Option<BodyHandle>,
    /// Anchor in body A's local space
    pub local_anchor_a: Vec3,
    /// Anchor in body B's local space, or a world point without body B
    pub local_anchor_b: Vec3,
    /// Positional error correction factor
    pub force: f32,
    /// Relative velocity damping factor
    pub damping: f32,
    /// Per-iteration impulse limit, 0 for none
    pub impulse_clamp: f32,

    pub(crate) accumulated_impulse: Vec3,
    mass: Mat3,
    ra: Vec3,
    rb: Vec3,
    bias: Vec3,
}

impl Point2PointConstraint {
    /// Pin an anchor on A to an anchor on B
    pub fn new(body_a: BodyHandle, body_b: BodyHandle, anchor_a: Vec3, anchor_b: Vec3) -> PhysicsResult<Self> {
        if body_a == body_b {
            return Err(PhysicsError::InvalidConstraint {
                reason: "a constraint needs two distinct bodies",
            });
        }
        Ok(Self::build(body_a, Some(body_b), anchor_a, anchor_b))
    }

    /// Pin an anchor on A to a fixed world point
    pub fn new_world_anchor(body_a: BodyHandle, anchor_a: Vec3, world_point: Vec3) -> Self {
        Self::build(body_a, None, anchor_a, world_point)
    }

    fn build(body_a: BodyHandle, body_b: Option<BodyHandle>, anchor_a: Vec3, anchor_b: Vec3) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a: anchor_a,
            local_anchor_b: anchor_b,
            force: 0.3,
            damping: 1.0,
            impulse_clamp: 0.0,
            accumulated_impulse: Vec3::ZERO,
            mass: Mat3::ZERO,
            ra: Vec3::ZERO,
            rb: Vec3::ZERO,
            bias: Vec3::ZERO,
        }
    }

    /// Soft-constraint response
    pub fn with_response(mut self, force: f32, damping: f32) -> Self {
        self.force = force;
        self.damping = damping;
        self
    }

    /// Per-iteration impulse limit (0 = unlimited)
    pub fn with_impulse_clamp(mut self, clamp: f32) -> Self {
        self.impulse_clamp = clamp.max(0.0);
        self
    }

    /// Move the anchor on body A (local space)
    #[inline]
    pub fn set_pivot_a(&mut self, anchor: Vec3) {
        self.local_anchor_a = anchor;
    }

    /// Move the second pivot: local on body B, or the world point without B
    #[inline]
    pub fn set_pivot_b(&mut self, pivot: Vec3) {
        self.local_anchor_b = pivot;
    }

    /// First body
    #[inline]
    pub fn body_a(&self) -> BodyHandle {
        self.body_a
    }

    /// Second body, if any
    #[inline]
    pub fn body_b(&self) -> Option<BodyHandle> {
        self.body_b
    }

    /// Impulse accumulated over the last step
    #[inline]
    pub fn applied_impulse(&self) -> Vec3 {
        self.accumulated_impulse
    }

    /// World-space anchors of both sides
    pub fn world_anchors(&self, a: &RigidBody, b: Option<&RigidBody>) -> (Vec3, Vec3) {
        let pa = a.transform.transform_point(self.local_anchor_a);
        let pb = match b {
            Some(b) => b.transform.transform_point(self.local_anchor_b),
            None => self.local_anchor_b,
        };
        (pa, pb)
    }

    /// Distance between the two anchors
    pub fn error(&self, a: &RigidBody, b: Option<&RigidBody>) -> f32 {
        let (pa, pb) = self.world_anchors(a, b);
        pa.distance(pb)
    }

    /// Effective mass, error bias and impulse rescaling for a new step
    pub(crate) fn pre_step(&mut self, a: &RigidBody, b: Option<&RigidBody>, inv_dt: f32, dt_ratio: f32) {
        self.ra = a.transform.transform_vector(self.local_anchor_a);
        let (pa, pb) = self.world_anchors(a, b);

        let ska = skew(self.ra);
        let mut k = Mat3::from_diagonal(Vec3::splat(a.inv_mass)) - ska * a.world_inv_inertia * ska;
        match b {
            Some(b) => {
                self.rb = b.transform.transform_vector(self.local_anchor_b);
                let skb = skew(self.rb);
                k += Mat3::from_diagonal(Vec3::splat(b.inv_mass)) - skb * b.world_inv_inertia * skb;
            }
            None => self.rb = Vec3::ZERO,
        }
        self.mass = if k.determinant().abs() > f32::EPSILON {
            k.inverse()
        } else {
            Mat3::ZERO
        };

        self.bias = (pb - pa) * (-self.force * inv_dt);
        self.accumulated_impulse *= dt_ratio;
    }

    /// Re-apply the impulse accumulated last step
    pub(crate) fn warm_start(&self, a: &mut RigidBody, b: Option<&mut RigidBody>) {
        self.apply(a, b, self.accumulated_impulse);
    }

    /// One velocity iteration
    pub(crate) fn solve(&mut self, a: &mut RigidBody, b: Option<&mut RigidBody>) {
        let va = a.linear_velocity + a.angular_velocity.cross(self.ra);
        let vb = match &b {
            Some(b) => b.linear_velocity + b.angular_velocity.cross(self.rb),
            None => Vec3::ZERO,
        };
        let dv = vb - va;
        let mut impulse = self.mass * (self.bias - dv * self.damping);
        if self.impulse_clamp > 0.0 {
            impulse = impulse.clamp_length_max(self.impulse_clamp);
        }
        self.accumulated_impulse += impulse;
        self.apply(a, b, impulse);
    }

    fn apply(&self, a: &mut RigidBody, b: Option<&mut RigidBody>, impulse: Vec3) {
        a.apply_impulse(-impulse, self.ra);
        if let Some(b) = b {
            b.apply_impulse(impulse, self.rb);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::Shape;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    fn ball_at(p: Vec3) -> RigidBody {
        RigidBody::new_dynamic(Arc::new(Shape::sphere(0.25).unwrap()), 1.0)
            .unwrap()
            .with_position(p)
    }

    #[test]
    fn test_same_body_rejected() {
        let h = BodyHandle::new(1, 0);
        assert!(matches!(
            Point2PointConstraint::new(h, h, Vec3::ZERO, Vec3::ZERO),
            Err(PhysicsError::InvalidConstraint { .. })
        ));
    }

    #[test]
    fn test_effective_mass_of_point_masses() {
        let a = ball_at(Vec3::ZERO);
        let b = ball_at(Vec3::X);
        let mut c = Point2PointConstraint::new(BodyHandle::new(0, 0), BodyHandle::new(1, 0), Vec3::ZERO, Vec3::ZERO)
            .unwrap();
        c.pre_step(&a, Some(&b), 60.0, 1.0);
        // two unit masses at their centers: K = 2 I
        assert!(c.mass.abs_diff_eq(Mat3::from_diagonal(Vec3::splat(0.5)), 1e-5));
    }

    #[test]
    fn test_iterations_close_the_gap() {
        let mut a = ball_at(Vec3::ZERO);
        let mut b = ball_at(Vec3::new(1.0, 0.0, 0.0));
        let mut c = Point2PointConstraint::new(
            BodyHandle::new(0, 0),
            BodyHandle::new(1, 0),
            Vec3::new(0.5, 0.0, 0.0),
            Vec3::new(-0.3, 0.0, 0.0),
        )
        .unwrap();
        let dt = 1.0 / 60.0;
        let mut last = c.error(&a, Some(&b));
        for _ in 0..120 {
            c.pre_step(&a, Some(&b), 1.0 / dt, 1.0);
            c.warm_start(&mut a, Some(&mut b));
            for _ in 0..10 {
                c.solve(&mut a, Some(&mut b));
            }
            a.integrate_position(dt);
            b.integrate_position(dt);
            let err = c.error(&a, Some(&b));
            assert!(err <= last + 1e-5, "error grew from {last} to {err}");
            last = err;
        }
        assert!(last < 1e-3);
    }

    #[test]
    fn test_world_anchor_pulls_body() {
        let mut a = ball_at(Vec3::new(0.0, -0.5, 0.0));
        let mut c = Point2PointConstraint::new_world_anchor(BodyHandle::new(0, 0), Vec3::ZERO, Vec3::ZERO);
        c.pre_step(&a, None, 60.0, 1.0);
        c.solve(&mut a, None);
        assert!(a.linear_velocity().y > 0.0);
        assert_abs_diff_eq!(a.linear_velocity().x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_moved_world_pivot_changes_error() {
        let a = ball_at(Vec3::ZERO);
        let mut c = Point2PointConstraint::new_world_anchor(BodyHandle::new(0, 0), Vec3::ZERO, Vec3::ZERO);
        assert_abs_diff_eq!(c.error(&a, None), 0.0);
        c.set_pivot_b(Vec3::new(0.0, 0.0, 2.0));
        assert_abs_diff_eq!(c.error(&a, None), 2.0, epsilon = 1e-6);
        c.set_pivot_a(Vec3::new(0.0, 0.0, 0.5));
        assert_abs_diff_eq!(c.error(&a, None), 1.5, epsilon = 1e-6);
    }

    #[test]
    fn test_impulse_clamp_limits_each_iteration() {
        let mut a = ball_at(Vec3::new(0.0, -10.0, 0.0));
        let mut c = Point2PointConstraint::new_world_anchor(BodyHandle::new(0, 0), Vec3::ZERO, Vec3::ZERO)
            .with_impulse_clamp(0.1);
        c.pre_step(&a, None, 60.0, 1.0);
        c.solve(&mut a, None);
        assert!(c.applied_impulse().length() <= 0.1 + 1e-6);
    }
}
