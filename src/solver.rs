//! Sequential-Impulse Contact Solver
//!
//! Each touching arbiter goes through the same sequence every substep:
//!
//! 1. [`Arbiter::pre_step`]: lever arms, effective masses, Baumgarte and
//!    restitution targets, cached impulses rescaled to the new timestep
//! 2. [`Arbiter::warm_start`]: re-apply last step's impulses
//! 3. [`Arbiter::solve_velocity`] × N: normal impulse clamped to be
//!    non-negative, then a 2D friction impulse clamped to the cone
//!    `friction * normal_impulse`
//! 4. [`Arbiter::solve_bias`] × M: split-impulse position correction,
//!    applied to the bias velocities only
//!
//! Penetration recovery never feeds into the true velocity, so resting
//! bodies do not pick up energy from depenetration.
//!
//! Contacts that are still separated (positive distance within the contact
//! margin) allow the bodies to close the gap in one step and no faster.

use glam::{Mat2, Vec2, Vec3};

use crate::config::PhysicsConfig;
use crate::contact_cache::{combine_friction, combine_restitution, Arbiter, ContactPoint};
use crate::math::EPSILON;
use crate::rigid_body::RigidBody;

/// Timestep data shared by every constraint in a substep
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepContext {
    /// Substep length
    pub dt: f32,
    /// Inverse substep length
    pub inv_dt: f32,
    /// New over previous substep length, rescales cached impulses
    pub dt_ratio: f32,
}

impl StepContext {
    /// Context for a substep of `dt`, following one of `prev_dt`
    pub fn new(dt: f32, prev_dt: f32) -> Self {
        let inv_dt = if dt > 0.0 { 1.0 / dt } else { 0.0 };
        let dt_ratio = if prev_dt > 0.0 { dt / prev_dt } else { 1.0 };
        Self { dt, inv_dt, dt_ratio }
    }
}

/// Velocity of the anchor at `r`
#[inline]
fn anchor_velocity(body: &RigidBody, r: Vec3) -> Vec3 {
    body.linear_velocity + body.angular_velocity.cross(r)
}

#[inline]
fn anchor_bias_velocity(body: &RigidBody, r: Vec3) -> Vec3 {
    body.bias_linear_velocity + body.bias_angular_velocity.cross(r)
}

fn effective_mass_terms(c: &ContactPoint, a: &RigidBody, b: &RigidBody) -> (f32, Mat2) {
    let ia = a.world_inv_inertia;
    let ib = b.world_inv_inertia;
    let inv_mass = a.inv_mass + b.inv_mass;
    let k = |d1: Vec3, d2: Vec3| {
        c.ra.cross(d1).dot(ia * c.ra.cross(d2)) + c.rb.cross(d1).dot(ib * c.rb.cross(d2))
    };

    let kn = inv_mass + k(c.normal, c.normal);
    let normal_mass = if kn > EPSILON { 1.0 / kn } else { 0.0 };

    let k11 = inv_mass + k(c.tangent, c.tangent);
    let k22 = inv_mass + k(c.bitangent, c.bitangent);
    let k12 = k(c.tangent, c.bitangent);
    let kt = Mat2::from_cols(Vec2::new(k11, k12), Vec2::new(k12, k22));
    let tangent_mass = if kt.determinant().abs() > EPSILON {
        kt.inverse()
    } else {
        Mat2::ZERO
    };
    (normal_mass, tangent_mass)
}

impl Arbiter {
    /// Recompute the combined material when either body changed it
    pub(crate) fn update_material(&mut self, a: &RigidBody, b: &RigidBody) {
        if self.dirty {
            self.friction = combine_friction(a.friction, b.friction);
            self.restitution = combine_restitution(a.restitution, b.restitution);
            self.dirty = false;
        }
    }

    /// Prepare every contact point for this substep
    pub(crate) fn pre_step(&mut self, a: &RigidBody, b: &RigidBody, step: &StepContext, config: &PhysicsConfig) {
        self.update_material(a, b);
        let beta = if a.inv_mass == 0.0 || b.inv_mass == 0.0 {
            config.contact_static_baumgarte
        } else {
            config.contact_baumgarte
        };
        let restitution = self.restitution;
        let xa = a.transform.origin;
        let xb = b.transform.origin;

        for c in self.contacts_mut() {
            c.ra = c.world_a - xa;
            c.rb = c.world_b - xb;
            let (normal_mass, tangent_mass) = effective_mass_terms(c, a, b);
            c.normal_mass = normal_mass;
            c.tangent_mass = tangent_mass;

            c.bias = -(beta * step.inv_dt) * (c.distance + config.contact_slop).min(0.0);

            let vn = (anchor_velocity(b, c.rb) - anchor_velocity(a, c.ra)).dot(c.normal);
            c.velocity_bias = if c.distance > 0.0 {
                -c.distance * step.inv_dt
            } else if vn < 0.0 && vn * vn > config.restitution_velocity_sq {
                -restitution * vn
            } else {
                0.0
            };

            c.normal_impulse *= step.dt_ratio;
            // friction is not warm-started
            c.tangent_impulse = 0.0;
            c.bitangent_impulse = 0.0;
            c.bias_impulse = 0.0;
        }
    }

    /// Re-apply the impulses cached from the previous step
    pub(crate) fn warm_start(&self, a: &mut RigidBody, b: &mut RigidBody) {
        for c in self.contacts() {
            let p = c.normal * c.normal_impulse + c.tangent * c.tangent_impulse + c.bitangent * c.bitangent_impulse;
            a.apply_impulse(-p, c.ra);
            b.apply_impulse(p, c.rb);
        }
    }

    /// One velocity pass: normal, then friction
    pub(crate) fn solve_velocity(&mut self, a: &mut RigidBody, b: &mut RigidBody) {
        let friction = self.friction;
        for c in self.contacts_mut() {
            let dv = anchor_velocity(b, c.rb) - anchor_velocity(a, c.ra);
            let vn = dv.dot(c.normal);
            let lambda = c.normal_mass * (c.velocity_bias - vn);
            let old = c.normal_impulse;
            c.normal_impulse = (old + lambda).max(0.0);
            let p = c.normal * (c.normal_impulse - old);
            a.apply_impulse(-p, c.ra);
            b.apply_impulse(p, c.rb);

            let max_friction = friction * c.normal_impulse;
            if max_friction <= 0.0 {
                continue;
            }
            let dv = anchor_velocity(b, c.rb) - anchor_velocity(a, c.ra);
            let vt = Vec2::new(dv.dot(c.tangent), dv.dot(c.bitangent));
            let old = Vec2::new(c.tangent_impulse, c.bitangent_impulse);
            let acc = (old - c.tangent_mass * vt).clamp_length_max(max_friction);
            let delta = acc - old;
            c.tangent_impulse = acc.x;
            c.bitangent_impulse = acc.y;
            let p = c.tangent * delta.x + c.bitangent * delta.y;
            a.apply_impulse(-p, c.ra);
            b.apply_impulse(p, c.rb);
        }
    }

    /// One split-impulse pass on the bias velocities
    pub(crate) fn solve_bias(&mut self, a: &mut RigidBody, b: &mut RigidBody) {
        for c in self.contacts_mut() {
            if c.bias <= 0.0 && c.bias_impulse <= 0.0 {
                continue;
            }
            let vn = (anchor_bias_velocity(b, c.rb) - anchor_bias_velocity(a, c.ra)).dot(c.normal);
            let lambda = c.normal_mass * (c.bias - vn);
            let old = c.bias_impulse;
            c.bias_impulse = (old + lambda).max(0.0);
            let p = c.normal * (c.bias_impulse - old);
            a.apply_bias_impulse(-p, c.ra);
            b.apply_bias_impulse(p, c.rb);
        }
    }

    /// Sum of the normal impulses of the last solve
    pub fn total_normal_impulse(&self) -> f32 {
        self.contacts().iter().map(|c| c.normal_impulse).sum()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::Shape;
    use crate::math::Transform;
    use crate::narrow_phase::ContactCandidate;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    const DT: f32 = 1.0 / 60.0;

    fn ground() -> RigidBody {
        RigidBody::new_static(Arc::new(Shape::plane(Vec3::Y, 0.0).unwrap()))
    }

    fn ball(y: f32, vy: f32) -> RigidBody {
        RigidBody::new_dynamic(Arc::new(Shape::sphere(0.5).unwrap()), 1.0)
            .unwrap()
            .with_position(Vec3::new(0.0, y, 0.0))
            .with_linear_velocity(Vec3::new(0.0, vy, 0.0))
    }

    /// Single contact under the ball, ground as A
    fn arbiter_for(a: &RigidBody, b: &RigidBody, distance: f32) -> Arbiter {
        let mut arb = Arbiter::default();
        arb.dirty = true;
        let bottom = b.position() - Vec3::Y * 0.5;
        let c = ContactCandidate {
            point_a: bottom - Vec3::Y * distance,
            point_b: bottom,
            normal: Vec3::Y,
            distance,
            concave: false,
        };
        arb.insert_contact(a.transform(), b.transform(), &c, &PhysicsConfig::default());
        arb
    }

    fn run(arb: &mut Arbiter, a: &mut RigidBody, b: &mut RigidBody, step: &StepContext) {
        let config = PhysicsConfig::default();
        arb.pre_step(a, b, step, &config);
        arb.warm_start(a, b);
        for _ in 0..10 {
            arb.solve_velocity(a, b);
        }
        for _ in 0..3 {
            arb.solve_bias(a, b);
        }
    }

    #[test]
    fn test_step_context_ratio() {
        let s = StepContext::new(0.01, 0.02);
        assert_abs_diff_eq!(s.inv_dt, 100.0);
        assert_abs_diff_eq!(s.dt_ratio, 0.5);
        assert_eq!(StepContext::new(0.01, 0.0).dt_ratio, 1.0);
    }

    #[test]
    fn test_normal_impulse_stops_approach() {
        let mut g = ground();
        let mut b = ball(0.49, -2.0);
        let mut arb = arbiter_for(&g, &b, -0.01);
        run(&mut arb, &mut g, &mut b, &StepContext::new(DT, DT));
        assert!(b.linear_velocity().y.abs() < 1e-3, "vy = {}", b.linear_velocity().y);
        assert!(arb.total_normal_impulse() > 0.0);
        assert_eq!(g.linear_velocity(), Vec3::ZERO);
    }

    #[test]
    fn test_never_pulls() {
        let mut g = ground();
        let mut b = ball(0.49, 3.0);
        let mut arb = arbiter_for(&g, &b, -0.01);
        run(&mut arb, &mut g, &mut b, &StepContext::new(DT, DT));
        assert_abs_diff_eq!(b.linear_velocity().y, 3.0, epsilon = 1e-6);
        assert_eq!(arb.total_normal_impulse(), 0.0);
    }

    #[test]
    fn test_restitution_bounces() {
        let mut g = ground().with_restitution(1.0);
        let mut b = ball(0.49, -4.0);
        let mut arb = arbiter_for(&g, &b, -0.001);
        run(&mut arb, &mut g, &mut b, &StepContext::new(DT, DT));
        assert_abs_diff_eq!(b.linear_velocity().y, 4.0, epsilon = 1e-3);
    }

    #[test]
    fn test_slow_impacts_do_not_bounce() {
        let mut g = ground().with_restitution(1.0);
        let mut b = ball(0.49, -0.3);
        let mut arb = arbiter_for(&g, &b, -0.001);
        run(&mut arb, &mut g, &mut b, &StepContext::new(DT, DT));
        assert!(b.linear_velocity().y.abs() < 1e-3);
    }

    #[test]
    fn test_friction_bounded_by_cone() {
        let mut g = ground();
        let mut b = ball(0.49, -1.0).with_linear_velocity(Vec3::new(10.0, -1.0, 0.0));
        let mut arb = arbiter_for(&g, &b, -0.01);
        run(&mut arb, &mut g, &mut b, &StepContext::new(DT, DT));
        let c = arb.contacts()[0];
        let jt = Vec2::new(c.tangent_impulse, c.bitangent_impulse).length();
        assert!(jt <= arb.friction() * c.normal_impulse + 1e-5);
        assert!(b.linear_velocity().x < 10.0);
        assert!(b.linear_velocity().x > 0.0);
    }

    #[test]
    fn test_bias_pass_leaves_true_velocity() {
        let mut g = ground();
        let mut b = ball(0.4, 0.0);
        let mut arb = arbiter_for(&g, &b, -0.1);
        let config = PhysicsConfig::default();
        let step = StepContext::new(DT, DT);
        arb.pre_step(&g, &b, &step, &config);
        for _ in 0..3 {
            arb.solve_bias(&mut g, &mut b);
        }
        assert_eq!(b.linear_velocity(), Vec3::ZERO);
        assert!(b.bias_linear_velocity.y > 0.0);
        b.integrate_position(DT);
        assert!(b.position().y > 0.4);
    }

    #[test]
    fn test_separated_contact_allows_closing_gap() {
        let mut g = ground();
        let mut b = ball(0.53, -1.2);
        let mut arb = arbiter_for(&g, &b, 0.03);
        run(&mut arb, &mut g, &mut b, &StepContext::new(DT, DT));
        // the 0.03 gap can be closed at 1.8 m/s, so a 1.2 m/s approach is untouched
        assert_abs_diff_eq!(b.linear_velocity().y, -1.2, epsilon = 1e-5);
    }

    #[test]
    fn test_pre_step_rescales_and_resets_cache() {
        let g = ground();
        let b = ball(0.49, 0.0);
        let mut arb = arbiter_for(&g, &b, -0.01);
        {
            let c = &mut arb.contacts_mut()[0];
            c.normal_impulse = 2.0;
            c.tangent_impulse = 1.0;
            c.bias_impulse = 1.0;
        }
        arb.pre_step(&g, &b, &StepContext::new(DT * 0.5, DT), &PhysicsConfig::default());
        let c = arb.contacts()[0];
        assert_abs_diff_eq!(c.normal_impulse, 1.0);
        assert_eq!(c.tangent_impulse, 0.0);
        assert_eq!(c.bias_impulse, 0.0);
    }

    #[test]
    fn test_stiffer_bias_against_static() {
        let config = PhysicsConfig::default();
        let step = StepContext::new(DT, DT);
        let g = ground();
        let b = ball(0.45, 0.0);
        let mut vs_static = arbiter_for(&g, &b, -0.05);
        vs_static.pre_step(&g, &b, &step, &config);

        let other = ball(-0.55, 0.0).with_transform(Transform::from_translation(Vec3::new(0.0, -0.55, 0.0)));
        let mut vs_dynamic = arbiter_for(&other, &b, -0.05);
        vs_dynamic.pre_step(&other, &b, &step, &config);
        assert!(vs_static.contacts()[0].bias > vs_dynamic.contacts()[0].bias);
    }
}
