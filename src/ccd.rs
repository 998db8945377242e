//! Continuous Collision Detection (CCD)
//!
//! Keeps fast bodies from tunneling through thin geometry. After position
//! integration, each body whose motion over the substep is large compared
//! to its radius is a *bullet*. Bullets (and moving kinematic objects) are
//! swept against their neighbours by conservative advancement, and every
//! predicted impact becomes a [`ToiEvent`].
//!
//! # Conservative advancement
//!
//! Both bodies move along their substep motion with constant linear and
//! angular velocity. At trial time `t` the narrow phase gives the
//! separation `d` and axis `n`; no point can close the gap faster than
//!
//! ```text
//! approach = (Δx_a - Δx_b)·n + |Δθ_a| r_a + |Δθ_b| r_b
//! ```
//!
//! so `t += d / approach` never skips past the first contact. The sweep
//! ends when `d < continuous_slop` (impact), when the bodies stop
//! approaching, past `t = 1`, or at `continuous_max_iterations`, which
//! reports the current time as the best estimate.
//!
//! # Resolution
//!
//! The world pops the earliest event from [`ToiQueue`], freezes the
//! participants at that time, inserts the predicted contact into the pair's
//! arbiter and re-sweeps the remaining events that involve a frozen body.

use glam::{Quat, Vec3};
use tracing::warn;

use crate::collider::{Shape, ShapeKind, AABB};
use crate::config::PhysicsConfig;
use crate::math::{Transform, EPSILON};
use crate::narrow_phase::{mesh_candidates, pair_distance, Collidable, ContactCandidate};
use crate::pool::{Pool, Reset};

/// Rigid motion over one substep, parameterized by `t` in `[0, 1]`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Motion {
    /// Pose at `t = 0`
    pub start: Transform,
    /// Translation over the whole substep
    pub linear: Vec3,
    /// Rotation vector (axis times angle) over the whole substep
    pub angular: Vec3,
    /// Bounding radius of the moving shape
    pub radius: f32,
}

impl Motion {
    /// Motion that takes `start` to `end`
    pub fn between(start: &Transform, end: &Transform, radius: f32) -> Self {
        let delta = Quat::from_mat3(&(end.basis * start.basis.transpose())).normalize();
        let (axis, angle) = delta.to_axis_angle();
        let angle = if angle > std::f32::consts::PI {
            angle - std::f32::consts::TAU
        } else {
            angle
        };
        let angular = if angle.is_finite() && angle.abs() > EPSILON {
            axis * angle
        } else {
            Vec3::ZERO
        };
        Self {
            start: *start,
            linear: end.origin - start.origin,
            angular,
            radius,
        }
    }

    /// A body that does not move
    pub fn stationary(at: &Transform, radius: f32) -> Self {
        Self {
            start: *at,
            linear: Vec3::ZERO,
            angular: Vec3::ZERO,
            radius,
        }
    }

    /// Pose at fraction `t` of the substep
    #[inline]
    pub fn at(&self, t: f32) -> Transform {
        self.start.integrated(self.linear, self.angular, t)
    }

    /// Whether the motion is large enough to tunnel
    pub fn is_bullet(&self, config: &PhysicsConfig) -> bool {
        self.linear.length_squared() > config.continuous_linear_sq * self.radius * self.radius
            || self.angular.length_squared() > config.continuous_angular_sq
    }

    /// Whether anything moves at all
    #[inline]
    pub fn is_moving(&self) -> bool {
        self.linear != Vec3::ZERO || self.angular != Vec3::ZERO
    }

    /// Bounds covering the shape over the whole motion
    pub fn swept_aabb(&self, shape: &Shape) -> AABB {
        let from = shape.world_aabb(&self.start);
        let to = shape.world_aabb(&self.at(1.0));
        from.union(&to)
    }
}

/// First touch along two motions
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToiHit {
    /// Fraction of the substep
    pub toi: f32,
    /// Contact at the time of impact, oriented A to B
    pub contact: ContactCandidate,
    /// Advancement iterations used
    pub iterations: u32,
}

/// Conservative advancement between two collidables
///
/// Returns `None` when the pair never comes within `continuous_slop`
/// during the substep.
pub fn time_of_impact(
    a: Collidable<'_>,
    ma: &Motion,
    b: Collidable<'_>,
    mb: &Motion,
    config: &PhysicsConfig,
) -> Option<ToiHit> {
    let angular_bound = ma.angular.length() * ma.radius + mb.angular.length() * mb.radius;
    let concave = matches!(a, Collidable::Triangle(_)) || matches!(b, Collidable::Triangle(_));
    let mut t = 0.0f32;
    let mut iterations = 0;
    loop {
        let ta = ma.at(t);
        let tb = mb.at(t);
        let r = pair_distance(a, &ta, b, &tb, config)?;
        if r.distance < config.continuous_slop {
            return Some(ToiHit {
                toi: t,
                contact: ContactCandidate {
                    point_a: r.point_a,
                    point_b: r.point_b,
                    normal: r.normal,
                    distance: r.distance,
                    concave,
                },
                iterations,
            });
        }

        let approach = (ma.linear - mb.linear).dot(r.normal) + angular_bound;
        if approach <= EPSILON {
            return None;
        }
        t += r.distance / approach;
        if t > 1.0 {
            return None;
        }

        iterations += 1;
        if iterations >= config.continuous_max_iterations {
            warn!(t, distance = r.distance, "conservative advancement hit its iteration cap");
            let ta = ma.at(t);
            let tb = mb.at(t);
            let r = pair_distance(a, &ta, b, &tb, config)?;
            return Some(ToiHit {
                toi: t,
                contact: ContactCandidate {
                    point_a: r.point_a,
                    point_b: r.point_b,
                    normal: r.normal,
                    distance: r.distance,
                    concave,
                },
                iterations,
            });
        }
    }
}

/// Earliest impact between two shapes, expanding meshes per triangle
///
/// Plane/plane, plane/mesh and mesh/mesh pairs never collide.
pub fn shape_time_of_impact(
    a: &Shape,
    ma: &Motion,
    b: &Shape,
    mb: &Motion,
    config: &PhysicsConfig,
) -> Option<ToiHit> {
    match (a.kind(), b.kind()) {
        (ShapeKind::TriangleMesh(mesh), _) => {
            let swept = mb.swept_aabb(b);
            let mut tris = Vec::new();
            mesh_candidates(mesh, &ma.start, &swept, &mut tris);
            let other = Collidable::of_shape(b)?;
            tris.into_iter()
                .filter_map(|i| time_of_impact(Collidable::Triangle(mesh.triangle(i)), ma, other, mb, config))
                .min_by(|x, y| x.toi.total_cmp(&y.toi))
        }
        (_, ShapeKind::TriangleMesh(_)) => shape_time_of_impact(b, mb, a, ma, config).map(|mut hit| {
            let c = hit.contact;
            hit.contact = ContactCandidate {
                point_a: c.point_b,
                point_b: c.point_a,
                normal: -c.normal,
                ..c
            };
            hit
        }),
        _ => time_of_impact(Collidable::of_shape(a)?, ma, Collidable::of_shape(b)?, mb, config),
    }
}

// ============================================================================
// Events
// ============================================================================

/// Predicted impact between two bodies, identified by world slot index
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ToiEvent {
    /// First body slot (the arbiter's A side)
    pub body_a: u32,
    /// Second body slot
    pub body_b: u32,
    /// Fraction of the substep
    pub toi: f32,
    /// Predicted contact, oriented A to B
    pub normal: Vec3,
    /// Witness on A at impact
    pub point_a: Vec3,
    /// Witness on B at impact
    pub point_b: Vec3,
    /// Separation at impact
    pub distance: f32,
    /// Produced by a mesh triangle
    pub concave: bool,
    /// A was already frozen when the event was predicted
    pub frozen_a: bool,
    /// B was already frozen when the event was predicted
    pub frozen_b: bool,
}

impl Reset for ToiEvent {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

impl ToiEvent {
    /// Event from a sweep hit
    pub fn from_hit(body_a: u32, body_b: u32, hit: &ToiHit) -> Self {
        Self {
            body_a,
            body_b,
            toi: hit.toi,
            normal: hit.contact.normal,
            point_a: hit.contact.point_a,
            point_b: hit.contact.point_b,
            distance: hit.contact.distance,
            concave: hit.contact.concave,
            frozen_a: false,
            frozen_b: false,
        }
    }

    /// Contact to insert into the pair's arbiter
    pub fn candidate(&self) -> ContactCandidate {
        ContactCandidate {
            point_a: self.point_a,
            point_b: self.point_b,
            normal: self.normal,
            distance: self.distance,
            concave: self.concave,
        }
    }

    /// Whether `body` takes part
    #[inline]
    pub fn involves(&self, body: u32) -> bool {
        self.body_a == body || self.body_b == body
    }
}

/// Pooled events of one substep
#[derive(Debug, Default)]
pub struct ToiQueue {
    events: Pool<ToiEvent>,
}

impl ToiQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event
    pub fn push(&mut self, event: ToiEvent) {
        let id = self.events.acquire();
        if let Some(slot) = self.events.get_mut(id) {
            *slot = event;
        }
    }

    /// Remove and return the earliest event
    pub fn pop_earliest(&mut self) -> Option<ToiEvent> {
        let id = self
            .events
            .live_ids()
            .filter_map(|id| self.events.get(id).map(|e| (id, e.toi)))
            .min_by(|x, y| x.1.total_cmp(&y.1))?
            .0;
        let event = *self.events.get(id)?;
        self.events.release(id);
        Some(event)
    }

    /// Remove and return every event involving `body`
    pub fn take_involving(&mut self, body: u32) -> Vec<ToiEvent> {
        let ids: Vec<u32> = self
            .events
            .live_ids()
            .filter(|&id| self.events.get(id).is_some_and(|e| e.involves(body)))
            .collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(e) = self.events.get(id) {
                out.push(*e);
            }
            self.events.release(id);
        }
        out
    }

    /// Number of queued events
    #[inline]
    pub fn len(&self) -> usize {
        self.events.live_count()
    }

    /// Check if no event is queued
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every event
    pub fn clear(&mut self) {
        self.events.release_all();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trimesh::tests::grid;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    fn ball() -> Shape {
        Shape::sphere(0.5).unwrap()
    }

    #[test]
    fn test_motion_interpolates() {
        let start = Transform::IDENTITY;
        let end = Transform::from_axis_angle(Vec3::Y, 1.0, Vec3::new(2.0, 0.0, 0.0));
        let m = Motion::between(&start, &end, 1.0);
        assert!(m.at(0.5).origin.abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-6));
        assert!(m.at(1.0).basis.abs_diff_eq(end.basis, 1e-5));
        assert_abs_diff_eq!(m.angular.length(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_bullet_threshold() {
        let config = PhysicsConfig::default();
        let slow = Motion::between(&Transform::IDENTITY, &Transform::from_translation(Vec3::X * 0.1), 0.5);
        let fast = Motion::between(&Transform::IDENTITY, &Transform::from_translation(Vec3::X * 0.5), 0.5);
        assert!(!slow.is_bullet(&config));
        assert!(fast.is_bullet(&config));
    }

    #[test]
    fn test_head_on_spheres() {
        let config = PhysicsConfig::default();
        let s = ball();
        // surfaces 4 apart, closing by 20 over the substep
        let ma = Motion::between(
            &Transform::from_translation(Vec3::new(-2.5, 0.0, 0.0)),
            &Transform::from_translation(Vec3::new(7.5, 0.0, 0.0)),
            0.5,
        );
        let mb = Motion::between(
            &Transform::from_translation(Vec3::new(2.5, 0.0, 0.0)),
            &Transform::from_translation(Vec3::new(-7.5, 0.0, 0.0)),
            0.5,
        );
        let hit = shape_time_of_impact(&s, &ma, &s, &mb, &config).unwrap();
        assert_abs_diff_eq!(hit.toi, 0.2, epsilon = 1e-3);
        assert!(hit.contact.distance < config.continuous_slop);
        assert!(hit.contact.distance > -config.contact_slop);
        assert!(hit.contact.normal.abs_diff_eq(Vec3::X, 1e-3));
    }

    #[test]
    fn test_diverging_motion_never_hits() {
        let config = PhysicsConfig::default();
        let s = ball();
        let ma = Motion::between(
            &Transform::from_translation(Vec3::new(-2.0, 0.0, 0.0)),
            &Transform::from_translation(Vec3::new(-12.0, 0.0, 0.0)),
            0.5,
        );
        let mb = Motion::stationary(&Transform::from_translation(Vec3::new(2.0, 0.0, 0.0)), 0.5);
        assert!(shape_time_of_impact(&s, &ma, &s, &mb, &config).is_none());
    }

    #[test]
    fn test_thin_box_not_tunneled() {
        let config = PhysicsConfig::default();
        let wall = Shape::cuboid(Vec3::new(0.05, 2.0, 2.0), 0.01).unwrap();
        let s = Shape::sphere(0.1).unwrap();
        let ma = Motion::stationary(&Transform::IDENTITY, wall.radius());
        let mb = Motion::between(
            &Transform::from_translation(Vec3::new(-1.0, 0.0, 0.0)),
            &Transform::from_translation(Vec3::new(1.0, 0.0, 0.0)),
            0.1,
        );
        let hit = shape_time_of_impact(&wall, &ma, &s, &mb, &config).unwrap();
        // sphere surface meets the wall face at x = -0.05
        assert_abs_diff_eq!(hit.toi, 0.425, epsilon = 0.01);
        assert!(hit.contact.normal.x < -0.9);
    }

    #[test]
    fn test_sphere_through_mesh() {
        let config = PhysicsConfig::default();
        let mesh = Shape::triangle_mesh(Arc::new(grid(4, 4.0)), 0.0).unwrap();
        let s = Shape::sphere(0.25).unwrap();
        let ma = Motion::stationary(&Transform::IDENTITY, mesh.radius());
        let mb = Motion::between(
            &Transform::from_translation(Vec3::new(0.3, 2.0, 0.3)),
            &Transform::from_translation(Vec3::new(0.3, -2.0, 0.3)),
            0.25,
        );
        let hit = shape_time_of_impact(&mesh, &ma, &s, &mb, &config).unwrap();
        assert!(hit.contact.concave);
        assert_abs_diff_eq!(hit.toi, (2.0 - 0.25) / 4.0, epsilon = 0.01);

        let flipped = shape_time_of_impact(&s, &mb, &mesh, &ma, &config).unwrap();
        assert_abs_diff_eq!(flipped.toi, hit.toi, epsilon = 1e-5);
        assert!(flipped.contact.normal.abs_diff_eq(-hit.contact.normal, 1e-5));
    }

    #[test]
    fn test_queue_orders_and_invalidates() {
        let mut q = ToiQueue::new();
        for (i, toi) in [0.7f32, 0.2, 0.5].iter().enumerate() {
            q.push(ToiEvent {
                body_a: i as u32,
                body_b: 9,
                toi: *toi,
                ..ToiEvent::default()
            });
        }
        let first = q.pop_earliest().unwrap();
        assert_eq!(first.toi, 0.2);
        let touching = q.take_involving(0);
        assert_eq!(touching.len(), 1);
        assert_eq!(q.len(), 1);
        q.clear();
        assert!(q.is_empty());
        assert!(q.pop_earliest().is_none());
    }
}
