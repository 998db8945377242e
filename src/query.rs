//! World Queries
//!
//! Ray tests and convex sweeps against the bodies of a [`PhysicsWorld`].
//! Both queries cull candidates through the broad-phase indices and run
//! the exact test per body. They never touch the dynamics.
//!
//! # Features
//!
//! - `ray_test`: nearest body hit by a segment
//! - `convex_sweep_test`: nearest body hit by a shape moving between two transforms

use glam::Vec3;

use crate::ccd::{shape_time_of_impact, Motion};
use crate::collider::Shape;
use crate::filter::groups;
use crate::math::{Transform, EPSILON};
use crate::raycast::Ray;
use crate::rigid_body::{BodyHandle, RigidBody};
use crate::spatial::{ray_test_trees, SpatialIndex};
use crate::world::PhysicsWorld;

// ============================================================================
// Query Parameters and Results
// ============================================================================

/// Segment to test against the world
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayTestParams {
    /// Segment start
    pub from: Vec3,
    /// Segment end
    pub to: Vec3,
    /// Group of the query, matched against body masks
    pub group: u16,
    /// Groups the query can see
    pub mask: u16,
    /// Body to ignore
    pub exclude: Option<BodyHandle>,
}

impl RayTestParams {
    /// Segment that sees every group
    pub fn new(from: Vec3, to: Vec3) -> Self {
        Self {
            from,
            to,
            group: groups::ALL,
            mask: groups::ALL,
            exclude: None,
        }
    }

    /// Restrict the groups seen by the query
    pub fn with_filter(mut self, group: u16, mask: u16) -> Self {
        self.group = group;
        self.mask = mask;
        self
    }

    /// Ignore one body
    pub fn excluding(mut self, body: BodyHandle) -> Self {
        self.exclude = Some(body);
        self
    }
}

/// Nearest body hit by a ray
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Body hit
    pub body: BodyHandle,
    /// World-space hit point
    pub point: Vec3,
    /// World-space surface normal
    pub normal: Vec3,
    /// Fraction of the segment `from -> to`
    pub factor: f32,
}

/// Shape to sweep through the world
#[derive(Clone, Copy, Debug)]
pub struct ConvexSweepParams<'a> {
    /// Swept shape; triangle meshes and planes cannot be swept
    pub shape: &'a Shape,
    /// Pose at the start of the sweep
    pub from: Transform,
    /// Pose at the end of the sweep
    pub to: Transform,
    /// Group of the query, matched against body masks
    pub group: u16,
    /// Groups the query can see
    pub mask: u16,
    /// Body to ignore
    pub exclude: Option<BodyHandle>,
}

impl<'a> ConvexSweepParams<'a> {
    /// Sweep that sees every group
    pub fn new(shape: &'a Shape, from: Transform, to: Transform) -> Self {
        Self {
            shape,
            from,
            to,
            group: groups::ALL,
            mask: groups::ALL,
            exclude: None,
        }
    }

    /// Restrict the groups seen by the query
    pub fn with_filter(mut self, group: u16, mask: u16) -> Self {
        self.group = group;
        self.mask = mask;
        self
    }

    /// Ignore one body
    pub fn excluding(mut self, body: BodyHandle) -> Self {
        self.exclude = Some(body);
        self
    }
}

/// Nearest body hit by a sweep
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepHit {
    /// Body hit
    pub body: BodyHandle,
    /// Contact point on the body at the time of impact
    pub point: Vec3,
    /// Body surface normal, facing the swept shape
    pub normal: Vec3,
    /// Distance travelled along the path before the impact
    pub distance: f32,
    /// Fraction of the sweep at the impact
    pub factor: f32,
}

/// Whether a query with `group`/`mask` sees a body
#[inline]
fn visible(body: &RigidBody, group: u16, mask: u16, exclude: Option<BodyHandle>) -> bool {
    exclude != Some(body.handle) && body.filter.accepts_query(group, mask)
}

// ============================================================================
// Queries
// ============================================================================

impl<S: SpatialIndex> PhysicsWorld<S> {
    /// Nearest body crossed by the segment `from -> to`
    pub fn ray_test(&self, params: &RayTestParams) -> Option<RayHit> {
        let length = (params.to - params.from).length();
        if length < EPSILON {
            return None;
        }
        let ray = Ray::from_segment(params.from, params.to);
        let mut best: Option<RayHit> = None;

        ray_test_trees(&[&self.dynamic_index, &self.static_index], &ray, &mut |object, current| {
            let body = self.bodies.at(object)?;
            if !visible(body, params.group, params.mask, params.exclude) {
                return None;
            }
            let t = &body.transform;
            let local = Ray {
                origin: t.inverse_transform_point(current.origin),
                direction: t.inverse_transform_vector(current.direction),
                max_factor: current.max_factor,
            };
            let hit = body.shape.ray_test(&local)?;
            if hit.factor > current.max_factor {
                return None;
            }
            best = Some(RayHit {
                body: body.handle,
                point: t.transform_point(hit.point),
                normal: t.transform_vector(hit.normal),
                factor: hit.factor / length,
            });
            Some(hit.factor)
        });
        best
    }

    /// Nearest body hit by a shape moving from `params.from` to `params.to`
    ///
    /// `accept` can veto individual hits; the nearest accepted one wins.
    /// A shape already overlapping a body reports a hit at factor 0.
    pub fn convex_sweep_test(
        &self,
        params: &ConvexSweepParams<'_>,
        mut accept: Option<&mut dyn FnMut(&SweepHit) -> bool>,
    ) -> Option<SweepHit> {
        if params.shape.is_static_only() {
            return None;
        }
        let config = &self.config().physics;
        let motion = Motion::between(&params.from, &params.to, params.shape.radius());
        let path = motion.linear.length();
        let swept = motion.swept_aabb(params.shape);

        let mut candidates = Vec::new();
        self.dynamic_index.overlapping_nodes(&swept, &mut candidates);
        self.static_index.overlapping_nodes(&swept, &mut candidates);

        let mut best: Option<SweepHit> = None;
        for object in candidates {
            let Some(body) = self.bodies.at(object) else { continue };
            if body.is_trigger() || !visible(body, params.group, params.mask, params.exclude) {
                continue;
            }
            let still = Motion::stationary(&body.transform, body.shape.radius());
            let Some(hit) = shape_time_of_impact(params.shape, &motion, &body.shape, &still, config) else {
                continue;
            };
            if best.is_some_and(|b| b.factor <= hit.toi) {
                continue;
            }
            let candidate = SweepHit {
                body: body.handle,
                point: hit.contact.point_b,
                normal: -hit.contact.normal,
                distance: hit.toi * path,
                factor: hit.toi,
            };
            if let Some(accept) = accept.as_mut() {
                if !accept(&candidate) {
                    continue;
                }
            }
            best = Some(candidate);
        }
        best
    }
}

// ============================================================================
// Tests
// ============================================================================
