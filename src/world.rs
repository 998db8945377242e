//! Physics World
//!
//! [`PhysicsWorld`] owns every body, constraint, arbiter and pooled record
//! and advances them with [`PhysicsWorld::update`].
//!
//! # Substep pipeline
//!
//! 1. Refresh broad-phase extents of awake bodies
//! 2. Broad-phase pair query
//! 3. Narrow phase and arbiter update (wakes sleepers touched by awake bodies)
//! 4. Island building and sleep decisions
//! 5. Contact and constraint preStep
//! 6. Velocity integration (gravity, forces, damping)
//! 7. Warm start
//! 8. Velocity iterations
//! 9. Bias (split-impulse) passes
//! 10. Position integration
//! 11. Continuous collision: sweep bullets, freeze at the earliest impacts
//!
//! Contact events are queued during a substep and dispatched to the body
//! callbacks once it completes.
//!
//! # Broad phase
//!
//! Two [`SpatialIndex`] instances partition the objects: awake dynamic and
//! kinematic objects in one, static objects and sleeping bodies in the
//! other. Pairs come from the first index against itself and against the
//! second, so sleeping piles cost nothing until something touches them.

use std::time::Instant;

use glam::Vec3;
use tracing::{debug, debug_span, trace, warn};

use crate::ccd::{shape_time_of_impact, Motion, ToiEvent, ToiQueue};
use crate::collider::AABB;
use crate::config::{PhysicsConfig, WorldConfig};
use crate::contact_cache::{Arbiter, ArbiterKey, ArbiterSet};
use crate::dynamic_bvh::DynamicAabbTree;
use crate::error::{PhysicsError, PhysicsResult};
use crate::event::{ContactCallbacks, ContactEvent, ContactEventType, EventCollector};
use crate::filter::CollisionFilter;
use crate::joint::{ConstraintHandle, Point2PointConstraint};
use crate::math::Transform;
use crate::narrow_phase::{collide, ContactCandidate};
use crate::pool::Arena;
use crate::profiling::{PerformanceData, Stage};
use crate::rigid_body::{BodyHandle, BodyKind, RigidBody};
use crate::sleeping::{IslandManager, IslandMember};
use crate::solver::StepContext;
use crate::spatial::SpatialIndex;

/// Rigid-body simulation world
pub struct PhysicsWorld<S: SpatialIndex = DynamicAabbTree> {
    config: WorldConfig,
    pub(crate) bodies: Arena<RigidBody>,
    constraints: Arena<Point2PointConstraint>,
    /// Awake dynamic and kinematic objects
    pub(crate) dynamic_index: S,
    /// Static objects and sleeping bodies
    pub(crate) static_index: S,
    arbiters: ArbiterSet,
    islands: IslandManager,
    toi_queue: ToiQueue,
    events: EventCollector,
    perf: PerformanceData,
    step_count: u64,
    prev_dt: f32,
    time_accumulator: f32,

    // per-substep scratch
    pairs: Vec<(u32, u32)>,
    nodes: Vec<u32>,
    candidates: Vec<ContactCandidate>,
    solve_list: Vec<u32>,
    members: Vec<IslandMember>,
    edges: Vec<(u32, u32)>,
    dense: Vec<u32>,
}

impl<S: SpatialIndex> Default for PhysicsWorld<S> {
    fn default() -> Self {
        Self::build(WorldConfig::default())
    }
}

/// Bounds a body occupies in the broad phase
fn broadphase_aabb(body: &RigidBody, contact_distance: f32) -> AABB {
    body.shape.world_aabb(&body.transform).expanded(contact_distance)
}

/// Event for an arbiter, oriented from its A side
fn arbiter_event(arb: &Arbiter, a: &RigidBody, b: &RigidBody, event_type: ContactEventType) -> (ContactEvent, Vec3) {
    let (normal, point, other_point, distance) = match arb.deepest() {
        Some(c) => (c.normal, c.world_a, c.world_b, c.distance),
        None => (Vec3::ZERO, a.transform.origin, b.transform.origin, 0.0),
    };
    let event = ContactEvent {
        body: a.handle,
        other: b.handle,
        event_type,
        normal,
        point,
        distance,
        contact_count: arb.contact_count(),
        other_group: b.filter.group,
        body_group: a.filter.group,
    };
    (event, other_point)
}

/// Both sides of a constraint; B is absent for world anchors
fn constraint_bodies<'a>(
    bodies: &'a mut Arena<RigidBody>,
    c: &Point2PointConstraint,
) -> Option<(&'a mut RigidBody, Option<&'a mut RigidBody>)> {
    match c.body_b {
        Some(hb) => {
            let (a, b) = bodies.pair_mut(c.body_a.index, hb.index)?;
            Some((a, Some(b)))
        }
        None => Some((bodies.at_mut(c.body_a.index)?, None)),
    }
}

/// Whether a constraint has an awake dynamic side
fn constraint_awake(bodies: &Arena<RigidBody>, c: &Point2PointConstraint) -> bool {
    let a = bodies.at(c.body_a.index).is_some_and(RigidBody::is_awake_dynamic);
    let b = c
        .body_b
        .and_then(|h| bodies.at(h.index))
        .is_some_and(RigidBody::is_awake_dynamic);
    a || b
}

/// Motion of a body over the substep just integrated
fn motion_of(body: &RigidBody) -> Motion {
    if body.frozen {
        Motion::stationary(&body.transform, body.shape.radius())
    } else {
        Motion::between(&body.prev_transform, &body.transform, body.shape.radius())
    }
}

/// Sweep one pair and queue the impact, if any
fn sweep_pair(
    bodies: &Arena<RigidBody>,
    config: &PhysicsConfig,
    queue: &mut ToiQueue,
    (i, mi): (u32, &Motion),
    (j, mj): (u32, &Motion),
) {
    let (Some(bi), Some(bj)) = (bodies.at(i), bodies.at(j)) else {
        return;
    };
    if !(bi.is_dynamic() || bj.is_dynamic())
        || bi.is_trigger()
        || bj.is_trigger()
        || !CollisionFilter::can_collide(&bi.filter, &bj.filter)
    {
        return;
    }
    let ((lo, blo, mlo), (hi, bhi, mhi)) = if i < j { ((i, bi, mi), (j, bj, mj)) } else { ((j, bj, mj), (i, bi, mi)) };
    if let Some(hit) = shape_time_of_impact(&blo.shape, mlo, &bhi.shape, mhi, config) {
        // pairs already in contact at the start belong to the discrete pass
        if hit.toi > 0.0 && hit.toi < 1.0 {
            queue.push(ToiEvent::from_hit(lo, hi, &hit));
        }
    }
}

impl<S: SpatialIndex> PhysicsWorld<S> {
    /// Create a world after validating the configuration
    pub fn new(config: WorldConfig) -> PhysicsResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: WorldConfig) -> Self {
        Self {
            config,
            bodies: Arena::new(),
            constraints: Arena::new(),
            dynamic_index: S::default(),
            static_index: S::default(),
            arbiters: ArbiterSet::new(),
            islands: IslandManager::new(),
            toi_queue: ToiQueue::new(),
            events: EventCollector::new(),
            perf: PerformanceData::new(),
            step_count: 0,
            prev_dt: 0.0,
            time_accumulator: 0.0,
            pairs: Vec::new(),
            nodes: Vec::new(),
            candidates: Vec::new(),
            solve_list: Vec::new(),
            members: Vec::new(),
            edges: Vec::new(),
            dense: Vec::new(),
        }
    }

    // --- configuration ------------------------------------------------------

    /// World configuration
    #[inline]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Replace the configuration
    pub fn set_config(&mut self, config: WorldConfig) -> PhysicsResult<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Change gravity; sleeping bodies stay asleep
    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.config.gravity = gravity;
    }

    // --- bodies -------------------------------------------------------------

    /// Move a body into the world
    pub fn add_body(&mut self, mut body: RigidBody) -> BodyHandle {
        body.in_world = true;
        body.active = body.is_dynamic();
        body.wake_time_stamp = self.step_count;
        body.prev_transform = body.transform;
        body.frozen = false;
        body.arbiters.clear();
        body.constraints.clear();
        body.update_inertia();

        let kind = body.kind;
        let aabb = broadphase_aabb(&body, self.config.physics.contact_distance);
        let (index, generation) = self.bodies.insert(body);
        let handle = BodyHandle::new(index, generation);
        if let Some(b) = self.bodies.at_mut(index) {
            b.handle = handle;
        }
        match kind {
            BodyKind::Static => self.static_index.add(index, &aabb),
            BodyKind::Dynamic | BodyKind::Kinematic => self.dynamic_index.add(index, &aabb),
        }
        debug!(?handle, ?kind, "body added");
        handle
    }

    /// Take a body out of the world
    ///
    /// Its constraints are removed with it and every body it touched wakes.
    pub fn remove_body(&mut self, handle: BodyHandle) -> PhysicsResult<RigidBody> {
        let body = self.body(handle)?;
        let constraints = body.constraints.clone();
        let arbiters = body.arbiters.clone();

        for c in constraints {
            self.remove_constraint(c)?;
        }
        for id in arbiters {
            if let Some(key) = self.arbiters.get(id).and_then(Arbiter::key) {
                self.wake_island(key.other(handle).index);
            }
            self.retire_arbiter(id);
        }
        self.dynamic_index.remove(handle.index);
        self.static_index.remove(handle.index);

        let mut body = self
            .bodies
            .remove(handle.index, handle.generation)
            .ok_or(PhysicsError::BodyNotFound { handle })?;
        body.in_world = false;
        body.handle = BodyHandle::default();
        body.arbiters.clear();
        body.constraints.clear();
        body.frozen = false;
        body.active = body.is_dynamic();
        debug!(?handle, "body removed");
        Ok(body)
    }

    /// Body behind a handle
    pub fn body(&self, handle: BodyHandle) -> PhysicsResult<&RigidBody> {
        self.bodies
            .get(handle.index, handle.generation)
            .ok_or(PhysicsError::BodyNotFound { handle })
    }

    fn body_mut(&mut self, handle: BodyHandle) -> PhysicsResult<&mut RigidBody> {
        self.bodies
            .get_mut(handle.index, handle.generation)
            .ok_or(PhysicsError::BodyNotFound { handle })
    }

    /// Every body with its handle
    pub fn bodies(&self) -> impl Iterator<Item = (BodyHandle, &RigidBody)> + '_ {
        self.bodies.iter().map(|(i, g, b)| (BodyHandle::new(i, g), b))
    }

    /// Number of bodies
    #[inline]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Set a body's transform
    ///
    /// Kinematic objects always accept a new transform and reach it over
    /// the next substep. Static objects and sleeping bodies are moved at
    /// once and wake what they touch. Awake dynamic bodies are driven by
    /// the simulation and refuse the write.
    pub fn set_transform(&mut self, handle: BodyHandle, transform: Transform) -> PhysicsResult<()> {
        let contact_distance = self.config.physics.contact_distance;
        let body = self
            .bodies
            .get_mut(handle.index, handle.generation)
            .ok_or(PhysicsError::BodyNotFound { handle })?;
        let mut transform = transform;
        transform.orthonormalize();
        match body.kind {
            BodyKind::Kinematic => {
                body.kinematic_target = Some(transform);
                Ok(())
            }
            BodyKind::Dynamic if body.active => Err(PhysicsError::BodyInWorld { handle }),
            BodyKind::Dynamic => {
                body.transform = transform;
                body.prev_transform = transform;
                body.update_inertia();
                self.wake_island(handle.index);
                Ok(())
            }
            BodyKind::Static => {
                body.transform = transform;
                body.prev_transform = transform;
                let aabb = broadphase_aabb(body, contact_distance);
                let neighbours: Vec<u32> = body
                    .arbiters
                    .iter()
                    .filter_map(|&id| self.arbiters.get(id).and_then(Arbiter::key))
                    .map(|k| k.other(handle).index)
                    .collect();
                self.static_index.update(handle.index, &aabb);
                for n in neighbours {
                    self.wake_island(n);
                }
                Ok(())
            }
        }
    }

    /// Set a body's linear velocity, waking it
    ///
    /// Static bodies reject the write with [`PhysicsError::StaticBody`].
    pub fn set_linear_velocity(&mut self, handle: BodyHandle, velocity: Vec3) -> PhysicsResult<()> {
        self.movable_body_mut(handle)?.linear_velocity = velocity;
        self.wake_island(handle.index);
        Ok(())
    }

    /// Set a body's angular velocity, waking it
    ///
    /// Static bodies reject the write with [`PhysicsError::StaticBody`].
    pub fn set_angular_velocity(&mut self, handle: BodyHandle, velocity: Vec3) -> PhysicsResult<()> {
        self.movable_body_mut(handle)?.angular_velocity = velocity;
        self.wake_island(handle.index);
        Ok(())
    }

    fn movable_body_mut(&mut self, handle: BodyHandle) -> PhysicsResult<&mut RigidBody> {
        let body = self.body_mut(handle)?;
        if body.is_static() {
            return Err(PhysicsError::StaticBody { handle });
        }
        Ok(body)
    }

    /// Apply an impulse at a world point, waking the body
    pub fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec3, point: Vec3) -> PhysicsResult<()> {
        self.wake(handle)?;
        let body = self.body_mut(handle)?;
        if body.is_dynamic() {
            let r = point - body.transform.origin;
            body.apply_impulse(impulse, r);
        }
        Ok(())
    }

    /// Accumulate a force for the next substep, waking the body
    pub fn apply_force(&mut self, handle: BodyHandle, force: Vec3) -> PhysicsResult<()> {
        self.wake(handle)?;
        self.body_mut(handle)?.apply_force(force);
        Ok(())
    }

    /// Change a body's friction; its arbiters recombine their material
    pub fn set_friction(&mut self, handle: BodyHandle, friction: f32) -> PhysicsResult<()> {
        let body = self.bodies.get_mut(handle.index, handle.generation).ok_or(PhysicsError::BodyNotFound { handle })?;
        body.friction = friction.max(0.0);
        for &id in &body.arbiters {
            if let Some(arb) = self.arbiters.get_mut(id) {
                arb.dirty = true;
            }
        }
        Ok(())
    }

    /// Change a body's restitution; its arbiters recombine their material
    pub fn set_restitution(&mut self, handle: BodyHandle, restitution: f32) -> PhysicsResult<()> {
        let body = self.bodies.get_mut(handle.index, handle.generation).ok_or(PhysicsError::BodyNotFound { handle })?;
        body.restitution = restitution.max(0.0);
        for &id in &body.arbiters {
            if let Some(arb) = self.arbiters.get_mut(id) {
                arb.dirty = true;
            }
        }
        Ok(())
    }

    /// Install or clear a body's contact callbacks
    pub fn set_callbacks(&mut self, handle: BodyHandle, callbacks: Option<ContactCallbacks>) -> PhysicsResult<()> {
        self.body_mut(handle)?.callbacks = callbacks;
        Ok(())
    }

    /// Wake a sleeping body and its island
    pub fn wake(&mut self, handle: BodyHandle) -> PhysicsResult<()> {
        self.body(handle)?;
        self.wake_island(handle.index);
        Ok(())
    }

    /// Wake `start` and every sleeping body connected to it
    fn wake_island(&mut self, start: u32) {
        let contact_distance = self.config.physics.contact_distance;
        let mut stack = vec![start];
        let mut woken = 0usize;
        while let Some(i) = stack.pop() {
            let Some(body) = self.bodies.at_mut(i) else { continue };
            if !body.is_sleeping() {
                continue;
            }
            body.active = true;
            body.wake_time_stamp = self.step_count;
            let aabb = broadphase_aabb(body, contact_distance);
            let handle = body.handle;
            for &id in &body.arbiters {
                if let Some(key) = self.arbiters.get(id).and_then(Arbiter::key) {
                    stack.push(key.other(handle).index);
                }
            }
            for c in &body.constraints {
                if let Some(c) = self.constraints.get(c.index, c.generation) {
                    stack.push(c.body_a.index);
                    if let Some(b) = c.body_b {
                        stack.push(b.index);
                    }
                }
            }
            self.static_index.remove(i);
            self.dynamic_index.add(i, &aabb);
            woken += 1;
        }
        if woken > 0 {
            debug!(bodies = woken, "island woken");
        }
    }

    fn put_to_sleep(&mut self, i: u32) {
        let contact_distance = self.config.physics.contact_distance;
        let Some(body) = self.bodies.at_mut(i) else { return };
        body.clear_velocities();
        body.active = false;
        let aabb = broadphase_aabb(body, contact_distance);
        self.dynamic_index.remove(i);
        self.static_index.add(i, &aabb);
    }

    // --- constraints --------------------------------------------------------

    /// Add a constraint; at least one side must be a dynamic body
    pub fn add_constraint(&mut self, mut constraint: Point2PointConstraint) -> PhysicsResult<ConstraintHandle> {
        let a_dynamic = self.body(constraint.body_a)?.is_dynamic();
        let b_dynamic = match constraint.body_b {
            Some(hb) => self.body(hb)?.is_dynamic(),
            None => false,
        };
        if !(a_dynamic || b_dynamic) {
            return Err(PhysicsError::InvalidConstraint {
                reason: "a constraint needs at least one dynamic body",
            });
        }
        constraint.accumulated_impulse = Vec3::ZERO;
        let sides = [Some(constraint.body_a), constraint.body_b];
        let (index, generation) = self.constraints.insert(constraint);
        let handle = ConstraintHandle::new(index, generation);
        for side in sides.into_iter().flatten() {
            if let Some(body) = self.bodies.get_mut(side.index, side.generation) {
                body.constraints.push(handle);
            }
            self.wake_island(side.index);
        }
        debug!(?handle, "constraint added");
        Ok(handle)
    }

    /// Remove a constraint, waking the bodies it held
    pub fn remove_constraint(&mut self, handle: ConstraintHandle) -> PhysicsResult<Point2PointConstraint> {
        let constraint = self
            .constraints
            .remove(handle.index, handle.generation)
            .ok_or(PhysicsError::ConstraintNotFound { handle })?;
        for side in [Some(constraint.body_a), constraint.body_b].into_iter().flatten() {
            if let Some(body) = self.bodies.get_mut(side.index, side.generation) {
                body.constraints.retain(|&c| c != handle);
            }
            self.wake_island(side.index);
        }
        debug!(?handle, "constraint removed");
        Ok(constraint)
    }

    /// Constraint behind a handle
    pub fn constraint(&self, handle: ConstraintHandle) -> PhysicsResult<&Point2PointConstraint> {
        self.constraints
            .get(handle.index, handle.generation)
            .ok_or(PhysicsError::ConstraintNotFound { handle })
    }

    /// Move a constraint's anchor on body A, waking the bodies it holds
    pub fn set_constraint_pivot_a(&mut self, handle: ConstraintHandle, anchor: Vec3) -> PhysicsResult<()> {
        self.edit_constraint(handle, |c| c.set_pivot_a(anchor))
    }

    /// Move a constraint's second pivot, waking the bodies it holds
    ///
    /// The pivot is local to body B, or a world point for a world anchor.
    /// Writing it every frame drags the constrained body along.
    pub fn set_constraint_pivot_b(&mut self, handle: ConstraintHandle, pivot: Vec3) -> PhysicsResult<()> {
        self.edit_constraint(handle, |c| c.set_pivot_b(pivot))
    }

    fn edit_constraint(
        &mut self,
        handle: ConstraintHandle,
        edit: impl FnOnce(&mut Point2PointConstraint),
    ) -> PhysicsResult<()> {
        let constraint = self
            .constraints
            .get_mut(handle.index, handle.generation)
            .ok_or(PhysicsError::ConstraintNotFound { handle })?;
        edit(constraint);
        let sides = [Some(constraint.body_a), constraint.body_b];
        for side in sides.into_iter().flatten() {
            self.wake_island(side.index);
        }
        Ok(())
    }

    /// Number of constraints
    #[inline]
    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    // --- arbiters and events ------------------------------------------------

    /// Live arbiters
    pub fn arbiters(&self) -> impl Iterator<Item = &Arbiter> + '_ {
        self.arbiters.iter().map(|(_, a)| a)
    }

    /// Arbiters touching a body
    pub fn arbiters_of(&self, handle: BodyHandle) -> PhysicsResult<Vec<&Arbiter>> {
        let body = self.body(handle)?;
        Ok(body.arbiters.iter().filter_map(|&id| self.arbiters.get(id)).collect())
    }

    /// Number of live arbiters
    #[inline]
    pub fn arbiter_count(&self) -> usize {
        self.arbiters.len()
    }

    /// Contact events of the last `update`
    #[inline]
    pub fn contact_events(&self) -> &[ContactEvent] {
        self.events.contact_events()
    }

    /// Timings and counters of the last `update`
    #[inline]
    pub fn performance_data(&self) -> &PerformanceData {
        &self.perf
    }

    /// Substeps run since the world was created
    #[inline]
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    fn retire_arbiter(&mut self, id: u32) {
        let Some(arb) = self.arbiters.get(id) else { return };
        let Some(key) = arb.key else { return };
        let a = self.bodies.get(key.body_a.index, key.body_a.generation);
        let b = self.bodies.get(key.body_b.index, key.body_b.generation);
        if let (Some(a), Some(b)) = (a, b) {
            let (event, other_point) = arbiter_event(arb, a, b, ContactEventType::Removed);
            self.events.report(event, other_point);
        }
        self.arbiters.retire(id);
        for h in [key.body_a, key.body_b] {
            if let Some(body) = self.bodies.get_mut(h.index, h.generation) {
                body.arbiters.retain(|&x| x != id);
            }
        }
    }

    /// Drop every arbiter, pending impact and cached impulse, and wake all bodies
    pub fn flush(&mut self) {
        self.arbiters.clear();
        self.toi_queue.clear();
        let mut sleeping = Vec::new();
        for (i, _, body) in self.bodies.iter_mut() {
            body.arbiters.clear();
            body.frozen = false;
            if body.is_sleeping() {
                sleeping.push(i);
            }
        }
        for (_, _, c) in self.constraints.iter_mut() {
            c.accumulated_impulse = Vec3::ZERO;
        }
        for i in sleeping {
            self.wake_island(i);
        }
        self.prev_dt = 0.0;
        debug!("world flushed");
    }

    // --- stepping -----------------------------------------------------------

    /// Advance the simulation by `elapsed` seconds of wall-clock time
    ///
    /// Returns the number of substeps taken.
    pub fn update(&mut self, elapsed: f32) -> u32 {
        let _span = debug_span!("update", elapsed).entered();
        let (steps, dt) = self.plan_substeps(elapsed);
        self.run(steps, dt);
        steps
    }

    /// Run exactly one substep of length `dt`
    pub fn step(&mut self, dt: f32) {
        if dt.is_finite() && dt > 0.0 {
            self.run(1, dt);
        }
    }

    /// Substep count and length for an elapsed time
    fn plan_substeps(&mut self, elapsed: f32) -> (u32, f32) {
        if !(elapsed.is_finite() && elapsed > 0.0) {
            return (0, 0.0);
        }
        let c = self.config;
        self.time_accumulator += elapsed;

        if c.variable_time_steps {
            let total = self.time_accumulator;
            if total < c.minimum_time_step {
                return (0, 0.0);
            }
            self.time_accumulator = 0.0;
            let steps = ((total / c.maximum_time_step).ceil() as u32).clamp(1, c.max_sub_steps);
            let mut dt = total / steps as f32;
            if dt > c.max_give_up_time_step {
                warn!(elapsed = total, steps, "substep too long, dropping the backlog");
                dt = c.max_give_up_time_step;
            }
            debug!(steps, dt, "variable substeps");
            (steps, dt)
        } else {
            // tolerate rounding so that two half steps make one
            let mut steps = (self.time_accumulator / c.fixed_time_step + 1e-4).floor() as u32;
            if steps > c.max_sub_steps {
                warn!(
                    backlog = self.time_accumulator,
                    steps = c.max_sub_steps,
                    "giving up on sub-stepping, dropping the backlog"
                );
                steps = c.max_sub_steps;
                self.time_accumulator = 0.0;
            } else {
                self.time_accumulator = (self.time_accumulator - steps as f32 * c.fixed_time_step).max(0.0);
            }
            (steps, c.fixed_time_step)
        }
    }

    fn run(&mut self, steps: u32, dt: f32) {
        self.perf.begin_frame();
        self.events.begin_frame();
        for _ in 0..steps {
            self.substep(dt);
            self.dispatch_events();
        }

        let stats = &mut self.perf.stats;
        stats.substeps = steps;
        stats.arbiters = self.arbiters.len() as u32;
        stats.contacts = self.arbiters.contact_count() as u32;
        stats.constraints = self.constraints.len() as u32;
        stats.active_bodies = 0;
        stats.static_bodies = 0;
        for (_, _, body) in self.bodies.iter() {
            if body.is_awake_dynamic() {
                stats.active_bodies += 1;
            } else if body.is_static() || body.is_sleeping() {
                stats.static_bodies += 1;
            }
        }
        self.perf.end_frame();
    }

    fn substep(&mut self, dt: f32) {
        self.step_count += 1;
        let ctx = StepContext::new(dt, self.prev_dt);

        for (_, _, body) in self.bodies.iter_mut() {
            if body.is_kinematic() {
                body.prepare_kinematic(dt);
            }
        }

        // 1-2. Broad phase
        let start = Instant::now();
        self.broadphase();
        let broad_done = Instant::now();
        self.perf.record(Stage::Broadphase, broad_done - start);

        // 3. Narrow phase and arbiters
        self.narrowphase();
        let discrete_done = Instant::now();
        self.perf.record(Stage::Narrowphase, discrete_done - broad_done);
        self.perf.record(Stage::Discrete, discrete_done - start);

        // 4. Islands and sleep
        let t = Instant::now();
        self.compute_sleep();
        self.perf.record(Stage::SleepComputation, t.elapsed());

        // 5. PreStep
        let t = Instant::now();
        self.pre_step(&ctx);
        self.perf.record(Stage::PreStep, t.elapsed());

        // 6. Velocity integration
        let t = Instant::now();
        let gravity = self.config.gravity;
        for (_, _, body) in self.bodies.iter_mut() {
            body.integrate_velocity(gravity, dt);
        }
        self.perf.record(Stage::PhysicsIntegration, t.elapsed());

        // 7-9. Warm start, velocity iterations, bias passes
        let t = Instant::now();
        self.solve();
        self.perf.record(Stage::Solver, t.elapsed());

        // 10. Position integration
        let t = Instant::now();
        for (_, _, body) in self.bodies.iter_mut() {
            body.integrate_position(dt);
        }
        self.perf.record(Stage::PhysicsIntegration, t.elapsed());
        self.report_processed();

        // 11. Continuous collision
        let t = Instant::now();
        let resolved = self.continuous();
        self.perf.record(Stage::Continuous, t.elapsed());
        self.perf.stats.toi_events += resolved;

        self.prev_dt = dt;
    }

    fn broadphase(&mut self) {
        let contact_distance = self.config.physics.contact_distance;
        for (i, _, body) in self.bodies.iter() {
            if body.is_awake_dynamic() || body.is_kinematic() {
                self.dynamic_index.update(i, &broadphase_aabb(body, contact_distance));
            }
        }
        self.dynamic_index.finalize();
        self.static_index.finalize();

        self.pairs.clear();
        self.dynamic_index.overlapping_pairs(&mut self.pairs);
        for (i, _, body) in self.bodies.iter() {
            if !body.is_awake() {
                continue;
            }
            self.nodes.clear();
            self.static_index
                .overlapping_nodes(&broadphase_aabb(body, contact_distance), &mut self.nodes);
            self.pairs.extend(self.nodes.iter().map(|&j| (i, j)));
        }

        let bodies = &self.bodies;
        self.pairs.retain(|&(i, j)| {
            let (Some(a), Some(b)) = (bodies.at(i), bodies.at(j)) else {
                return false;
            };
            i != j
                && (a.is_dynamic() || b.is_dynamic())
                && (a.is_awake() || b.is_awake())
                && CollisionFilter::can_collide(&a.filter, &b.filter)
        });
        self.perf.stats.broadphase_pairs = self.pairs.len() as u32;
    }

    fn narrowphase(&mut self) {
        let config = self.config.physics;
        let step = self.step_count;
        let mut created = Vec::new();
        {
            let Self {
                bodies,
                arbiters,
                pairs,
                candidates,
                events,
                ..
            } = self;
            for &(i, j) in pairs.iter() {
                let (Some(a), Some(b)) = (bodies.at(i), bodies.at(j)) else { continue };
                let (key, swapped) = ArbiterKey::new(a.handle, a.shape.id(), b.handle, b.shape.id());
                let (a, b) = if swapped { (b, a) } else { (a, b) };

                let existing = arbiters.find(&key);
                if let Some(arb) = existing.and_then(|id| arbiters.get_mut(id)) {
                    arb.last_seen = step;
                    if arb.skip_discrete {
                        // the impact contact inserted last substep stands in for this query
                        arb.skip_discrete = false;
                        arb.refresh_contacts(&a.transform, &b.transform, &config);
                        continue;
                    }
                }

                candidates.clear();
                collide(&a.shape, &a.transform, &b.shape, &b.transform, &config, candidates);
                let id = match existing {
                    Some(id) => id,
                    None if candidates.is_empty() => continue,
                    None => {
                        let (id, _) = arbiters.find_or_create(key);
                        created.push(id);
                        id
                    }
                };
                let Some(arb) = arbiters.get_mut(id) else { continue };
                arb.last_seen = step;
                arb.trigger = a.is_trigger() || b.is_trigger();
                arb.refresh_contacts(&a.transform, &b.transform, &config);
                let mut added = false;
                for c in candidates.iter() {
                    added |= arb.insert_contact(&a.transform, &b.transform, c, &config);
                }
                if added {
                    let (event, other_point) = arbiter_event(arb, a, b, ContactEventType::Added);
                    events.report(event, other_point);
                }
            }
        }
        for &id in &created {
            self.link_arbiter(id);
        }

        // retire stale arbiters, wake sleepers touched by awake bodies
        let mut stale = Vec::new();
        let mut to_wake = Vec::new();
        let mut restless = Vec::new();
        for (id, arb) in self.arbiters.iter() {
            let Some(key) = arb.key else { continue };
            let a = self.bodies.get(key.body_a.index, key.body_a.generation);
            let b = self.bodies.get(key.body_b.index, key.body_b.generation);
            let (Some(a), Some(b)) = (a, b) else {
                stale.push(id);
                continue;
            };
            let awake = a.is_awake() || b.is_awake();
            if arb.contact_count() == 0 || (awake && arb.last_seen != step) {
                stale.push(id);
                continue;
            }
            if arb.trigger {
                continue;
            }
            for (x, y, yi) in [(a, b, key.body_b.index), (b, a, key.body_a.index)] {
                if x.is_awake() && y.is_sleeping() {
                    to_wake.push(yi);
                }
                if x.is_moving_kinematic() && y.is_dynamic() {
                    restless.push(yi);
                }
            }
        }
        if !stale.is_empty() || !created.is_empty() {
            debug!(created = created.len(), retired = stale.len(), "arbiters updated");
        }
        for id in stale {
            self.retire_arbiter(id);
        }
        for i in to_wake {
            self.wake_island(i);
        }
        for i in restless {
            if let Some(body) = self.bodies.at_mut(i) {
                body.wake_time_stamp = step;
            }
        }
    }

    /// Record a new arbiter on both of its bodies
    fn link_arbiter(&mut self, id: u32) {
        let Some(key) = self.arbiters.get(id).and_then(Arbiter::key) else { return };
        for h in [key.body_a, key.body_b] {
            if let Some(body) = self.bodies.get_mut(h.index, h.generation) {
                body.arbiters.push(id);
            }
        }
    }

    fn compute_sleep(&mut self) {
        let config = self.config.physics;
        let step = self.step_count;

        // a constraint to an awake body keeps its partner awake
        let mut to_wake = Vec::new();
        for (_, _, c) in self.constraints.iter() {
            let Some(hb) = c.body_b else { continue };
            let (Some(a), Some(b)) = (self.bodies.at(c.body_a.index), self.bodies.at(hb.index)) else {
                continue;
            };
            if a.is_awake() && b.is_sleeping() {
                to_wake.push(hb.index);
            } else if b.is_awake() && a.is_sleeping() {
                to_wake.push(c.body_a.index);
            }
        }
        for i in to_wake {
            self.wake_island(i);
        }

        self.members.clear();
        self.dense.clear();
        self.dense.resize(self.bodies.slot_count(), u32::MAX);
        for (i, _, body) in self.bodies.iter_mut() {
            if !body.is_awake_dynamic() {
                continue;
            }
            let at_rest = body.at_rest(config.sleep_linear_sq, config.sleep_angular_sq);
            if !at_rest {
                body.wake_time_stamp = step;
            }
            self.dense[i as usize] = self.members.len() as u32;
            self.members.push(IslandMember {
                body: i,
                at_rest,
                permit_sleep: body.permit_sleep,
                wake_time_stamp: body.wake_time_stamp,
                sleep: false,
            });
        }

        self.edges.clear();
        let dense = &self.dense;
        let node = |h: BodyHandle| dense.get(h.index as usize).copied().filter(|&d| d != u32::MAX);
        for (_, arb) in self.arbiters.iter() {
            if arb.trigger || arb.contact_count() == 0 {
                continue;
            }
            let Some(key) = arb.key else { continue };
            if let (Some(a), Some(b)) = (node(key.body_a), node(key.body_b)) {
                self.edges.push((a, b));
            }
        }
        for (_, _, c) in self.constraints.iter() {
            if let (Some(a), Some(b)) = (node(c.body_a), c.body_b.and_then(node)) {
                self.edges.push((a, b));
            }
        }

        let built = self
            .islands
            .compute(&mut self.members, &self.edges, step, config.sleep_delay_steps);
        self.perf.stats.islands = built as u32;

        let mut asleep = Vec::new();
        for m in &self.members {
            if let Some(body) = self.bodies.at_mut(m.body) {
                body.wake_time_stamp = m.wake_time_stamp;
                if m.sleep {
                    asleep.push(m.body);
                }
            }
        }
        if !asleep.is_empty() {
            debug!(
                islands = self.islands.sleeping_islands(),
                bodies = asleep.len(),
                "islands fell asleep"
            );
        }
        for i in asleep {
            self.put_to_sleep(i);
        }
    }

    fn pre_step(&mut self, ctx: &StepContext) {
        let config = self.config.physics;
        let Self {
            bodies,
            arbiters,
            constraints,
            solve_list,
            events,
            ..
        } = self;

        solve_list.clear();
        solve_list.extend(arbiters.ids());
        solve_list.retain(|&id| {
            let Some(arb) = arbiters.get_mut(id) else { return false };
            let Some(key) = arb.key else { return false };
            let Some((a, b)) = bodies.pair_mut(key.body_a.index, key.body_b.index) else {
                return false;
            };
            arb.update_material(a, b);
            arb.active = !arb.trigger && arb.contact_count() > 0 && (a.is_awake_dynamic() || b.is_awake_dynamic());
            if !arb.active {
                return false;
            }
            if arb.is_touching() {
                let (event, other_point) = arbiter_event(arb, a, b, ContactEventType::PreSolve);
                events.report(event, other_point);
            }
            arb.pre_step(a, b, ctx, &config);
            true
        });

        for (_, _, c) in constraints.iter_mut() {
            if !constraint_awake(bodies, c) {
                continue;
            }
            let Some(a) = bodies.at(c.body_a.index) else { continue };
            let b = c.body_b.and_then(|h| bodies.at(h.index));
            c.pre_step(a, b, ctx.inv_dt, ctx.dt_ratio);
        }
    }

    fn solve(&mut self) {
        let Self {
            bodies,
            arbiters,
            constraints,
            solve_list,
            config,
            ..
        } = self;

        for &id in solve_list.iter() {
            let Some(arb) = arbiters.get(id) else { continue };
            let Some(key) = arb.key else { continue };
            if let Some((a, b)) = bodies.pair_mut(key.body_a.index, key.body_b.index) {
                arb.warm_start(a, b);
            }
        }
        for (_, _, c) in constraints.iter() {
            if constraint_awake(bodies, c) {
                if let Some((a, b)) = constraint_bodies(bodies, c) {
                    c.warm_start(a, b);
                }
            }
        }

        for _ in 0..config.velocity_iterations {
            for (_, _, c) in constraints.iter_mut() {
                if constraint_awake(bodies, c) {
                    if let Some((a, b)) = constraint_bodies(bodies, c) {
                        c.solve(a, b);
                    }
                }
            }
            for &id in solve_list.iter() {
                let Some(arb) = arbiters.get_mut(id) else { continue };
                let Some(key) = arb.key else { continue };
                if let Some((a, b)) = bodies.pair_mut(key.body_a.index, key.body_b.index) {
                    arb.solve_velocity(a, b);
                }
            }
        }

        for _ in 0..config.position_iterations {
            for &id in solve_list.iter() {
                let Some(arb) = arbiters.get_mut(id) else { continue };
                let Some(key) = arb.key else { continue };
                if let Some((a, b)) = bodies.pair_mut(key.body_a.index, key.body_b.index) {
                    arb.solve_bias(a, b);
                }
            }
        }
    }

    fn report_processed(&mut self) {
        for &id in &self.solve_list {
            let Some(arb) = self.arbiters.get(id) else { continue };
            if !arb.is_touching() {
                continue;
            }
            let Some(key) = arb.key else { continue };
            if let (Some(a), Some(b)) = (self.bodies.at(key.body_a.index), self.bodies.at(key.body_b.index)) {
                let (event, other_point) = arbiter_event(arb, a, b, ContactEventType::Processed);
                self.events.report(event, other_point);
            }
        }
    }

    /// Sweep bullets and resolve impacts in time order; returns events resolved
    fn continuous(&mut self) -> u32 {
        let config = self.config.physics;
        self.toi_queue.clear();

        let mut sweepers: Vec<(u32, Motion, AABB)> = Vec::new();
        for (i, _, body) in self.bodies.iter_mut() {
            body.frozen = false;
            if !(body.is_awake_dynamic() || body.is_kinematic()) {
                continue;
            }
            let motion = motion_of(body);
            let sweep = if body.is_kinematic() {
                motion.is_moving()
            } else {
                motion.is_bullet(&config)
            };
            if sweep {
                let bounds = motion.swept_aabb(&body.shape).expanded(config.continuous_slop);
                sweepers.push((i, motion, bounds));
            }
        }
        if sweepers.is_empty() {
            return 0;
        }

        for (k, (i, mi, bounds)) in sweepers.iter().enumerate() {
            self.nodes.clear();
            self.dynamic_index.overlapping_nodes(bounds, &mut self.nodes);
            self.static_index.overlapping_nodes(bounds, &mut self.nodes);
            for &j in &self.nodes {
                if j == *i || sweepers.iter().any(|s| s.0 == j) {
                    continue;
                }
                let Some(other) = self.bodies.at(j) else { continue };
                let mj = motion_of(other);
                sweep_pair(&self.bodies, &config, &mut self.toi_queue, (*i, mi), (j, &mj));
            }
            for (j, mj, other_bounds) in &sweepers[k + 1..] {
                if bounds.intersects(other_bounds) {
                    sweep_pair(&self.bodies, &config, &mut self.toi_queue, (*i, mi), (*j, mj));
                }
            }
        }

        let mut resolved = 0;
        let mut frozen_now = Vec::new();
        while let Some(event) = self.toi_queue.pop_earliest() {
            resolved += 1;
            frozen_now.clear();
            for p in [event.body_a, event.body_b] {
                let Some(body) = self.bodies.at_mut(p) else { continue };
                if body.is_awake_dynamic() && !body.frozen {
                    body.transform = motion_of(body).at(event.toi);
                    body.update_inertia();
                    body.frozen = true;
                    frozen_now.push(p);
                }
            }
            self.insert_toi_contact(&event);
            trace!(
                toi = event.toi,
                body_a = event.body_a,
                body_b = event.body_b,
                "time of impact resolved"
            );

            for &f in &frozen_now {
                for stale in self.toi_queue.take_involving(f) {
                    let (Some(a), Some(b)) = (self.bodies.at(stale.body_a), self.bodies.at(stale.body_b)) else {
                        continue;
                    };
                    let (ma, mb) = (motion_of(a), motion_of(b));
                    if !(ma.is_moving() || mb.is_moving()) {
                        continue;
                    }
                    if let Some(hit) = shape_time_of_impact(&a.shape, &ma, &b.shape, &mb, &config) {
                        if hit.toi < 1.0 {
                            let mut next = ToiEvent::from_hit(stale.body_a, stale.body_b, &hit);
                            next.toi = hit.toi.max(event.toi);
                            next.frozen_a = a.frozen;
                            next.frozen_b = b.frozen;
                            self.toi_queue.push(next);
                        }
                    }
                }
            }
        }
        resolved
    }

    /// Store a predicted impact in the pair's arbiter
    fn insert_toi_contact(&mut self, event: &ToiEvent) {
        let config = self.config.physics;
        let step = self.step_count;
        let created = {
            let (Some(a), Some(b)) = (self.bodies.at(event.body_a), self.bodies.at(event.body_b)) else {
                return;
            };
            let (key, _) = ArbiterKey::new(a.handle, a.shape.id(), b.handle, b.shape.id());
            let (id, created) = self.arbiters.find_or_create(key);
            let Some(arb) = self.arbiters.get_mut(id) else { return };
            arb.last_seen = step;
            arb.skip_discrete = true;
            if arb.insert_contact(&a.transform, &b.transform, &event.candidate(), &config) {
                let (e, other_point) = arbiter_event(arb, a, b, ContactEventType::Added);
                self.events.report(e, other_point);
            }
            created.then_some(id)
        };
        if let Some(id) = created {
            self.link_arbiter(id);
        }
    }

    /// Hand the queued events of the substep to the body callbacks
    fn dispatch_events(&mut self) {
        let pending = self.events.take_pending();
        for p in &pending {
            let flipped = p.event.flipped(p.point_on_other);
            for e in [&p.event, &flipped] {
                if let Some(body) = self.bodies.get_mut(e.body.index, e.body.generation) {
                    if let Some(callbacks) = body.callbacks.as_mut() {
                        callbacks.dispatch(e);
                    }
                }
            }
        }
        self.events.recycle(pending);
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

    fn ball() -> Arc<Shape> {
        Arc::new(Shape::sphere(0.5).unwrap())
    }

    fn ground() -> RigidBody {
        RigidBody::new_static(Arc::new(Shape::plane(Vec3::Y, 0.0).unwrap()))
    }

    fn world() -> PhysicsWorld {
        PhysicsWorld::default()
    }

    #[test]
    fn test_fixed_substeps_accumulate() {
        let mut w = world();
        assert_eq!(w.update(1.0 / 120.0), 0);
        assert_eq!(w.update(1.0 / 120.0), 1);
        assert_eq!(w.update(1.0 / 30.0), 2);
        assert_eq!(w.step_count(), 3);
    }

    #[test]
    fn test_fixed_substeps_give_up() {
        let mut w = world();
        // 1 s is sixty substeps, far beyond the cap of ten
        assert_eq!(w.update(1.0), 10);
        assert_eq!(w.update(0.0), 0);
        assert_eq!(w.time_accumulator, 0.0);
    }

    #[test]
    fn test_variable_substeps() {
        let config = WorldConfig {
            variable_time_steps: true,
            ..WorldConfig::default()
        };
        let mut w: PhysicsWorld = PhysicsWorld::new(config).unwrap();
        assert_eq!(w.update(0.001), 0);
        // 0.05 s at a maximum of 0.02 s per substep
        assert_eq!(w.update(0.049), 3);
        let (steps, dt) = w.plan_substeps(10.0);
        assert_eq!(steps, 10);
        assert_abs_diff_eq!(dt, config.max_give_up_time_step);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = WorldConfig {
            max_sub_steps: 0,
            ..WorldConfig::default()
        };
        assert!(PhysicsWorld::<DynamicAabbTree>::new(config).is_err());
    }

    #[test]
    fn test_add_remove_body() {
        let mut w = world();
        let h = w.add_body(RigidBody::new_dynamic(ball(), 1.0).unwrap());
        assert!(w.body(h).unwrap().in_world());
        assert!(w.dynamic_index.contains(h.index()));
        let b = w.remove_body(h).unwrap();
        assert!(!b.in_world());
        assert!(w.body(h).is_err());
        assert!(!w.dynamic_index.contains(h.index()));
        assert!(matches!(w.remove_body(h), Err(PhysicsError::BodyNotFound { .. })));
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut w = world();
        let h = w.add_body(RigidBody::new_dynamic(ball(), 1.0).unwrap());
        w.remove_body(h).unwrap();
        let h2 = w.add_body(RigidBody::new_dynamic(ball(), 1.0).unwrap());
        assert_eq!(h.index(), h2.index());
        assert!(w.body(h).is_err());
        assert!(w.body(h2).is_ok());
    }

    #[test]
    fn test_ball_rests_on_ground() {
        let mut w = world();
        w.add_body(ground());
        let h = w.add_body(RigidBody::new_dynamic(ball(), 1.0).unwrap().with_position(Vec3::new(0.0, 2.0, 0.0)));
        for _ in 0..180 {
            w.step(1.0 / 60.0);
        }
        let y = w.body(h).unwrap().position().y;
        assert!(y > 0.5 - 0.05 && y < 0.55, "ball at {y}");
        assert_eq!(w.arbiter_count(), 1);
    }

    #[test]
    fn test_set_transform_rules() {
        let mut w = world();
        let g = w.add_body(ground());
        let k = w.add_body(RigidBody::new_kinematic(ball()));
        let d = w.add_body(RigidBody::new_dynamic(ball(), 1.0).unwrap().with_position(Vec3::new(5.0, 0.5, 0.0)));

        let t = Transform::from_translation(Vec3::new(0.0, 3.0, 0.0));
        assert!(w.set_transform(k, t).is_ok());
        assert!(w.set_transform(g, Transform::IDENTITY).is_ok());
        assert!(matches!(w.set_transform(d, t), Err(PhysicsError::BodyInWorld { .. })));

        w.step(1.0 / 60.0);
        assert!(w.body(k).unwrap().position().abs_diff_eq(t.origin, 1e-5));
    }

    #[test]
    fn test_sleeping_body_wakes_on_write() {
        let mut w = world();
        w.add_body(ground());
        let h = w.add_body(RigidBody::new_dynamic(ball(), 1.0).unwrap().with_position(Vec3::new(0.0, 0.5, 0.0)));
        for _ in 0..120 {
            w.step(1.0 / 60.0);
        }
        assert!(w.body(h).unwrap().is_sleeping());
        assert!(w.static_index.contains(h.index()));

        w.set_linear_velocity(h, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let b = w.body(h).unwrap();
        assert!(b.is_active());
        assert!(w.dynamic_index.contains(h.index()));
    }

    #[test]
    fn test_static_body_rejects_velocity() {
        let mut w = world();
        let g = w.add_body(ground());
        assert!(matches!(
            w.set_linear_velocity(g, Vec3::X),
            Err(PhysicsError::StaticBody { handle }) if handle == g
        ));
        assert!(matches!(w.set_angular_velocity(g, Vec3::Y), Err(PhysicsError::StaticBody { .. })));
        let b = w.body(g).unwrap();
        assert_eq!(b.linear_velocity(), Vec3::ZERO);
        assert_eq!(b.angular_velocity(), Vec3::ZERO);

        let k = w.add_body(RigidBody::new_kinematic(ball()));
        w.set_linear_velocity(k, Vec3::X).unwrap();
    }

    #[test]
    fn test_friction_change_marks_arbiters_dirty() {
        let mut w = world();
        w.add_body(ground());
        let h = w.add_body(RigidBody::new_dynamic(ball(), 1.0).unwrap().with_position(Vec3::new(0.0, 0.5, 0.0)));
        w.step(1.0 / 60.0);
        w.set_friction(h, 0.9).unwrap();
        assert!(w.arbiters().all(|a| a.dirty));
        w.step(1.0 / 60.0);
        let arb = w.arbiters().next().unwrap();
        assert_abs_diff_eq!(arb.friction(), (0.9f32 * 0.5).sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_constraint_validation() {
        let mut w = world();
        let g = w.add_body(ground());
        let k = w.add_body(RigidBody::new_kinematic(ball()));
        let c = Point2PointConstraint::new(g, k, Vec3::ZERO, Vec3::ZERO).unwrap();
        assert!(matches!(w.add_constraint(c), Err(PhysicsError::InvalidConstraint { .. })));

        let d = w.add_body(RigidBody::new_dynamic(ball(), 1.0).unwrap());
        let c = Point2PointConstraint::new_world_anchor(d, Vec3::Y, Vec3::new(0.0, 1.0, 0.0));
        let ch = w.add_constraint(c).unwrap();
        assert_eq!(w.body(d).unwrap().constraints(), &[ch]);
        w.remove_body(d).unwrap();
        assert_eq!(w.constraint_count(), 0);
        assert!(w.constraint(ch).is_err());
    }

    #[test]
    fn test_flush_clears_contacts() {
        let mut w = world();
        w.add_body(ground());
        let h = w.add_body(RigidBody::new_dynamic(ball(), 1.0).unwrap().with_position(Vec3::new(0.0, 0.5, 0.0)));
        for _ in 0..120 {
            w.step(1.0 / 60.0);
        }
        w.flush();
        assert_eq!(w.arbiter_count(), 0);
        assert_eq!(w.body(h).unwrap().arbiter_count(), 0);
        assert!(w.body(h).unwrap().is_active());
    }

    #[test]
    fn test_filtered_pair_never_collides() {
        let mut w = world();
        w.add_body(ground().with_filter(CollisionFilter::new(crate::filter::groups::STATIC, 0)));
        let h = w.add_body(RigidBody::new_dynamic(ball(), 1.0).unwrap().with_position(Vec3::new(0.0, 1.0, 0.0)));
        for _ in 0..60 {
            w.step(1.0 / 60.0);
        }
        assert!(w.body(h).unwrap().position().y < 0.0);
        assert_eq!(w.arbiter_count(), 0);
    }

    #[test]
    fn test_performance_counters() {
        let mut w = world();
        w.add_body(ground());
        w.add_body(RigidBody::new_dynamic(ball(), 1.0).unwrap().with_position(Vec3::new(0.0, 0.5, 0.0)));
        w.update(2.0 / 60.0 + 1e-4);
        let stats = w.performance_data().stats;
        assert_eq!(stats.substeps, 2);
        assert_eq!(stats.active_bodies, 1);
        assert_eq!(stats.static_bodies, 1);
        assert_eq!(stats.arbiters, 1);
        assert!(stats.contacts >= 1);
    }

    #[test]
    fn test_box_settles_and_sleeps() {
        let mut w = world();
        w.add_body(ground());
        let cube = Arc::new(Shape::cuboid(Vec3::splat(0.5), 0.04).unwrap());
        let h = w.add_body(RigidBody::new_dynamic(cube, 1.0).unwrap().with_position(Vec3::new(0.0, 1.0, 0.0)));
        for _ in 0..300 {
            w.step(1.0 / 60.0);
        }
        let b = w.body(h).unwrap();
        assert!((b.position().y - 0.5).abs() < 0.06, "box at {}", b.position().y);
        assert!(b.is_sleeping());
        w.update(1.0 / 60.0);
        assert_eq!(w.performance_data().stats.active_bodies, 0);
    }

    #[test]
    fn test_fast_spheres_do_not_tunnel() {
        let config = WorldConfig {
            gravity: Vec3::ZERO,
            ..WorldConfig::default()
        };
        let mut w: PhysicsWorld = PhysicsWorld::new(config).unwrap();
        let a = w.add_body(
            RigidBody::new_dynamic(ball(), 1.0)
                .unwrap()
                .with_position(Vec3::new(-2.0, 0.0, 0.0))
                .with_linear_velocity(Vec3::new(300.0, 0.0, 0.0)),
        );
        let b = w.add_body(
            RigidBody::new_dynamic(ball(), 1.0)
                .unwrap()
                .with_position(Vec3::new(2.0, 0.0, 0.0))
                .with_linear_velocity(Vec3::new(-300.0, 0.0, 0.0)),
        );
        w.step(1.0 / 60.0);
        let (xa, xb) = (w.body(a).unwrap().position().x, w.body(b).unwrap().position().x);
        assert!(xa < xb, "spheres passed each other: {xa} {xb}");
        assert!(xb - xa > 0.9, "spheres interpenetrate: {xa} {xb}");
        assert_eq!(w.arbiter_count(), 1);

        for _ in 0..10 {
            w.step(1.0 / 60.0);
        }
        assert!(w.body(a).unwrap().position().x < w.body(b).unwrap().position().x);
    }

    #[test]
    fn test_callbacks_fire() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let added = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));
        let (a2, p2, r2) = (added.clone(), processed.clone(), removed.clone());
        let callbacks = ContactCallbacks::new(crate::filter::groups::ALL)
            .with_added(move |_| {
                a2.fetch_add(1, Ordering::Relaxed);
            })
            .with_processed(move |_| {
                p2.fetch_add(1, Ordering::Relaxed);
            })
            .with_removed(move |e| {
                assert_eq!(e.event_type, ContactEventType::Removed);
                r2.fetch_add(1, Ordering::Relaxed);
            });

        let mut w = world();
        let g = w.add_body(ground());
        let h = w.add_body(
            RigidBody::new_dynamic(ball(), 1.0)
                .unwrap()
                .with_position(Vec3::new(0.0, 1.0, 0.0))
                .with_callbacks(callbacks),
        );
        for _ in 0..30 {
            w.step(1.0 / 60.0);
        }
        assert!(added.load(Ordering::Relaxed) >= 1);
        assert!(processed.load(Ordering::Relaxed) >= 1);

        let before = removed.load(Ordering::Relaxed);
        w.remove_body(g).unwrap();
        w.step(1.0 / 60.0);
        assert_eq!(removed.load(Ordering::Relaxed), before + 1);
        assert_eq!(w.body(h).unwrap().arbiter_count(), 0);
    }

    #[test]
    fn test_point_constraint_holds_pendulum() {
        let mut w = world();
        let d = w.add_body(
            RigidBody::new_dynamic(ball(), 1.0)
                .unwrap()
                .with_position(Vec3::new(0.0, 1.0, 0.0))
                .with_linear_velocity(Vec3::new(2.0, 0.0, 0.0)),
        );
        let pivot = Vec3::new(0.0, 2.0, 0.0);
        let ch = w
            .add_constraint(Point2PointConstraint::new_world_anchor(d, Vec3::Y, pivot))
            .unwrap();
        for _ in 0..120 {
            w.step(1.0 / 60.0);
        }
        let body = w.body(d).unwrap();
        let error = w.constraint(ch).unwrap().error(body, None);
        assert!(error < 0.05, "joint drifted by {error}");
        assert!(body.position().distance(pivot) < 1.05);
    }

    #[test]
    fn test_body_follows_moving_pivot() {
        let config = WorldConfig {
            gravity: Vec3::ZERO,
            ..WorldConfig::default()
        };
        let mut w: PhysicsWorld = PhysicsWorld::new(config).unwrap();
        let d = w.add_body(RigidBody::new_dynamic(ball(), 1.0).unwrap());
        let ch = w
            .add_constraint(Point2PointConstraint::new_world_anchor(d, Vec3::ZERO, Vec3::ZERO))
            .unwrap();
        for _ in 0..120 {
            w.step(1.0 / 60.0);
        }
        assert!(w.body(d).unwrap().is_sleeping());

        w.set_constraint_pivot_b(ch, Vec3::new(1.0 / 60.0, 0.0, 0.0)).unwrap();
        assert!(w.body(d).unwrap().is_active());
        for i in 1..=60 {
            w.set_constraint_pivot_b(ch, Vec3::new(i as f32 / 60.0, 0.0, 0.0)).unwrap();
            w.step(1.0 / 60.0);
            let error = w.constraint(ch).unwrap().error(w.body(d).unwrap(), None);
            assert!(error < 0.08, "lagging {error} behind the pivot");
        }
        for _ in 0..60 {
            w.step(1.0 / 60.0);
        }
        let p = w.body(d).unwrap().position();
        assert!(p.abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 0.01), "ended at {p}");

        let stale = ConstraintHandle::new(ch.index(), 99);
        assert!(w.set_constraint_pivot_b(stale, Vec3::ZERO).is_err());
    }
}
