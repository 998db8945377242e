//! Rigid Bodies and Collision Objects
//!
//! Dynamic rigid bodies and static/kinematic collision objects share one
//! [`RigidBody`] struct, distinguished by [`BodyKind`]. Static and kinematic
//! objects have zero inverse mass and inertia. Bodies are built outside the
//! world and moved into it by `PhysicsWorld::add_body`, which hands back a
//! generational [`BodyHandle`].

use std::sync::Arc;

use glam::{Mat3, Quat, Vec3};

use crate::collider::Shape;
use crate::error::{PhysicsError, PhysicsResult};
use crate::event::ContactCallbacks;
use crate::filter::CollisionFilter;
use crate::joint::ConstraintHandle;
use crate::math::Transform;

// ============================================================================
// Handles
// ============================================================================

/// Generational handle to a body inside a world
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BodyHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl BodyHandle {
    /// Build a handle from raw parts
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index; smaller indices become arbiter side A
    #[inline]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation
    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

// ============================================================================
// Body Kind
// ============================================================================

/// Type of rigid body
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BodyKind {
    /// Moved by physics (gravity, constraints, impulses)
    Dynamic,
    /// Never moves on its own
    Static,
    /// Moved by user code, pushes dynamic bodies but is not affected by them
    Kinematic,
}

// ============================================================================
// Rigid Body
// ============================================================================

/// Rigid body / collision object state
#[derive(Debug)]
pub struct RigidBody {
    pub(crate) shape: Arc<Shape>,
    pub(crate) kind: BodyKind,
    pub(crate) transform: Transform,
    /// Transform at the start of the running substep
    pub(crate) prev_transform: Transform,
    pub(crate) linear_velocity: Vec3,
    pub(crate) angular_velocity: Vec3,
    /// Split-impulse velocities, cleared after every position integration
    pub(crate) bias_linear_velocity: Vec3,
    pub(crate) bias_angular_velocity: Vec3,
    pub(crate) force: Vec3,
    pub(crate) torque: Vec3,
    pub(crate) mass: f32,
    pub(crate) inv_mass: f32,
    pub(crate) local_inv_inertia: Vec3,
    pub(crate) world_inv_inertia: Mat3,
    pub(crate) linear_damping: f32,
    pub(crate) angular_damping: f32,
    pub(crate) friction: f32,
    pub(crate) restitution: f32,
    pub(crate) filter: CollisionFilter,
    pub(crate) trigger: bool,
    pub(crate) active: bool,
    pub(crate) permit_sleep: bool,
    /// Step at which the body last failed the rest test
    pub(crate) wake_time_stamp: u64,
    pub(crate) kinematic_target: Option<Transform>,
    pub(crate) arbiters: Vec<u32>,
    pub(crate) constraints: Vec<ConstraintHandle>,
    pub(crate) callbacks: Option<ContactCallbacks>,
    pub(crate) handle: BodyHandle,
    pub(crate) in_world: bool,
    /// Position already fixed by a time-of-impact event this substep
    pub(crate) frozen: bool,
    pub(crate) user_data: u64,
}

impl RigidBody {
    fn with_kind(shape: Arc<Shape>, kind: BodyKind) -> Self {
        Self {
            shape,
            kind,
            transform: Transform::IDENTITY,
            prev_transform: Transform::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            bias_linear_velocity: Vec3::ZERO,
            bias_angular_velocity: Vec3::ZERO,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            mass: 0.0,
            inv_mass: 0.0,
            local_inv_inertia: Vec3::ZERO,
            world_inv_inertia: Mat3::ZERO,
            linear_damping: 0.0,
            angular_damping: 0.0,
            friction: 0.5,
            restitution: 0.0,
            filter: CollisionFilter::for_kind(kind),
            trigger: false,
            active: kind == BodyKind::Dynamic,
            permit_sleep: true,
            wake_time_stamp: 0,
            kinematic_target: None,
            arbiters: Vec::new(),
            constraints: Vec::new(),
            callbacks: None,
            handle: BodyHandle::default(),
            in_world: false,
            frozen: false,
            user_data: 0,
        }
    }

    /// Create a dynamic rigid body
    ///
    /// Planes and triangle meshes cannot be dynamic.
    pub fn new_dynamic(shape: Arc<Shape>, mass: f32) -> PhysicsResult<Self> {
        if !(mass > 0.0 && mass.is_finite()) {
            return Err(PhysicsError::InvalidMass { mass });
        }
        if shape.is_static_only() {
            return Err(PhysicsError::InvalidShape {
                reason: "planes and triangle meshes cannot be dynamic",
            });
        }
        let mut body = Self::with_kind(shape, BodyKind::Dynamic);
        body.mass = mass;
        body.inv_mass = 1.0 / mass;
        let inertia = body.shape.inertia() * mass;
        body.local_inv_inertia = Vec3::select(inertia.cmpgt(Vec3::ZERO), inertia.recip(), Vec3::ZERO);
        body.update_inertia();
        Ok(body)
    }

    /// Create a static collision object
    pub fn new_static(shape: Arc<Shape>) -> Self {
        Self::with_kind(shape, BodyKind::Static)
    }

    /// Create a kinematic collision object
    ///
    /// Kinematic objects have infinite mass and are unaffected by forces,
    /// but push dynamic bodies. Move them with `PhysicsWorld::set_transform`
    /// (the velocity is derived from the change) or by setting a velocity.
    pub fn new_kinematic(shape: Arc<Shape>) -> Self {
        Self::with_kind(shape, BodyKind::Kinematic)
    }

    // --- builders -----------------------------------------------------------

    /// Initial transform
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self.prev_transform = transform;
        self.update_inertia();
        self
    }

    /// Initial position, identity rotation
    pub fn with_position(self, position: Vec3) -> Self {
        self.with_transform(Transform::from_translation(position))
    }

    /// Initial linear velocity
    pub fn with_linear_velocity(mut self, v: Vec3) -> Self {
        self.linear_velocity = v;
        self
    }

    /// Initial angular velocity
    pub fn with_angular_velocity(mut self, w: Vec3) -> Self {
        self.angular_velocity = w;
        self
    }

    /// Friction coefficient
    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction.max(0.0);
        self
    }

    /// Restitution coefficient
    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution.max(0.0);
        self
    }

    /// Linear and angular damping per second
    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear.clamp(0.0, 1.0);
        self.angular_damping = angular.clamp(0.0, 1.0);
        self
    }

    /// Collision filter
    pub fn with_filter(mut self, filter: CollisionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Make this object a trigger: contacts are reported, never solved
    pub fn as_trigger(mut self) -> Self {
        self.trigger = true;
        self
    }

    /// Allow or forbid sleeping
    pub fn with_permit_sleep(mut self, permit: bool) -> Self {
        self.permit_sleep = permit;
        self
    }

    /// Opaque application value
    pub fn with_user_data(mut self, user_data: u64) -> Self {
        self.user_data = user_data;
        self
    }

    /// Contact callbacks
    pub fn with_callbacks(mut self, callbacks: ContactCallbacks) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    // --- accessors ----------------------------------------------------------

    /// Collision shape
    #[inline]
    pub fn shape(&self) -> &Arc<Shape> {
        &self.shape
    }

    /// Body kind
    #[inline]
    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    /// Check if body is dynamic
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.kind == BodyKind::Dynamic
    }

    /// Check if body is static
    #[inline]
    pub fn is_static(&self) -> bool {
        self.kind == BodyKind::Static
    }

    /// Check if body is kinematic
    #[inline]
    pub fn is_kinematic(&self) -> bool {
        self.kind == BodyKind::Kinematic
    }

    /// World transform
    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Position of the body origin
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.transform.origin
    }

    /// Linear velocity
    #[inline]
    pub fn linear_velocity(&self) -> Vec3 {
        self.linear_velocity
    }

    /// Angular velocity
    #[inline]
    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    /// Mass (0 for static/kinematic)
    #[inline]
    pub fn mass(&self) -> f32 {
        self.mass
    }

    /// Inverse mass (0 for static/kinematic)
    #[inline]
    pub fn inv_mass(&self) -> f32 {
        self.inv_mass
    }

    /// Inverse inertia tensor in world space
    #[inline]
    pub fn world_inv_inertia(&self) -> Mat3 {
        self.world_inv_inertia
    }

    /// Friction coefficient
    #[inline]
    pub fn friction(&self) -> f32 {
        self.friction
    }

    /// Restitution coefficient
    #[inline]
    pub fn restitution(&self) -> f32 {
        self.restitution
    }

    /// Linear and angular damping
    #[inline]
    pub fn damping(&self) -> (f32, f32) {
        (self.linear_damping, self.angular_damping)
    }

    /// Collision filter
    #[inline]
    pub fn filter(&self) -> CollisionFilter {
        self.filter
    }

    /// Whether contacts are reported without response
    #[inline]
    pub fn is_trigger(&self) -> bool {
        self.trigger || self.filter.is_trigger()
    }

    /// Whether the body takes part in simulation this step
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Dynamic body that is currently asleep
    #[inline]
    pub fn is_sleeping(&self) -> bool {
        self.kind == BodyKind::Dynamic && !self.active
    }

    /// Kinematic object that moves this step
    #[inline]
    pub(crate) fn is_moving_kinematic(&self) -> bool {
        self.kind == BodyKind::Kinematic
            && (self.kinematic_target.is_some()
                || self.linear_velocity != Vec3::ZERO
                || self.angular_velocity != Vec3::ZERO)
    }

    /// Dynamic body taking part in the simulation
    #[inline]
    pub(crate) fn is_awake_dynamic(&self) -> bool {
        self.kind == BodyKind::Dynamic && self.active
    }

    /// Awake dynamic body or moving kinematic object
    #[inline]
    pub(crate) fn is_awake(&self) -> bool {
        self.is_awake_dynamic() || self.is_moving_kinematic()
    }

    /// Whether the sleep manager may put this body to sleep
    #[inline]
    pub fn permit_sleep(&self) -> bool {
        self.permit_sleep
    }

    /// Opaque application value
    #[inline]
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    /// Handle assigned by the world (default before insertion)
    #[inline]
    pub fn handle(&self) -> BodyHandle {
        self.handle
    }

    /// Whether the body belongs to a world
    #[inline]
    pub fn in_world(&self) -> bool {
        self.in_world
    }

    /// Arbiters currently referencing this body
    #[inline]
    pub fn arbiter_count(&self) -> usize {
        self.arbiters.len()
    }

    /// Constraints attached to this body
    #[inline]
    pub fn constraints(&self) -> &[ConstraintHandle] {
        &self.constraints
    }

    /// Velocity of a world point rigidly attached to the body
    #[inline]
    pub fn velocity_at(&self, point: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(point - self.transform.origin)
    }

    // --- dynamics -----------------------------------------------------------

    /// Recompute the world-space inverse inertia from the rotation
    pub(crate) fn update_inertia(&mut self) {
        let r = self.transform.basis;
        self.world_inv_inertia = r * Mat3::from_diagonal(self.local_inv_inertia) * r.transpose();
    }

    /// Accumulate a force through the center of mass for the next step
    pub fn apply_force(&mut self, force: Vec3) {
        if self.is_dynamic() {
            self.force += force;
        }
    }

    /// Accumulate a torque for the next step
    pub fn apply_torque(&mut self, torque: Vec3) {
        if self.is_dynamic() {
            self.torque += torque;
        }
    }

    /// Apply impulse at center of mass
    pub fn apply_central_impulse(&mut self, impulse: Vec3) {
        self.linear_velocity += impulse * self.inv_mass;
    }

    /// Apply impulse at an offset `r` from the body origin
    #[inline]
    pub fn apply_impulse(&mut self, impulse: Vec3, r: Vec3) {
        self.linear_velocity += impulse * self.inv_mass;
        self.angular_velocity += self.world_inv_inertia * r.cross(impulse);
    }

    /// Apply a split impulse to the bias velocities only
    #[inline]
    pub(crate) fn apply_bias_impulse(&mut self, impulse: Vec3, r: Vec3) {
        self.bias_linear_velocity += impulse * self.inv_mass;
        self.bias_angular_velocity += self.world_inv_inertia * r.cross(impulse);
    }

    /// Gravity, accumulated forces and damping
    pub(crate) fn integrate_velocity(&mut self, gravity: Vec3, dt: f32) {
        if !(self.is_dynamic() && self.active) {
            return;
        }
        self.linear_velocity += (gravity + self.force * self.inv_mass) * dt;
        self.angular_velocity += self.world_inv_inertia * self.torque * dt;
        if self.linear_damping > 0.0 {
            self.linear_velocity *= (1.0 - self.linear_damping).powf(dt);
        }
        if self.angular_damping > 0.0 {
            self.angular_velocity *= (1.0 - self.angular_damping).powf(dt);
        }
    }

    /// Derive a kinematic velocity that reaches the pending target in `dt`
    pub(crate) fn prepare_kinematic(&mut self, dt: f32) {
        let Some(target) = self.kinematic_target else {
            return;
        };
        if dt <= 0.0 {
            return;
        }
        self.linear_velocity = (target.origin - self.transform.origin) / dt;
        let mut delta = Quat::from_mat3(&(target.basis * self.transform.basis.transpose())).normalize();
        // shorter arc
        if delta.w < 0.0 {
            delta = -delta;
        }
        let (axis, angle) = delta.to_axis_angle();
        self.angular_velocity = if angle.is_finite() { axis * (angle / dt) } else { Vec3::ZERO };
    }

    /// Advance the transform by true plus bias velocity, then clear bias
    pub(crate) fn integrate_position(&mut self, dt: f32) {
        self.prev_transform = self.transform;
        match self.kind {
            BodyKind::Static => {}
            BodyKind::Kinematic => {
                if let Some(target) = self.kinematic_target.take() {
                    self.transform = target;
                    self.transform.orthonormalize();
                    // the derived velocity only covers the step that reached the target
                    self.linear_velocity = Vec3::ZERO;
                    self.angular_velocity = Vec3::ZERO;
                } else {
                    self.transform.integrate(self.linear_velocity, self.angular_velocity, dt);
                }
            }
            BodyKind::Dynamic => {
                if self.active {
                    self.transform.integrate(
                        self.linear_velocity + self.bias_linear_velocity,
                        self.angular_velocity + self.bias_angular_velocity,
                        dt,
                    );
                    self.update_inertia();
                }
            }
        }
        self.bias_linear_velocity = Vec3::ZERO;
        self.bias_angular_velocity = Vec3::ZERO;
        self.force = Vec3::ZERO;
        self.torque = Vec3::ZERO;
    }

    /// Stop all motion
    pub(crate) fn clear_velocities(&mut self) {
        self.linear_velocity = Vec3::ZERO;
        self.angular_velocity = Vec3::ZERO;
        self.bias_linear_velocity = Vec3::ZERO;
        self.bias_angular_velocity = Vec3::ZERO;
    }

    /// Whether the body is slow enough to count as resting
    pub(crate) fn at_rest(&self, linear_sq: f32, angular_sq: f32) -> bool {
        let r = self.shape.radius();
        self.linear_velocity.length_squared() < linear_sq * r * r
            && self.angular_velocity.length_squared() < angular_sq
    }
}

// ============================================================================
// Tests
// ============================================================================
