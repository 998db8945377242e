//! Persistent Contact Manifolds (Arbiters)
//!
//! One [`Arbiter`] per colliding shape pair keeps up to four contact points
//! across steps. Each point stores its anchors in both bodies' local frames
//! so it can be re-projected after the bodies move, plus the impulses the
//! solver accumulated for it, which seed the next step (warm starting).
//!
//! # Manifold maintenance
//!
//! - **Insertion**: a new point close to an old one (`contact_equal_sq`)
//!   replaces it and keeps its impulse; a point within `contact_inherit_sq`
//!   of an old one starts from that point's impulse.
//! - **Normal culling**: for convex pairs, points whose normal diverges from
//!   the new one are dropped. Mesh contacts skip this, since neighbouring
//!   triangles legitimately push in different directions.
//! - **Eviction**: a fifth point replaces the old point whose removal keeps
//!   the largest contact area. The deepest point always survives.
//! - **Refresh**: anchors are re-projected every step and points that drift
//!   apart along or across the normal are dropped.
//!
//! Arbiters live in a [`Pool`] indexed by `u32`; [`ArbiterSet`] maps the
//! canonical [`ArbiterKey`] to a slot.

use std::collections::HashMap;

use glam::{Mat2, Vec3};

use crate::collider::ShapeId;
use crate::config::PhysicsConfig;
use crate::math::{tangent_basis, Transform, EPSILON_SQ};
use crate::narrow_phase::ContactCandidate;
use crate::pool::{Pool, Reset};
use crate::rigid_body::BodyHandle;

/// Maximum contact points per manifold
pub const MAX_CONTACTS: usize = 4;

/// A single persistent contact point
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ContactPoint {
    /// Anchor on A, in A's local frame
    pub local_a: Vec3,
    /// Anchor on B, in B's local frame
    pub local_b: Vec3,
    /// Anchor on A, world space
    pub world_a: Vec3,
    /// Anchor on B, world space
    pub world_b: Vec3,
    /// Unit normal from A toward B
    pub normal: Vec3,
    /// First friction direction
    pub tangent: Vec3,
    /// Second friction direction
    pub bitangent: Vec3,
    /// Signed separation (negative = penetration)
    pub distance: f32,
    /// Produced by a mesh triangle
    pub concave: bool,
    /// Accumulated normal impulse
    pub normal_impulse: f32,
    /// Accumulated friction impulse along `tangent`
    pub tangent_impulse: f32,
    /// Accumulated friction impulse along `bitangent`
    pub bitangent_impulse: f32,
    /// Accumulated split impulse of the current step
    pub bias_impulse: f32,

    pub(crate) ra: Vec3,
    pub(crate) rb: Vec3,
    pub(crate) normal_mass: f32,
    pub(crate) tangent_mass: Mat2,
    /// Separating speed targeted by the bias passes
    pub(crate) bias: f32,
    /// Normal speed targeted by the velocity passes
    pub(crate) velocity_bias: f32,
}

impl ContactPoint {
    fn new(ta: &Transform, tb: &Transform, c: &ContactCandidate, normal: Vec3) -> Self {
        let (tangent, bitangent) = tangent_basis(normal);
        Self {
            local_a: ta.inverse_transform_point(c.point_a),
            local_b: tb.inverse_transform_point(c.point_b),
            world_a: c.point_a,
            world_b: c.point_b,
            normal,
            tangent,
            bitangent,
            distance: c.distance,
            concave: c.concave,
            ..Self::default()
        }
    }

    /// Re-project the anchors; returns false when the point should be dropped
    fn refresh(&mut self, ta: &Transform, tb: &Transform, config: &PhysicsConfig) -> bool {
        self.world_a = ta.transform_point(self.local_a);
        self.world_b = tb.transform_point(self.local_b);
        let d = self.world_b - self.world_a;
        self.distance = d.dot(self.normal);
        let lateral = d - self.normal * self.distance;
        self.distance <= config.contact_max_y_separation
            && lateral.length_squared() <= config.contact_max_lateral_sq
    }
}

/// Canonical key: body A always has the smaller slot index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArbiterKey {
    /// First body
    pub body_a: BodyHandle,
    /// Second body
    pub body_b: BodyHandle,
    /// Shape of the first body
    pub shape_a: ShapeId,
    /// Shape of the second body
    pub shape_b: ShapeId,
}

impl ArbiterKey {
    /// Build the canonical key; the flag is true when the inputs were swapped
    pub fn new(a: BodyHandle, shape_a: ShapeId, b: BodyHandle, shape_b: ShapeId) -> (Self, bool) {
        if a.index <= b.index {
            (
                Self {
                    body_a: a,
                    body_b: b,
                    shape_a,
                    shape_b,
                },
                false,
            )
        } else {
            (
                Self {
                    body_a: b,
                    body_b: a,
                    shape_a: shape_b,
                    shape_b: shape_a,
                },
                true,
            )
        }
    }

    /// Whether `body` is one of the two sides
    #[inline]
    pub fn involves(&self, body: BodyHandle) -> bool {
        self.body_a == body || self.body_b == body
    }

    /// The side opposite `body`
    #[inline]
    pub fn other(&self, body: BodyHandle) -> BodyHandle {
        if self.body_a == body {
            self.body_b
        } else {
            self.body_a
        }
    }
}

/// Pair friction: geometric mean
#[inline]
pub fn combine_friction(a: f32, b: f32) -> f32 {
    (a * b).sqrt()
}

/// Pair restitution: the bouncier of the two
#[inline]
pub fn combine_restitution(a: f32, b: f32) -> f32 {
    a.max(b)
}

/// Persistent contact state of one shape pair
#[derive(Clone, Debug, Default)]
pub struct Arbiter {
    pub(crate) key: Option<ArbiterKey>,
    contacts: [ContactPoint; MAX_CONTACTS],
    count: usize,
    pub(crate) friction: f32,
    pub(crate) restitution: f32,
    /// Combined material needs recomputing
    pub(crate) dirty: bool,
    /// Solved this step (both sides awake, not a trigger)
    pub(crate) active: bool,
    /// Reported but never solved
    pub(crate) trigger: bool,
    /// A time-of-impact contact was inserted; skip the next discrete query
    pub(crate) skip_discrete: bool,
    /// Step the broad phase last reported the pair
    pub(crate) last_seen: u64,
}

impl Reset for Arbiter {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Arbiter {
    /// Pair key; `None` only for pooled slots
    #[inline]
    pub fn key(&self) -> Option<ArbiterKey> {
        self.key
    }

    /// Live contact points
    #[inline]
    pub fn contacts(&self) -> &[ContactPoint] {
        &self.contacts[..self.count]
    }

    #[inline]
    pub(crate) fn contacts_mut(&mut self) -> &mut [ContactPoint] {
        &mut self.contacts[..self.count]
    }

    /// Number of live contact points
    #[inline]
    pub fn contact_count(&self) -> usize {
        self.count
    }

    /// Combined friction coefficient
    #[inline]
    pub fn friction(&self) -> f32 {
        self.friction
    }

    /// Combined restitution coefficient
    #[inline]
    pub fn restitution(&self) -> f32 {
        self.restitution
    }

    /// Whether the pair only reports contacts
    #[inline]
    pub fn is_trigger(&self) -> bool {
        self.trigger
    }

    /// Point with the most negative separation
    pub fn deepest(&self) -> Option<&ContactPoint> {
        self.contacts()
            .iter()
            .min_by(|x, y| x.distance.total_cmp(&y.distance))
    }

    /// Whether any point is at or below zero separation
    pub fn is_touching(&self) -> bool {
        self.contacts().iter().any(|c| c.distance <= 0.0)
    }

    /// Drop every point and its cached impulses
    pub fn clear_contacts(&mut self) {
        self.count = 0;
    }

    fn remove_at(&mut self, i: usize) {
        self.count -= 1;
        self.contacts[i] = self.contacts[self.count];
    }

    /// Merge a narrow-phase candidate into the manifold
    ///
    /// Returns true when a new point was added rather than an old one
    /// updated in place.
    pub fn insert_contact(
        &mut self,
        ta: &Transform,
        tb: &Transform,
        candidate: &ContactCandidate,
        config: &PhysicsConfig,
    ) -> bool {
        if candidate.normal.length_squared() < EPSILON_SQ {
            return false;
        }
        let normal = candidate.normal.normalize();
        let mut point = ContactPoint::new(ta, tb, candidate, normal);

        if !candidate.concave {
            let mut i = 0;
            while i < self.count {
                if self.contacts[i].normal.dot(normal) < config.contact_normal_cos {
                    self.remove_at(i);
                } else {
                    i += 1;
                }
            }
        }

        let nearest = self
            .contacts()
            .iter()
            .enumerate()
            .map(|(i, c)| (i, c.local_a.distance_squared(point.local_a)))
            .min_by(|x, y| x.1.total_cmp(&y.1));

        if let Some((i, d2)) = nearest {
            let old = self.contacts[i];
            if d2 <= config.contact_equal_sq {
                point.normal_impulse = old.normal_impulse;
                point.tangent_impulse = old.tangent_impulse;
                point.bitangent_impulse = old.bitangent_impulse;
                self.contacts[i] = point;
                return false;
            }
            if d2 <= config.contact_inherit_sq {
                point.normal_impulse = old.normal_impulse;
            }
        }

        if self.count < MAX_CONTACTS {
            self.contacts[self.count] = point;
            self.count += 1;
        } else {
            let slot = self.eviction_slot(&point);
            self.contacts[slot] = point;
        }
        true
    }

    /// Slot whose replacement by `new` keeps the widest manifold
    fn eviction_slot(&self, new: &ContactPoint) -> usize {
        let deepest = (0..MAX_CONTACTS)
            .min_by(|&x, &y| self.contacts[x].distance.total_cmp(&self.contacts[y].distance))
            .unwrap_or(0);

        let p = |i: usize| self.contacts[i].local_a;
        let mut best = usize::MAX;
        let mut best_area = -1.0;
        for skip in 0..MAX_CONTACTS {
            if skip == deepest {
                continue;
            }
            let mut pts = [new.local_a; MAX_CONTACTS];
            let mut k = 0;
            for i in (0..MAX_CONTACTS).filter(|&i| i != skip) {
                pts[k] = p(i);
                k += 1;
            }
            let area = quad_area_sq(pts[0], pts[1], pts[2], pts[3]);
            if area > best_area {
                best_area = area;
                best = skip;
            }
        }
        if best == usize::MAX {
            (deepest + 1) % MAX_CONTACTS
        } else {
            best
        }
    }

    /// Re-project anchors on the current transforms and drop stale points
    ///
    /// Returns true when the manifold is now empty.
    pub fn refresh_contacts(&mut self, ta: &Transform, tb: &Transform, config: &PhysicsConfig) -> bool {
        let mut i = 0;
        while i < self.count {
            if self.contacts[i].refresh(ta, tb, config) {
                i += 1;
            } else {
                self.remove_at(i);
            }
        }
        self.count == 0
    }
}

/// Largest squared cross product among the three diagonal pairings
fn quad_area_sq(p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3) -> f32 {
    let a = (p0 - p1).cross(p2 - p3).length_squared();
    let b = (p0 - p2).cross(p1 - p3).length_squared();
    let c = (p0 - p3).cross(p1 - p2).length_squared();
    a.max(b).max(c)
}

// ============================================================================
// Arbiter set
// ============================================================================

/// Pooled arbiters indexed by pair key
#[derive(Debug, Default)]
pub struct ArbiterSet {
    pool: Pool<Arbiter>,
    index: HashMap<ArbiterKey, u32>,
}

impl ArbiterSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot of an existing arbiter
    #[inline]
    pub fn find(&self, key: &ArbiterKey) -> Option<u32> {
        self.index.get(key).copied()
    }

    /// Slot of the arbiter for `key`, creating it if needed
    ///
    /// The flag is true for a freshly created arbiter.
    pub fn find_or_create(&mut self, key: ArbiterKey) -> (u32, bool) {
        if let Some(id) = self.find(&key) {
            return (id, false);
        }
        let id = self.pool.acquire();
        if let Some(arb) = self.pool.get_mut(id) {
            arb.key = Some(key);
            arb.dirty = true;
        }
        self.index.insert(key, id);
        (id, true)
    }

    /// Shared access
    #[inline]
    pub fn get(&self, id: u32) -> Option<&Arbiter> {
        self.pool.get(id)
    }

    /// Mutable access
    #[inline]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut Arbiter> {
        self.pool.get_mut(id)
    }

    /// Remove an arbiter and hand its slot back to the pool
    pub fn retire(&mut self, id: u32) -> Option<ArbiterKey> {
        let key = self.pool.get(id)?.key?;
        self.index.remove(&key);
        self.pool.release(id);
        Some(key)
    }

    /// Live arbiter ids
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.pool.live_ids()
    }

    /// Live arbiters
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Arbiter)> + '_ {
        self.pool.live_ids().filter_map(|id| self.pool.get(id).map(|a| (id, a)))
    }

    /// Number of live arbiters
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if no arbiter is live
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Total contact points across all arbiters
    pub fn contact_count(&self) -> usize {
        self.iter().map(|(_, a)| a.contact_count()).sum()
    }

    /// Retire every arbiter
    pub fn clear(&mut self) {
        self.pool.release_all();
        self.index.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn candidate(x: f32, z: f32, distance: f32) -> ContactCandidate {
        ContactCandidate {
            point_a: Vec3::new(x, 0.0, z),
            point_b: Vec3::new(x, distance, z),
            normal: Vec3::Y,
            distance,
            concave: false,
        }
    }

    fn insert(arb: &mut Arbiter, c: ContactCandidate) -> bool {
        let id = Transform::IDENTITY;
        arb.insert_contact(&id, &id, &c, &PhysicsConfig::default())
    }

    #[test]
    fn test_key_is_canonical() {
        let a = BodyHandle::new(3, 0);
        let b = BodyHandle::new(7, 0);
        let (k1, s1) = ArbiterKey::new(a, ShapeId(10), b, ShapeId(20));
        let (k2, s2) = ArbiterKey::new(b, ShapeId(20), a, ShapeId(10));
        assert_eq!(k1, k2);
        assert!(!s1);
        assert!(s2);
        assert_eq!(k1.other(a), b);
    }

    #[test]
    fn test_nearby_point_keeps_impulse() {
        let mut arb = Arbiter::default();
        assert!(insert(&mut arb, candidate(0.0, 0.0, -0.01)));
        arb.contacts_mut()[0].normal_impulse = 5.0;
        arb.contacts_mut()[0].tangent_impulse = 1.0;
        assert!(!insert(&mut arb, candidate(0.005, 0.0, -0.02)));
        assert_eq!(arb.contact_count(), 1);
        assert_eq!(arb.contacts()[0].normal_impulse, 5.0);
        assert_eq!(arb.contacts()[0].tangent_impulse, 1.0);
        assert_eq!(arb.contacts()[0].distance, -0.02);
    }

    #[test]
    fn test_inherit_seeds_normal_impulse() {
        let mut arb = Arbiter::default();
        insert(&mut arb, candidate(0.0, 0.0, -0.01));
        arb.contacts_mut()[0].normal_impulse = 3.0;
        arb.contacts_mut()[0].tangent_impulse = 2.0;
        assert!(insert(&mut arb, candidate(0.05, 0.0, -0.01)));
        assert_eq!(arb.contact_count(), 2);
        assert_eq!(arb.contacts()[1].normal_impulse, 3.0);
        assert_eq!(arb.contacts()[1].tangent_impulse, 0.0);
    }

    #[test]
    fn test_diverging_normal_culled_for_convex_only() {
        let mut arb = Arbiter::default();
        insert(&mut arb, candidate(0.0, 0.0, -0.01));
        let mut side = candidate(1.0, 0.0, -0.01);
        side.normal = Vec3::X;
        insert(&mut arb, side);
        assert_eq!(arb.contact_count(), 1);
        assert_eq!(arb.contacts()[0].normal, Vec3::X);

        let mut mesh = Arbiter::default();
        let mut a = candidate(0.0, 0.0, -0.01);
        a.concave = true;
        let mut b = side;
        b.concave = true;
        insert(&mut mesh, a);
        insert(&mut mesh, b);
        assert_eq!(mesh.contact_count(), 2);
    }

    #[test]
    fn test_fifth_point_evicts_one_but_not_deepest() {
        let mut arb = Arbiter::default();
        insert(&mut arb, candidate(-1.0, -1.0, -0.01));
        insert(&mut arb, candidate(1.0, -1.0, -0.05));
        insert(&mut arb, candidate(1.0, 1.0, -0.01));
        insert(&mut arb, candidate(-1.0, 1.0, -0.01));
        assert_eq!(arb.contact_count(), 4);
        // center point adds no area, so a corner other than the deepest goes
        assert!(insert(&mut arb, candidate(0.0, 0.0, -0.02)));
        assert_eq!(arb.contact_count(), 4);
        assert!(arb.contacts().iter().any(|c| c.distance == -0.05));
        assert!(arb.contacts().iter().any(|c| c.distance == -0.02));
    }

    #[test]
    fn test_zero_normal_ignored() {
        let mut arb = Arbiter::default();
        let mut c = candidate(0.0, 0.0, 0.0);
        c.normal = Vec3::ZERO;
        assert!(!insert(&mut arb, c));
        assert_eq!(arb.contact_count(), 0);
    }

    #[test]
    fn test_refresh_drops_separated_and_is_idempotent() {
        let config = PhysicsConfig::default();
        let mut arb = Arbiter::default();
        insert(&mut arb, candidate(0.0, 0.0, -0.01));
        insert(&mut arb, candidate(1.0, 0.0, -0.01));

        let ta = Transform::IDENTITY;
        let tb = Transform::from_translation(Vec3::new(0.0, 0.02, 0.0));
        assert!(!arb.refresh_contacts(&ta, &tb, &config));
        let once: Vec<ContactPoint> = arb.contacts().to_vec();
        assert!(!arb.refresh_contacts(&ta, &tb, &config));
        assert_eq!(once.as_slice(), arb.contacts());
        assert!((arb.contacts()[0].distance - 0.01).abs() < 1e-6);

        let far = Transform::from_translation(Vec3::new(0.0, 1.0, 0.0));
        assert!(arb.refresh_contacts(&ta, &far, &config));
    }

    #[test]
    fn test_refresh_drops_lateral_drift() {
        let config = PhysicsConfig::default();
        let mut arb = Arbiter::default();
        insert(&mut arb, candidate(0.0, 0.0, -0.01));
        let slid = Transform::from_translation(Vec3::new(0.2, 0.0, 0.0));
        assert!(arb.refresh_contacts(&Transform::IDENTITY, &slid, &config));
    }

    #[test]
    fn test_set_recycles_slots() {
        let mut set = ArbiterSet::new();
        let (key, _) = ArbiterKey::new(BodyHandle::new(0, 0), ShapeId(1), BodyHandle::new(1, 0), ShapeId(2));
        let (id, created) = set.find_or_create(key);
        assert!(created);
        assert_eq!(set.find_or_create(key), (id, false));
        set.get_mut(id).unwrap().friction = 0.7;
        assert_eq!(set.retire(id), Some(key));
        assert!(set.is_empty());

        let (again, created) = set.find_or_create(key);
        assert!(created);
        assert_eq!(again, id);
        assert_eq!(set.get(again).unwrap().friction, 0.0);
    }

    #[test]
    fn test_material_combination() {
        assert!((combine_friction(0.25, 1.0) - 0.5).abs() < 1e-6);
        assert_eq!(combine_restitution(0.2, 0.6), 0.6);
    }

    proptest! {
        #[test]
        fn prop_manifold_never_exceeds_four(points in prop::collection::vec((-2.0f32..2.0, -2.0f32..2.0, -0.1f32..0.0), 1..40)) {
            let mut arb = Arbiter::default();
            for (x, z, d) in points {
                let before = arb.contact_count();
                let deepest = arb.deepest().map(|c| c.distance);
                insert(&mut arb, candidate(x, z, d));
                prop_assert!(arb.contact_count() <= MAX_CONTACTS);
                prop_assert!(arb.contact_count() >= before.min(MAX_CONTACTS));
                if let Some(deepest) = deepest {
                    let now = arb.deepest().map(|c| c.distance).unwrap_or(f32::MAX);
                    prop_assert!(now <= deepest.max(d));
                }
            }
        }
    }
}
