//! Broad-Phase Spatial Index
//!
//! The world culls candidate pairs through the [`SpatialIndex`] trait and
//! keeps two instances: one for awake dynamic and kinematic objects, one
//! for static objects and sleeping bodies. Objects are identified by their
//! world slot index.
//!
//! [`DynamicAabbTree`](crate::dynamic_bvh::DynamicAabbTree) is the default
//! implementation.

use crate::collider::AABB;
use crate::raycast::Ray;

/// Insert/update/remove/query service over object bounds
pub trait SpatialIndex: Default {
    /// Track `object` with the given bounds; re-adding updates it
    fn add(&mut self, object: u32, aabb: &AABB);

    /// Move an object's bounds
    fn update(&mut self, object: u32, aabb: &AABB);

    /// Stop tracking an object; unknown objects are ignored
    fn remove(&mut self, object: u32);

    /// Whether `object` is tracked
    fn contains(&self, object: u32) -> bool;

    /// Bring the index up to date before a round of queries
    fn finalize(&mut self);

    /// Append every overlapping pair `(a, b)` with `a < b`; returns the count added
    fn overlapping_pairs(&self, out: &mut Vec<(u32, u32)>) -> usize;

    /// Append the objects whose bounds overlap `aabb`; returns the count added
    fn overlapping_nodes(&self, aabb: &AABB, out: &mut Vec<u32>) -> usize;

    /// Walk the objects whose bounds the ray crosses
    ///
    /// The callback returns the factor of a hit on the object, which
    /// shortens the ray for the rest of the walk.
    fn ray_test(&self, ray: &Ray, callback: &mut dyn FnMut(u32, &Ray) -> Option<f32>);

    /// Number of tracked objects
    fn len(&self) -> usize;

    /// Check if nothing is tracked
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop tracking everything
    fn clear(&mut self);
}

/// Ray walk over several indices, sharing the shortening ray
///
/// Returns the factor of the nearest hit reported by the callback.
pub fn ray_test_trees<S: SpatialIndex>(
    trees: &[&S],
    ray: &Ray,
    callback: &mut dyn FnMut(u32, &Ray) -> Option<f32>,
) -> Option<f32> {
    let mut current = *ray;
    let mut best = None;
    for tree in trees {
        let ray_now = current;
        tree.ray_test(&ray_now, &mut |object, r| {
            let hit = callback(object, r);
            if let Some(f) = hit {
                if f <= current.max_factor {
                    current.max_factor = f;
                    best = Some(f);
                }
            }
            hit
        });
    }
    best
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic_bvh::DynamicAabbTree;
    use glam::Vec3;

    fn cube(x: f32) -> AABB {
        AABB::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
    }

    #[test]
    fn test_ray_walk_shares_limit_across_trees() {
        let mut near = DynamicAabbTree::new();
        let mut far = DynamicAabbTree::new();
        near.add(1, &cube(2.0));
        far.add(2, &cube(8.0));
        near.finalize();
        far.finalize();

        let ray = Ray::new(Vec3::new(0.0, 0.5, 0.5), Vec3::X, 100.0);
        let mut visited = Vec::new();
        let best = ray_test_trees(&[&near, &far], &ray, &mut |object, r| {
            visited.push(object);
            let entry = if object == 1 { 2.0 } else { 8.0 };
            (entry <= r.max_factor).then_some(entry)
        });
        assert_eq!(best, Some(2.0));
        // the far cube starts beyond the shortened ray
        assert_eq!(visited, vec![1]);
    }
}
