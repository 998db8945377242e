//! Linear Bounding Volume Hierarchy (LBVH), stackless
//!
//! Static hierarchy over a fixed primitive set, used as the per-mesh triangle
//! index for meshes with at least [`MESH_BVH_MIN_TRIANGLES`] triangles.
//!
//! # Features
//!
//! - Morton code-based construction (deterministic)
//! - Flat array storage in depth-first order
//! - **Stackless traversal** using escape pointers (no heap allocation during queries)
//! - Ray traversal that shrinks its interval as closer hits are found

use glam::Vec3;

use crate::collider::AABB;
use crate::raycast::{ray_aabb_interval, Ray};

/// Meshes below this triangle count are scanned linearly
pub const MESH_BVH_MIN_TRIANGLES: usize = 8;

/// Sentinel value for "no escape" (end of traversal)
pub const ESCAPE_NONE: u32 = u32::MAX;

/// Maximum primitives per leaf
const MAX_PRIMS_PER_LEAF: usize = 4;

// ============================================================================
// Morton Codes (Z-order curve)
// ============================================================================

/// Expand 21-bit integer to 63 bits for 3D Morton code
#[inline]
fn expand_bits(mut v: u64) -> u64 {
    // Spread bits: each bit is followed by two zero bits
    v = (v | (v << 32)) & 0x001F_0000_0000_FFFF;
    v = (v | (v << 16)) & 0x001F_0000_FF00_00FF;
    v = (v | (v << 8)) & 0x100F_00F0_0F00_F00F;
    v = (v | (v << 4)) & 0x10C3_0C30_C30C_30C3;
    v = (v | (v << 2)) & 0x1249_2492_4924_9249;
    v
}

/// Compute 63-bit Morton code from 3D coordinates in `[0, 2^21)`
#[inline]
#[must_use]
pub fn morton_code(x: u64, y: u64, z: u64) -> u64 {
    let limit = (1 << 21) - 1;
    expand_bits(x.min(limit)) | (expand_bits(y.min(limit)) << 1) | (expand_bits(z.min(limit)) << 2)
}

/// Morton code of a point normalized into `bounds`
#[must_use]
pub fn point_to_morton(point: Vec3, bounds: &AABB) -> u64 {
    let size = bounds.max - bounds.min;
    let scale = ((1u64 << 21) - 1) as f32;
    let quantize = |p: f32, lo: f32, extent: f32| -> u64 {
        if extent <= 0.0 {
            0
        } else {
            (((p - lo) / extent).clamp(0.0, 1.0) * scale) as u64
        }
    };
    morton_code(
        quantize(point.x, bounds.min.x, size.x),
        quantize(point.y, bounds.min.y, size.y),
        quantize(point.z, bounds.min.z, size.z),
    )
}

// ============================================================================
// Nodes
// ============================================================================

/// BVH node
///
/// Internal nodes store their left child at `self + 1` and their right child
/// in `first`. Leaves store a primitive range `first..first + count`.
#[derive(Clone, Copy, Debug)]
pub struct BvhNode {
    /// Node bounds
    pub aabb: AABB,
    /// Right child (internal) or primitive start (leaf)
    pub first: u32,
    /// Primitive count (0 = internal)
    pub count: u32,
    /// Next node to visit when this subtree is skipped or finished
    pub escape: u32,
}

impl BvhNode {
    /// Check if this is a leaf node
    #[inline]
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// Primitive entry for BVH construction
#[derive(Clone, Copy, Debug)]
pub struct BvhPrimitive {
    /// AABB of the primitive
    pub aabb: AABB,
    /// Caller index (e.g. triangle index)
    pub index: u32,
}

// ============================================================================
// Linear BVH
// ============================================================================

/// Linear BVH (flat array storage with stackless traversal)
#[derive(Clone, Debug, Default)]
pub struct LinearBvh {
    /// Flat array of nodes (depth-first order with escape pointers)
    pub nodes: Vec<BvhNode>,
    /// Primitive indices in leaf order
    pub primitives: Vec<u32>,
    /// Primitive bounds in leaf order
    pub primitive_aabbs: Vec<AABB>,
}

impl LinearBvh {
    /// Build BVH from primitives
    #[must_use]
    pub fn build(primitives: &[BvhPrimitive]) -> Self {
        if primitives.is_empty() {
            return Self::default();
        }

        let bounds = primitives[1..]
            .iter()
            .fold(primitives[0].aabb, |acc, p| acc.union(&p.aabb));

        // Sort by Morton code of the primitive centers (stable for determinism)
        let mut sorted: Vec<(u64, BvhPrimitive)> = primitives
            .iter()
            .map(|p| (point_to_morton(p.aabb.center(), &bounds), *p))
            .collect();
        sorted.sort_by_key(|(code, _)| *code);

        let mut nodes = Vec::with_capacity(2 * primitives.len());
        Self::build_recursive(&mut nodes, &sorted, 0, sorted.len());
        Self::assign_escapes(&mut nodes);

        Self {
            nodes,
            primitives: sorted.iter().map(|(_, p)| p.index).collect(),
            primitive_aabbs: sorted.iter().map(|(_, p)| p.aabb).collect(),
        }
    }

    fn build_recursive(
        nodes: &mut Vec<BvhNode>,
        sorted: &[(u64, BvhPrimitive)],
        start: usize,
        end: usize,
    ) -> usize {
        let node_idx = nodes.len();
        let aabb = sorted[start + 1..end]
            .iter()
            .fold(sorted[start].1.aabb, |acc, (_, p)| acc.union(&p.aabb));

        if end - start <= MAX_PRIMS_PER_LEAF {
            nodes.push(BvhNode {
                aabb,
                first: start as u32,
                count: (end - start) as u32,
                escape: ESCAPE_NONE,
            });
            return node_idx;
        }

        nodes.push(BvhNode {
            aabb,
            first: 0,
            count: 0,
            escape: ESCAPE_NONE,
        });
        let mid = Self::find_split(sorted, start, end);
        Self::build_recursive(nodes, sorted, start, mid);
        let right = Self::build_recursive(nodes, sorted, mid, end);
        nodes[node_idx].first = right as u32;
        node_idx
    }

    /// Left subtrees escape to their sibling, right subtrees to the parent's escape
    fn assign_escapes(nodes: &mut [BvhNode]) {
        let mut stack = vec![(0usize, ESCAPE_NONE)];
        while let Some((idx, escape)) = stack.pop() {
            nodes[idx].escape = escape;
            if !nodes[idx].is_leaf() {
                let right = nodes[idx].first;
                stack.push((right as usize, escape));
                stack.push((idx + 1, right));
            }
        }
    }

    /// Split at the highest differing Morton bit
    fn find_split(sorted: &[(u64, BvhPrimitive)], start: usize, end: usize) -> usize {
        let first_code = sorted[start].0;
        let last_code = sorted[end - 1].0;

        if first_code == last_code {
            return (start + end) / 2;
        }

        let highest_bit = 63 - (first_code ^ last_code).leading_zeros();
        let first_bit = (first_code >> highest_bit) & 1;

        // Binary search for the first code with the bit flipped
        let (mut lo, mut hi) = (start, end - 1);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if (sorted[mid].0 >> highest_bit) & 1 == first_bit {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        lo.clamp(start + 1, end - 1)
    }

    /// Stackless AABB query
    ///
    /// Leaves test each primitive's own bounds before reporting it.
    pub fn query_callback<F>(&self, aabb: &AABB, mut callback: F)
    where
        F: FnMut(u32),
    {
        let mut idx = if self.nodes.is_empty() { ESCAPE_NONE } else { 0 };
        while idx != ESCAPE_NONE {
            let node = &self.nodes[idx as usize];
            if !node.aabb.intersects(aabb) {
                idx = node.escape;
            } else if node.is_leaf() {
                let range = node.first as usize..(node.first + node.count) as usize;
                for (&prim, prim_aabb) in self.primitives[range.clone()].iter().zip(&self.primitive_aabbs[range]) {
                    if prim_aabb.intersects(aabb) {
                        callback(prim);
                    }
                }
                idx = node.escape;
            } else {
                idx += 1;
            }
        }
    }

    /// Stackless ray traversal
    ///
    /// The callback receives each candidate primitive and the current distance
    /// limit, and returns the new limit (its hit distance, or the old limit).
    pub fn ray_callback<F>(&self, ray: &Ray, mut callback: F)
    where
        F: FnMut(u32, f32) -> f32,
    {
        let mut limit = ray.max_factor;
        let mut idx = if self.nodes.is_empty() { ESCAPE_NONE } else { 0 };
        while idx != ESCAPE_NONE {
            let node = &self.nodes[idx as usize];
            let hit = ray_aabb_interval(ray, node.aabb.min, node.aabb.max)
                .is_some_and(|(t0, t1, _)| t1 >= 0.0 && t0 <= limit);
            if !hit {
                idx = node.escape;
            } else if node.is_leaf() {
                let start = node.first as usize;
                for &prim in &self.primitives[start..start + node.count as usize] {
                    limit = callback(prim, limit);
                }
                idx = node.escape;
            } else {
                idx += 1;
            }
        }
    }

    /// Bounds of the whole hierarchy
    #[must_use]
    pub fn bounds(&self) -> Option<AABB> {
        self.nodes.first().map(|n| n.aabb)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_boxes(n: usize) -> Vec<BvhPrimitive> {
        (0..n)
            .map(|i| {
                let min = Vec3::new(i as f32 * 2.0, 0.0, 0.0);
                BvhPrimitive {
                    aabb: AABB::new(min, min + Vec3::ONE),
                    index: i as u32,
                }
            })
            .collect()
    }

    #[test]
    fn test_morton_code() {
        assert_eq!(morton_code(0, 0, 0), 0);
        let x = morton_code(1, 0, 0);
        let y = morton_code(0, 1, 0);
        let z = morton_code(0, 0, 1);
        assert!(x != y && y != z);
    }

    #[test]
    fn test_expand_bits() {
        assert_eq!(expand_bits(0), 0);
        assert_eq!(expand_bits(1), 1);
        assert_eq!(expand_bits(0b11), 0b1001);
        assert_eq!(expand_bits(0b111), 0b1001001);
    }

    #[test]
    fn test_query_finds_every_overlap() {
        let prims = unit_boxes(37);
        let bvh = LinearBvh::build(&prims);
        assert_eq!(bvh.primitives.len(), 37);

        let query = AABB::new(Vec3::new(9.5, 0.2, 0.2), Vec3::new(14.5, 0.8, 0.8));
        let mut found = Vec::new();
        bvh.query_callback(&query, |i| found.push(i));
        found.sort_unstable();
        // Boxes 5, 6 and 7 span x in [10,11], [12,13], [14,15]
        assert_eq!(found, vec![5, 6, 7]);
    }

    #[test]
    fn test_query_matches_brute_force() {
        let prims = unit_boxes(50);
        let bvh = LinearBvh::build(&prims);
        for start in [0.0f32, 13.3, 47.0, 99.0] {
            let query = AABB::new(Vec3::new(start, 0.0, 0.0), Vec3::new(start + 7.0, 1.0, 1.0));
            let mut found = Vec::new();
            bvh.query_callback(&query, |i| found.push(i));
            found.sort_unstable();
            let expected: Vec<u32> = prims
                .iter()
                .filter(|p| p.aabb.intersects(&query))
                .map(|p| p.index)
                .collect();
            assert_eq!(found, expected);
        }
    }

    #[test]
    fn test_query_skips_leaf_mates_outside_query() {
        // Four primitives share one leaf; only the first overlaps
        let prims = unit_boxes(4);
        let bvh = LinearBvh::build(&prims);
        assert_eq!(bvh.nodes.len(), 1);
        let query = AABB::new(Vec3::new(0.2, 0.2, 0.2), Vec3::new(0.8, 0.8, 0.8));
        let mut found = Vec::new();
        bvh.query_callback(&query, |i| found.push(i));
        assert_eq!(found, vec![0]);
    }

    #[test]
    fn test_ray_callback_shrinks_limit() {
        let prims = unit_boxes(20);
        let bvh = LinearBvh::build(&prims);
        let ray = Ray::new(Vec3::new(-1.0, 0.5, 0.5), Vec3::X, 100.0);
        let mut visited = Vec::new();
        bvh.ray_callback(&ray, |i, limit| {
            visited.push(i);
            let t = i as f32 * 2.0 + 1.0;
            if t < limit {
                t
            } else {
                limit
            }
        });
        assert!(visited.contains(&0));
        // Once box 0 reported t = 1, far boxes are culled by the interval test
        assert!(!visited.contains(&19));
    }

    #[test]
    fn test_empty_build() {
        let bvh = LinearBvh::build(&[]);
        let mut hits = 0;
        bvh.query_callback(&AABB::new(Vec3::splat(-1.0), Vec3::ONE), |_| hits += 1);
        assert_eq!(hits, 0);
        assert!(bvh.bounds().is_none());
    }
}
