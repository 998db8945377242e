//! Dynamic AABB Tree (Incremental BVH)
//!
//! A self-balancing binary tree of fattened AABBs used as the world's
//! broad phase. Unlike `LinearBvh` (rebuild-only, for triangle meshes),
//! this tree supports O(log n) insert, remove, and update operations.
//!
//! # Features
//!
//! - **Fat AABBs**: leaves are enlarged by a margin, so small motions do
//!   not touch the tree at all
//! - **SAH insertion**: the sibling is picked by the surface-area cost of
//!   the enlarged ancestors
//! - **AVL rotations**: any node whose child heights differ by more than
//!   one is rotated on the way back up
//! - **Top-down rebuild**: [`SpatialIndex::finalize`] rebuilds the tree
//!   with median splits after a burst of modifications

use crate::collider::AABB;
use crate::raycast::{ray_aabb_interval, Ray};
use crate::spatial::SpatialIndex;

/// Null node sentinel
pub const NULL_NODE: u32 = u32::MAX;

/// Default AABB fat margin (extends each side by this amount)
pub const DEFAULT_FAT_MARGIN: f32 = 0.1;

/// Modifications tolerated before `finalize` rebuilds, as a share of leaves
const REBUILD_RATIO: usize = 2;

/// Minimum number of leaves before rebuilding pays off
const REBUILD_MIN_LEAVES: usize = 16;

/// A node in the dynamic AABB tree
#[derive(Clone, Debug)]
struct Node {
    aabb: AABB,
    parent: u32,
    left: u32,
    right: u32,
    /// 0 for leaves, -1 for free nodes
    height: i32,
    object: u32,
}

impl Node {
    fn free() -> Self {
        Self {
            aabb: AABB::default(),
            parent: NULL_NODE,
            left: NULL_NODE,
            right: NULL_NODE,
            height: -1,
            object: NULL_NODE,
        }
    }

    #[inline]
    fn is_leaf(&self) -> bool {
        self.left == NULL_NODE
    }
}

/// Dynamic AABB tree for broad-phase collision detection
#[derive(Clone, Debug)]
pub struct DynamicAabbTree {
    nodes: Vec<Node>,
    root: u32,
    free_list: Vec<u32>,
    /// Object index -> leaf node
    proxies: Vec<u32>,
    leaf_count: usize,
    fat_margin: f32,
    modifications: usize,
}

impl Default for DynamicAabbTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicAabbTree {
    /// Create an empty tree with the default fat margin
    #[must_use]
    pub fn new() -> Self {
        Self::with_margin(DEFAULT_FAT_MARGIN)
    }

    /// Create an empty tree with a custom fat margin
    #[must_use]
    pub fn with_margin(fat_margin: f32) -> Self {
        Self {
            nodes: Vec::new(),
            root: NULL_NODE,
            free_list: Vec::new(),
            proxies: Vec::new(),
            leaf_count: 0,
            fat_margin: fat_margin.max(0.0),
            modifications: 0,
        }
    }

    /// Fat AABB stored for an object
    #[must_use]
    pub fn fat_aabb(&self, object: u32) -> Option<AABB> {
        self.leaf_of(object).map(|leaf| self.nodes[leaf as usize].aabb)
    }

    /// Tree height (0 for a single leaf, -1 when empty)
    #[must_use]
    pub fn height(&self) -> i32 {
        if self.root == NULL_NODE {
            -1
        } else {
            self.nodes[self.root as usize].height
        }
    }

    /// Allocated node count, including internal nodes
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_list.len()
    }

    /// Invoke `callback` for every object whose fat AABB overlaps `aabb`
    pub fn query_callback<F: FnMut(u32)>(&self, aabb: &AABB, mut callback: F) {
        if self.root == NULL_NODE {
            return;
        }
        let mut stack = Vec::with_capacity(64);
        stack.push(self.root);
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id as usize];
            if !node.aabb.intersects(aabb) {
                continue;
            }
            if node.is_leaf() {
                callback(node.object);
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }

    fn leaf_of(&self, object: u32) -> Option<u32> {
        match self.proxies.get(object as usize) {
            Some(&leaf) if leaf != NULL_NODE => Some(leaf),
            _ => None,
        }
    }

    fn alloc_node(&mut self) -> u32 {
        if let Some(id) = self.free_list.pop() {
            self.nodes[id as usize] = Node::free();
            id
        } else {
            self.nodes.push(Node::free());
            (self.nodes.len() - 1) as u32
        }
    }

    fn free_node(&mut self, id: u32) {
        self.nodes[id as usize] = Node::free();
        self.free_list.push(id);
    }

    fn insert_leaf(&mut self, leaf: u32) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        // Find the best sibling by descending on enlarged surface area
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut index = self.root;
        while !self.nodes[index as usize].is_leaf() {
            let node = &self.nodes[index as usize];
            let (left, right) = (node.left, node.right);
            let area = node.aabb.surface_area();
            let combined_area = node.aabb.union(&leaf_aabb).surface_area();

            let cost = 2.0 * combined_area;
            let inheritance = 2.0 * (combined_area - area);
            let cost_left = self.descent_cost(left, &leaf_aabb, inheritance);
            let cost_right = self.descent_cost(right, &leaf_aabb, inheritance);

            if cost < cost_left && cost < cost_right {
                break;
            }
            index = if cost_left < cost_right { left } else { right };
        }

        let sibling = index;
        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.alloc_node();
        {
            let sibling_aabb = self.nodes[sibling as usize].aabb;
            let sibling_height = self.nodes[sibling as usize].height;
            let p = &mut self.nodes[new_parent as usize];
            p.parent = old_parent;
            p.aabb = leaf_aabb.union(&sibling_aabb);
            p.height = sibling_height + 1;
            p.left = sibling;
            p.right = leaf;
        }
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        if old_parent == NULL_NODE {
            self.root = new_parent;
        } else if self.nodes[old_parent as usize].left == sibling {
            self.nodes[old_parent as usize].left = new_parent;
        } else {
            self.nodes[old_parent as usize].right = new_parent;
        }

        self.fix_upwards(new_parent);
    }

    fn descent_cost(&self, child: u32, leaf_aabb: &AABB, inheritance: f32) -> f32 {
        let node = &self.nodes[child as usize];
        let combined = leaf_aabb.union(&node.aabb).surface_area();
        if node.is_leaf() {
            combined + inheritance
        } else {
            combined - node.aabb.surface_area() + inheritance
        }
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if leaf == self.root {
            self.root = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf as usize].parent;
        let grand_parent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].left == leaf {
            self.nodes[parent as usize].right
        } else {
            self.nodes[parent as usize].left
        };

        if grand_parent == NULL_NODE {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL_NODE;
            self.free_node(parent);
        } else {
            if self.nodes[grand_parent as usize].left == parent {
                self.nodes[grand_parent as usize].left = sibling;
            } else {
                self.nodes[grand_parent as usize].right = sibling;
            }
            self.nodes[sibling as usize].parent = grand_parent;
            self.free_node(parent);
            self.fix_upwards(grand_parent);
        }
        self.nodes[leaf as usize].parent = NULL_NODE;
    }

    /// Rebalance and refit from `start` to the root
    fn fix_upwards(&mut self, start: u32) {
        let mut index = start;
        while index != NULL_NODE {
            index = self.balance(index);
            let (left, right) = (self.nodes[index as usize].left, self.nodes[index as usize].right);
            let height = 1 + self.nodes[left as usize].height.max(self.nodes[right as usize].height);
            let aabb = self.nodes[left as usize].aabb.union(&self.nodes[right as usize].aabb);
            let node = &mut self.nodes[index as usize];
            node.height = height;
            node.aabb = aabb;
            index = node.parent;
        }
    }

    /// Rotate the taller grandchild up when `a` is unbalanced
    ///
    /// Returns the node now sitting where `a` was.
    fn balance(&mut self, a: u32) -> u32 {
        let ai = a as usize;
        if self.nodes[ai].is_leaf() || self.nodes[ai].height < 2 {
            return a;
        }
        let (b, c) = (self.nodes[ai].left, self.nodes[ai].right);
        let diff = self.nodes[c as usize].height - self.nodes[b as usize].height;

        if diff > 1 {
            self.rotate_up(a, c, b, true)
        } else if diff < -1 {
            self.rotate_up(a, b, c, false)
        } else {
            a
        }
    }

    /// Promote `up` (a child of `a`) above `a`; `stay` is `a`'s other child
    ///
    /// `up_is_right` tells which side of `a` the promoted child hung on.
    fn rotate_up(&mut self, a: u32, up: u32, stay: u32, up_is_right: bool) -> u32 {
        let (f, g) = (self.nodes[up as usize].left, self.nodes[up as usize].right);

        // `up` takes `a`'s place under the old parent
        let a_parent = self.nodes[a as usize].parent;
        self.nodes[up as usize].left = a;
        self.nodes[up as usize].parent = a_parent;
        self.nodes[a as usize].parent = up;
        if a_parent == NULL_NODE {
            self.root = up;
        } else if self.nodes[a_parent as usize].left == a {
            self.nodes[a_parent as usize].left = up;
        } else {
            self.nodes[a_parent as usize].right = up;
        }

        // the taller grandchild stays with `up`, the shorter one moves to `a`
        let (keep, give) = if self.nodes[f as usize].height > self.nodes[g as usize].height {
            (f, g)
        } else {
            (g, f)
        };
        self.nodes[up as usize].right = keep;
        if up_is_right {
            self.nodes[a as usize].right = give;
        } else {
            self.nodes[a as usize].left = give;
        }
        self.nodes[give as usize].parent = a;

        let a_aabb = self.nodes[stay as usize].aabb.union(&self.nodes[give as usize].aabb);
        let a_height = 1 + self.nodes[stay as usize].height.max(self.nodes[give as usize].height);
        self.nodes[a as usize].aabb = a_aabb;
        self.nodes[a as usize].height = a_height;

        let up_aabb = a_aabb.union(&self.nodes[keep as usize].aabb);
        let up_height = 1 + a_height.max(self.nodes[keep as usize].height);
        self.nodes[up as usize].aabb = up_aabb;
        self.nodes[up as usize].height = up_height;

        up
    }

    /// Rebuild the whole tree with median splits along the widest axis
    pub fn rebuild(&mut self) {
        let mut leaves: Vec<u32> = Vec::with_capacity(self.leaf_count);
        for (i, node) in self.nodes.iter().enumerate() {
            if node.height == 0 {
                leaves.push(i as u32);
            }
        }
        // internal nodes are recreated from scratch
        for i in 0..self.nodes.len() {
            if self.nodes[i].height > 0 {
                self.free_node(i as u32);
            }
        }
        self.root = if leaves.is_empty() {
            NULL_NODE
        } else {
            self.build_range(&mut leaves)
        };
        if self.root != NULL_NODE {
            self.nodes[self.root as usize].parent = NULL_NODE;
        }
        self.modifications = 0;
    }

    fn build_range(&mut self, leaves: &mut [u32]) -> u32 {
        if leaves.len() == 1 {
            return leaves[0];
        }

        let mut bounds = self.nodes[leaves[0] as usize].aabb;
        for &l in leaves.iter().skip(1) {
            bounds = bounds.union(&self.nodes[l as usize].aabb);
        }
        let extent = bounds.max - bounds.min;
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };

        let mid = leaves.len() / 2;
        let nodes = &self.nodes;
        leaves.select_nth_unstable_by(mid, |&a, &b| {
            let ca = nodes[a as usize].aabb.center()[axis];
            let cb = nodes[b as usize].aabb.center()[axis];
            ca.total_cmp(&cb)
        });

        let (lo, hi) = leaves.split_at_mut(mid);
        let left = self.build_range(lo);
        let right = self.build_range(hi);

        let id = self.alloc_node();
        let height = 1 + self.nodes[left as usize].height.max(self.nodes[right as usize].height);
        let node = &mut self.nodes[id as usize];
        node.left = left;
        node.right = right;
        node.aabb = bounds;
        node.height = height;
        self.nodes[left as usize].parent = id;
        self.nodes[right as usize].parent = id;
        id
    }

    #[cfg(test)]
    fn validate(&self) {
        if self.root == NULL_NODE {
            return;
        }
        let mut stack = vec![self.root];
        let mut leaves = 0;
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id as usize];
            if node.is_leaf() {
                assert_eq!(node.height, 0);
                leaves += 1;
                continue;
            }
            let (l, r) = (&self.nodes[node.left as usize], &self.nodes[node.right as usize]);
            assert_eq!(l.parent, id);
            assert_eq!(r.parent, id);
            assert_eq!(node.height, 1 + l.height.max(r.height));
            assert!(node.aabb.contains(&l.aabb) && node.aabb.contains(&r.aabb));
            stack.push(node.left);
            stack.push(node.right);
        }
        assert_eq!(leaves, self.leaf_count);
    }
}

impl SpatialIndex for DynamicAabbTree {
    fn add(&mut self, object: u32, aabb: &AABB) {
        if self.leaf_of(object).is_some() {
            self.update(object, aabb);
            return;
        }
        let leaf = self.alloc_node();
        {
            let node = &mut self.nodes[leaf as usize];
            node.aabb = aabb.expanded(self.fat_margin);
            node.height = 0;
            node.object = object;
        }
        let i = object as usize;
        if i >= self.proxies.len() {
            self.proxies.resize(i + 1, NULL_NODE);
        }
        self.proxies[i] = leaf;
        self.insert_leaf(leaf);
        self.leaf_count += 1;
        self.modifications += 1;
    }

    fn update(&mut self, object: u32, aabb: &AABB) {
        let Some(leaf) = self.leaf_of(object) else {
            self.add(object, aabb);
            return;
        };
        if self.nodes[leaf as usize].aabb.contains(aabb) {
            return;
        }
        self.remove_leaf(leaf);
        self.nodes[leaf as usize].aabb = aabb.expanded(self.fat_margin);
        self.insert_leaf(leaf);
        self.modifications += 1;
    }

    fn remove(&mut self, object: u32) {
        let Some(leaf) = self.leaf_of(object) else { return };
        self.remove_leaf(leaf);
        self.free_node(leaf);
        self.proxies[object as usize] = NULL_NODE;
        self.leaf_count -= 1;
        self.modifications += 1;
    }

    fn contains(&self, object: u32) -> bool {
        self.leaf_of(object).is_some()
    }

    fn finalize(&mut self) {
        if self.leaf_count >= REBUILD_MIN_LEAVES && self.modifications > self.leaf_count * REBUILD_RATIO {
            self.rebuild();
        }
    }

    fn overlapping_pairs(&self, out: &mut Vec<(u32, u32)>) -> usize {
        let start = out.len();
        for node in self.nodes.iter().filter(|n| n.height == 0) {
            let a = node.object;
            self.query_callback(&node.aabb, |b| {
                if a < b {
                    out.push((a, b));
                }
            });
        }
        // stable output order regardless of tree shape
        out[start..].sort_unstable();
        out.len() - start
    }

    fn overlapping_nodes(&self, aabb: &AABB, out: &mut Vec<u32>) -> usize {
        let start = out.len();
        self.query_callback(aabb, |object| out.push(object));
        out.len() - start
    }

    fn ray_test(&self, ray: &Ray, callback: &mut dyn FnMut(u32, &Ray) -> Option<f32>) {
        if self.root == NULL_NODE {
            return;
        }
        let mut current = *ray;
        let mut stack = Vec::with_capacity(64);
        stack.push(self.root);
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id as usize];
            match ray_aabb_interval(&current, node.aabb.min, node.aabb.max) {
                Some((enter, exit, _)) if exit >= 0.0 && enter <= current.max_factor => {}
                _ => continue,
            }
            if node.is_leaf() {
                if let Some(f) = callback(node.object, &current) {
                    if f >= 0.0 && f < current.max_factor {
                        current.max_factor = f;
                    }
                }
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }

    fn len(&self) -> usize {
        self.leaf_count
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free_list.clear();
        self.proxies.clear();
        self.root = NULL_NODE;
        self.leaf_count = 0;
        self.modifications = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================
