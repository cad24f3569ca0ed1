//! Binary AABB tree used by the broad phase.
//!
//! Leaves are addressed by dense indices; removal swap-fills both the node
//! array and the leaf array and reports the leaf whose index changed so
//! owners can patch their back-references.

use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::memory::buffer::Buffer;
use crate::utilities::memory::buffer_pool::BufferPool;
use glam::Vec3;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct NodeChild {
    pub min: Vec3,
    pub max: Vec3,
    /// Nonnegative: index of a child node. Negative: an encoded leaf.
    pub index: i32,
    pub leaf_count: i32,
}

impl NodeChild {
    const EMPTY: NodeChild = NodeChild {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
        index: -1,
        leaf_count: 0,
    };

    #[inline(always)]
    fn bounds(&self) -> BoundingBox {
        BoundingBox::new(self.min, self.max)
    }

    #[inline(always)]
    fn is_leaf(&self) -> bool {
        self.leaf_count == 1
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Node {
    pub a: NodeChild,
    pub b: NodeChild,
}

/// Parent linkage for a node; kept out of the traversal-hot node storage.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Metanode {
    pub parent: i32,
    pub index_in_parent: i32,
}

/// Location of a leaf: owning node plus child slot (0 for a, 1 for b).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Leaf {
    pub node_index: i32,
    pub child_index: i32,
}

pub struct Tree {
    pub nodes: Buffer<Node>,
    pub metanodes: Buffer<Metanode>,
    pub leaves: Buffer<Leaf>,
    pub node_count: i32,
    pub leaf_count: i32,
}

#[inline(always)]
fn encode_leaf(leaf_index: i32) -> i32 {
    -1 - leaf_index
}

#[inline(always)]
fn decode_leaf(encoded: i32) -> i32 {
    -1 - encoded
}

impl Tree {
    pub fn new(initial_leaf_capacity: i32, pool: &mut BufferPool) -> Self {
        let initial_leaf_capacity = initial_leaf_capacity.max(2);
        let mut tree = Self {
            nodes: pool.take_at_least(initial_leaf_capacity),
            metanodes: pool.take_at_least(initial_leaf_capacity),
            leaves: pool.take_at_least(initial_leaf_capacity),
            node_count: 1,
            leaf_count: 0,
        };
        *tree.nodes.get_mut(0) = Node {
            a: NodeChild::EMPTY,
            b: NodeChild::EMPTY,
        };
        *tree.metanodes.get_mut(0) = Metanode {
            parent: -1,
            index_in_parent: -1,
        };
        tree
    }

    fn allocate_node(&mut self, pool: &mut BufferPool) -> i32 {
        if self.node_count == self.nodes.len() {
            let count = self.node_count;
            pool.resize_to_at_least(&mut self.nodes, count * 2, count);
            pool.resize_to_at_least(&mut self.metanodes, count * 2, count);
        }
        let index = self.node_count;
        self.node_count += 1;
        index
    }

    fn allocate_leaf(&mut self, node_index: i32, child_index: i32, pool: &mut BufferPool) -> i32 {
        if self.leaf_count == self.leaves.len() {
            let count = self.leaf_count;
            pool.resize_to_at_least(&mut self.leaves, count * 2, count);
        }
        let index = self.leaf_count;
        self.leaf_count += 1;
        *self.leaves.get_mut(index) = Leaf {
            node_index,
            child_index,
        };
        index
    }

    #[inline(always)]
    fn child_mut(node: &mut Node, child_index: i32) -> &mut NodeChild {
        if child_index == 0 {
            &mut node.a
        } else {
            &mut node.b
        }
    }

    /// Adds a leaf with the given bounds and returns its index.
    pub fn add(&mut self, bounds: &BoundingBox, pool: &mut BufferPool) -> i32 {
        if self.leaf_count < 2 {
            // With fewer than two leaves the root always has a free slot.
            let slot = if self.nodes.get(0).a.leaf_count == 0 { 0 } else { 1 };
            let leaf_index = self.allocate_leaf(0, slot, pool);
            *Self::child_mut(self.nodes.get_mut(0), slot) = NodeChild {
                min: bounds.min,
                max: bounds.max,
                index: encode_leaf(leaf_index),
                leaf_count: 1,
            };
            return leaf_index;
        }
        let mut node_index = 0;
        loop {
            let node = *self.nodes.get(node_index);
            // Descend into the child whose bounds grow the least.
            let merged_a = node.a.bounds().merged(bounds);
            let merged_b = node.b.bounds().merged(bounds);
            let cost_a = merged_a.half_area() - node.a.bounds().half_area();
            let cost_b = merged_b.half_area() - node.b.bounds().half_area();
            let use_a = cost_a < cost_b || (cost_a == cost_b && node.a.leaf_count <= node.b.leaf_count);
            let (child_index, merged) = if use_a { (0, merged_a) } else { (1, merged_b) };
            let chosen = *if use_a { &node.a } else { &node.b };
            if chosen.leaf_count == 0 {
                // Removals can leave an empty slot in the root; fill it.
                let leaf_index = self.allocate_leaf(node_index, child_index, pool);
                *Self::child_mut(self.nodes.get_mut(node_index), child_index) = NodeChild {
                    min: bounds.min,
                    max: bounds.max,
                    index: encode_leaf(leaf_index),
                    leaf_count: 1,
                };
                return leaf_index;
            }
            if chosen.is_leaf() {
                // Split the leaf slot: a fresh node holds the old leaf and
                // the new one.
                let new_node_index = self.allocate_node(pool);
                let leaf_index = self.allocate_leaf(new_node_index, 1, pool);
                let old_leaf = decode_leaf(chosen.index);
                *self.leaves.get_mut(old_leaf) = Leaf {
                    node_index: new_node_index,
                    child_index: 0,
                };
                *self.nodes.get_mut(new_node_index) = Node {
                    a: chosen,
                    b: NodeChild {
                        min: bounds.min,
                        max: bounds.max,
                        index: encode_leaf(leaf_index),
                        leaf_count: 1,
                    },
                };
                *self.metanodes.get_mut(new_node_index) = Metanode {
                    parent: node_index,
                    index_in_parent: child_index,
                };
                let slot = Self::child_mut(self.nodes.get_mut(node_index), child_index);
                slot.min = merged.min;
                slot.max = merged.max;
                slot.index = new_node_index;
                slot.leaf_count = 2;
                return leaf_index;
            }
            // Account for the incoming leaf on the way down.
            let slot = Self::child_mut(self.nodes.get_mut(node_index), child_index);
            slot.min = merged.min;
            slot.max = merged.max;
            slot.leaf_count += 1;
            node_index = chosen.index;
        }
    }

    /// Removes a leaf. Returns the index of the leaf that was moved into the
    /// removed leaf's index, or -1 if none was.
    pub fn remove_at(&mut self, leaf_index: i32) -> i32 {
        debug_assert!(leaf_index >= 0 && leaf_index < self.leaf_count);
        let leaf = *self.leaves.get(leaf_index);
        let metanode = *self.metanodes.get(leaf.node_index);
        if metanode.parent < 0 {
            // Leaf lives in the root; just clear the slot.
            *Self::child_mut(self.nodes.get_mut(leaf.node_index), leaf.child_index) =
                NodeChild::EMPTY;
        } else {
            // Pull the sibling up into the parent's slot and free the node.
            let node = *self.nodes.get(leaf.node_index);
            let sibling = if leaf.child_index == 0 { node.b } else { node.a };
            debug_assert!(sibling.leaf_count > 0, "Non-root nodes have two children.");
            *Self::child_mut(
                self.nodes.get_mut(metanode.parent),
                metanode.index_in_parent,
            ) = sibling;
            if sibling.is_leaf() {
                *self.leaves.get_mut(decode_leaf(sibling.index)) = Leaf {
                    node_index: metanode.parent,
                    child_index: metanode.index_in_parent,
                };
            } else {
                *self.metanodes.get_mut(sibling.index) = Metanode {
                    parent: metanode.parent,
                    index_in_parent: metanode.index_in_parent,
                };
            }
            // Ancestors above the parent still count the removed leaf.
            let mut ancestor = metanode.parent;
            loop {
                let ancestor_meta = *self.metanodes.get(ancestor);
                if ancestor_meta.parent < 0 {
                    break;
                }
                Self::child_mut(
                    self.nodes.get_mut(ancestor_meta.parent),
                    ancestor_meta.index_in_parent,
                )
                .leaf_count -= 1;
                ancestor = ancestor_meta.parent;
            }
            self.free_node(leaf.node_index);
        }
        // Swap-remove the leaf record itself.
        self.leaf_count -= 1;
        if leaf_index < self.leaf_count {
            let moved_leaf_old_index = self.leaf_count;
            let moved = *self.leaves.get(moved_leaf_old_index);
            *self.leaves.get_mut(leaf_index) = moved;
            Self::child_mut(self.nodes.get_mut(moved.node_index), moved.child_index).index =
                encode_leaf(leaf_index);
            moved_leaf_old_index
        } else {
            -1
        }
    }

    fn free_node(&mut self, node_index: i32) {
        self.node_count -= 1;
        let last = self.node_count;
        if node_index == last {
            return;
        }
        let moved_node = *self.nodes.get(last);
        let moved_meta = *self.metanodes.get(last);
        *self.nodes.get_mut(node_index) = moved_node;
        *self.metanodes.get_mut(node_index) = moved_meta;
        // The moved node's parent pointed at its old index.
        Self::child_mut(
            self.nodes.get_mut(moved_meta.parent),
            moved_meta.index_in_parent,
        )
        .index = node_index;
        // Its children point back at it.
        for (slot, child) in [(0, moved_node.a), (1, moved_node.b)] {
            if child.leaf_count == 0 {
                continue;
            }
            if child.is_leaf() {
                self.leaves.get_mut(decode_leaf(child.index)).node_index = node_index;
            } else {
                self.metanodes.get_mut(child.index).parent = node_index;
            }
            let _ = slot;
        }
    }

    /// Direct pointers to a leaf's bounds, for in-place updates before a
    /// refit.
    #[inline(always)]
    pub fn get_bounds_pointers(&self, leaf_index: i32) -> (*mut Vec3, *mut Vec3) {
        debug_assert!(leaf_index >= 0 && leaf_index < self.leaf_count);
        let leaf = *self.leaves.get(leaf_index);
        unsafe {
            let node = self.nodes.shared_mut_ptr().add(leaf.node_index as usize);
            let child = if leaf.child_index == 0 {
                &mut (*node).a
            } else {
                &mut (*node).b
            };
            (&mut child.min as *mut Vec3, &mut child.max as *mut Vec3)
        }
    }

    pub fn get_leaf_bounds(&self, leaf_index: i32) -> BoundingBox {
        let leaf = *self.leaves.get(leaf_index);
        let node = self.nodes.get(leaf.node_index);
        let child = if leaf.child_index == 0 { &node.a } else { &node.b };
        child.bounds()
    }

    /// Updates a leaf's stored bounds. Internal node bounds are stale until
    /// the next refit.
    pub fn update_bounds(&mut self, leaf_index: i32, bounds: &BoundingBox) {
        let leaf = *self.leaves.get(leaf_index);
        let child = Self::child_mut(self.nodes.get_mut(leaf.node_index), leaf.child_index);
        child.min = bounds.min;
        child.max = bounds.max;
    }

    /// Recomputes internal bounds bottom-up from the current leaf bounds.
    pub fn refit(&mut self) {
        if self.leaf_count > 2 {
            self.refit_node(0);
        }
    }

    fn refit_node(&mut self, node_index: i32) -> BoundingBox {
        let node = *self.nodes.get(node_index);
        let mut merged = BoundingBox::INVERTED;
        for (slot, child) in [(0, node.a), (1, node.b)] {
            if child.leaf_count == 0 {
                continue;
            }
            let bounds = if child.is_leaf() {
                child.bounds()
            } else {
                let refit = self.refit_node(child.index);
                let slot_ref = Self::child_mut(self.nodes.get_mut(node_index), slot);
                slot_ref.min = refit.min;
                slot_ref.max = refit.max;
                refit
            };
            merged = merged.merged(&bounds);
        }
        merged
    }

    // --- overlap enumeration ---

    /// Enumerates all intersecting leaf pairs within the tree. Each pair is
    /// produced exactly once.
    pub fn for_each_self_overlap(&self, visitor: &mut impl FnMut(i32, i32)) {
        if self.leaf_count < 2 {
            return;
        }
        self.self_test_node(0, visitor);
    }

    fn self_test_node(&self, node_index: i32, visitor: &mut impl FnMut(i32, i32)) {
        let node = *self.nodes.get(node_index);
        if node.a.leaf_count > 1 {
            self.self_test_node(node.a.index, visitor);
        }
        if node.b.leaf_count > 1 {
            self.self_test_node(node.b.index, visitor);
        }
        if node.a.leaf_count > 0
            && node.b.leaf_count > 0
            && node.a.bounds().intersects(&node.b.bounds())
        {
            self.test_subtrees(&node.a, &node.b, visitor);
        }
    }

    fn test_subtrees(&self, a: &NodeChild, b: &NodeChild, visitor: &mut impl FnMut(i32, i32)) {
        if !a.bounds().intersects(&b.bounds()) {
            return;
        }
        match (a.is_leaf(), b.is_leaf()) {
            (true, true) => visitor(decode_leaf(a.index), decode_leaf(b.index)),
            (true, false) => {
                let node = self.nodes.get(b.index);
                self.test_subtrees(a, &node.a, visitor);
                self.test_subtrees(a, &node.b, visitor);
            }
            (false, true) => {
                let node = self.nodes.get(a.index);
                self.test_subtrees(&node.a, b, visitor);
                self.test_subtrees(&node.b, b, visitor);
            }
            (false, false) => {
                let node_a = *self.nodes.get(a.index);
                let node_b = *self.nodes.get(b.index);
                self.test_subtrees(&node_a.a, &node_b.a, visitor);
                self.test_subtrees(&node_a.a, &node_b.b, visitor);
                self.test_subtrees(&node_a.b, &node_b.a, visitor);
                self.test_subtrees(&node_a.b, &node_b.b, visitor);
            }
        }
    }

    /// Enumerates intersecting leaf pairs between two trees. The first
    /// visitor argument is a leaf of `self`, the second a leaf of `other`.
    pub fn for_each_intertree_overlap(&self, other: &Tree, visitor: &mut impl FnMut(i32, i32)) {
        if self.leaf_count == 0 || other.leaf_count == 0 {
            return;
        }
        let root_a = *self.nodes.get(0);
        let root_b = *other.nodes.get(0);
        for a in [root_a.a, root_a.b] {
            if a.leaf_count == 0 {
                continue;
            }
            for b in [root_b.a, root_b.b] {
                if b.leaf_count == 0 {
                    continue;
                }
                self.intertree_test(&a, other, &b, visitor);
            }
        }
    }

    fn intertree_test(
        &self,
        a: &NodeChild,
        other: &Tree,
        b: &NodeChild,
        visitor: &mut impl FnMut(i32, i32),
    ) {
        if !a.bounds().intersects(&b.bounds()) {
            return;
        }
        match (a.is_leaf(), b.is_leaf()) {
            (true, true) => visitor(decode_leaf(a.index), decode_leaf(b.index)),
            (true, false) => {
                let node = other.nodes.get(b.index);
                self.intertree_test(a, other, &node.a, visitor);
                self.intertree_test(a, other, &node.b, visitor);
            }
            (false, true) => {
                let node = *self.nodes.get(a.index);
                self.intertree_test(&node.a, other, b, visitor);
                self.intertree_test(&node.b, other, b, visitor);
            }
            (false, false) => {
                let node_a = *self.nodes.get(a.index);
                let node_b = *other.nodes.get(b.index);
                self.intertree_test(&node_a.a, other, &node_b.a, visitor);
                self.intertree_test(&node_a.a, other, &node_b.b, visitor);
                self.intertree_test(&node_a.b, other, &node_b.a, visitor);
                self.intertree_test(&node_a.b, other, &node_b.b, visitor);
            }
        }
    }

    pub fn clear(&mut self) {
        self.node_count = 1;
        self.leaf_count = 0;
        *self.nodes.get_mut(0) = Node {
            a: NodeChild::EMPTY,
            b: NodeChild::EMPTY,
        };
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        pool.return_buffer(&mut self.nodes);
        pool.return_buffer(&mut self.metanodes);
        pool.return_buffer(&mut self.leaves);
        self.node_count = 0;
        self.leaf_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box_at(x: f32, y: f32, z: f32) -> BoundingBox {
        BoundingBox::new(
            Vec3::new(x - 0.5, y - 0.5, z - 0.5),
            Vec3::new(x + 0.5, y + 0.5, z + 0.5),
        )
    }

    fn brute_force_pairs(bounds: &[BoundingBox]) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for i in 0..bounds.len() {
            for j in (i + 1)..bounds.len() {
                if bounds[i].intersects(&bounds[j]) {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }

    #[test]
    fn self_overlaps_match_brute_force() {
        let mut pool = BufferPool::new(65536);
        let mut tree = Tree::new(8, &mut pool);
        let mut bounds = Vec::new();
        // A line of touching boxes plus a few isolated ones.
        for i in 0..12 {
            let b = unit_box_at(i as f32 * 0.75, 0.0, 0.0);
            tree.add(&b, &mut pool);
            bounds.push(b);
        }
        for i in 0..5 {
            let b = unit_box_at(100.0 + i as f32 * 10.0, 0.0, 0.0);
            tree.add(&b, &mut pool);
            bounds.push(b);
        }
        let mut found = Vec::new();
        tree.for_each_self_overlap(&mut |a, b| {
            let (a, b) = if a < b { (a, b) } else { (b, a) };
            found.push((a as usize, b as usize));
        });
        found.sort_unstable();
        let mut expected = brute_force_pairs(&bounds);
        expected.sort_unstable();
        assert_eq!(found, expected);
        tree.dispose(&mut pool);
        pool.clear();
    }

    #[test]
    fn removal_reports_moved_leaf_and_keeps_tree_valid() {
        let mut pool = BufferPool::new(65536);
        let mut tree = Tree::new(4, &mut pool);
        let mut indices = Vec::new();
        for i in 0..10 {
            indices.push(tree.add(&unit_box_at(i as f32 * 3.0, 0.0, 0.0), &mut pool));
        }
        // Remove a middle leaf; the last leaf should be reported as moved.
        let moved = tree.remove_at(4);
        assert_eq!(moved, 9);
        assert_eq!(tree.leaf_count, 9);
        // Leaf records must still resolve to the node children encoding them.
        for leaf_index in 0..tree.leaf_count {
            let leaf = *tree.leaves.get(leaf_index);
            let node = tree.nodes.get(leaf.node_index);
            let child = if leaf.child_index == 0 { &node.a } else { &node.b };
            assert_eq!(decode_leaf(child.index), leaf_index);
        }
        tree.dispose(&mut pool);
        pool.clear();
    }

    #[test]
    fn intertree_overlaps_match_brute_force() {
        let mut pool = BufferPool::new(65536);
        let mut tree_a = Tree::new(4, &mut pool);
        let mut tree_b = Tree::new(4, &mut pool);
        let mut bounds_a = Vec::new();
        let mut bounds_b = Vec::new();
        for i in 0..9 {
            let b = unit_box_at(i as f32 * 1.5, 0.0, 0.0);
            tree_a.add(&b, &mut pool);
            bounds_a.push(b);
        }
        for i in 0..7 {
            let b = unit_box_at(i as f32 * 2.0, 0.5, 0.0);
            tree_b.add(&b, &mut pool);
            bounds_b.push(b);
        }
        let mut found = Vec::new();
        tree_a.for_each_intertree_overlap(&tree_b, &mut |a, b| {
            found.push((a as usize, b as usize));
        });
        found.sort_unstable();
        let mut expected = Vec::new();
        for (i, a) in bounds_a.iter().enumerate() {
            for (j, b) in bounds_b.iter().enumerate() {
                if a.intersects(b) {
                    expected.push((i, j));
                }
            }
        }
        expected.sort_unstable();
        assert_eq!(found, expected);
        tree_a.dispose(&mut pool);
        tree_b.dispose(&mut pool);
        pool.clear();
    }

    #[test]
    fn refit_tightens_internal_bounds_after_leaf_motion() {
        let mut pool = BufferPool::new(65536);
        let mut tree = Tree::new(4, &mut pool);
        for i in 0..8 {
            tree.add(&unit_box_at(i as f32, 0.0, 0.0), &mut pool);
        }
        // Move leaf 0 far away and refit; a self query against its new
        // position must find it.
        tree.update_bounds(0, &unit_box_at(500.0, 0.0, 0.0));
        tree.refit();
        let mut probe = Tree::new(2, &mut pool);
        probe.add(&unit_box_at(500.2, 0.0, 0.0), &mut pool);
        let mut hits = Vec::new();
        tree.for_each_intertree_overlap(&probe, &mut |a, _| hits.push(a));
        assert_eq!(hits, vec![0]);
        tree.dispose(&mut pool);
        probe.dispose(&mut pool);
        pool.clear();
    }
}
