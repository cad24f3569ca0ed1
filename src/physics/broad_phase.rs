//! Two-tree broad phase: one tree over active collidables, one over statics
//! and sleeping bodies.

use crate::physics::collidable::CollidableReference;
use crate::physics::tree::Tree;
use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::memory::buffer::Buffer;
use crate::utilities::memory::buffer_pool::BufferPool;
use glam::Vec3;

pub struct BroadPhase {
    pub active_tree: Tree,
    pub static_tree: Tree,
    /// Leaf index -> owning collidable, per tree.
    pub active_leaves: Buffer<CollidableReference>,
    pub static_leaves: Buffer<CollidableReference>,
}

impl BroadPhase {
    pub fn new(
        initial_active_capacity: i32,
        initial_static_capacity: i32,
        pool: &mut BufferPool,
    ) -> Self {
        Self {
            active_tree: Tree::new(initial_active_capacity, pool),
            static_tree: Tree::new(initial_static_capacity, pool),
            active_leaves: pool.take_at_least(initial_active_capacity),
            static_leaves: pool.take_at_least(initial_static_capacity),
        }
    }

    fn add(
        tree: &mut Tree,
        leaves: &mut Buffer<CollidableReference>,
        reference: CollidableReference,
        bounds: &BoundingBox,
        pool: &mut BufferPool,
    ) -> i32 {
        let leaf_index = tree.add(bounds, pool);
        if leaf_index >= leaves.len() {
            let count = leaf_index;
            pool.resize_to_at_least(leaves, count * 2, count);
        }
        *leaves.get_mut(leaf_index) = reference;
        leaf_index
    }

    pub fn add_active(
        &mut self,
        reference: CollidableReference,
        bounds: &BoundingBox,
        pool: &mut BufferPool,
    ) -> i32 {
        Self::add(
            &mut self.active_tree,
            &mut self.active_leaves,
            reference,
            bounds,
            pool,
        )
    }

    pub fn add_static(
        &mut self,
        reference: CollidableReference,
        bounds: &BoundingBox,
        pool: &mut BufferPool,
    ) -> i32 {
        Self::add(
            &mut self.static_tree,
            &mut self.static_leaves,
            reference,
            bounds,
            pool,
        )
    }

    /// Removes an active leaf. If another leaf was moved into the vacated
    /// index, returns its owning collidable so the owner's stored leaf index
    /// can be patched.
    pub fn remove_active_at(&mut self, index: i32) -> Option<CollidableReference> {
        let moved_old_index = self.active_tree.remove_at(index);
        if moved_old_index >= 0 {
            let moved_reference = *self.active_leaves.get(moved_old_index);
            *self.active_leaves.get_mut(index) = moved_reference;
            Some(moved_reference)
        } else {
            None
        }
    }

    pub fn remove_static_at(&mut self, index: i32) -> Option<CollidableReference> {
        let moved_old_index = self.static_tree.remove_at(index);
        if moved_old_index >= 0 {
            let moved_reference = *self.static_leaves.get(moved_old_index);
            *self.static_leaves.get_mut(index) = moved_reference;
            Some(moved_reference)
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn get_active_bounds_pointers(&self, leaf_index: i32) -> (*mut Vec3, *mut Vec3) {
        self.active_tree.get_bounds_pointers(leaf_index)
    }

    pub fn update_active_bounds(&mut self, leaf_index: i32, bounds: &BoundingBox) {
        self.active_tree.update_bounds(leaf_index, bounds);
    }

    /// Refits internal nodes after leaf bounds updates.
    pub fn update(&mut self) {
        self.active_tree.refit();
    }

    /// Enumerates candidate pairs: active-active self overlaps plus
    /// active-static cross overlaps. No duplicates are produced.
    pub fn for_each_overlap(
        &self,
        visitor: &mut impl FnMut(CollidableReference, CollidableReference),
    ) {
        let active_leaves = &self.active_leaves;
        let static_leaves = &self.static_leaves;
        self.active_tree.for_each_self_overlap(&mut |a, b| {
            visitor(*active_leaves.get(a), *active_leaves.get(b));
        });
        self.active_tree
            .for_each_intertree_overlap(&self.static_tree, &mut |a, b| {
                visitor(*active_leaves.get(a), *static_leaves.get(b));
            });
    }

    pub fn clear(&mut self) {
        self.active_tree.clear();
        self.static_tree.clear();
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        self.active_tree.dispose(pool);
        self.static_tree.dispose(pool);
        pool.return_buffer(&mut self.active_leaves);
        pool.return_buffer(&mut self.static_leaves);
    }
}
