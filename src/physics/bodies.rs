//! The collection of all bodies, active and sleeping, plus the wide
//! gather/scatter paths the solver runs on.

use crate::physics::body_description::BodyDescription;
use crate::physics::body_properties::{
    BodyInertia, BodyInertiaWide, BodyVelocity, BodyVelocityWide, RigidPose,
};
use crate::physics::body_set::BodySet;
use crate::physics::handles::{BodyHandle, ConstraintHandle};
use crate::utilities::memory::buffer::Buffer;
use crate::utilities::memory::buffer_pool::BufferPool;
use crate::utilities::memory::id_pool::IdPool;
use crate::utilities::wide::WideInt;

/// Location of a body in memory: which set owns it and where it sits.
/// Set 0 is the active set; higher sets are sleeping islands. A negative set
/// index marks an unused handle slot.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct BodyMemoryLocation {
    pub set_index: i32,
    pub index: i32,
}

pub struct Bodies {
    pub handle_to_location: Buffer<BodyMemoryLocation>,
    pub handle_pool: IdPool,
    /// Slot 0 is the active set; later slots hold sleeping islands and are
    /// not necessarily contiguous.
    pub sets: Buffer<BodySet>,
    pub minimum_constraint_capacity_per_body: i32,
}

impl Bodies {
    pub fn new(
        pool: &mut BufferPool,
        initial_body_capacity: i32,
        initial_island_capacity: i32,
        minimum_constraint_capacity_per_body: i32,
    ) -> Self {
        let handle_pool = IdPool::new(initial_body_capacity, pool);
        let mut handle_to_location: Buffer<BodyMemoryLocation> =
            pool.take_at_least(initial_body_capacity);
        Self::invalidate_handle_slots(&mut handle_to_location, 0);
        let mut sets: Buffer<BodySet> = pool.take_at_least(initial_island_capacity + 1);
        sets.clear(0, sets.len());
        *sets.get_mut(0) = BodySet::new(initial_body_capacity, pool);
        Self {
            handle_to_location,
            handle_pool,
            sets,
            minimum_constraint_capacity_per_body,
        }
    }

    fn invalidate_handle_slots(buffer: &mut Buffer<BodyMemoryLocation>, start: i32) {
        for i in start..buffer.len() {
            *buffer.get_mut(i) = BodyMemoryLocation {
                set_index: -1,
                index: -1,
            };
        }
    }

    #[inline(always)]
    pub fn active_set(&self) -> &BodySet {
        self.sets.get(0)
    }

    #[inline(always)]
    pub fn active_set_mut(&mut self) -> &mut BodySet {
        self.sets.get_mut(0)
    }

    #[inline(always)]
    pub fn is_kinematic(inertia: &BodyInertia) -> bool {
        inertia.inverse_mass == 0.0
            && inertia.inverse_inertia_tensor.xx == 0.0
            && inertia.inverse_inertia_tensor.yx == 0.0
            && inertia.inverse_inertia_tensor.yy == 0.0
            && inertia.inverse_inertia_tensor.zx == 0.0
            && inertia.inverse_inertia_tensor.zy == 0.0
            && inertia.inverse_inertia_tensor.zz == 0.0
    }

    #[inline(always)]
    pub fn body_exists(&self, handle: BodyHandle) -> bool {
        handle.0 >= 0
            && handle.0 < self.handle_to_location.len()
            && self.handle_to_location.get(handle.0).set_index >= 0
    }

    #[inline(always)]
    pub fn validate_existing_handle(&self, handle: BodyHandle) {
        debug_assert!(handle.0 >= 0, "Handles must be nonnegative.");
        debug_assert!(
            self.body_exists(handle),
            "Handle must refer to an existing body."
        );
        #[cfg(debug_assertions)]
        {
            let location = *self.handle_to_location.get(handle.0);
            let set = self.sets.get(location.set_index);
            debug_assert!(set.allocated());
            debug_assert!(location.index >= 0 && location.index < set.count);
            debug_assert!(
                *set.index_to_handle.get(location.index) == handle,
                "handle->location and index->handle must agree."
            );
        }
    }

    /// Adds a new body to the active set. The caller is responsible for
    /// giving shapeful collidables a broadphase leaf.
    pub fn add(&mut self, description: &BodyDescription, pool: &mut BufferPool) -> BodyHandle {
        debug_assert!(self.handle_to_location.allocated());
        let handle_index = self.handle_pool.take();
        if handle_index == self.handle_to_location.len() {
            let old_capacity = self.handle_to_location.len();
            pool.resize_to_at_least(&mut self.handle_to_location, old_capacity * 2, old_capacity);
            Self::invalidate_handle_slots(&mut self.handle_to_location, old_capacity);
        }
        let handle = BodyHandle(handle_index);
        let minimum_capacity = self.minimum_constraint_capacity_per_body;
        let index = self
            .sets
            .get_mut(0)
            .add(description, handle, minimum_capacity, pool);
        self.sets.get_mut(0).collidables.get_mut(index).broad_phase_index = -1;
        *self.handle_to_location.get_mut(handle_index) = BodyMemoryLocation {
            set_index: 0,
            index,
        };
        handle
    }

    /// Removes an active body by index, disposing its constraint list. The
    /// caller must have removed all attached constraints and the broadphase
    /// leaf already. Returns the removed handle and the handle of any body
    /// moved into the vacated slot.
    pub fn remove_at(
        &mut self,
        active_body_index: i32,
        pool: &mut BufferPool,
    ) -> (BodyHandle, Option<BodyHandle>) {
        debug_assert!(active_body_index >= 0 && active_body_index < self.active_set().count);
        debug_assert!(
            self.active_set().constraints.get(active_body_index).count == 0,
            "All constraints must be removed before the body."
        );
        self.sets
            .get_mut(0)
            .constraints
            .get_mut(active_body_index)
            .dispose(pool);
        let (handle, moved_handle) = self.sets.get_mut(0).remove_at(active_body_index);
        if let Some(moved) = moved_handle {
            self.handle_to_location.get_mut(moved.0).index = active_body_index;
        }
        self.handle_pool.return_id(handle.0, pool);
        *self.handle_to_location.get_mut(handle.0) = BodyMemoryLocation {
            set_index: -1,
            index: -1,
        };
        (handle, moved_handle)
    }

    pub fn location(&self, handle: BodyHandle) -> BodyMemoryLocation {
        *self.handle_to_location.get(handle.0)
    }

    pub fn get_description(&self, handle: BodyHandle) -> BodyDescription {
        self.validate_existing_handle(handle);
        let location = self.location(handle);
        self.sets.get(location.set_index).get_description(location.index)
    }

    pub fn pose(&self, handle: BodyHandle) -> &RigidPose {
        self.validate_existing_handle(handle);
        let location = self.location(handle);
        &self
            .sets
            .get(location.set_index)
            .dynamics_state
            .get(location.index)
            .motion
            .pose
    }

    pub fn velocity(&self, handle: BodyHandle) -> &BodyVelocity {
        self.validate_existing_handle(handle);
        let location = self.location(handle);
        &self
            .sets
            .get(location.set_index)
            .dynamics_state
            .get(location.index)
            .motion
            .velocity
    }

    /// Mutable velocity access. Only valid for active bodies; wake the body
    /// first.
    pub fn velocity_mut(&mut self, handle: BodyHandle) -> &mut BodyVelocity {
        self.validate_existing_handle(handle);
        let location = self.location(handle);
        debug_assert!(location.set_index == 0, "Body must be active for mutation.");
        &mut self
            .sets
            .get_mut(0)
            .dynamics_state
            .get_mut(location.index)
            .motion
            .velocity
    }

    pub fn local_inertia(&self, handle: BodyHandle) -> &BodyInertia {
        self.validate_existing_handle(handle);
        let location = self.location(handle);
        &self
            .sets
            .get(location.set_index)
            .dynamics_state
            .get(location.index)
            .inertia
            .local
    }

    pub fn count_bodies(&self) -> i32 {
        let mut count = 0;
        for i in 0..self.sets.len() {
            let set = self.sets.get(i);
            if set.allocated() {
                count += set.count;
            }
        }
        count
    }

    pub(crate) fn add_constraint_reference(
        &mut self,
        body_index: i32,
        constraint_handle: ConstraintHandle,
        body_index_in_constraint: i32,
        pool: &mut BufferPool,
    ) {
        self.sets.get_mut(0).add_constraint_reference(
            body_index,
            constraint_handle,
            body_index_in_constraint,
            pool,
        );
    }

    pub(crate) fn remove_constraint_reference(
        &mut self,
        body_index: i32,
        constraint_handle: ConstraintHandle,
    ) -> bool {
        self.sets
            .get_mut(0)
            .remove_constraint_reference(body_index, constraint_handle)
    }

    /// Grows the sets buffer to hold at least `capacity` sets, preserving
    /// allocated sets.
    pub(crate) fn ensure_sets_capacity(&mut self, capacity: i32, pool: &mut BufferPool) {
        if capacity > self.sets.len() {
            let old_length = self.sets.len();
            pool.resize_to_at_least(&mut self.sets, capacity, old_length);
            let new_length = self.sets.len();
            self.sets.clear(old_length, new_length - old_length);
        }
    }

    // --- solver gather/scatter hot paths ---

    /// Gathers pose, velocity, and world inertia bundles for up to a
    /// bundle's worth of active body indices. Lanes at or beyond `count` are
    /// left untouched; solver lanes beyond the constraint count are never
    /// scattered back.
    #[inline(always)]
    pub fn gather_state(
        &self,
        references: &WideInt,
        count: i32,
        position: &mut crate::utilities::vector3_wide::Vector3Wide,
        orientation: &mut crate::utilities::quaternion_wide::QuaternionWide,
        velocity: &mut BodyVelocityWide,
        inertia: &mut BodyInertiaWide,
    ) {
        let states = &self.active_set().dynamics_state;
        for lane in 0..count as usize {
            let body_index = references.0[lane];
            debug_assert!(body_index >= 0 && body_index < self.active_set().count);
            let state = states.get(body_index);
            position.write_slot(state.motion.pose.position, lane);
            orientation.write_slot(state.motion.pose.orientation, lane);
            velocity.linear.write_slot(state.motion.velocity.linear, lane);
            velocity
                .angular
                .write_slot(state.motion.velocity.angular, lane);
            inertia
                .inverse_inertia_tensor
                .write_slot(&state.inertia.world.inverse_inertia_tensor, lane);
            inertia
                .inverse_mass
                .write_slot(state.inertia.world.inverse_mass, lane);
        }
    }

    /// Gathers only velocities; used by solve iterations after the prestep
    /// cached everything else in projections.
    #[inline(always)]
    pub fn gather_velocities(
        &self,
        references: &WideInt,
        count: i32,
        velocity: &mut BodyVelocityWide,
    ) {
        let states = &self.active_set().dynamics_state;
        for lane in 0..count as usize {
            let body_index = references.0[lane];
            let state = states.get(body_index);
            velocity.linear.write_slot(state.motion.velocity.linear, lane);
            velocity
                .angular
                .write_slot(state.motion.velocity.angular, lane);
        }
    }

    /// Scatters velocity lanes back into body storage.
    ///
    /// Writes go through the buffer's shared pointer: batch disjointness
    /// guarantees no two concurrently solved constraints touch the same
    /// dynamic body. Kinematic lanes are skipped entirely; impulses cannot
    /// affect them, and they don't block batch membership, so the same
    /// kinematic may appear in many lanes at once.
    #[inline(always)]
    pub fn scatter_velocities(&self, references: &WideInt, count: i32, velocity: &BodyVelocityWide) {
        let states = self.active_set().dynamics_state.shared_mut_ptr();
        for lane in 0..count as usize {
            let body_index = references.0[lane];
            debug_assert!(body_index >= 0 && body_index < self.active_set().count);
            unsafe {
                let state = &mut *states.add(body_index as usize);
                if Self::is_kinematic(&state.inertia.world) {
                    continue;
                }
                state.motion.velocity.linear = velocity.linear.read_slot(lane);
                state.motion.velocity.angular = velocity.angular.read_slot(lane);
            }
        }
    }

    pub fn clear(&mut self, pool: &mut BufferPool) {
        self.sets.get_mut(0).clear(pool);
        for i in 1..self.sets.len() {
            let set = self.sets.get_mut(i);
            if set.allocated() {
                set.dispose(pool);
            }
        }
        Self::invalidate_handle_slots(&mut self.handle_to_location, 0);
        self.handle_pool.clear();
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        for i in 0..self.sets.len() {
            let set = self.sets.get_mut(i);
            if set.allocated() {
                set.dispose(pool);
            }
        }
        pool.return_buffer(&mut self.sets);
        pool.return_buffer(&mut self.handle_to_location);
        self.handle_pool.dispose(pool);
    }
}

// Solver workers share &Bodies across threads; scatter targets are disjoint
// by batch construction.
unsafe impl Sync for Bodies {}
unsafe impl Send for Bodies {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body_description::{BodyActivityDescription, CollidableDescription};
    use glam::Vec3;

    fn test_description(y: f32) -> BodyDescription {
        BodyDescription::create_dynamic(
            RigidPose::at(Vec3::new(0.0, y, 0.0)),
            BodyInertia::for_sphere(1.0, 0.5),
            CollidableDescription::none(),
            BodyActivityDescription::default(),
        )
    }

    #[test]
    fn handle_bijection_survives_removals() {
        let mut pool = BufferPool::new(65536);
        let mut bodies = Bodies::new(&mut pool, 8, 2, 4);
        let handles: Vec<_> = (0..20)
            .map(|i| bodies.add(&test_description(i as f32), &mut pool))
            .collect();
        // Remove a few from the middle; swap-removal must keep the maps in
        // agreement.
        for &handle in &[handles[3], handles[11], handles[0], handles[19]] {
            let index = bodies.location(handle).index;
            bodies.remove_at(index, &mut pool);
        }
        for &handle in &handles {
            if bodies.body_exists(handle) {
                let location = bodies.location(handle);
                assert_eq!(
                    *bodies
                        .sets
                        .get(location.set_index)
                        .index_to_handle
                        .get(location.index),
                    handle
                );
            }
        }
        assert_eq!(bodies.count_bodies(), 16);
        bodies.dispose(&mut pool);
        pool.clear();
    }

    #[test]
    fn kinematic_detection_requires_all_zeroes() {
        assert!(Bodies::is_kinematic(&BodyInertia::default()));
        assert!(!Bodies::is_kinematic(&BodyInertia::for_sphere(1.0, 1.0)));
        let mut partial = BodyInertia::default();
        partial.inverse_inertia_tensor.zy = 0.1;
        assert!(!Bodies::is_kinematic(&partial));
    }
}
