//! AOS storage for one group of bodies: the active set or a sleeping
//! island.

use crate::physics::body_description::BodyDescription;
use crate::physics::body_properties::{BodyActivity, BodyDynamics, BodyInertia};
use crate::physics::collidable::Collidable;
use crate::physics::handles::{BodyHandle, ConstraintHandle};
use crate::utilities::collections::quick_list::QuickList;
use crate::utilities::memory::buffer::Buffer;
use crate::utilities::memory::buffer_pool::BufferPool;

/// Connection from a body to one of the constraints referencing it.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct BodyConstraintReference {
    pub connecting_constraint_handle: ConstraintHandle,
    /// Which slot the body occupies within the constraint (0 for A, 1 for B).
    pub body_index_in_constraint: i32,
}

/// Bodies are stored AOS; the solver's gathers are noncontiguous regardless
/// of layout, and integration is bandwidth bound either way.
pub struct BodySet {
    pub index_to_handle: Buffer<BodyHandle>,
    pub dynamics_state: Buffer<BodyDynamics>,
    pub collidables: Buffer<Collidable>,
    pub activity: Buffer<BodyActivity>,
    /// Constraint list per body. During sleep the list buffer migrates with
    /// the body rather than being rebuilt.
    pub constraints: Buffer<QuickList<BodyConstraintReference>>,
    pub count: i32,
}

impl Default for BodySet {
    fn default() -> Self {
        Self {
            index_to_handle: Buffer::default(),
            dynamics_state: Buffer::default(),
            collidables: Buffer::default(),
            activity: Buffer::default(),
            constraints: Buffer::default(),
            count: 0,
        }
    }
}

impl BodySet {
    #[inline(always)]
    pub fn allocated(&self) -> bool {
        self.index_to_handle.allocated()
    }

    pub fn new(initial_capacity: i32, pool: &mut BufferPool) -> Self {
        let mut set = Self::default();
        set.internal_resize(initial_capacity, pool);
        set
    }

    pub(crate) fn internal_resize(&mut self, target_capacity: i32, pool: &mut BufferPool) {
        debug_assert!(target_capacity > 0);
        let target_capacity = BufferPool::get_capacity_for_count::<i32>(target_capacity);
        pool.resize_to_at_least(&mut self.index_to_handle, target_capacity, self.count);
        pool.resize_to_at_least(&mut self.dynamics_state, target_capacity, self.count);
        pool.resize_to_at_least(&mut self.collidables, target_capacity, self.count);
        pool.resize_to_at_least(&mut self.activity, target_capacity, self.count);
        pool.resize_to_at_least(&mut self.constraints, target_capacity, self.count);
    }

    /// Adds a body and returns its index within the set.
    pub(crate) fn add(
        &mut self,
        description: &BodyDescription,
        handle: BodyHandle,
        minimum_constraint_capacity: i32,
        pool: &mut BufferPool,
    ) -> i32 {
        let index = self.count;
        if index == self.index_to_handle.len() {
            self.internal_resize(index * 2, pool);
        }
        self.count += 1;
        *self.index_to_handle.get_mut(index) = handle;
        *self.constraints.get_mut(index) =
            QuickList::with_capacity(minimum_constraint_capacity, pool);
        self.apply_description_by_index(index, description);
        index
    }

    /// Removes a body by swapping the last body into its slot. Returns the
    /// removed body's handle and, if a body was moved, that body's handle.
    ///
    /// The constraint list in the removed slot is overwritten without being
    /// disposed; true removal disposes it beforehand, and sleeping copies
    /// the list reference into the island set.
    pub(crate) fn remove_at(&mut self, index: i32) -> (BodyHandle, Option<BodyHandle>) {
        debug_assert!(index >= 0 && index < self.count);
        let removed_handle = *self.index_to_handle.get(index);
        self.count -= 1;
        if index < self.count {
            let last = self.count;
            *self.dynamics_state.get_mut(index) = *self.dynamics_state.get(last);
            *self.collidables.get_mut(index) = *self.collidables.get(last);
            *self.activity.get_mut(index) = *self.activity.get(last);
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.constraints.as_ptr().add(last as usize),
                    self.constraints.as_mut_ptr().add(index as usize),
                    1,
                );
            }
            let moved_handle = *self.index_to_handle.get(last);
            *self.index_to_handle.get_mut(index) = moved_handle;
            (removed_handle, Some(moved_handle))
        } else {
            (removed_handle, None)
        }
    }

    pub(crate) fn apply_description_by_index(&mut self, index: i32, description: &BodyDescription) {
        let state = self.dynamics_state.get_mut(index);
        state.motion.pose = description.pose;
        state.motion.velocity = description.velocity;
        state.inertia.local = description.local_inertia;
        // World inertia is refreshed by pose integration; kinematics skip the
        // refresh, so zero it up front.
        state.inertia.world = BodyInertia::default();

        let collidable = self.collidables.get_mut(index);
        collidable.shape = description.collidable.shape;
        collidable.continuity = description.collidable.continuity;
        collidable.speculative_margin = description.collidable.speculative_margin;

        let activity = self.activity.get_mut(index);
        activity.sleep_threshold = description.activity.sleep_threshold;
        activity.minimum_timesteps_under_threshold =
            description.activity.minimum_timestep_count_under_threshold;
        activity.timesteps_under_threshold_count = 0;
        activity.sleep_candidate = false;
    }

    pub fn get_description(&self, index: i32) -> BodyDescription {
        let state = self.dynamics_state.get(index);
        let collidable = self.collidables.get(index);
        let activity = self.activity.get(index);
        BodyDescription {
            pose: state.motion.pose,
            velocity: state.motion.velocity,
            local_inertia: state.inertia.local,
            collidable: crate::physics::body_description::CollidableDescription {
                shape: collidable.shape,
                speculative_margin: collidable.speculative_margin,
                continuity: collidable.continuity,
            },
            activity: crate::physics::body_description::BodyActivityDescription {
                sleep_threshold: activity.sleep_threshold,
                minimum_timestep_count_under_threshold: activity
                    .minimum_timesteps_under_threshold,
            },
        }
    }

    #[inline(always)]
    pub(crate) fn add_constraint_reference(
        &mut self,
        body_index: i32,
        constraint_handle: ConstraintHandle,
        body_index_in_constraint: i32,
        pool: &mut BufferPool,
    ) {
        let list = self.constraints.get_mut(body_index);
        debug_assert!(list.span.allocated());
        list.add(
            BodyConstraintReference {
                connecting_constraint_handle: constraint_handle,
                body_index_in_constraint,
            },
            pool,
        );
    }

    /// Removes a constraint from a body's list. Returns true when the body
    /// no longer has any constraints.
    pub(crate) fn remove_constraint_reference(
        &mut self,
        body_index: i32,
        constraint_handle: ConstraintHandle,
    ) -> bool {
        let list = self.constraints.get_mut(body_index);
        for i in 0..list.count {
            if list[i].connecting_constraint_handle == constraint_handle {
                list.fast_remove_at(i);
                break;
            }
        }
        list.count == 0
    }

    pub fn clear(&mut self, pool: &mut BufferPool) {
        for i in 0..self.count {
            self.constraints.get_mut(i).dispose(pool);
        }
        self.count = 0;
    }

    /// Returns the set's buffers without touching per-body constraint lists;
    /// used when the lists have been moved elsewhere.
    pub fn dispose_buffers(&mut self, pool: &mut BufferPool) {
        pool.return_buffer(&mut self.index_to_handle);
        pool.return_buffer(&mut self.dynamics_state);
        pool.return_buffer(&mut self.collidables);
        pool.return_buffer(&mut self.activity);
        pool.return_buffer(&mut self.constraints);
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        for i in 0..self.count {
            self.constraints.get_mut(i).dispose(pool);
        }
        self.dispose_buffers(pool);
        *self = Self::default();
    }
}
