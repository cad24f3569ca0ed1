//! Island detection and sleep migration.
//!
//! A connected component of the body-constraint graph whose dynamic members
//! are all sleep candidates migrates wholesale into a fresh inactive set:
//! bodies, constraints (batch structure preserved, references rewritten to
//! handles), pair cache entries, and broadphase leaves.

use crate::physics::bodies::Bodies;
use crate::physics::body_set::BodySet;
use crate::physics::broad_phase::BroadPhase;
use crate::physics::collidable::{CollidableMobility, CollidableReference};
use crate::physics::constraints::type_processor::MAXIMUM_BODIES_PER_CONSTRAINT;
use crate::physics::handles::{BodyHandle, ConstraintHandle};
use crate::physics::pair_cache::PairCache;
use crate::physics::solver::Solver;
use crate::utilities::collections::index_set::IndexSet;
use crate::utilities::memory::buffer_pool::BufferPool;

pub struct IslandSleeper;

impl IslandSleeper {
    /// Scans the active set for sleepable islands and migrates each into
    /// its own inactive set.
    pub fn update(
        bodies: &mut Bodies,
        solver: &mut Solver,
        broad_phase: &mut BroadPhase,
        pair_cache: &mut PairCache,
        pool: &mut BufferPool,
    ) {
        let active_count = bodies.active_set().count;
        if active_count == 0 {
            return;
        }
        let mut visited = IndexSet::new(active_count, pool);
        let mut islands: Vec<Vec<BodyHandle>> = Vec::new();
        let mut traversal_stack: Vec<i32> = Vec::new();
        let mut member_indices: Vec<i32> = Vec::new();
        for seed in 0..active_count {
            if visited.contains(seed) {
                continue;
            }
            let active_set = bodies.active_set();
            if Bodies::is_kinematic(&active_set.dynamics_state.get(seed).inertia.local) {
                // Kinematics neither propagate islands nor block them.
                continue;
            }
            // Flood the component, tracking whether every dynamic member is
            // ready to sleep.
            let mut island_can_sleep = true;
            traversal_stack.clear();
            member_indices.clear();
            traversal_stack.push(seed);
            visited.set(seed, pool);
            while let Some(body_index) = traversal_stack.pop() {
                member_indices.push(body_index);
                let active_set = bodies.active_set();
                if !active_set.activity.get(body_index).sleep_candidate {
                    island_can_sleep = false;
                }
                let constraints = active_set.constraints.get(body_index);
                for i in 0..constraints.count {
                    let constraint_handle = constraints.get(i).connecting_constraint_handle;
                    let mut references = [0i32; MAXIMUM_BODIES_PER_CONSTRAINT];
                    let body_count =
                        solver.get_constraint_body_indices(constraint_handle, &mut references);
                    for slot in 0..body_count {
                        let other_index = references[slot as usize];
                        if other_index == body_index || visited.contains(other_index) {
                            continue;
                        }
                        if Bodies::is_kinematic(
                            &active_set.dynamics_state.get(other_index).inertia.local,
                        ) {
                            continue;
                        }
                        visited.set(other_index, pool);
                        traversal_stack.push(other_index);
                    }
                }
            }
            if island_can_sleep {
                let active_set = bodies.active_set();
                islands.push(
                    member_indices
                        .iter()
                        .map(|&index| *active_set.index_to_handle.get(index))
                        .collect(),
                );
            }
        }
        visited.dispose(pool);
        for island in islands {
            Self::sleep_island(bodies, solver, broad_phase, pair_cache, pool, &island);
        }
    }

    /// Finds an unallocated set slot, growing the set buffers when needed.
    fn claim_set_slot(
        bodies: &mut Bodies,
        solver: &mut Solver,
        pool: &mut BufferPool,
    ) -> i32 {
        for set_index in 1..bodies.sets.len() {
            if !bodies.sets.get(set_index).allocated()
                && (set_index >= solver.sets.len() || !solver.sets.get(set_index).allocated())
            {
                solver.ensure_sets_capacity(set_index + 1, pool);
                return set_index;
            }
        }
        let set_index = bodies.sets.len();
        bodies.ensure_sets_capacity(set_index + 1, pool);
        solver.ensure_sets_capacity(set_index + 1, pool);
        set_index
    }

    /// Migrates one island into a fresh inactive set.
    pub fn sleep_island(
        bodies: &mut Bodies,
        solver: &mut Solver,
        broad_phase: &mut BroadPhase,
        pair_cache: &mut PairCache,
        pool: &mut BufferPool,
        island: &[BodyHandle],
    ) {
        debug_assert!(!island.is_empty());
        let set_index = Self::claim_set_slot(bodies, solver, pool);

        // Gather the island's constraints once; bodies share constraints.
        let mut island_constraints: Vec<ConstraintHandle> = Vec::new();
        for &handle in island {
            let location = bodies.location(handle);
            debug_assert!(location.set_index == 0);
            let list = bodies.active_set().constraints.get(location.index);
            for i in 0..list.count {
                let constraint_handle = list.get(i).connecting_constraint_handle;
                if !island_constraints.contains(&constraint_handle) {
                    island_constraints.push(constraint_handle);
                }
            }
        }

        // Constraints move first, while body indices are still valid for
        // reference translation. Sleeping lanes store handles; the batch
        // index is preserved so activation can merge without re-checking
        // disjointness.
        for &constraint_handle in &island_constraints {
            let location = solver.location(constraint_handle);
            let mut indices = [0i32; MAXIMUM_BODIES_PER_CONSTRAINT];
            let body_count = solver.get_constraint_body_indices(constraint_handle, &mut indices);
            let mut handle_references = [0i32; MAXIMUM_BODIES_PER_CONSTRAINT];
            for slot in 0..body_count as usize {
                handle_references[slot] = bodies
                    .active_set()
                    .index_to_handle
                    .get(indices[slot])
                    .0;
            }
            solver.move_constraint_between_sets(
                pool,
                constraint_handle,
                location,
                set_index,
                location.batch_index,
                &handle_references[..body_count as usize],
            );
            let referenced = solver.batch_referenced_handles.get_mut(location.batch_index);
            for slot in 0..body_count as usize {
                referenced.unset(handle_references[slot]);
            }
        }
        solver.remove_trailing_empty_batches(pool);

        // Pair cache entries follow their bodies.
        pair_cache.migrate_to_inactive_set(
            set_index,
            |reference: CollidableReference| {
                !reference.is_static() && island.contains(&reference.body_handle())
            },
            pool,
        );

        // Bodies move one at a time: copy into the island set, migrate the
        // broadphase leaf to the static tree, then swap-remove from the
        // active set.
        let mut island_set = BodySet::new(island.len() as i32, pool);
        for (island_slot, &handle) in island.iter().enumerate() {
            let island_slot = island_slot as i32;
            let active_index = bodies.location(handle).index;
            {
                let active_set = bodies.active_set();
                *island_set.index_to_handle.get_mut(island_slot) = handle;
                *island_set.dynamics_state.get_mut(island_slot) =
                    *active_set.dynamics_state.get(active_index);
                *island_set.collidables.get_mut(island_slot) =
                    *active_set.collidables.get(active_index);
                *island_set.activity.get_mut(island_slot) = *active_set.activity.get(active_index);
                unsafe {
                    // The constraint list buffer itself migrates; it must
                    // not be disposed with the active slot.
                    std::ptr::copy_nonoverlapping(
                        active_set.constraints.as_ptr().add(active_index as usize),
                        island_set
                            .constraints
                            .shared_mut_ptr()
                            .add(island_slot as usize),
                        1,
                    );
                }
            }
            island_set.count = island_slot + 1;

            let collidable = *island_set.collidables.get(island_slot);
            if collidable.shape.exists() {
                let bounds = broad_phase
                    .active_tree
                    .get_leaf_bounds(collidable.broad_phase_index);
                let mobility = if Bodies::is_kinematic(
                    &island_set.dynamics_state.get(island_slot).inertia.local,
                ) {
                    CollidableMobility::Kinematic
                } else {
                    CollidableMobility::Dynamic
                };
                let static_leaf = broad_phase.add_static(
                    CollidableReference::for_body(mobility, handle),
                    &bounds,
                    pool,
                );
                island_set
                    .collidables
                    .get_mut(island_slot)
                    .broad_phase_index = static_leaf;
                if let Some(moved_reference) =
                    broad_phase.remove_active_at(collidable.broad_phase_index)
                {
                    // Whoever was relocated is still active; patch its
                    // back-reference.
                    let moved_location = bodies.location(moved_reference.body_handle());
                    debug_assert!(moved_location.set_index == 0);
                    bodies
                        .active_set_mut()
                        .collidables
                        .get_mut(moved_location.index)
                        .broad_phase_index = collidable.broad_phase_index;
                }
            }

            let (removed_handle, moved_handle) = bodies.sets.get_mut(0).remove_at(active_index);
            debug_assert!(removed_handle == handle);
            if let Some(moved) = moved_handle {
                bodies.handle_to_location.get_mut(moved.0).index = active_index;
                let moved_new_index = active_index;
                solver.update_for_body_memory_move(
                    bodies,
                    moved_new_index,
                    bodies.active_set().count,
                    active_index,
                );
            }
            *bodies.handle_to_location.get_mut(handle.0) =
                crate::physics::bodies::BodyMemoryLocation {
                    set_index,
                    index: island_slot,
                };
        }
        *bodies.sets.get_mut(set_index) = island_set;
    }
}
