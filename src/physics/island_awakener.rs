//! Island activation: returns sleeping sets to the active world.
//!
//! Activation runs in two phases separated by a barrier: phase one migrates
//! pair cache entries, merges referenced-handle bitsets, and bulk-copies
//! body regions; phase two migrates broadphase leaves and copies constraint
//! regions with handle references translated back to active indices. A
//! single capacity prepass precedes both so the copy jobs never allocate.

use crate::physics::bodies::{Bodies, BodyMemoryLocation};
use crate::physics::broad_phase::BroadPhase;
use crate::physics::collidable::{CollidableMobility, CollidableReference};
use crate::physics::constraints::type_processor::MAXIMUM_BODIES_PER_CONSTRAINT;
use crate::physics::handles::{BodyHandle, ConstraintHandle};
use crate::physics::pair_cache::PairCache;
use crate::physics::solver::Solver;
use crate::physics::statics::Statics;
use crate::utilities::memory::buffer_pool::BufferPool;
use crate::utilities::thread_dispatcher::{JobCounter, ThreadDispatcher};

/// Wakes the given inactive sets. `reset_activity` clears sleep candidacy
/// timers, appropriate for user-driven wakes.
#[allow(clippy::too_many_arguments)]
pub fn activate_sets(
    bodies: &mut Bodies,
    statics: &mut Statics,
    solver: &mut Solver,
    broad_phase: &mut BroadPhase,
    pair_cache: &mut PairCache,
    pool: &mut BufferPool,
    set_ids: &[i32],
    reset_activity: bool,
    dispatcher: Option<&dyn ThreadDispatcher>,
) {
    // Unique-set accumulation.
    let mut unique_sets: Vec<i32> = Vec::with_capacity(set_ids.len());
    for &set_index in set_ids {
        debug_assert!(set_index > 0, "Set 0 is the active set.");
        if set_index < bodies.sets.len()
            && bodies.sets.get(set_index).allocated()
            && !unique_sets.contains(&set_index)
        {
            unique_sets.push(set_index);
        }
    }
    if unique_sets.is_empty() {
        return;
    }

    // Capacity reservation: one prepass sizes the active body set, solver
    // batches, type batches, and pair cache so later jobs only copy.
    let mut incoming_bodies = 0;
    for &set_index in &unique_sets {
        incoming_bodies += bodies.sets.get(set_index).count;
    }
    let target_body_start = bodies.active_set().count;
    {
        let required = target_body_start + incoming_bodies;
        if bodies.active_set().index_to_handle.len() < required {
            bodies.active_set_mut().internal_resize(required, pool);
        }
    }
    let mut incoming_pairs = 0;
    for &set_index in &unique_sets {
        if let Some(Some(inactive)) = pair_cache.inactive_sets.get(set_index as usize) {
            incoming_pairs += inactive.pairs.count;
        }
    }
    pair_cache
        .mapping
        .ensure_capacity(pair_cache.mapping.count + incoming_pairs, pool);
    reserve_solver_capacity(solver, bodies, pool, &unique_sets);

    // Body region copy offsets per set.
    let mut set_body_starts: Vec<i32> = Vec::with_capacity(unique_sets.len());
    {
        let mut next_start = target_body_start;
        for &set_index in &unique_sets {
            set_body_starts.push(next_start);
            next_start += bodies.sets.get(set_index).count;
        }
        bodies.active_set_mut().count = next_start;
    }

    // --- phase 1 ---
    // Pair cache activation is inherently sequential; the mapping is a
    // single structure.
    for &set_index in &unique_sets {
        pair_cache.activate_set(set_index, pool);
    }
    // Referenced-handles merge: each waking constraint's handles join its
    // target batch's bitset. Handles are read from the sleeping lanes, so
    // this doesn't depend on the body copies.
    merge_referenced_handles(solver, bodies, pool, &unique_sets);
    // Body region copies are disjoint by range; workers can split them.
    copy_body_regions(
        bodies,
        &unique_sets,
        &set_body_starts,
        reset_activity,
        dispatcher,
    );

    // --- barrier: phase 2 depends on the body copies being complete ---

    // Broadphase migration renumbers static leaves on removal, so it stays
    // sequential.
    migrate_broadphase_leaves(
        bodies,
        statics,
        broad_phase,
        pool,
        &unique_sets,
        &set_body_starts,
    );
    // Constraint region copies translate handle references to the active
    // indices established in phase 1.
    copy_constraint_regions(bodies, solver, pool, &unique_sets);

    // Disposal: the emptied sets' storage returns to the pool and the slots
    // become claimable by the sleeper again.
    for &set_index in &unique_sets {
        bodies.sets.get_mut(set_index).dispose_buffers(pool);
        *bodies.sets.get_mut(set_index) = crate::physics::body_set::BodySet::default();
        let constraint_set = solver.sets.get_mut(set_index);
        if constraint_set.allocated() {
            constraint_set.dispose(pool);
            *constraint_set = crate::physics::constraint_set::ConstraintSet::default();
        }
    }
}

/// Wakes the island containing a body. No-op for active bodies.
pub fn awaken_body(
    bodies: &mut Bodies,
    statics: &mut Statics,
    solver: &mut Solver,
    broad_phase: &mut BroadPhase,
    pair_cache: &mut PairCache,
    pool: &mut BufferPool,
    handle: BodyHandle,
) {
    bodies.validate_existing_handle(handle);
    let set_index = bodies.location(handle).set_index;
    if set_index > 0 {
        activate_sets(
            bodies,
            statics,
            solver,
            broad_phase,
            pair_cache,
            pool,
            &[set_index],
            true,
            None,
        );
    }
}

/// Wakes the island containing a constraint. No-op for active constraints.
pub fn awaken_constraint(
    bodies: &mut Bodies,
    statics: &mut Statics,
    solver: &mut Solver,
    broad_phase: &mut BroadPhase,
    pair_cache: &mut PairCache,
    pool: &mut BufferPool,
    handle: ConstraintHandle,
) {
    let set_index = solver.location(handle).set_index;
    if set_index > 0 {
        activate_sets(
            bodies,
            statics,
            solver,
            broad_phase,
            pair_cache,
            pool,
            &[set_index],
            true,
            None,
        );
    }
}

fn reserve_solver_capacity(
    solver: &mut Solver,
    bodies: &Bodies,
    pool: &mut BufferPool,
    unique_sets: &[i32],
) {
    // Count incoming constraints per (batch, type id).
    let mut required_batches = solver.active_set().batches.count;
    let mut per_batch_type_counts: Vec<Vec<(i32, i32)>> = Vec::new();
    for &set_index in unique_sets {
        if set_index >= solver.sets.len() || !solver.sets.get(set_index).allocated() {
            continue;
        }
        let set = solver.sets.get(set_index);
        required_batches = required_batches.max(set.batches.count);
        if per_batch_type_counts.len() < set.batches.count as usize {
            per_batch_type_counts.resize_with(set.batches.count as usize, Vec::new);
        }
        for batch_index in 0..set.batches.count {
            let batch = set.batches.get(batch_index);
            for type_batch_index in 0..batch.type_batches.count {
                let type_batch = batch.type_batches.get(type_batch_index);
                let counts = &mut per_batch_type_counts[batch_index as usize];
                match counts.iter_mut().find(|(type_id, _)| *type_id == type_batch.type_id) {
                    Some((_, count)) => *count += type_batch.constraint_count,
                    None => counts.push((type_batch.type_id, type_batch.constraint_count)),
                }
            }
        }
    }
    while solver.active_set().batches.count < required_batches {
        solver.allocate_new_batch(pool);
    }
    // Grow the target type batches and the referenced-handle bitsets.
    let highest_handle = bodies.handle_pool.highest_possibly_claimed_id() + 1;
    for batch_index in 0..solver.active_set().batches.count {
        solver
            .batch_referenced_handles
            .get_mut(batch_index)
            .ensure_capacity(highest_handle, pool);
    }
    for (batch_index, counts) in per_batch_type_counts.iter().enumerate() {
        for &(type_id, incoming) in counts {
            let processor = solver.type_processors[type_id as usize]
                .as_ref()
                .expect("Sleeping constraints must have registered types.");
            let minimum_capacity = solver.minimum_capacity_per_type_batch;
            let batch = solver
                .sets
                .get_mut(0)
                .batches
                .get_mut(batch_index as i32);
            let type_batch = batch.get_or_create_type_batch(
                type_id,
                processor.as_ref(),
                minimum_capacity.max(incoming),
                pool,
            );
            let required = type_batch.constraint_count + incoming;
            processor.ensure_capacity(type_batch, required, pool);
        }
    }
}

fn merge_referenced_handles(
    solver: &mut Solver,
    bodies: &Bodies,
    pool: &mut BufferPool,
    unique_sets: &[i32],
) {
    for &set_index in unique_sets {
        if set_index >= solver.sets.len() || !solver.sets.get(set_index).allocated() {
            continue;
        }
        let sets = solver.sets.shared_mut_ptr();
        let set = unsafe { &*sets.add(set_index as usize) };
        for batch_index in 0..set.batches.count {
            let batch = set.batches.get(batch_index);
            for type_batch_index in 0..batch.type_batches.count {
                let type_batch = batch.type_batches.get(type_batch_index);
                let mut references = [0i32; MAXIMUM_BODIES_PER_CONSTRAINT];
                for constraint_index in 0..type_batch.constraint_count {
                    let body_count = {
                        let processor = solver.processor(type_batch.type_id);
                        processor.get_body_references(type_batch, constraint_index, &mut references)
                    };
                    let referenced = solver.batch_referenced_handles.get_mut(batch_index);
                    for slot in 0..body_count as usize {
                        // Sleeping lanes store handles directly. Kinematics
                        // never block batch membership; a shared kinematic
                        // platform would otherwise poison the merged set.
                        let handle = BodyHandle(references[slot]);
                        let body_location = bodies.location(handle);
                        let body_set = bodies.sets.get(body_location.set_index);
                        if Bodies::is_kinematic(
                            &body_set.dynamics_state.get(body_location.index).inertia.local,
                        ) {
                            continue;
                        }
                        referenced.set(references[slot], pool);
                    }
                }
            }
        }
    }
}

fn copy_body_regions(
    bodies: &mut Bodies,
    unique_sets: &[i32],
    set_body_starts: &[i32],
    reset_activity: bool,
    dispatcher: Option<&dyn ThreadDispatcher>,
) {
    let copy_set = |job_index: i32| {
        let set_index = unique_sets[job_index as usize];
        let target_start = set_body_starts[job_index as usize];
        unsafe {
            let sets = bodies.sets.shared_mut_ptr();
            let active = &mut *sets;
            let source = &*sets.add(set_index as usize);
            for i in 0..source.count {
                let target_index = target_start + i;
                let handle = *source.index_to_handle.get(i);
                *active.index_to_handle.shared_mut_ptr().add(target_index as usize) = handle;
                *active
                    .dynamics_state
                    .shared_mut_ptr()
                    .add(target_index as usize) = *source.dynamics_state.get(i);
                *active.collidables.shared_mut_ptr().add(target_index as usize) =
                    *source.collidables.get(i);
                let mut activity = *source.activity.get(i);
                if reset_activity {
                    activity.timesteps_under_threshold_count = 0;
                    activity.sleep_candidate = false;
                }
                *active.activity.shared_mut_ptr().add(target_index as usize) = activity;
                // The constraint list buffer moves back wholesale.
                std::ptr::copy_nonoverlapping(
                    source.constraints.as_ptr().add(i as usize),
                    active.constraints.shared_mut_ptr().add(target_index as usize),
                    1,
                );
                *bodies
                    .handle_to_location
                    .shared_mut_ptr()
                    .add(handle.0 as usize) = BodyMemoryLocation {
                    set_index: 0,
                    index: target_index,
                };
            }
        }
    };
    match dispatcher {
        Some(dispatcher) if dispatcher.thread_count() > 1 && unique_sets.len() > 1 => {
            let counter = JobCounter::new(unique_sets.len() as i32);
            dispatcher.dispatch_workers(&|_worker_index| {
                while let Some(job) = counter.claim() {
                    copy_set(job);
                }
            });
        }
        _ => {
            for job in 0..unique_sets.len() as i32 {
                copy_set(job);
            }
        }
    }
}

fn migrate_broadphase_leaves(
    bodies: &mut Bodies,
    statics: &mut Statics,
    broad_phase: &mut BroadPhase,
    pool: &mut BufferPool,
    unique_sets: &[i32],
    set_body_starts: &[i32],
) {
    for (job_index, &set_index) in unique_sets.iter().enumerate() {
        let target_start = set_body_starts[job_index];
        let count = {
            // The source set still knows how many bodies it contributed.
            bodies.sets.get(set_index).count
        };
        for i in 0..count {
            let target_index = target_start + i;
            let collidable = *bodies.active_set().collidables.get(target_index);
            if !collidable.shape.exists() {
                continue;
            }
            let handle = *bodies.active_set().index_to_handle.get(target_index);
            let static_leaf = collidable.broad_phase_index;
            let bounds = broad_phase.static_tree.get_leaf_bounds(static_leaf);
            let mobility = if Bodies::is_kinematic(
                &bodies
                    .active_set()
                    .dynamics_state
                    .get(target_index)
                    .inertia
                    .local,
            ) {
                CollidableMobility::Kinematic
            } else {
                CollidableMobility::Dynamic
            };
            let active_leaf = broad_phase.add_active(
                CollidableReference::for_body(mobility, handle),
                &bounds,
                pool,
            );
            bodies
                .active_set_mut()
                .collidables
                .get_mut(target_index)
                .broad_phase_index = active_leaf;
            if let Some(moved_reference) = broad_phase.remove_static_at(static_leaf) {
                patch_static_tree_back_reference(bodies, statics, moved_reference, static_leaf);
            }
        }
    }
}

/// The static tree's removal relocated a leaf; point its owner at the new
/// index. The owner is a true static, a still-sleeping body, or a waking
/// body whose leaf hasn't migrated yet. A just-migrated body can't be the
/// mover since its static leaf is already gone.
pub(crate) fn patch_static_tree_back_reference(
    bodies: &mut Bodies,
    statics: &mut Statics,
    moved_reference: CollidableReference,
    new_leaf_index: i32,
) {
    if moved_reference.is_static() {
        statics
            .get_mut(moved_reference.static_handle())
            .collidable
            .broad_phase_index = new_leaf_index;
        return;
    }
    let location = bodies.location(moved_reference.body_handle());
    bodies
        .sets
        .get_mut(location.set_index)
        .collidables
        .get_mut(location.index)
        .broad_phase_index = new_leaf_index;
}

fn copy_constraint_regions(
    bodies: &Bodies,
    solver: &mut Solver,
    pool: &mut BufferPool,
    unique_sets: &[i32],
) {
    for &set_index in unique_sets {
        if set_index >= solver.sets.len() || !solver.sets.get(set_index).allocated() {
            continue;
        }
        // Walk every (batch, type batch) region of the sleeping set. Moving
        // the last lane out each time avoids swap churn; a drained type
        // batch is removed by the move itself, so the region list shrinks
        // in place.
        let batch_count = solver.sets.get(set_index).batches.count;
        for batch_index in 0..batch_count {
            loop {
                let next = {
                    let batch = solver.sets.get(set_index).batches.get(batch_index);
                    if batch.type_batches.count == 0 {
                        None
                    } else {
                        let type_batch = batch.type_batches.get(0);
                        debug_assert!(type_batch.constraint_count > 0);
                        Some((
                            *type_batch
                                .index_to_handle
                                .get(type_batch.constraint_count - 1),
                            type_batch.type_id,
                        ))
                    }
                };
                let Some((constraint_handle, type_id)) = next else {
                    break;
                };
                let location = solver.location(constraint_handle);
                debug_assert!(location.set_index == set_index);
                let mut handle_references = [0i32; MAXIMUM_BODIES_PER_CONSTRAINT];
                let body_count = {
                    let type_batch = solver
                        .sets
                        .get(set_index)
                        .batches
                        .get(batch_index)
                        .get_type_batch(type_id)
                        .expect("Drained type batch must still exist.");
                    solver.processor(type_id).get_body_references(
                        type_batch,
                        location.index_in_type_batch,
                        &mut handle_references,
                    )
                };
                let mut index_references = [0i32; MAXIMUM_BODIES_PER_CONSTRAINT];
                for slot in 0..body_count as usize {
                    let body_location = bodies.location(BodyHandle(handle_references[slot]));
                    debug_assert!(
                        body_location.set_index == 0,
                        "Body regions must be copied before constraint regions."
                    );
                    index_references[slot] = body_location.index;
                }
                solver.move_constraint_between_sets(
                    pool,
                    constraint_handle,
                    location,
                    0,
                    location.batch_index,
                    &index_references[..body_count as usize],
                );
            }
        }
    }
}
