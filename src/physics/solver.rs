//! The constraint solver: batch assignment, constraint storage management,
//! and the staged prestep / warm start / iteration execution.

use crate::physics::bodies::Bodies;
use crate::physics::constraint_batch::ConstraintBatch;
use crate::physics::constraint_location::ConstraintLocation;
use crate::physics::constraint_set::ConstraintSet;
use crate::physics::constraints::type_batch::TypeBatch;
use crate::physics::constraints::type_ids;
use crate::physics::constraints::type_processor::{
    ConstraintDescription, OneBodyConstraintDescription, TwoBodyConstraintDescription,
    TypeProcessor, MAXIMUM_BODIES_PER_CONSTRAINT,
};
use crate::physics::handles::{BodyHandle, ConstraintHandle};
use crate::utilities::bundle_indexing::BundleIndexing;
use crate::utilities::collections::index_set::IndexSet;
use crate::utilities::collections::quick_list::QuickList;
use crate::utilities::memory::buffer::Buffer;
use crate::utilities::memory::buffer_pool::BufferPool;
use crate::utilities::memory::id_pool::IdPool;
use crate::utilities::thread_dispatcher::{JobCounter, SendPtr, ThreadDispatcher};
use std::sync::Barrier;

/// Bundles per solver work block. Small enough to load balance, large
/// enough to amortize claim traffic.
const BUNDLES_PER_WORK_BLOCK: i32 = 32;

pub struct Solver {
    /// Slot 0 holds the active set's constraints; later slots hold sleeping
    /// islands'.
    pub sets: Buffer<ConstraintSet>,
    /// Which body handles each active batch references. Only the active set
    /// tracks these; sleeping sets never accept new constraints.
    pub batch_referenced_handles: QuickList<IndexSet>,
    pub type_processors: Vec<Option<Box<dyn TypeProcessor + Send + Sync>>>,
    pub handle_pool: IdPool,
    pub handle_to_constraint: Buffer<ConstraintLocation>,
    /// Fixed iteration count; warm starting carries accuracy across frames
    /// instead of residual measurement.
    pub velocity_iteration_count: i32,
    pub minimum_capacity_per_type_batch: i32,
}

impl Solver {
    pub fn new(
        pool: &mut BufferPool,
        initial_constraint_capacity: i32,
        initial_island_capacity: i32,
        minimum_capacity_per_type_batch: i32,
        velocity_iteration_count: i32,
    ) -> Self {
        assert!(velocity_iteration_count >= 1, "Iteration count must be positive.");
        let mut sets: Buffer<ConstraintSet> = pool.take_at_least(initial_island_capacity + 1);
        sets.clear(0, sets.len());
        *sets.get_mut(0) = ConstraintSet::new(8, pool);
        let mut handle_to_constraint: Buffer<ConstraintLocation> =
            pool.take_at_least(initial_constraint_capacity);
        for i in 0..handle_to_constraint.len() {
            *handle_to_constraint.get_mut(i) = ConstraintLocation::default();
        }
        Self {
            sets,
            batch_referenced_handles: QuickList::with_capacity(8, pool),
            type_processors: Vec::new(),
            handle_pool: IdPool::new(initial_constraint_capacity, pool),
            handle_to_constraint,
            velocity_iteration_count,
            minimum_capacity_per_type_batch: minimum_capacity_per_type_batch.max(4),
        }
    }

    #[inline(always)]
    pub fn active_set(&self) -> &ConstraintSet {
        self.sets.get(0)
    }

    #[inline(always)]
    pub fn active_set_mut(&mut self) -> &mut ConstraintSet {
        self.sets.get_mut(0)
    }

    /// Registers a constraint type. Adding a constraint of an unregistered
    /// type is a programmer error.
    pub fn register<TDescription: ConstraintDescription>(&mut self) {
        let type_id = TDescription::TYPE_ID as usize;
        if type_id >= self.type_processors.len() {
            self.type_processors.resize_with(type_id + 1, || None);
        }
        debug_assert!(
            self.type_processors[type_id].is_none(),
            "A type processor was already registered for this type id."
        );
        self.type_processors[type_id] = Some(TDescription::create_type_processor());
    }

    /// Registers every built-in constraint type.
    pub fn register_defaults(&mut self) {
        use crate::physics::constraints::angular_motor::OneBodyAngularMotor;
        use crate::physics::constraints::angular_servo::OneBodyAngularServo;
        use crate::physics::constraints::ball_socket::BallSocket;
        use crate::physics::constraints::contact::convex::{ConvexContact, ConvexContactOneBody};
        use crate::physics::constraints::contact::nonconvex::{
            NonconvexContact, NonconvexContactOneBody,
        };
        use crate::physics::constraints::grab_servo::GrabServo;
        use crate::physics::constraints::hinge::Hinge;
        use crate::physics::constraints::swing_limit::SwingLimit;
        use crate::physics::constraints::swivel_hinge::SwivelHinge;
        use crate::physics::constraints::twist_limit::TwistLimit;
        use crate::physics::constraints::twist_motor::TwistMotor;
        use crate::physics::constraints::twist_servo::TwistServo;

        macro_rules! register_contacts {
            ($solver:expr, $($count:literal),*) => {
                $(
                    $solver.register::<ConvexContactOneBody<$count>>();
                    $solver.register::<ConvexContact<$count>>();
                )*
            };
        }
        macro_rules! register_nonconvex_contacts {
            ($solver:expr, $($count:literal),*) => {
                $(
                    $solver.register::<NonconvexContactOneBody<$count>>();
                    $solver.register::<NonconvexContact<$count>>();
                )*
            };
        }
        register_contacts!(self, 1, 2, 3, 4);
        register_nonconvex_contacts!(self, 2, 3, 4, 5, 6, 7, 8);
        self.register::<BallSocket>();
        self.register::<Hinge>();
        self.register::<SwivelHinge>();
        self.register::<SwingLimit>();
        self.register::<TwistServo>();
        self.register::<TwistLimit>();
        self.register::<TwistMotor>();
        self.register::<OneBodyAngularServo>();
        self.register::<OneBodyAngularMotor>();
        self.register::<GrabServo>();
    }

    #[inline(always)]
    pub fn processor(&self, type_id: i32) -> &dyn TypeProcessor {
        self.type_processors[type_id as usize]
            .as_ref()
            .expect("Constraint type must be registered before use.")
            .as_ref()
    }

    #[inline(always)]
    pub fn constraint_exists(&self, handle: ConstraintHandle) -> bool {
        handle.0 >= 0
            && handle.0 < self.handle_to_constraint.len()
            && self.handle_to_constraint.get(handle.0).set_index >= 0
    }

    #[inline(always)]
    pub fn location(&self, handle: ConstraintHandle) -> ConstraintLocation {
        debug_assert!(self.constraint_exists(handle));
        *self.handle_to_constraint.get(handle.0)
    }

    pub fn count_constraints(&self) -> i32 {
        let mut count = 0;
        for i in 0..self.sets.len() {
            let set = self.sets.get(i);
            if set.allocated() {
                count += set.constraint_count();
            }
        }
        count
    }

    /// Lowest batch index whose referenced handle set is disjoint from the
    /// given handles; one past the end when no existing batch qualifies.
    pub fn find_target_batch(&self, body_handle_values: &[i32]) -> i32 {
        let batch_count = self.active_set().batches.count;
        for batch_index in 0..batch_count {
            if self
                .batch_referenced_handles
                .get(batch_index)
                .can_fit(body_handle_values)
            {
                return batch_index;
            }
        }
        batch_count
    }

    pub(crate) fn allocate_new_batch(&mut self, pool: &mut BufferPool) -> i32 {
        let type_capacity = type_ids::COUNT.max(self.type_processors.len() as i32);
        let set = self.sets.get_mut(0);
        set.batches.add(ConstraintBatch::new(type_capacity, pool), pool);
        self.batch_referenced_handles
            .add(IndexSet::new(64, pool), pool);
        debug_assert!(self.batch_referenced_handles.count == set.batches.count);
        set.batches.count - 1
    }

    fn take_handle(&mut self, pool: &mut BufferPool) -> ConstraintHandle {
        let handle_value = self.handle_pool.take();
        if handle_value == self.handle_to_constraint.len() {
            let old_capacity = self.handle_to_constraint.len();
            pool.resize_to_at_least(&mut self.handle_to_constraint, old_capacity * 2, old_capacity);
            for i in old_capacity..self.handle_to_constraint.len() {
                *self.handle_to_constraint.get_mut(i) = ConstraintLocation::default();
            }
        }
        ConstraintHandle(handle_value)
    }

    /// Adds a constraint between active bodies. Waking is the caller's
    /// responsibility; the simulation-level wrapper handles it.
    pub fn add<TDescription: ConstraintDescription>(
        &mut self,
        bodies: &mut Bodies,
        pool: &mut BufferPool,
        body_handles: &[BodyHandle],
        description: &TDescription,
    ) -> ConstraintHandle {
        debug_assert!(body_handles.len() == TDescription::BODIES_PER_CONSTRAINT as usize);
        let type_id = TDescription::TYPE_ID;
        assert!(
            (type_id as usize) < self.type_processors.len()
                && self.type_processors[type_id as usize].is_some(),
            "Constraint type {} is not registered with the solver.",
            type_id
        );
        let mut body_indices = [0i32; MAXIMUM_BODIES_PER_CONSTRAINT];
        let mut blocking_values = [0i32; MAXIMUM_BODIES_PER_CONSTRAINT];
        let mut blocking_count = 0;
        for (i, handle) in body_handles.iter().enumerate() {
            bodies.validate_existing_handle(*handle);
            let location = bodies.location(*handle);
            debug_assert!(
                location.set_index == 0,
                "Bodies must be active before attaching constraints."
            );
            body_indices[i] = location.index;
            // Kinematics don't block batch membership; impulses can't move
            // them, so lanes sharing one can't conflict.
            if !Bodies::is_kinematic(
                &bodies
                    .active_set()
                    .dynamics_state
                    .get(location.index)
                    .inertia
                    .local,
            ) {
                blocking_values[blocking_count] = handle.0;
                blocking_count += 1;
            }
        }
        let handle_values = &blocking_values[..blocking_count];
        let body_indices = &body_indices[..body_handles.len()];

        let mut target_batch = self.find_target_batch(handle_values);
        if target_batch == self.active_set().batches.count {
            target_batch = self.allocate_new_batch(pool);
        }
        let constraint_handle = self.take_handle(pool);

        let index_in_type_batch;
        {
            let processor = self.type_processors[type_id as usize].as_ref().unwrap();
            let minimum_capacity = self.minimum_capacity_per_type_batch;
            let batch = self.sets.get_mut(0).batches.get_mut(target_batch);
            let type_batch = batch.get_or_create_type_batch(
                type_id,
                processor.as_ref(),
                minimum_capacity,
                pool,
            );
            index_in_type_batch =
                processor.allocate(type_batch, constraint_handle, body_indices, pool);
            let (bundle_index, inner_index) =
                BundleIndexing::get_bundle_indices(index_in_type_batch);
            unsafe {
                description.apply_description(type_batch, bundle_index, inner_index);
            }
        }

        let referenced = self.batch_referenced_handles.get_mut(target_batch);
        for &handle_value in handle_values {
            debug_assert!(!referenced.contains(handle_value));
            referenced.set(handle_value, pool);
        }
        *self.handle_to_constraint.get_mut(constraint_handle.0) = ConstraintLocation {
            set_index: 0,
            batch_index: target_batch,
            type_id,
            index_in_type_batch,
        };
        for (i, handle) in body_handles.iter().enumerate() {
            let body_index = bodies.location(*handle).index;
            bodies.add_constraint_reference(body_index, constraint_handle, i as i32, pool);
        }
        constraint_handle
    }

    pub fn add_one_body<TDescription: OneBodyConstraintDescription>(
        &mut self,
        bodies: &mut Bodies,
        pool: &mut BufferPool,
        body: BodyHandle,
        description: &TDescription,
    ) -> ConstraintHandle {
        self.add(bodies, pool, &[body], description)
    }

    pub fn add_two_body<TDescription: TwoBodyConstraintDescription>(
        &mut self,
        bodies: &mut Bodies,
        pool: &mut BufferPool,
        body_a: BodyHandle,
        body_b: BodyHandle,
        description: &TDescription,
    ) -> ConstraintHandle {
        self.add(bodies, pool, &[body_a, body_b], description)
    }

    /// Reads the active-set body indices referenced by a constraint.
    pub fn get_constraint_body_indices(
        &self,
        handle: ConstraintHandle,
        output: &mut [i32],
    ) -> i32 {
        let location = self.location(handle);
        let batch = self.sets.get(location.set_index).batches.get(location.batch_index);
        let type_batch = batch
            .get_type_batch(location.type_id)
            .expect("Constraint location must resolve to a type batch.");
        self.processor(location.type_id).get_body_references(
            type_batch,
            location.index_in_type_batch,
            output,
        )
    }

    /// Removes an active constraint: detaches it from its bodies, clears
    /// batch handle references, swap-fills its lane, and trims emptied
    /// storage.
    pub fn remove(&mut self, bodies: &mut Bodies, pool: &mut BufferPool, handle: ConstraintHandle) {
        debug_assert!(self.constraint_exists(handle));
        let location = self.location(handle);
        debug_assert!(
            location.set_index == 0,
            "Only active constraints can be removed; wake the island first."
        );
        let mut body_indices = [0i32; MAXIMUM_BODIES_PER_CONSTRAINT];
        let body_count = self.get_constraint_body_indices(handle, &mut body_indices);
        for i in 0..body_count {
            let body_index = body_indices[i as usize];
            let body_handle = *bodies.active_set().index_to_handle.get(body_index);
            let is_kinematic = Bodies::is_kinematic(
                &bodies
                    .active_set()
                    .dynamics_state
                    .get(body_index)
                    .inertia
                    .local,
            );
            bodies.remove_constraint_reference(body_index, handle);
            if !is_kinematic {
                self.batch_referenced_handles
                    .get_mut(location.batch_index)
                    .unset(body_handle.0);
            }
        }
        {
            let processor = self.type_processors[location.type_id as usize]
                .as_ref()
                .unwrap();
            let batch = self.sets.get_mut(0).batches.get_mut(location.batch_index);
            let type_batch = batch
                .get_type_batch_mut(location.type_id)
                .expect("Constraint location must resolve to a type batch.");
            processor.remove(
                type_batch,
                location.index_in_type_batch,
                &mut self.handle_to_constraint,
            );
            batch.remove_type_batch_if_empty(location.type_id, pool);
        }
        self.remove_trailing_empty_batches(pool);
        self.handle_pool.return_id(handle.0, pool);
        *self.handle_to_constraint.get_mut(handle.0) = ConstraintLocation::default();
    }

    /// Moves a constraint's persistent lane state (prestep, accumulated
    /// impulses) into another set, rewriting its body references. Sleep
    /// moves active lanes into island sets with handle references; wake
    /// reverses it with active indices. The batch index is preserved by
    /// callers so wake can bulk-merge without re-checking disjointness.
    pub(crate) fn move_constraint_between_sets(
        &mut self,
        pool: &mut BufferPool,
        handle: ConstraintHandle,
        source_location: ConstraintLocation,
        target_set_index: i32,
        target_batch_index: i32,
        new_references: &[i32],
    ) -> i32 {
        debug_assert!(source_location.set_index != target_set_index);
        unsafe {
            let sets = self.sets.shared_mut_ptr();
            let source_set = &mut *sets.add(source_location.set_index as usize);
            let target_set = &mut *sets.add(target_set_index as usize);
            if !target_set.allocated() {
                *target_set = ConstraintSet::new(target_batch_index + 1, pool);
            }
            let type_capacity = type_ids::COUNT.max(self.type_processors.len() as i32);
            while target_set.batches.count <= target_batch_index {
                target_set
                    .batches
                    .add(ConstraintBatch::new(type_capacity, pool), pool);
            }
            let processor = self.type_processors[source_location.type_id as usize]
                .as_ref()
                .unwrap();
            let target_batch = target_set.batches.get_mut(target_batch_index);
            let target_type_batch = target_batch.get_or_create_type_batch(
                source_location.type_id,
                processor.as_ref(),
                self.minimum_capacity_per_type_batch,
                pool,
            );
            let target_index = processor.allocate(target_type_batch, handle, new_references, pool);
            let source_batch = source_set.batches.get_mut(source_location.batch_index);
            let source_type_batch = source_batch
                .get_type_batch_mut(source_location.type_id)
                .expect("Source location must resolve to a type batch.");
            processor.copy_constraint_lane(
                source_type_batch,
                source_location.index_in_type_batch,
                target_type_batch,
                target_index,
            );
            // The raw lane copy brought the source's references along;
            // restore the translated values.
            for (slot, &value) in new_references.iter().enumerate() {
                processor.set_body_reference(target_type_batch, target_index, slot as i32, value);
            }
            processor.remove(
                source_type_batch,
                source_location.index_in_type_batch,
                &mut self.handle_to_constraint,
            );
            source_batch.remove_type_batch_if_empty(source_location.type_id, pool);
            *self.handle_to_constraint.get_mut(handle.0) = ConstraintLocation {
                set_index: target_set_index,
                batch_index: target_batch_index,
                type_id: source_location.type_id,
                index_in_type_batch: target_index,
            };
            target_index
        }
    }

    pub(crate) fn remove_trailing_empty_batches(&mut self, pool: &mut BufferPool) {
        let set = self.sets.get_mut(0);
        while set.batches.count > 0 {
            let last = set.batches.count - 1;
            if set.batches.get(last).type_batches.count > 0 {
                break;
            }
            set.batches.get_mut(last).dispose(pool);
            set.batches.count -= 1;
            self.batch_referenced_handles.get_mut(last).dispose(pool);
            self.batch_referenced_handles.count -= 1;
        }
    }

    /// Rewrites constraint body references after a body moved from
    /// `original_index` to `new_index` in the active set. The body's
    /// constraint list must already reflect the body at its new location.
    pub fn update_for_body_memory_move(
        &mut self,
        bodies: &Bodies,
        moved_body_new_index: i32,
        original_index: i32,
        new_index: i32,
    ) {
        let list = bodies.active_set().constraints.get(moved_body_new_index);
        let _ = original_index;
        for i in 0..list.count {
            let reference = *list.get(i);
            let location = self.location(reference.connecting_constraint_handle);
            if location.set_index != 0 {
                // Mid-sleep: the constraint already migrated to the island
                // set where references are handles, immune to index moves.
                continue;
            }
            let batch = self.sets.get_mut(0).batches.get_mut(location.batch_index);
            let type_batch = batch
                .get_type_batch_mut(location.type_id)
                .expect("Constraint location must resolve to a type batch.");
            self.type_processors[location.type_id as usize]
                .as_ref()
                .unwrap()
                .set_body_reference(
                    type_batch,
                    location.index_in_type_batch,
                    reference.body_index_in_constraint,
                    new_index,
                );
        }
    }

    /// Applies a new description to an existing constraint without
    /// relocating it. The description's kind must match.
    pub fn apply_description<TDescription: ConstraintDescription>(
        &mut self,
        handle: ConstraintHandle,
        description: &TDescription,
    ) {
        let location = self.location(handle);
        debug_assert!(location.type_id == TDescription::TYPE_ID);
        let batch = self.sets.get_mut(location.set_index).batches.get_mut(location.batch_index);
        let type_batch = batch
            .get_type_batch_mut(location.type_id)
            .expect("Constraint location must resolve to a type batch.");
        let (bundle_index, inner_index) =
            BundleIndexing::get_bundle_indices(location.index_in_type_batch);
        unsafe {
            description.apply_description(type_batch, bundle_index, inner_index);
        }
    }

    /// Reads a constraint's description back out of its lane.
    pub fn get_description<TDescription: ConstraintDescription>(
        &self,
        handle: ConstraintHandle,
    ) -> TDescription {
        let location = self.location(handle);
        debug_assert!(location.type_id == TDescription::TYPE_ID);
        let batch = self.sets.get(location.set_index).batches.get(location.batch_index);
        let type_batch = batch
            .get_type_batch(location.type_id)
            .expect("Constraint location must resolve to a type batch.");
        let (bundle_index, inner_index) =
            BundleIndexing::get_bundle_indices(location.index_in_type_batch);
        unsafe { TDescription::build_description(type_batch, bundle_index, inner_index) }
    }

    // --- solve execution ---

    /// Runs prestep, warm start, and the velocity iterations over the
    /// active set. Prestep blocks run unordered; warm start and every
    /// iteration serialize across batches since later batches may touch
    /// bodies earlier ones already wrote.
    pub fn solve(&mut self, bodies: &Bodies, dt: f32, dispatcher: Option<&dyn ThreadDispatcher>) {
        let inverse_dt = 1.0 / dt;
        let active_set = self.sets.get(0);
        let batch_count = active_set.batches.count;
        if batch_count == 0 {
            return;
        }

        #[derive(Clone, Copy)]
        struct WorkBlock {
            type_batch: SendPtr<TypeBatch>,
            type_id: i32,
            start_bundle: i32,
            end_bundle: i32,
        }
        #[derive(Clone, Copy, PartialEq)]
        enum Stage {
            Prestep,
            WarmStart,
            Solve,
        }

        let mut blocks: Vec<WorkBlock> = Vec::new();
        let mut batch_block_ranges: Vec<(i32, i32)> = Vec::with_capacity(batch_count as usize);
        for batch_index in 0..batch_count {
            let batch = active_set.batches.get(batch_index);
            let begin = blocks.len() as i32;
            for type_batch_index in 0..batch.type_batches.count {
                let type_batch = batch.type_batches.get(type_batch_index);
                let bundle_count = type_batch.bundle_count();
                let type_batch_pointer = SendPtr(unsafe {
                    batch
                        .type_batches
                        .span
                        .shared_mut_ptr()
                        .add(type_batch_index as usize)
                });
                let mut start = 0;
                while start < bundle_count {
                    let end = (start + BUNDLES_PER_WORK_BLOCK).min(bundle_count);
                    blocks.push(WorkBlock {
                        type_batch: type_batch_pointer,
                        type_id: type_batch.type_id,
                        start_bundle: start,
                        end_bundle: end,
                    });
                    start = end;
                }
            }
            batch_block_ranges.push((begin, blocks.len() as i32));
        }
        if blocks.is_empty() {
            return;
        }

        // Stage schedule: one unordered prestep pass, then batch-serialized
        // warm start and iterations.
        let mut stages: Vec<(Stage, i32, i32)> = Vec::new();
        stages.push((Stage::Prestep, 0, blocks.len() as i32));
        for &(begin, end) in &batch_block_ranges {
            stages.push((Stage::WarmStart, begin, end));
        }
        for _ in 0..self.velocity_iteration_count {
            for &(begin, end) in &batch_block_ranges {
                stages.push((Stage::Solve, begin, end));
            }
        }

        let run_block = |stage: Stage, block: &WorkBlock| {
            let processor = self.processor(block.type_id);
            let type_batch = unsafe { &*block.type_batch.0 };
            match stage {
                Stage::Prestep => processor.prestep(
                    type_batch,
                    bodies,
                    dt,
                    inverse_dt,
                    block.start_bundle,
                    block.end_bundle,
                ),
                Stage::WarmStart => {
                    processor.warm_start(type_batch, bodies, block.start_bundle, block.end_bundle)
                }
                Stage::Solve => {
                    processor.solve(type_batch, bodies, block.start_bundle, block.end_bundle)
                }
            }
        };

        match dispatcher {
            Some(dispatcher) if dispatcher.thread_count() > 1 => {
                let worker_count = dispatcher.thread_count();
                let counters: Vec<JobCounter> = stages
                    .iter()
                    .map(|&(_, begin, end)| JobCounter::new(end - begin))
                    .collect();
                let barrier = Barrier::new(worker_count as usize);
                let blocks_ref = &blocks;
                let stages_ref = &stages;
                let run_block_ref = &run_block;
                dispatcher.dispatch_workers(&move |_worker_index| {
                    for (stage_index, &(stage, begin, _end)) in stages_ref.iter().enumerate() {
                        while let Some(job) = counters[stage_index].claim() {
                            run_block_ref(stage, &blocks_ref[(begin + job) as usize]);
                        }
                        barrier.wait();
                    }
                });
            }
            _ => {
                for &(stage, begin, end) in &stages {
                    for block_index in begin..end {
                        run_block(stage, &blocks[block_index as usize]);
                    }
                }
            }
        }
    }

    /// Scales every accumulated impulse in the active set, e.g. for
    /// timestep changes.
    pub fn scale_accumulated_impulses(&mut self, scale: f32) {
        let set = self.sets.get_mut(0);
        for batch_index in 0..set.batches.count {
            let batch = set.batches.get_mut(batch_index);
            for type_batch_index in 0..batch.type_batches.count {
                let type_batch = batch.type_batches.get_mut(type_batch_index);
                let type_id = type_batch.type_id;
                self.type_processors[type_id as usize]
                    .as_ref()
                    .unwrap()
                    .scale_accumulated_impulses(type_batch, scale);
            }
        }
    }

    /// Grows the sets buffer to hold at least `capacity` sets.
    pub(crate) fn ensure_sets_capacity(&mut self, capacity: i32, pool: &mut BufferPool) {
        if capacity > self.sets.len() {
            let old_length = self.sets.len();
            pool.resize_to_at_least(&mut self.sets, capacity, old_length);
            let new_length = self.sets.len();
            self.sets.clear(old_length, new_length - old_length);
        }
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        for i in 0..self.batch_referenced_handles.count {
            self.batch_referenced_handles.get_mut(i).dispose(pool);
        }
        self.batch_referenced_handles.dispose(pool);
        for i in 0..self.sets.len() {
            let set = self.sets.get_mut(i);
            if set.allocated() {
                set.dispose(pool);
            }
        }
        pool.return_buffer(&mut self.sets);
        pool.return_buffer(&mut self.handle_to_constraint);
        self.handle_pool.dispose(pool);
    }
}

unsafe impl Send for Solver {}
unsafe impl Sync for Solver {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body_description::{
        BodyActivityDescription, BodyDescription, CollidableDescription,
    };
    use crate::physics::body_properties::{BodyInertia, RigidPose};
    use crate::physics::constraints::ball_socket::BallSocket;
    use crate::physics::constraints::spring_settings::SpringSettings;
    use glam::Vec3;

    fn add_test_body(bodies: &mut Bodies, pool: &mut BufferPool, position: Vec3) -> BodyHandle {
        let handle = bodies.add(
            &BodyDescription::create_dynamic(
                RigidPose::at(position),
                BodyInertia::for_sphere(1.0, 0.5),
                CollidableDescription::none(),
                BodyActivityDescription::default(),
            ),
            pool,
        );
        // The solver gathers world inertia; stand in for the pose
        // integrator's refresh. Identity orientation makes it a copy.
        let index = bodies.location(handle).index;
        let state = bodies.active_set_mut().dynamics_state.get_mut(index);
        state.inertia.world = state.inertia.local;
        handle
    }

    #[test]
    fn warm_start_with_zero_impulses_leaves_velocities_unchanged() {
        let mut pool = BufferPool::new(65536);
        let mut bodies = Bodies::new(&mut pool, 8, 2, 4);
        let mut solver = Solver::new(&mut pool, 64, 2, 8, 8);
        solver.register_defaults();
        let a = add_test_body(&mut bodies, &mut pool, Vec3::new(0.0, 0.0, 0.0));
        let b = add_test_body(&mut bodies, &mut pool, Vec3::new(0.0, 1.0, 0.0));
        bodies.velocity_mut(a).linear = Vec3::new(1.0, 2.0, 3.0);
        bodies.velocity_mut(b).angular = Vec3::new(-0.5, 0.25, 0.125);
        solver.add_two_body(
            &mut bodies,
            &mut pool,
            a,
            b,
            &BallSocket {
                local_offset_a: Vec3::new(0.0, 0.5, 0.0),
                local_offset_b: Vec3::new(0.0, -0.5, 0.0),
                spring_settings: SpringSettings::new(30.0, 1.0),
            },
        );
        let before_a = *bodies.velocity(a);
        let before_b = *bodies.velocity(b);
        {
            let batch = solver.sets.get(0).batches.get(0);
            let type_batch = batch
                .get_type_batch(crate::physics::constraints::type_ids::BALL_SOCKET)
                .unwrap();
            let processor = solver.processor(type_batch.type_id);
            let dt = 1.0 / 60.0;
            processor.prestep(type_batch, &bodies, dt, 60.0, 0, type_batch.bundle_count());
            processor.warm_start(type_batch, &bodies, 0, type_batch.bundle_count());
        }
        // Zero accumulated impulses must make warm starting a no-op.
        assert_eq!(*bodies.velocity(a), before_a);
        assert_eq!(*bodies.velocity(b), before_b);
        solver.dispose(&mut pool);
        bodies.dispose(&mut pool);
        pool.clear();
    }

    #[test]
    fn placement_prefers_lowest_disjoint_batch() {
        let mut pool = BufferPool::new(65536);
        let mut bodies = Bodies::new(&mut pool, 8, 2, 4);
        let mut solver = Solver::new(&mut pool, 64, 2, 8, 8);
        solver.register_defaults();
        let handles: Vec<_> = (0..6)
            .map(|i| add_test_body(&mut bodies, &mut pool, Vec3::new(i as f32, 0.0, 0.0)))
            .collect();
        let description = BallSocket {
            local_offset_a: Vec3::ZERO,
            local_offset_b: Vec3::ZERO,
            spring_settings: SpringSettings::new(30.0, 1.0),
        };
        let c0 = solver.add_two_body(&mut bodies, &mut pool, handles[0], handles[1], &description);
        let c1 = solver.add_two_body(&mut bodies, &mut pool, handles[1], handles[2], &description);
        let c2 = solver.add_two_body(&mut bodies, &mut pool, handles[3], handles[4], &description);
        assert_eq!(solver.location(c0).batch_index, 0);
        assert_eq!(solver.location(c1).batch_index, 1);
        // Disjoint from batch 0's bodies, so minimality demands batch 0.
        assert_eq!(solver.location(c2).batch_index, 0);
        // Removing the blocker lets a new shared-body constraint reuse
        // batch 0.
        solver.remove(&mut bodies, &mut pool, c0);
        let c3 = solver.add_two_body(&mut bodies, &mut pool, handles[1], handles[5], &description);
        assert_eq!(solver.location(c3).batch_index, 0);
        solver.dispose(&mut pool);
        bodies.dispose(&mut pool);
        pool.clear();
    }
}
