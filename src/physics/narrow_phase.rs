//! Narrow phase: dispatches broadphase candidate pairs to registered
//! testers, filters through user callbacks, and reconciles the results with
//! the pair cache and solver in a serial flush.

use crate::physics::bodies::Bodies;
use crate::physics::broad_phase::BroadPhase;
use crate::physics::collidable::{CollidableMobility, CollidablePair, CollidableReference};
use crate::physics::constraints::contact::convex::{
    ContactPoint, ConvexContact, ConvexContactOneBody,
};
use crate::physics::constraints::contact::nonconvex::{
    NonconvexContact, NonconvexContactOneBody, NonconvexContactPoint,
};
use crate::physics::constraints::type_ids;
use crate::physics::contact_manifold::{ContactManifold, ConvexContactManifold, NonconvexContactManifold};
use crate::physics::island_awakener;
use crate::physics::pair_cache::{
    gather_contact_impulses, match_warm_start_impulses, scatter_contact_impulses, ContactImpulses,
    PairCache, PairCacheEntry,
};
use crate::physics::body_properties::RigidPose;
use crate::physics::shapes::{Shapes, TypedIndex};
use crate::physics::solver::Solver;
use crate::physics::statics::Statics;
use crate::utilities::memory::buffer_pool::BufferPool;
use crate::utilities::thread_dispatcher::{JobCounter, ThreadDispatcher};
use std::cell::UnsafeCell;
use std::sync::Arc;

pub use crate::physics::constraints::contact::common::PairMaterialProperties;

/// A collision tester for one ordered pair of shape types. Produces contact
/// offsets relative to the first collidable's position and normals pointing
/// from the second collidable toward the first.
pub trait PairTester: Send + Sync {
    fn test(
        &self,
        shape_a: *const u8,
        pose_a: &RigidPose,
        shape_b: *const u8,
        pose_b: &RigidPose,
        speculative_margin: f32,
    ) -> Option<ContactManifold>;
}

/// Registry of pair testers keyed by shape type pair. Registering (a, b)
/// also covers (b, a) through result flipping.
pub struct ContactTaskRegistry {
    table: Vec<Option<(Arc<dyn PairTester>, bool)>>,
    stride: usize,
}

impl ContactTaskRegistry {
    pub fn new(maximum_shape_types: usize) -> Self {
        Self {
            table: (0..maximum_shape_types * maximum_shape_types)
                .map(|_| None)
                .collect(),
            stride: maximum_shape_types,
        }
    }

    pub fn register(&mut self, type_a: i32, type_b: i32, tester: Arc<dyn PairTester>) {
        let a = type_a as usize;
        let b = type_b as usize;
        debug_assert!(a < self.stride && b < self.stride);
        self.table[a * self.stride + b] = Some((tester.clone(), false));
        if a != b {
            self.table[b * self.stride + a] = Some((tester, true));
        }
    }

    #[inline(always)]
    pub fn get(&self, type_a: i32, type_b: i32) -> Option<(&dyn PairTester, bool)> {
        let index = type_a as usize * self.stride + type_b as usize;
        self.table
            .get(index)
            .and_then(|slot| slot.as_ref())
            .map(|(tester, flipped)| (tester.as_ref(), *flipped))
    }
}

/// User hooks controlling contact generation.
pub trait NarrowPhaseCallbacks: Sync {
    /// Rejecting a pair here skips the tester entirely. Not an error; a
    /// filtering mechanism.
    fn allow_contact_generation(
        &self,
        worker_index: i32,
        a: CollidableReference,
        b: CollidableReference,
    ) -> bool;

    /// Inspects or mutates a fresh manifold and supplies the pair's
    /// material. Returning None drops the manifold.
    fn configure_contact_manifold(
        &self,
        worker_index: i32,
        pair: &CollidablePair,
        manifold: &mut ContactManifold,
    ) -> Option<PairMaterialProperties>;
}

struct PairUpdate {
    pair: CollidablePair,
    manifold: ContactManifold,
    material: PairMaterialProperties,
}

pub struct NarrowPhase<TCallbacks: NarrowPhaseCallbacks> {
    pub callbacks: TCallbacks,
    pub registry: ContactTaskRegistry,
    pub pair_cache: PairCache,
    /// Candidate pairs from the current step's broadphase enumeration.
    pairs: Vec<CollidablePair>,
    /// Structural changes are deferred into per-worker queues and applied
    /// by the serial flush, keeping batch referenced-handle sets and slot
    /// reservations single-threaded.
    pair_update_queues: Vec<UnsafeCell<Vec<PairUpdate>>>,
}

unsafe impl<TCallbacks: NarrowPhaseCallbacks> Sync for NarrowPhase<TCallbacks> {}

impl<TCallbacks: NarrowPhaseCallbacks> NarrowPhase<TCallbacks> {
    pub fn new(
        callbacks: TCallbacks,
        registry: ContactTaskRegistry,
        initial_pair_capacity: i32,
        pool: &mut BufferPool,
    ) -> Self {
        Self {
            callbacks,
            registry,
            pair_cache: PairCache::new(initial_pair_capacity, pool),
            pairs: Vec::new(),
            pair_update_queues: vec![UnsafeCell::new(Vec::new())],
        }
    }

    fn resolve(
        reference: CollidableReference,
        bodies: &Bodies,
        statics: &Statics,
    ) -> (RigidPose, TypedIndex, f32) {
        if reference.is_static() {
            let static_body = statics.get(reference.static_handle());
            (
                static_body.pose,
                static_body.collidable.shape,
                static_body.collidable.speculative_margin,
            )
        } else {
            let location = bodies.location(reference.body_handle());
            let set = bodies.sets.get(location.set_index);
            let collidable = set.collidables.get(location.index);
            (
                set.dynamics_state.get(location.index).motion.pose,
                collidable.shape,
                collidable.speculative_margin,
            )
        }
    }

    fn flip_manifold(manifold: &mut ContactManifold) {
        match manifold {
            ContactManifold::Convex(manifold) => {
                for i in 0..manifold.count as usize {
                    manifold.contacts[i].offset -= manifold.offset_b;
                }
                manifold.normal = -manifold.normal;
                manifold.offset_b = -manifold.offset_b;
            }
            ContactManifold::Nonconvex(manifold) => {
                for i in 0..manifold.count as usize {
                    manifold.contacts[i].offset -= manifold.offset_b;
                    manifold.contacts[i].normal = -manifold.contacts[i].normal;
                }
                manifold.offset_b = -manifold.offset_b;
            }
        }
    }

    fn test_pair(
        &self,
        worker_index: i32,
        pair: CollidablePair,
        bodies: &Bodies,
        statics: &Statics,
        shapes: &Shapes,
    ) -> Option<PairUpdate> {
        if !self.callbacks.allow_contact_generation(worker_index, pair.a, pair.b) {
            return None;
        }
        let (pose_a, shape_a, margin_a) = Self::resolve(pair.a, bodies, statics);
        let (pose_b, shape_b, margin_b) = Self::resolve(pair.b, bodies, statics);
        if !shape_a.exists() || !shape_b.exists() {
            return None;
        }
        let (tester, flipped) = self.registry.get(shape_a.type_id(), shape_b.type_id())?;
        let speculative_margin = margin_a + margin_b;
        let mut manifold = if flipped {
            let mut manifold = tester.test(
                shapes.get_data(shape_b),
                &pose_b,
                shapes.get_data(shape_a),
                &pose_a,
                speculative_margin,
            )?;
            Self::flip_manifold(&mut manifold);
            manifold
        } else {
            tester.test(
                shapes.get_data(shape_a),
                &pose_a,
                shapes.get_data(shape_b),
                &pose_b,
                speculative_margin,
            )?
        };
        if manifold.count() == 0 {
            return None;
        }
        let material = self
            .callbacks
            .configure_contact_manifold(worker_index, &pair, &mut manifold)?;
        Some(PairUpdate {
            pair,
            manifold,
            material,
        })
    }

    /// Runs testers over the broadphase's candidate pairs, queueing results
    /// for the flush. Contact generation parallelizes freely; only the
    /// flush mutates shared structures.
    pub fn execute(
        &mut self,
        bodies: &Bodies,
        statics: &Statics,
        shapes: &Shapes,
        broad_phase: &BroadPhase,
        dispatcher: Option<&dyn ThreadDispatcher>,
    ) {
        self.pairs.clear();
        broad_phase.for_each_overlap(&mut |a, b| {
            // At least one participant must be dynamic for a constraint to
            // exist.
            if a.mobility() != CollidableMobility::Dynamic
                && b.mobility() != CollidableMobility::Dynamic
            {
                return;
            }
            self.pairs.push(CollidablePair::new(a, b));
        });
        let worker_count = dispatcher.map(|d| d.thread_count()).unwrap_or(1).max(1);
        while self.pair_update_queues.len() < worker_count as usize {
            self.pair_update_queues.push(UnsafeCell::new(Vec::new()));
        }
        match dispatcher {
            Some(dispatcher) if dispatcher.thread_count() > 1 && self.pairs.len() > 64 => {
                let counter = JobCounter::new(self.pairs.len() as i32);
                let this = &*self;
                dispatcher.dispatch_workers(&|worker_index| {
                    let queue = unsafe {
                        &mut *this.pair_update_queues[worker_index as usize].get()
                    };
                    while let Some(job) = counter.claim() {
                        let pair = this.pairs[job as usize];
                        if let Some(update) =
                            this.test_pair(worker_index, pair, bodies, statics, shapes)
                        {
                            queue.push(update);
                        }
                    }
                });
            }
            _ => {
                let queue = unsafe { &mut *self.pair_update_queues[0].get() };
                for pair_index in 0..self.pairs.len() {
                    let pair = self.pairs[pair_index];
                    if let Some(update) = self.test_pair(0, pair, bodies, statics, shapes) {
                        queue.push(update);
                    }
                }
            }
        }
    }

    /// Serially applies all queued pair updates: wakes islands touched by
    /// new contacts, adds/updates/replaces contact constraints with warm
    /// started impulses, and sweeps stale pairs.
    pub fn flush(
        &mut self,
        bodies: &mut Bodies,
        statics: &mut Statics,
        solver: &mut Solver,
        broad_phase: &mut BroadPhase,
        pool: &mut BufferPool,
    ) {
        // Wake any sleeping participants first so constraint integration
        // only ever deals with active bodies.
        let mut sets_to_wake: Vec<i32> = Vec::new();
        for queue in &self.pair_update_queues {
            let queue = unsafe { &*queue.get() };
            for update in queue.iter() {
                for reference in [update.pair.a, update.pair.b] {
                    if !reference.is_static() {
                        let location = bodies.location(reference.body_handle());
                        if location.set_index > 0 && !sets_to_wake.contains(&location.set_index) {
                            sets_to_wake.push(location.set_index);
                        }
                    }
                }
            }
        }
        if !sets_to_wake.is_empty() {
            island_awakener::activate_sets(
                bodies,
                statics,
                solver,
                broad_phase,
                &mut self.pair_cache,
                pool,
                &sets_to_wake,
                false,
                None,
            );
        }

        let mut queues = std::mem::take(&mut self.pair_update_queues);
        for queue in &mut queues {
            for update in queue.get_mut().drain(..) {
                Self::process_update(update, bodies, solver, &mut self.pair_cache, pool);
            }
        }
        self.pair_update_queues = queues;

        // Freshness sweep: pairs the narrow phase didn't refresh this step
        // lose their constraint and mapping entry.
        let mut index = self.pair_cache.mapping.count - 1;
        while index >= 0 {
            let entry = *self.pair_cache.mapping.values.get(index);
            if entry.touched {
                self.pair_cache.mapping.values.get_mut(index).touched = false;
            } else {
                solver.remove(bodies, pool, entry.constraint_handle);
                self.pair_cache.remove_by_constraint(entry.constraint_handle);
            }
            index -= 1;
        }
    }

    fn process_update(
        update: PairUpdate,
        bodies: &mut Bodies,
        solver: &mut Solver,
        pair_cache: &mut PairCache,
        pool: &mut BufferPool,
    ) {
        let PairUpdate {
            pair,
            manifold,
            material,
        } = update;
        let two_body = !pair.b.is_static();
        let existing = pair_cache.get(pair).copied();
        // Inherit accumulated impulses from the previous frame's constraint
        // by feature id.
        let warm_start = existing.map(|entry| {
            let location = solver.location(entry.constraint_handle);
            let type_batch = solver
                .sets
                .get(location.set_index)
                .batches
                .get(location.batch_index)
                .get_type_batch(location.type_id)
                .expect("Cached constraint must resolve to a type batch.");
            let old_impulses =
                unsafe { gather_contact_impulses(type_batch, location.index_in_type_batch) };
            match_warm_start_impulses(
                &entry,
                &old_impulses,
                &manifold,
                pair_cache.redistribute_unmatched_impulses,
            )
        });

        match &manifold {
            ContactManifold::Convex(convex) => match convex.count {
                1 => Self::commit_convex::<1>(
                    pair, two_body, convex, &manifold, &material, existing, warm_start, bodies,
                    solver, pair_cache, pool,
                ),
                2 => Self::commit_convex::<2>(
                    pair, two_body, convex, &manifold, &material, existing, warm_start, bodies,
                    solver, pair_cache, pool,
                ),
                3 => Self::commit_convex::<3>(
                    pair, two_body, convex, &manifold, &material, existing, warm_start, bodies,
                    solver, pair_cache, pool,
                ),
                _ => Self::commit_convex::<4>(
                    pair, two_body, convex, &manifold, &material, existing, warm_start, bodies,
                    solver, pair_cache, pool,
                ),
            },
            ContactManifold::Nonconvex(nonconvex) => match nonconvex.count {
                // Single-contact nonconvex manifolds are just convex.
                1 => {
                    let mut convex = ConvexContactManifold {
                        normal: nonconvex.contacts[0].normal,
                        offset_b: nonconvex.offset_b,
                        ..Default::default()
                    };
                    convex.push(crate::physics::contact_manifold::ConvexContact {
                        offset: nonconvex.contacts[0].offset,
                        depth: nonconvex.contacts[0].depth,
                        feature_id: nonconvex.contacts[0].feature_id,
                    });
                    let manifold = ContactManifold::Convex(convex);
                    Self::commit_convex::<1>(
                        pair,
                        two_body,
                        match &manifold {
                            ContactManifold::Convex(convex) => convex,
                            _ => unreachable!(),
                        },
                        &manifold,
                        &material,
                        existing,
                        warm_start,
                        bodies,
                        solver,
                        pair_cache,
                        pool,
                    );
                }
                2 => Self::commit_nonconvex::<2>(
                    pair, two_body, nonconvex, &manifold, &material, existing, warm_start, bodies,
                    solver, pair_cache, pool,
                ),
                3 => Self::commit_nonconvex::<3>(
                    pair, two_body, nonconvex, &manifold, &material, existing, warm_start, bodies,
                    solver, pair_cache, pool,
                ),
                4 => Self::commit_nonconvex::<4>(
                    pair, two_body, nonconvex, &manifold, &material, existing, warm_start, bodies,
                    solver, pair_cache, pool,
                ),
                5 => Self::commit_nonconvex::<5>(
                    pair, two_body, nonconvex, &manifold, &material, existing, warm_start, bodies,
                    solver, pair_cache, pool,
                ),
                6 => Self::commit_nonconvex::<6>(
                    pair, two_body, nonconvex, &manifold, &material, existing, warm_start, bodies,
                    solver, pair_cache, pool,
                ),
                7 => Self::commit_nonconvex::<7>(
                    pair, two_body, nonconvex, &manifold, &material, existing, warm_start, bodies,
                    solver, pair_cache, pool,
                ),
                _ => Self::commit_nonconvex::<8>(
                    pair, two_body, nonconvex, &manifold, &material, existing, warm_start, bodies,
                    solver, pair_cache, pool,
                ),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_commit(
        pair: CollidablePair,
        manifold: &ContactManifold,
        existing: Option<PairCacheEntry>,
        same_kind: bool,
        constraint_handle: crate::physics::handles::ConstraintHandle,
        warm_start: Option<ContactImpulses>,
        solver: &mut Solver,
        pair_cache: &mut PairCache,
        pool: &mut BufferPool,
    ) {
        if let Some(impulses) = warm_start.as_ref() {
            let location = solver.location(constraint_handle);
            let type_batch = solver
                .sets
                .get_mut(location.set_index)
                .batches
                .get_mut(location.batch_index)
                .get_type_batch_mut(location.type_id)
                .expect("Constraint must resolve to a type batch.");
            unsafe {
                scatter_contact_impulses(type_batch, location.index_in_type_batch, impulses);
            }
        }
        let new_entry = PairCacheEntry::new(constraint_handle, manifold);
        if existing.is_some() {
            if same_kind {
                *pair_cache.get_mut(pair).unwrap() = new_entry;
            } else {
                pair_cache.remove(pair);
                pair_cache.add(pair, new_entry, pool);
            }
        } else {
            pair_cache.add(pair, new_entry, pool);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_convex<const N: usize>(
        pair: CollidablePair,
        two_body: bool,
        convex: &ConvexContactManifold,
        manifold: &ContactManifold,
        material: &PairMaterialProperties,
        existing: Option<PairCacheEntry>,
        warm_start: Option<ContactImpulses>,
        bodies: &mut Bodies,
        solver: &mut Solver,
        pair_cache: &mut PairCache,
        pool: &mut BufferPool,
    ) {
        debug_assert!(convex.count as usize == N);
        let type_id = type_ids::convex_contact(N as i32, two_body);
        let mut contacts = [ContactPoint::default(); N];
        for i in 0..N {
            contacts[i] = ContactPoint {
                offset_a: convex.contacts[i].offset,
                depth: convex.contacts[i].depth,
            };
        }
        let same_kind = existing
            .map(|entry| solver.location(entry.constraint_handle).type_id == type_id)
            .unwrap_or(false);
        let constraint_handle = if two_body {
            let description = ConvexContact::<N> {
                normal: convex.normal,
                offset_b: convex.offset_b,
                contacts,
                material: *material,
            };
            if same_kind {
                let handle = existing.unwrap().constraint_handle;
                solver.apply_description(handle, &description);
                handle
            } else {
                if let Some(entry) = existing {
                    solver.remove(bodies, pool, entry.constraint_handle);
                }
                solver.add_two_body(
                    bodies,
                    pool,
                    pair.a.body_handle(),
                    pair.b.body_handle(),
                    &description,
                )
            }
        } else {
            let description = ConvexContactOneBody::<N> {
                normal: convex.normal,
                contacts,
                material: *material,
            };
            if same_kind {
                let handle = existing.unwrap().constraint_handle;
                solver.apply_description(handle, &description);
                handle
            } else {
                if let Some(entry) = existing {
                    solver.remove(bodies, pool, entry.constraint_handle);
                }
                solver.add_one_body(bodies, pool, pair.a.body_handle(), &description)
            }
        };
        Self::finish_commit(
            pair,
            manifold,
            existing,
            same_kind,
            constraint_handle,
            warm_start,
            solver,
            pair_cache,
            pool,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_nonconvex<const N: usize>(
        pair: CollidablePair,
        two_body: bool,
        nonconvex: &NonconvexContactManifold,
        manifold: &ContactManifold,
        material: &PairMaterialProperties,
        existing: Option<PairCacheEntry>,
        warm_start: Option<ContactImpulses>,
        bodies: &mut Bodies,
        solver: &mut Solver,
        pair_cache: &mut PairCache,
        pool: &mut BufferPool,
    ) {
        debug_assert!(nonconvex.count as usize == N);
        let type_id = type_ids::nonconvex_contact(N as i32, two_body);
        let mut contacts = [NonconvexContactPoint::default(); N];
        for i in 0..N {
            contacts[i] = NonconvexContactPoint {
                offset_a: nonconvex.contacts[i].offset,
                normal: nonconvex.contacts[i].normal,
                depth: nonconvex.contacts[i].depth,
            };
        }
        let same_kind = existing
            .map(|entry| solver.location(entry.constraint_handle).type_id == type_id)
            .unwrap_or(false);
        let constraint_handle = if two_body {
            let description = NonconvexContact::<N> {
                offset_b: nonconvex.offset_b,
                contacts,
                material: *material,
            };
            if same_kind {
                let handle = existing.unwrap().constraint_handle;
                solver.apply_description(handle, &description);
                handle
            } else {
                if let Some(entry) = existing {
                    solver.remove(bodies, pool, entry.constraint_handle);
                }
                solver.add_two_body(
                    bodies,
                    pool,
                    pair.a.body_handle(),
                    pair.b.body_handle(),
                    &description,
                )
            }
        } else {
            let description = NonconvexContactOneBody::<N> {
                contacts,
                material: *material,
            };
            if same_kind {
                let handle = existing.unwrap().constraint_handle;
                solver.apply_description(handle, &description);
                handle
            } else {
                if let Some(entry) = existing {
                    solver.remove(bodies, pool, entry.constraint_handle);
                }
                solver.add_one_body(bodies, pool, pair.a.body_handle(), &description)
            }
        };
        Self::finish_commit(
            pair,
            manifold,
            existing,
            same_kind,
            constraint_handle,
            warm_start,
            solver,
            pair_cache,
            pool,
        );
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        self.pair_cache.dispose(pool);
    }
}
