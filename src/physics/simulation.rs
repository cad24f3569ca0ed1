//! The simulation aggregate: owns every subsystem and drives the per-step
//! pipeline.

use crate::physics::bodies::Bodies;
use crate::physics::body_description::{BodyDescription, StaticDescription};
use crate::physics::body_properties::BodyVelocity;
use crate::physics::broad_phase::BroadPhase;
use crate::physics::collidable::{CollidableMobility, CollidableReference};
use crate::physics::constraints::type_processor::{
    ConstraintDescription, OneBodyConstraintDescription, TwoBodyConstraintDescription,
};
use crate::physics::handles::{BodyHandle, ConstraintHandle, StaticHandle};
use crate::physics::island_awakener;
use crate::physics::island_sleeper::IslandSleeper;
use crate::physics::narrow_phase::{ContactTaskRegistry, NarrowPhase, NarrowPhaseCallbacks};
use crate::physics::pose_integration::PoseIntegratorCallbacks;
use crate::physics::pose_integrator::PoseIntegrator;
use crate::physics::shapes::Shapes;
use crate::physics::solver::Solver;
use crate::physics::statics::Statics;
use crate::utilities::memory::buffer_pool::BufferPool;
use crate::utilities::thread_dispatcher::ThreadDispatcher;
use glam::Vec3;

/// Initial capacity hints for simulation storage. The pool grows buffers on
/// demand; these just avoid early churn.
#[derive(Clone, Copy, Debug)]
pub struct SimulationAllocationSizes {
    pub bodies: i32,
    pub statics: i32,
    pub islands: i32,
    pub shapes_per_type: i32,
    pub constraints: i32,
    pub constraints_per_type_batch: i32,
    pub constraint_count_per_body_estimate: i32,
}

impl Default for SimulationAllocationSizes {
    fn default() -> Self {
        Self {
            bodies: 4096,
            statics: 4096,
            islands: 16,
            shapes_per_type: 128,
            constraints: 16384,
            constraints_per_type_batch: 256,
            constraint_count_per_body_estimate: 8,
        }
    }
}

/// Solver configuration.
#[derive(Clone, Copy, Debug)]
pub struct SolveDescription {
    pub velocity_iteration_count: i32,
}

impl Default for SolveDescription {
    fn default() -> Self {
        Self {
            velocity_iteration_count: 8,
        }
    }
}

impl SolveDescription {
    pub fn new(velocity_iteration_count: i32) -> Self {
        Self {
            velocity_iteration_count,
        }
    }
}

/// A full simulation: bodies, statics, shapes, broadphase, narrowphase,
/// solver, and sleep management, plus the memory pool backing them all.
pub struct Simulation<TNarrowPhase: NarrowPhaseCallbacks, TPoseIntegrator: PoseIntegratorCallbacks>
{
    pub pool: BufferPool,
    pub shapes: Shapes,
    pub bodies: Bodies,
    pub statics: Statics,
    pub broad_phase: BroadPhase,
    pub narrow_phase: NarrowPhase<TNarrowPhase>,
    pub solver: Solver,
    pub pose_integrator: PoseIntegrator<TPoseIntegrator>,
}

impl<TNarrowPhase: NarrowPhaseCallbacks, TPoseIntegrator: PoseIntegratorCallbacks>
    Simulation<TNarrowPhase, TPoseIntegrator>
{
    /// Creates a simulation. The pool is owned by the simulation from here
    /// on; all built-in constraint types are registered.
    pub fn new(
        mut pool: BufferPool,
        narrow_phase_callbacks: TNarrowPhase,
        pose_integrator_callbacks: TPoseIntegrator,
        contact_registry: ContactTaskRegistry,
        solve_description: SolveDescription,
        sizes: SimulationAllocationSizes,
    ) -> Self {
        let shapes = Shapes::new(sizes.shapes_per_type);
        let bodies = Bodies::new(
            &mut pool,
            sizes.bodies,
            sizes.islands,
            sizes.constraint_count_per_body_estimate,
        );
        let statics = Statics::new(sizes.statics, &mut pool);
        let broad_phase = BroadPhase::new(sizes.bodies, sizes.bodies + sizes.statics, &mut pool);
        let mut solver = Solver::new(
            &mut pool,
            sizes.constraints,
            sizes.islands,
            sizes.constraints_per_type_batch.min(256),
            solve_description.velocity_iteration_count,
        );
        solver.register_defaults();
        let narrow_phase = NarrowPhase::new(
            narrow_phase_callbacks,
            contact_registry,
            sizes.constraints,
            &mut pool,
        );
        Self {
            pool,
            shapes,
            bodies,
            statics,
            broad_phase,
            narrow_phase,
            solver,
            pose_integrator: PoseIntegrator::new(pose_integrator_callbacks),
        }
    }

    // --- entity management ---

    pub fn add_body(&mut self, description: &BodyDescription) -> BodyHandle {
        let handle = self.bodies.add(description, &mut self.pool);
        if description.collidable.shape.exists() {
            let mut bounds = self
                .shapes
                .compute_bounds(description.collidable.shape, description.pose.orientation);
            bounds.min += description.pose.position;
            bounds.max += description.pose.position;
            let mobility = if Bodies::is_kinematic(&description.local_inertia) {
                CollidableMobility::Kinematic
            } else {
                CollidableMobility::Dynamic
            };
            let leaf = self.broad_phase.add_active(
                CollidableReference::for_body(mobility, handle),
                &bounds,
                &mut self.pool,
            );
            let index = self.bodies.location(handle).index;
            self.bodies
                .active_set_mut()
                .collidables
                .get_mut(index)
                .broad_phase_index = leaf;
        }
        handle
    }

    /// Removes a body and all constraints attached to it.
    pub fn remove_body(&mut self, handle: BodyHandle) {
        self.awaken_body(handle);
        let index = self.bodies.location(handle).index;
        // Remove attached constraints; each removal shrinks the list.
        loop {
            let constraint_handle = {
                let list = self.bodies.active_set().constraints.get(index);
                if list.count == 0 {
                    break;
                }
                list.get(list.count - 1).connecting_constraint_handle
            };
            self.remove_constraint(constraint_handle);
        }
        // Contact pairs referencing the body are now constraint-free, but
        // their cache entries must not dangle.
        let collidable = *self.bodies.active_set().collidables.get(index);
        if collidable.shape.exists() {
            if let Some(moved_reference) =
                self.broad_phase.remove_active_at(collidable.broad_phase_index)
            {
                let moved_location = self.bodies.location(moved_reference.body_handle());
                self.bodies
                    .active_set_mut()
                    .collidables
                    .get_mut(moved_location.index)
                    .broad_phase_index = collidable.broad_phase_index;
            }
        }
        let (_removed, moved_handle) = self.bodies.remove_at(index, &mut self.pool);
        if let Some(moved) = moved_handle {
            let moved_new_index = self.bodies.location(moved).index;
            debug_assert!(moved_new_index == index);
            self.solver.update_for_body_memory_move(
                &self.bodies,
                moved_new_index,
                self.bodies.active_set().count,
                index,
            );
        }
    }

    pub fn add_static(&mut self, description: &StaticDescription) -> StaticHandle {
        let handle = self.statics.add(description, &mut self.pool);
        if description.shape.exists() {
            let mut bounds = self
                .shapes
                .compute_bounds(description.shape, description.pose.orientation);
            bounds.min += description.pose.position;
            bounds.max += description.pose.position;
            let leaf = self.broad_phase.add_static(
                CollidableReference::for_static(handle),
                &bounds,
                &mut self.pool,
            );
            self.statics.get_mut(handle).collidable.broad_phase_index = leaf;
        }
        handle
    }

    pub fn remove_static(&mut self, handle: StaticHandle) {
        let leaf = self.statics.get(handle).collidable.broad_phase_index;
        if leaf >= 0 {
            if let Some(moved_reference) = self.broad_phase.remove_static_at(leaf) {
                island_awakener::patch_static_tree_back_reference(
                    &mut self.bodies,
                    &mut self.statics,
                    moved_reference,
                    leaf,
                );
            }
        }
        self.statics.remove(handle, &mut self.pool);
    }

    /// Adds a two-body constraint, waking any sleeping islands the bodies
    /// belong to first.
    pub fn add_constraint<TDescription: TwoBodyConstraintDescription>(
        &mut self,
        body_a: BodyHandle,
        body_b: BodyHandle,
        description: &TDescription,
    ) -> ConstraintHandle {
        self.awaken_body(body_a);
        self.awaken_body(body_b);
        self.solver
            .add_two_body(&mut self.bodies, &mut self.pool, body_a, body_b, description)
    }

    /// Adds a one-body constraint, waking the body's island first.
    pub fn add_one_body_constraint<TDescription: OneBodyConstraintDescription>(
        &mut self,
        body: BodyHandle,
        description: &TDescription,
    ) -> ConstraintHandle {
        self.awaken_body(body);
        self.solver
            .add_one_body(&mut self.bodies, &mut self.pool, body, description)
    }

    pub fn remove_constraint(&mut self, handle: ConstraintHandle) {
        if self.solver.location(handle).set_index > 0 {
            island_awakener::awaken_constraint(
                &mut self.bodies,
                &mut self.statics,
                &mut self.solver,
                &mut self.broad_phase,
                &mut self.narrow_phase.pair_cache,
                &mut self.pool,
                handle,
            );
        }
        // Contact constraints are owned by pair cache entries; removing the
        // constraint must drop the entry too or the cache would dangle.
        if crate::physics::constraints::type_ids::is_contact_type(
            self.solver.location(handle).type_id,
        ) {
            self.narrow_phase.pair_cache.remove_by_constraint(handle);
        }
        self.solver.remove(&mut self.bodies, &mut self.pool, handle);
    }

    pub fn get_constraint_description<TDescription: ConstraintDescription>(
        &self,
        handle: ConstraintHandle,
    ) -> TDescription {
        self.solver.get_description(handle)
    }

    // --- sleep and wake ---

    pub fn awaken_body(&mut self, handle: BodyHandle) {
        island_awakener::awaken_body(
            &mut self.bodies,
            &mut self.statics,
            &mut self.solver,
            &mut self.broad_phase,
            &mut self.narrow_phase.pair_cache,
            &mut self.pool,
            handle,
        );
    }

    pub fn awaken_sets(&mut self, set_ids: &[i32]) {
        island_awakener::activate_sets(
            &mut self.bodies,
            &mut self.statics,
            &mut self.solver,
            &mut self.broad_phase,
            &mut self.narrow_phase.pair_cache,
            &mut self.pool,
            set_ids,
            true,
            None,
        );
    }

    /// Wakes the body and applies a world-space linear impulse.
    pub fn apply_linear_impulse(&mut self, handle: BodyHandle, impulse: Vec3) {
        self.awaken_body(handle);
        let inverse_mass = self.bodies.local_inertia(handle).inverse_mass;
        let velocity = self.bodies.velocity_mut(handle);
        velocity.linear += impulse * inverse_mass;
    }

    /// Wakes the body and overwrites its velocity.
    pub fn set_velocity(&mut self, handle: BodyHandle, velocity: BodyVelocity) {
        self.awaken_body(handle);
        *self.bodies.velocity_mut(handle) = velocity;
    }

    // --- step stages ---

    /// Migrates sleepable islands into inactive sets.
    pub fn sleep(&mut self) {
        IslandSleeper::update(
            &mut self.bodies,
            &mut self.solver,
            &mut self.broad_phase,
            &mut self.narrow_phase.pair_cache,
            &mut self.pool,
        );
    }

    /// Integrates poses and velocities and writes predicted bounds.
    pub fn integrate_bodies_and_update_bounding_boxes(
        &mut self,
        dt: f32,
        dispatcher: Option<&dyn ThreadDispatcher>,
    ) {
        self.pose_integrator.integrate_bodies_and_update_bounding_boxes(
            &mut self.bodies,
            &self.shapes,
            &mut self.broad_phase,
            dt,
            dispatcher,
        );
    }

    /// Bounding box prediction without state mutation, for steppers that
    /// integrate after solving.
    pub fn predict_bounding_boxes(&mut self, dt: f32, dispatcher: Option<&dyn ThreadDispatcher>) {
        self.pose_integrator.predict_bounding_boxes(
            &mut self.bodies,
            &self.shapes,
            &mut self.broad_phase,
            dt,
            dispatcher,
        );
    }

    /// Refits the broadphase, enumerates overlaps, runs testers, and
    /// flushes constraint changes.
    pub fn collision_detection(&mut self, dispatcher: Option<&dyn ThreadDispatcher>) {
        self.broad_phase.update();
        self.narrow_phase.execute(
            &self.bodies,
            &self.statics,
            &self.shapes,
            &self.broad_phase,
            dispatcher,
        );
        self.narrow_phase.flush(
            &mut self.bodies,
            &mut self.statics,
            &mut self.solver,
            &mut self.broad_phase,
            &mut self.pool,
        );
    }

    /// Runs the solver's prestep, warm start, and velocity iterations.
    pub fn solve(&mut self, dt: f32, dispatcher: Option<&dyn ThreadDispatcher>) {
        self.solver.solve(&self.bodies, dt, dispatcher);
    }

    /// Performs one full timestep: sleep, integrate and update bounds,
    /// collision detection, solve.
    pub fn timestep(&mut self, dt: f32, dispatcher: Option<&dyn ThreadDispatcher>) {
        assert!(dt > 0.0, "Timestep duration must be positive.");
        self.sleep();
        self.integrate_bodies_and_update_bounding_boxes(dt, dispatcher);
        self.collision_detection(dispatcher);
        self.solve(dt, dispatcher);
    }
}

impl<TNarrowPhase: NarrowPhaseCallbacks, TPoseIntegrator: PoseIntegratorCallbacks> Drop
    for Simulation<TNarrowPhase, TPoseIntegrator>
{
    fn drop(&mut self) {
        self.narrow_phase.dispose(&mut self.pool);
        self.solver.dispose(&mut self.pool);
        self.broad_phase.dispose(&mut self.pool);
        self.statics.dispose(&mut self.pool);
        self.bodies.dispose(&mut self.pool);
        self.shapes.dispose(&mut self.pool);
        self.pool.clear();
    }
}
