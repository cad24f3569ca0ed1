//! Per-step body integration: advances poses, refreshes world inertias,
//! invokes the user velocity callback, updates sleep candidacy, and emits
//! predicted bounding boxes.

use crate::physics::bodies::Bodies;
use crate::physics::body_properties::{BodyActivity, BodyDynamics};
use crate::physics::bounding_box_updater::BoundingBoxUpdater;
use crate::physics::broad_phase::BroadPhase;
use crate::physics::pose_integration::{PoseIntegration, PoseIntegratorCallbacks};
use crate::physics::shapes::Shapes;
use crate::utilities::thread_dispatcher::{JobCounter, ThreadDispatcher};

pub struct PoseIntegrator<TCallbacks: PoseIntegratorCallbacks> {
    pub callbacks: TCallbacks,
}

impl<TCallbacks: PoseIntegratorCallbacks> PoseIntegrator<TCallbacks> {
    pub fn new(callbacks: TCallbacks) -> Self {
        Self { callbacks }
    }

    #[inline(always)]
    fn update_sleep_candidacy(velocity_heuristic: f32, activity: &mut BodyActivity) {
        if velocity_heuristic > activity.sleep_threshold {
            activity.timesteps_under_threshold_count = 0;
            activity.sleep_candidate = false;
        } else if activity.timesteps_under_threshold_count < u8::MAX {
            activity.timesteps_under_threshold_count += 1;
            if activity.timesteps_under_threshold_count
                >= activity.minimum_timesteps_under_threshold
            {
                activity.sleep_candidate = true;
            }
        }
    }

    /// Integrates a range of active bodies and writes their predicted
    /// bounds. `MUTATE` selects between the full integration pass and the
    /// predict-only pass that leaves body state untouched.
    ///
    /// # Safety
    /// Ranges given to concurrent callers must be disjoint.
    unsafe fn integrate_range<const MUTATE: bool>(
        &self,
        bodies: &Bodies,
        shapes: &Shapes,
        broad_phase: &BroadPhase,
        dt: f32,
        worker_index: i32,
        start: i32,
        end: i32,
    ) {
        let active_set = bodies.active_set();
        let states = active_set.dynamics_state.shared_mut_ptr();
        let activities = active_set.activity.shared_mut_ptr();
        let mut bounds_updater = BoundingBoxUpdater::new(shapes, broad_phase, dt);
        for body_index in start..end {
            let state = &mut *states.add(body_index as usize);
            let mut staged: BodyDynamics = *state;

            staged.motion.pose.position += staged.motion.velocity.linear * dt;
            staged.motion.pose.orientation = PoseIntegration::integrate_orientation(
                staged.motion.pose.orientation,
                staged.motion.velocity.angular,
                dt,
            );
            if !Bodies::is_kinematic(&staged.inertia.local) {
                staged.inertia.world.inverse_mass = staged.inertia.local.inverse_mass;
                staged.inertia.world.inverse_inertia_tensor =
                    PoseIntegration::rotate_inverse_inertia(
                        &staged.inertia.local.inverse_inertia_tensor,
                        staged.motion.pose.orientation,
                    );
            }
            self.callbacks.integrate_velocity(
                body_index,
                &staged.motion.pose,
                &staged.inertia.local,
                worker_index,
                &mut staged.motion.velocity,
            );
            if MUTATE {
                *state = staged;
                let heuristic = staged.motion.velocity.linear.length_squared()
                    + staged.motion.velocity.angular.length_squared();
                Self::update_sleep_candidacy(heuristic, &mut *activities.add(body_index as usize));
            }
            bounds_updater.add(
                &staged.motion.pose,
                &staged.motion.velocity,
                active_set.collidables.get(body_index),
            );
        }
    }

    fn run<const MUTATE: bool>(
        &mut self,
        bodies: &mut Bodies,
        shapes: &Shapes,
        broad_phase: &mut BroadPhase,
        dt: f32,
        dispatcher: Option<&dyn ThreadDispatcher>,
    ) {
        self.callbacks.prepare_for_integration(dt);
        let body_count = bodies.active_set().count;
        if body_count == 0 {
            return;
        }
        match dispatcher {
            Some(dispatcher) if dispatcher.thread_count() > 1 => {
                let worker_count = dispatcher.thread_count();
                let job_size = (body_count / (worker_count * 2)).max(16);
                let job_count = (body_count + job_size - 1) / job_size;
                let counter = JobCounter::new(job_count);
                let this = &*self;
                let bodies_ref = &*bodies;
                let broad_phase_ref = &*broad_phase;
                dispatcher.dispatch_workers(&move |worker_index| {
                    while let Some(job) = counter.claim() {
                        let start = job * job_size;
                        let end = (start + job_size).min(body_count);
                        unsafe {
                            this.integrate_range::<MUTATE>(
                                bodies_ref,
                                shapes,
                                broad_phase_ref,
                                dt,
                                worker_index,
                                start,
                                end,
                            );
                        }
                    }
                });
            }
            _ => unsafe {
                self.integrate_range::<MUTATE>(bodies, shapes, broad_phase, dt, 0, 0, body_count);
            },
        }
    }

    /// Advances poses by velocity, refreshes world inertias, applies the
    /// velocity callback, updates sleep candidacy, and writes predicted
    /// bounds into the broadphase.
    pub fn integrate_bodies_and_update_bounding_boxes(
        &mut self,
        bodies: &mut Bodies,
        shapes: &Shapes,
        broad_phase: &mut BroadPhase,
        dt: f32,
        dispatcher: Option<&dyn ThreadDispatcher>,
    ) {
        self.run::<true>(bodies, shapes, broad_phase, dt, dispatcher);
    }

    /// Writes predicted bounds from speculatively integrated state without
    /// mutating poses, velocities, inertias, or sleep state. For
    /// timesteppers that integrate after solving.
    pub fn predict_bounding_boxes(
        &mut self,
        bodies: &mut Bodies,
        shapes: &Shapes,
        broad_phase: &mut BroadPhase,
        dt: f32,
        dispatcher: Option<&dyn ThreadDispatcher>,
    ) {
        self.run::<false>(bodies, shapes, broad_phase, dt, dispatcher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body_description::{
        BodyActivityDescription, BodyDescription, CollidableDescription,
    };
    use crate::physics::body_properties::{BodyInertia, BodyVelocity, RigidPose};
    use crate::utilities::memory::buffer_pool::BufferPool;
    use glam::Vec3;

    struct NoGravity;
    impl PoseIntegratorCallbacks for NoGravity {
        fn prepare_for_integration(&mut self, _dt: f32) {}
        fn integrate_velocity(
            &self,
            _body_index: i32,
            _pose: &RigidPose,
            _local_inertia: &BodyInertia,
            _worker_index: i32,
            _velocity: &mut BodyVelocity,
        ) {
        }
    }

    #[test]
    fn zero_velocity_leaves_pose_identical() {
        let mut pool = BufferPool::new(65536);
        let mut bodies = Bodies::new(&mut pool, 4, 1, 4);
        let shapes = Shapes::new(4);
        let mut broad_phase = BroadPhase::new(4, 4, &mut pool);
        let pose = RigidPose::new(
            Vec3::new(1.5, -2.25, 0.125),
            glam::Quat::from_rotation_y(0.7),
        );
        let handle = bodies.add(
            &BodyDescription::create_dynamic(
                pose,
                BodyInertia::for_sphere(1.0, 0.5),
                CollidableDescription::none(),
                BodyActivityDescription::default(),
            ),
            &mut pool,
        );
        let mut integrator = PoseIntegrator::new(NoGravity);
        for _ in 0..8 {
            integrator.integrate_bodies_and_update_bounding_boxes(
                &mut bodies,
                &shapes,
                &mut broad_phase,
                1.0 / 60.0,
                None,
            );
        }
        let after = *bodies.pose(handle);
        assert_eq!(after.position, pose.position);
        assert_eq!(after.orientation, pose.orientation);
        bodies.dispose(&mut pool);
        broad_phase.dispose(&mut pool);
        pool.clear();
    }

    #[test]
    fn sleep_candidacy_requires_consecutive_quiet_steps() {
        let mut activity = BodyActivity {
            sleep_threshold: 0.01,
            minimum_timesteps_under_threshold: 3,
            timesteps_under_threshold_count: 0,
            sleep_candidate: false,
        };
        for _ in 0..2 {
            PoseIntegrator::<NoGravity>::update_sleep_candidacy(0.001, &mut activity);
            assert!(!activity.sleep_candidate);
        }
        PoseIntegrator::<NoGravity>::update_sleep_candidacy(0.001, &mut activity);
        assert!(activity.sleep_candidate);
        // Any loud step resets the streak.
        PoseIntegrator::<NoGravity>::update_sleep_candidacy(1.0, &mut activity);
        assert!(!activity.sleep_candidate);
        assert_eq!(activity.timesteps_under_threshold_count, 0);
    }
}
