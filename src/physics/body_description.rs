//! Descriptions used to create bodies and statics.

use crate::physics::body_properties::{BodyInertia, BodyVelocity, RigidPose};
use crate::physics::collidable::ContinuityMode;
use crate::physics::shapes::TypedIndex;
use glam::Vec3;

#[derive(Clone, Copy, Debug)]
pub struct CollidableDescription {
    pub shape: TypedIndex,
    pub speculative_margin: f32,
    pub continuity: ContinuityMode,
}

impl CollidableDescription {
    pub fn new(shape: TypedIndex, speculative_margin: f32) -> Self {
        debug_assert!(speculative_margin >= 0.0);
        Self {
            shape,
            speculative_margin,
            continuity: ContinuityMode::Discrete,
        }
    }

    /// A description with no shape; the body will not collide.
    pub fn none() -> Self {
        Self {
            shape: TypedIndex::default(),
            speculative_margin: 0.0,
            continuity: ContinuityMode::Discrete,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BodyActivityDescription {
    /// Squared velocity magnitude below which the body is considered
    /// sleepable.
    pub sleep_threshold: f32,
    pub minimum_timestep_count_under_threshold: u8,
}

impl Default for BodyActivityDescription {
    fn default() -> Self {
        Self {
            sleep_threshold: 0.01,
            minimum_timestep_count_under_threshold: 32,
        }
    }
}

impl BodyActivityDescription {
    pub fn new(sleep_threshold: f32) -> Self {
        debug_assert!(sleep_threshold >= 0.0);
        Self {
            sleep_threshold,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BodyDescription {
    pub pose: RigidPose,
    pub velocity: BodyVelocity,
    pub local_inertia: BodyInertia,
    pub collidable: CollidableDescription,
    pub activity: BodyActivityDescription,
}

impl BodyDescription {
    /// Creates a dynamic body description.
    pub fn create_dynamic(
        pose: RigidPose,
        local_inertia: BodyInertia,
        collidable: CollidableDescription,
        activity: BodyActivityDescription,
    ) -> Self {
        debug_assert!(
            local_inertia.inverse_mass > 0.0,
            "Dynamic bodies must have nonzero inverse mass; use create_kinematic otherwise."
        );
        Self {
            pose,
            velocity: BodyVelocity::default(),
            local_inertia,
            collidable,
            activity,
        }
    }

    /// Creates a kinematic body description: zero inverse mass and inertia.
    pub fn create_kinematic(
        pose: RigidPose,
        collidable: CollidableDescription,
        activity: BodyActivityDescription,
    ) -> Self {
        Self {
            pose,
            velocity: BodyVelocity::default(),
            local_inertia: BodyInertia::default(),
            collidable,
            activity,
        }
    }

    pub fn with_velocity(mut self, linear: Vec3, angular: Vec3) -> Self {
        self.velocity = BodyVelocity::new(linear, angular);
        self
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StaticDescription {
    pub pose: RigidPose,
    pub shape: TypedIndex,
}

impl StaticDescription {
    pub fn new(pose: RigidPose, shape: TypedIndex) -> Self {
        Self { pose, shape }
    }
}
