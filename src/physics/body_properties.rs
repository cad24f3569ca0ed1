//! Per-body state records and their wide counterparts.

use crate::utilities::symmetric3x3::Symmetric3x3;
use crate::utilities::symmetric3x3_wide::Symmetric3x3Wide;
use crate::utilities::vector3_wide::Vector3Wide;
use crate::utilities::wide::WideFloat;
use glam::{Quat, Vec3};

/// Position and orientation of a body or static.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RigidPose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl RigidPose {
    #[inline(always)]
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    #[inline(always)]
    pub fn at(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }
}

impl Default for RigidPose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BodyVelocity {
    pub linear: Vec3,
    pub angular: Vec3,
}

impl BodyVelocity {
    #[inline(always)]
    pub fn new(linear: Vec3, angular: Vec3) -> Self {
        Self { linear, angular }
    }
}

/// Inverse mass and inverse inertia tensor. All zeroes marks a kinematic
/// body: it participates in constraints but impulses cannot move it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BodyInertia {
    pub inverse_inertia_tensor: Symmetric3x3,
    pub inverse_mass: f32,
}

impl BodyInertia {
    /// Inertia for a solid sphere of the given mass and radius.
    pub fn for_sphere(mass: f32, radius: f32) -> Self {
        let inverse_mass = 1.0 / mass;
        let inverse_inertia = inverse_mass / (0.4 * radius * radius);
        Self {
            inverse_inertia_tensor: Symmetric3x3::from_diagonal(
                inverse_inertia,
                inverse_inertia,
                inverse_inertia,
            ),
            inverse_mass,
        }
    }

    /// Inertia for a solid box of the given mass and full extents.
    pub fn for_box(mass: f32, width: f32, height: f32, length: f32) -> Self {
        let inverse_mass = 1.0 / mass;
        let x = width * width;
        let y = height * height;
        let z = length * length;
        let scale = inverse_mass * 12.0;
        Self {
            inverse_inertia_tensor: Symmetric3x3::from_diagonal(
                scale / (y + z),
                scale / (x + z),
                scale / (x + y),
            ),
            inverse_mass,
        }
    }
}

/// Local inertia plus the world-rotated version refreshed during pose
/// integration. The world inertia is only meaningful between pose
/// integration and the end of the solve.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct BodyInertias {
    pub local: BodyInertia,
    pub world: BodyInertia,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct MotionState {
    pub pose: RigidPose,
    pub velocity: BodyVelocity,
}

/// Full dynamic state of one body.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct BodyDynamics {
    pub motion: MotionState,
    pub inertia: BodyInertias,
}

/// Sleep bookkeeping for one body.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct BodyActivity {
    pub sleep_threshold: f32,
    pub minimum_timesteps_under_threshold: u8,
    pub timesteps_under_threshold_count: u8,
    pub sleep_candidate: bool,
}

// --- wide forms used by solver gathers ---

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct BodyVelocityWide {
    pub linear: Vector3Wide,
    pub angular: Vector3Wide,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct BodyInertiaWide {
    pub inverse_inertia_tensor: Symmetric3x3Wide,
    pub inverse_mass: WideFloat,
}
