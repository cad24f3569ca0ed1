//! Scalar pose integration math and the user velocity callback contract.

use crate::physics::body_properties::{BodyInertia, BodyVelocity, RigidPose};
use crate::utilities::symmetric3x3::Symmetric3x3;
use glam::{Mat3, Quat, Vec3};

/// User hooks invoked during pose integration, typically to apply gravity
/// and damping.
///
/// `integrate_velocity` may run on any worker; implementations must not
/// mutate shared state.
pub trait PoseIntegratorCallbacks: Sync {
    /// Called once at the start of integration for a step.
    fn prepare_for_integration(&mut self, dt: f32);

    /// Alters a body's velocity. Kinematic bodies are passed too; their
    /// local inertia is all zeroes.
    fn integrate_velocity(
        &self,
        body_index: i32,
        pose: &RigidPose,
        local_inertia: &BodyInertia,
        worker_index: i32,
        velocity: &mut BodyVelocity,
    );
}

pub struct PoseIntegration;

impl PoseIntegration {
    /// Angular velocities below this magnitude leave orientation untouched,
    /// keeping resting bodies bit-stable.
    pub const ANGULAR_EPSILON: f32 = 1e-15;

    /// Integrates orientation by the world-frame angular velocity over dt.
    /// Gyroscopic torque is deliberately discarded; the explicit term is a
    /// stability hazard at game timesteps.
    #[inline(always)]
    pub fn integrate_orientation(orientation: Quat, angular_velocity: Vec3, dt: f32) -> Quat {
        let speed_squared = angular_velocity.length_squared();
        if speed_squared <= Self::ANGULAR_EPSILON * Self::ANGULAR_EPSILON {
            return orientation;
        }
        let speed = speed_squared.sqrt();
        let half_angle = speed * dt * 0.5;
        let (sin, cos) = half_angle.sin_cos();
        let axis_scale = sin / speed;
        let increment = Quat::from_xyzw(
            angular_velocity.x * axis_scale,
            angular_velocity.y * axis_scale,
            angular_velocity.z * axis_scale,
            cos,
        );
        (increment * orientation).normalize()
    }

    /// Rotates a local inverse inertia tensor into world space.
    #[inline(always)]
    pub fn rotate_inverse_inertia(
        local_inverse_inertia: &Symmetric3x3,
        orientation: Quat,
    ) -> Symmetric3x3 {
        Symmetric3x3::rotation_sandwich(Mat3::from_quat(orientation), local_inverse_inertia)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_angular_velocity_is_bit_exact() {
        let orientation = Quat::from_axis_angle(Vec3::new(0.1, 0.9, 0.2).normalize(), 0.345);
        let integrated = PoseIntegration::integrate_orientation(orientation, Vec3::ZERO, 1.0 / 60.0);
        assert_eq!(orientation.x.to_bits(), integrated.x.to_bits());
        assert_eq!(orientation.y.to_bits(), integrated.y.to_bits());
        assert_eq!(orientation.z.to_bits(), integrated.z.to_bits());
        assert_eq!(orientation.w.to_bits(), integrated.w.to_bits());
    }

    #[test]
    fn constant_spin_accumulates_angle() {
        let mut orientation = Quat::IDENTITY;
        let angular = Vec3::new(0.0, std::f32::consts::PI, 0.0);
        let dt = 1.0 / 60.0;
        for _ in 0..60 {
            orientation = PoseIntegration::integrate_orientation(orientation, angular, dt);
        }
        // One second at pi rad/s is half a revolution about y.
        let expected = Quat::from_rotation_y(std::f32::consts::PI);
        assert!(orientation.dot(expected).abs() > 0.9999);
        assert!((orientation.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn world_inertia_tracks_orientation() {
        let local = Symmetric3x3::from_diagonal(1.0, 2.0, 3.0);
        // A quarter turn about z swaps the x and y diagonal entries.
        let world = PoseIntegration::rotate_inverse_inertia(
            &local,
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        );
        assert!((world.xx - 2.0).abs() < 1e-4);
        assert!((world.yy - 1.0).abs() < 1e-4);
        assert!((world.zz - 3.0).abs() < 1e-4);
    }
}
