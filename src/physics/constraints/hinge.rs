//! Hinge: ball socket plus two angular degrees of freedom aligning a hinge
//! axis on each body, leaving rotation about the shared axis free.

use crate::physics::body_properties::{BodyInertiaWide, BodyVelocityWide};
use crate::physics::constraints::ball_socket::{
    apply_anchor_impulse, compute_anchor_effective_mass, compute_anchor_velocity_error,
};
use crate::physics::constraints::spring_settings::{SpringSettings, SpringSettingsWide};
use crate::physics::constraints::type_batch::TypeBatch;
use crate::physics::constraints::type_ids;
use crate::physics::constraints::type_processor::{
    ConstraintDescription, TwoBodyConstraintDescription, TwoBodyConstraintFunctions,
    TwoBodyTypeProcessor, TypeProcessor,
};
use crate::utilities::math_helper::build_orthonormal_basis;
use crate::utilities::matrix2x3_wide::Matrix2x3Wide;
use crate::utilities::quaternion_wide::QuaternionWide;
use crate::utilities::symmetric2x2_wide::Symmetric2x2Wide;
use crate::utilities::symmetric3x3_wide::Symmetric3x3Wide;
use crate::utilities::vector2_wide::Vector2Wide;
use crate::utilities::vector3_wide::Vector3Wide;
use crate::utilities::wide::WideFloat;
use glam::Vec3;

#[derive(Clone, Copy, Debug)]
pub struct Hinge {
    pub local_offset_a: Vec3,
    pub local_hinge_axis_a: Vec3,
    pub local_offset_b: Vec3,
    pub local_hinge_axis_b: Vec3,
    pub spring_settings: SpringSettings,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct HingePrestep {
    pub local_offset_a: Vector3Wide,
    pub local_hinge_axis_a: Vector3Wide,
    /// Basis perpendicular to A's hinge axis, derived once at description
    /// time so the prestep only rotates.
    pub local_basis_x: Vector3Wide,
    pub local_basis_y: Vector3Wide,
    pub local_offset_b: Vector3Wide,
    pub local_hinge_axis_b: Vector3Wide,
    pub spring_settings: SpringSettingsWide,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct HingeProjection {
    pub inertia_a: BodyInertiaWide,
    pub inertia_b: BodyInertiaWide,
    pub offset_a: Vector3Wide,
    pub offset_b: Vector3Wide,
    pub linear_bias: Vector3Wide,
    pub linear_effective_mass: Symmetric3x3Wide,
    pub basis: Matrix2x3Wide,
    pub angular_bias: Vector2Wide,
    pub angular_effective_mass: Symmetric2x2Wide,
    pub softness_impulse_scale: WideFloat,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct HingeAccumulatedImpulses {
    pub linear: Vector3Wide,
    pub angular: Vector2Wide,
}

#[inline(always)]
fn apply_angular_impulse(
    projection: &HingeProjection,
    impulse: &Vector2Wide,
    wsv_a: &mut BodyVelocityWide,
    wsv_b: &mut BodyVelocityWide,
) {
    let world_impulse = projection.basis.transform(impulse);
    wsv_a.angular = wsv_a.angular
        + projection
            .inertia_a
            .inverse_inertia_tensor
            .transform(&world_impulse);
    wsv_b.angular = wsv_b.angular
        - projection
            .inertia_b
            .inverse_inertia_tensor
            .transform(&world_impulse);
}

pub struct HingeFunctions;

impl TwoBodyConstraintFunctions for HingeFunctions {
    type PrestepData = HingePrestep;
    type Projection = HingeProjection;
    type AccumulatedImpulses = HingeAccumulatedImpulses;
    const TYPE_ID: i32 = type_ids::HINGE;
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32 = 5;

    fn prestep(
        position_a: &Vector3Wide,
        orientation_a: &QuaternionWide,
        inertia_a: &BodyInertiaWide,
        position_b: &Vector3Wide,
        orientation_b: &QuaternionWide,
        inertia_b: &BodyInertiaWide,
        dt: f32,
        _inverse_dt: f32,
        prestep: &HingePrestep,
    ) -> HingeProjection {
        let offset_a = orientation_a.transform(&prestep.local_offset_a);
        let offset_b = orientation_b.transform(&prestep.local_offset_b);
        let axis_a = orientation_a.transform(&prestep.local_hinge_axis_a);
        let axis_b = orientation_b.transform(&prestep.local_hinge_axis_b);
        let basis = Matrix2x3Wide {
            x: orientation_a.transform(&prestep.local_basis_x),
            y: orientation_a.transform(&prestep.local_basis_y),
        };
        let springiness = prestep.spring_settings.compute_springiness(dt);

        let linear_effective_mass = compute_anchor_effective_mass(
            inertia_a,
            inertia_b,
            &offset_a,
            &offset_b,
            springiness.effective_mass_cfm_scale,
        );
        let linear_error = (*position_b + offset_b) - (*position_a + offset_a);

        // Axis misalignment expressed against A's perpendicular basis.
        let alignment_error = axis_a.cross(&axis_b);
        let angular_bias = basis
            .transform_by_transpose(&alignment_error)
            .scale(springiness.position_error_to_velocity);
        let combined_inertia = inertia_a
            .inverse_inertia_tensor
            .add(&inertia_b.inverse_inertia_tensor);
        let angular_effective_mass = Symmetric3x3Wide::matrix_sandwich(&basis, &combined_inertia)
            .invert();
        let angular_effective_mass = Symmetric2x2Wide {
            xx: angular_effective_mass.xx * springiness.effective_mass_cfm_scale,
            yx: angular_effective_mass.yx * springiness.effective_mass_cfm_scale,
            yy: angular_effective_mass.yy * springiness.effective_mass_cfm_scale,
        };

        HingeProjection {
            inertia_a: *inertia_a,
            inertia_b: *inertia_b,
            offset_a,
            offset_b,
            linear_bias: linear_error.scale(springiness.position_error_to_velocity),
            linear_effective_mass,
            basis,
            angular_bias,
            angular_effective_mass,
            softness_impulse_scale: springiness.softness_impulse_scale,
        }
    }

    fn warm_start(
        projection: &HingeProjection,
        impulses: &HingeAccumulatedImpulses,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        apply_anchor_impulse(
            &projection.inertia_a,
            &projection.inertia_b,
            &projection.offset_a,
            &projection.offset_b,
            &impulses.linear,
            wsv_a,
            wsv_b,
        );
        apply_angular_impulse(projection, &impulses.angular, wsv_a, wsv_b);
    }

    fn solve(
        projection: &HingeProjection,
        impulses: &mut HingeAccumulatedImpulses,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        // Angular alignment first; it changes angular velocities the linear
        // part then sees.
        let relative_angular = wsv_a.angular - wsv_b.angular;
        let angular_velocity_error = projection.basis.transform_by_transpose(&relative_angular);
        let angular_corrective = projection
            .angular_effective_mass
            .transform(&(projection.angular_bias - angular_velocity_error))
            - impulses.angular.scale(projection.softness_impulse_scale);
        impulses.angular = impulses.angular + angular_corrective;
        apply_angular_impulse(projection, &angular_corrective, wsv_a, wsv_b);

        let linear_velocity_error = compute_anchor_velocity_error(
            &projection.offset_a,
            &projection.offset_b,
            wsv_a,
            wsv_b,
        );
        let linear_corrective = projection
            .linear_effective_mass
            .transform(&(projection.linear_bias - linear_velocity_error))
            - impulses.linear.scale(projection.softness_impulse_scale);
        impulses.linear = impulses.linear + linear_corrective;
        apply_anchor_impulse(
            &projection.inertia_a,
            &projection.inertia_b,
            &projection.offset_a,
            &projection.offset_b,
            &linear_corrective,
            wsv_a,
            wsv_b,
        );
    }
}

impl ConstraintDescription for Hinge {
    const TYPE_ID: i32 = type_ids::HINGE;
    const BODIES_PER_CONSTRAINT: i32 = 2;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(TwoBodyTypeProcessor::<HingeFunctions>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        debug_assert!((self.local_hinge_axis_a.length() - 1.0).abs() < 1e-3);
        let bundle = &mut *(type_batch.prestep_data.shared_mut_ptr() as *mut HingePrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        let (basis_x, basis_y) = build_orthonormal_basis(self.local_hinge_axis_a);
        bundle.local_offset_a.write_slot(self.local_offset_a, lane);
        bundle
            .local_hinge_axis_a
            .write_slot(self.local_hinge_axis_a, lane);
        bundle.local_basis_x.write_slot(basis_x, lane);
        bundle.local_basis_y.write_slot(basis_y, lane);
        bundle.local_offset_b.write_slot(self.local_offset_b, lane);
        bundle
            .local_hinge_axis_b
            .write_slot(self.local_hinge_axis_b, lane);
        bundle.spring_settings.write_slot(&self.spring_settings, lane);
    }

    unsafe fn build_description(
        type_batch: &TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) -> Self {
        let bundle = &*(type_batch.prestep_data.as_ptr() as *const HingePrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        Hinge {
            local_offset_a: bundle.local_offset_a.read_slot(lane),
            local_hinge_axis_a: bundle.local_hinge_axis_a.read_slot(lane),
            local_offset_b: bundle.local_offset_b.read_slot(lane),
            local_hinge_axis_b: bundle.local_hinge_axis_b.read_slot(lane),
            spring_settings: bundle.spring_settings.read_slot(lane),
        }
    }
}

impl TwoBodyConstraintDescription for Hinge {}
