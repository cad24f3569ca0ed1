//! Swivel hinge: ball socket plus one angular degree of freedom keeping A's
//! swivel axis perpendicular to B's hinge axis. Permits rotation about both
//! axes, like a universal joint's cross.

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
use crate::utilities::quaternion_wide::QuaternionWide;
use crate::utilities::symmetric3x3_wide::Symmetric3x3Wide;
use crate::utilities::vector3_wide::Vector3Wide;
use crate::utilities::wide::WideFloat;
use glam::Vec3;

#[derive(Clone, Copy, Debug)]
pub struct SwivelHinge {
    pub local_offset_a: Vec3,
    pub local_swivel_axis_a: Vec3,
    pub local_offset_b: Vec3,
    pub local_hinge_axis_b: Vec3,
    pub spring_settings: SpringSettings,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct SwivelHingePrestep {
    pub local_offset_a: Vector3Wide,
    pub local_swivel_axis_a: Vector3Wide,
    pub local_offset_b: Vector3Wide,
    pub local_hinge_axis_b: Vector3Wide,
    pub spring_settings: SpringSettingsWide,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct SwivelHingeProjection {
    pub inertia_a: BodyInertiaWide,
    pub inertia_b: BodyInertiaWide,
    pub offset_a: Vector3Wide,
    pub offset_b: Vector3Wide,
    pub linear_bias: Vector3Wide,
    pub linear_effective_mass: Symmetric3x3Wide,
    /// Angular jacobian of the perpendicularity constraint:
    /// cross(swivel axis, hinge axis).
    pub angular_jacobian: Vector3Wide,
    pub angular_bias: WideFloat,
    pub angular_effective_mass: WideFloat,
    pub softness_impulse_scale: WideFloat,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct SwivelHingeAccumulatedImpulses {
    pub linear: Vector3Wide,
    pub angular: WideFloat,
}

pub struct SwivelHingeFunctions;

impl TwoBodyConstraintFunctions for SwivelHingeFunctions {
    type PrestepData = SwivelHingePrestep;
    type Projection = SwivelHingeProjection;
    type AccumulatedImpulses = SwivelHingeAccumulatedImpulses;
    const TYPE_ID: i32 = type_ids::SWIVEL_HINGE;
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32 = 4;

    fn prestep(
        position_a: &Vector3Wide,
        orientation_a: &QuaternionWide,
        inertia_a: &BodyInertiaWide,
        position_b: &Vector3Wide,
        orientation_b: &QuaternionWide,
        inertia_b: &BodyInertiaWide,
        dt: f32,
        _inverse_dt: f32,
        prestep: &SwivelHingePrestep,
    ) -> SwivelHingeProjection {
        let offset_a = orientation_a.transform(&prestep.local_offset_a);
        let offset_b = orientation_b.transform(&prestep.local_offset_b);
        let swivel_axis = orientation_a.transform(&prestep.local_swivel_axis_a);
        let hinge_axis = orientation_b.transform(&prestep.local_hinge_axis_b);
        let springiness = prestep.spring_settings.compute_springiness(dt);

        let linear_effective_mass = compute_anchor_effective_mass(
            inertia_a,
            inertia_b,
            &offset_a,
            &offset_b,
            springiness.effective_mass_cfm_scale,
        );
        let linear_error = (*position_b + offset_b) - (*position_a + offset_a);

        // d(dot(swivel, hinge))/dt = (wa - wb) . (swivel x hinge).
        let angular_jacobian = swivel_axis.cross(&hinge_axis);
        let perpendicularity_error = swivel_axis.dot(&hinge_axis);
        let combined_inertia = inertia_a
            .inverse_inertia_tensor
            .add(&inertia_b.inverse_inertia_tensor);
        let inverse_angular_mass =
            Symmetric3x3Wide::vector_sandwich(&angular_jacobian, &combined_inertia);
        let degenerate = inverse_angular_mass.less_than(WideFloat::splat(1e-10));
        let angular_effective_mass = degenerate.select(
            WideFloat::ZERO,
            springiness.effective_mass_cfm_scale / inverse_angular_mass,
        );

        SwivelHingeProjection {
            inertia_a: *inertia_a,
            inertia_b: *inertia_b,
            offset_a,
            offset_b,
            linear_bias: linear_error.scale(springiness.position_error_to_velocity),
            linear_effective_mass,
            angular_jacobian,
            angular_bias: -perpendicularity_error * springiness.position_error_to_velocity,
            angular_effective_mass,
            softness_impulse_scale: springiness.softness_impulse_scale,
        }
    }

    fn warm_start(
        projection: &SwivelHingeProjection,
        impulses: &SwivelHingeAccumulatedImpulses,
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
        let world_impulse = projection.angular_jacobian.scale(impulses.angular);
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

    fn solve(
        projection: &SwivelHingeProjection,
        impulses: &mut SwivelHingeAccumulatedImpulses,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        let angular_velocity_error =
            (wsv_a.angular - wsv_b.angular).dot(&projection.angular_jacobian);
        let angular_corrective = (projection.angular_bias - angular_velocity_error)
            * projection.angular_effective_mass
            - impulses.angular * projection.softness_impulse_scale;
        impulses.angular = impulses.angular + angular_corrective;
        let world_impulse = projection.angular_jacobian.scale(angular_corrective);
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

impl ConstraintDescription for SwivelHinge {
    const TYPE_ID: i32 = type_ids::SWIVEL_HINGE;
    const BODIES_PER_CONSTRAINT: i32 = 2;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(TwoBodyTypeProcessor::<SwivelHingeFunctions>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        let bundle = &mut *(type_batch.prestep_data.shared_mut_ptr() as *mut SwivelHingePrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        bundle.local_offset_a.write_slot(self.local_offset_a, lane);
        bundle
            .local_swivel_axis_a
            .write_slot(self.local_swivel_axis_a, lane);
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
        let bundle = &*(type_batch.prestep_data.as_ptr() as *const SwivelHingePrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        SwivelHinge {
            local_offset_a: bundle.local_offset_a.read_slot(lane),
            local_swivel_axis_a: bundle.local_swivel_axis_a.read_slot(lane),
            local_offset_b: bundle.local_offset_b.read_slot(lane),
            local_hinge_axis_b: bundle.local_hinge_axis_b.read_slot(lane),
            spring_settings: bundle.spring_settings.read_slot(lane),
        }
    }
}

impl TwoBodyConstraintDescription for SwivelHinge {}
