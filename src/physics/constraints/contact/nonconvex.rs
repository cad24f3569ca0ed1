//! Nonconvex contact constraints: 2 to 8 contacts, each with its own
//! normal, penetration limit, and tangent friction.

use crate::physics::body_properties::{BodyInertiaWide, BodyVelocityWide};
use crate::physics::constraints::contact::common::{
    MaterialPropertiesWide, PairMaterialProperties, PenetrationLimit, PenetrationProjection,
    TangentFriction,
};
use crate::physics::constraints::type_batch::TypeBatch;
use crate::physics::constraints::type_ids;
use crate::physics::constraints::type_processor::{
    ConstraintDescription, OneBodyConstraintDescription, OneBodyConstraintFunctions,
    OneBodyTypeProcessor, TwoBodyConstraintDescription, TwoBodyConstraintFunctions,
    TwoBodyTypeProcessor, TypeProcessor,
};
use crate::utilities::quaternion_wide::QuaternionWide;
use crate::utilities::symmetric2x2_wide::Symmetric2x2Wide;
use crate::utilities::vector2_wide::Vector2Wide;
use crate::utilities::vector3_wide::Vector3Wide;
use crate::utilities::wide::WideFloat;
use glam::Vec3;

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct NonconvexContactPointWide {
    pub offset_a: Vector3Wide,
    pub normal: Vector3Wide,
    pub depth: WideFloat,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct NonconvexContactPrestep<const N: usize> {
    pub offset_b: Vector3Wide,
    pub contacts: [NonconvexContactPointWide; N],
    pub material: MaterialPropertiesWide,
}

impl<const N: usize> Default for NonconvexContactPrestep<N> {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct NonconvexContactPointProjection {
    pub normal: Vector3Wide,
    pub tangent_x: Vector3Wide,
    pub tangent_y: Vector3Wide,
    pub penetration: PenetrationProjection,
    pub tangent_effective_mass: Symmetric2x2Wide,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct NonconvexContactProjection<const N: usize> {
    pub inertia_a: BodyInertiaWide,
    pub inertia_b: BodyInertiaWide,
    pub friction_coefficient: WideFloat,
    pub softness_impulse_scale: WideFloat,
    pub contacts: [NonconvexContactPointProjection; N],
}

impl<const N: usize> Default for NonconvexContactProjection<N> {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

/// Impulse layout per contact: penetration, then the two tangent friction
/// components. The pair cache's impulse transfer depends on this ordering.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct NonconvexContactPointImpulses {
    pub penetration: WideFloat,
    pub tangent: Vector2Wide,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct NonconvexContactImpulses<const N: usize> {
    pub contacts: [NonconvexContactPointImpulses; N],
}

impl<const N: usize> Default for NonconvexContactImpulses<N> {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

fn compute_projection<const N: usize>(
    inertia_a: &BodyInertiaWide,
    inertia_b: &BodyInertiaWide,
    dt: f32,
    inverse_dt: f32,
    prestep: &NonconvexContactPrestep<N>,
) -> NonconvexContactProjection<N> {
    let springiness = prestep.material.spring_settings.compute_springiness(dt);
    let mut projection = NonconvexContactProjection::<N> {
        inertia_a: *inertia_a,
        inertia_b: *inertia_b,
        friction_coefficient: prestep.material.friction_coefficient,
        softness_impulse_scale: springiness.softness_impulse_scale,
        ..Default::default()
    };
    for (i, contact) in prestep.contacts.iter().enumerate() {
        let normal = contact.normal;
        let (tangent_x, tangent_y) = Vector3Wide::build_orthonormal_basis(&normal);
        let offset_b = contact.offset_a - prestep.offset_b;
        projection.contacts[i] = NonconvexContactPointProjection {
            normal,
            tangent_x,
            tangent_y,
            penetration: PenetrationProjection {
                offset_a: contact.offset_a,
                offset_b,
                effective_mass: PenetrationLimit::compute_effective_mass(
                    &normal,
                    &contact.offset_a,
                    &offset_b,
                    inertia_a,
                    inertia_b,
                    springiness.effective_mass_cfm_scale,
                ),
                bias_velocity: PenetrationLimit::compute_bias_velocity(
                    contact.depth,
                    springiness.position_error_to_velocity,
                    inverse_dt,
                    prestep.material.maximum_recovery_velocity,
                ),
                lever_arm: WideFloat::ZERO,
            },
            tangent_effective_mass: TangentFriction::compute_effective_mass(
                &tangent_x,
                &tangent_y,
                &contact.offset_a,
                &offset_b,
                inertia_a,
                inertia_b,
            ),
        };
    }
    projection
}

fn warm_start_impl<const N: usize>(
    projection: &NonconvexContactProjection<N>,
    impulses: &NonconvexContactImpulses<N>,
    wsv_a: &mut BodyVelocityWide,
    wsv_b: &mut BodyVelocityWide,
) {
    for i in 0..N {
        let contact = &projection.contacts[i];
        TangentFriction::apply_impulse(
            &contact.tangent_x,
            &contact.tangent_y,
            &contact.penetration.offset_a,
            &contact.penetration.offset_b,
            &projection.inertia_a,
            &projection.inertia_b,
            &impulses.contacts[i].tangent,
            wsv_a,
            wsv_b,
        );
        crate::physics::constraints::ball_socket::apply_anchor_impulse(
            &projection.inertia_a,
            &projection.inertia_b,
            &contact.penetration.offset_a,
            &contact.penetration.offset_b,
            &contact.normal.scale(impulses.contacts[i].penetration),
            wsv_a,
            wsv_b,
        );
    }
}

fn solve_impl<const N: usize>(
    projection: &NonconvexContactProjection<N>,
    impulses: &mut NonconvexContactImpulses<N>,
    wsv_a: &mut BodyVelocityWide,
    wsv_b: &mut BodyVelocityWide,
) {
    for i in 0..N {
        let contact = &projection.contacts[i];
        // Each contact's friction cone is bounded by its own penetration
        // impulse.
        TangentFriction::solve(
            &contact.tangent_x,
            &contact.tangent_y,
            &contact.penetration.offset_a,
            &contact.penetration.offset_b,
            &projection.inertia_a,
            &projection.inertia_b,
            &contact.tangent_effective_mass,
            projection.friction_coefficient * impulses.contacts[i].penetration,
            &mut impulses.contacts[i].tangent,
            wsv_a,
            wsv_b,
        );
        PenetrationLimit::solve(
            &contact.penetration,
            &contact.normal,
            &projection.inertia_a,
            &projection.inertia_b,
            projection.softness_impulse_scale,
            &mut impulses.contacts[i].penetration,
            wsv_a,
            wsv_b,
        );
    }
}

pub struct NonconvexTwoBodyFunctions<const N: usize>;

impl<const N: usize> TwoBodyConstraintFunctions for NonconvexTwoBodyFunctions<N> {
    type PrestepData = NonconvexContactPrestep<N>;
    type Projection = NonconvexContactProjection<N>;
    type AccumulatedImpulses = NonconvexContactImpulses<N>;
    const TYPE_ID: i32 = type_ids::nonconvex_contact(N as i32, true);
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32 = 3 * N as i32;

    fn prestep(
        _position_a: &Vector3Wide,
        _orientation_a: &QuaternionWide,
        inertia_a: &BodyInertiaWide,
        _position_b: &Vector3Wide,
        _orientation_b: &QuaternionWide,
        inertia_b: &BodyInertiaWide,
        dt: f32,
        inverse_dt: f32,
        prestep: &Self::PrestepData,
    ) -> Self::Projection {
        compute_projection(inertia_a, inertia_b, dt, inverse_dt, prestep)
    }

    fn warm_start(
        projection: &Self::Projection,
        impulses: &Self::AccumulatedImpulses,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        warm_start_impl(projection, impulses, wsv_a, wsv_b);
    }

    fn solve(
        projection: &Self::Projection,
        impulses: &mut Self::AccumulatedImpulses,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        solve_impl(projection, impulses, wsv_a, wsv_b);
    }
}

pub struct NonconvexOneBodyFunctions<const N: usize>;

impl<const N: usize> OneBodyConstraintFunctions for NonconvexOneBodyFunctions<N> {
    type PrestepData = NonconvexContactPrestep<N>;
    type Projection = NonconvexContactProjection<N>;
    type AccumulatedImpulses = NonconvexContactImpulses<N>;
    const TYPE_ID: i32 = type_ids::nonconvex_contact(N as i32, false);
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32 = 3 * N as i32;

    fn prestep(
        _position_a: &Vector3Wide,
        _orientation_a: &QuaternionWide,
        inertia_a: &BodyInertiaWide,
        dt: f32,
        inverse_dt: f32,
        prestep: &Self::PrestepData,
    ) -> Self::Projection {
        let inertia_b = BodyInertiaWide::default();
        compute_projection(inertia_a, &inertia_b, dt, inverse_dt, prestep)
    }

    fn warm_start(
        projection: &Self::Projection,
        impulses: &Self::AccumulatedImpulses,
        wsv_a: &mut BodyVelocityWide,
    ) {
        let mut wsv_b = BodyVelocityWide::default();
        warm_start_impl(projection, impulses, wsv_a, &mut wsv_b);
    }

    fn solve(
        projection: &Self::Projection,
        impulses: &mut Self::AccumulatedImpulses,
        wsv_a: &mut BodyVelocityWide,
    ) {
        let mut wsv_b = BodyVelocityWide::default();
        solve_impl(projection, impulses, wsv_a, &mut wsv_b);
    }
}

/// One scalar contact of a nonconvex description.
#[derive(Clone, Copy, Debug, Default)]
pub struct NonconvexContactPoint {
    pub offset_a: Vec3,
    pub normal: Vec3,
    pub depth: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct NonconvexContact<const N: usize> {
    pub offset_b: Vec3,
    pub contacts: [NonconvexContactPoint; N],
    pub material: PairMaterialProperties,
}

unsafe fn apply_nonconvex_prestep<const N: usize>(
    offset_b: Vec3,
    contacts: &[NonconvexContactPoint; N],
    material: &PairMaterialProperties,
    type_batch: &mut TypeBatch,
    bundle_index: i32,
    inner_index: i32,
) {
    let bundle = &mut *(type_batch.prestep_data.shared_mut_ptr()
        as *mut NonconvexContactPrestep<N>)
        .add(bundle_index as usize);
    let lane = inner_index as usize;
    bundle.offset_b.write_slot(offset_b, lane);
    for i in 0..N {
        bundle.contacts[i].offset_a.write_slot(contacts[i].offset_a, lane);
        bundle.contacts[i].normal.write_slot(contacts[i].normal, lane);
        bundle.contacts[i].depth.write_slot(contacts[i].depth, lane);
    }
    bundle.material.write_slot(material, lane);
}

unsafe fn read_nonconvex_prestep<const N: usize>(
    type_batch: &TypeBatch,
    bundle_index: i32,
    inner_index: i32,
) -> (Vec3, [NonconvexContactPoint; N], PairMaterialProperties) {
    let bundle = &*(type_batch.prestep_data.as_ptr() as *const NonconvexContactPrestep<N>)
        .add(bundle_index as usize);
    let lane = inner_index as usize;
    let mut contacts = [NonconvexContactPoint::default(); N];
    for i in 0..N {
        contacts[i] = NonconvexContactPoint {
            offset_a: bundle.contacts[i].offset_a.read_slot(lane),
            normal: bundle.contacts[i].normal.read_slot(lane),
            depth: bundle.contacts[i].depth.read_slot(lane),
        };
    }
    (
        bundle.offset_b.read_slot(lane),
        contacts,
        bundle.material.read_slot(lane),
    )
}

impl<const N: usize> ConstraintDescription for NonconvexContact<N> {
    const TYPE_ID: i32 = type_ids::nonconvex_contact(N as i32, true);
    const BODIES_PER_CONSTRAINT: i32 = 2;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(TwoBodyTypeProcessor::<NonconvexTwoBodyFunctions<N>>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        apply_nonconvex_prestep(
            self.offset_b,
            &self.contacts,
            &self.material,
            type_batch,
            bundle_index,
            inner_index,
        );
    }

    unsafe fn build_description(
        type_batch: &TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) -> Self {
        let (offset_b, contacts, material) =
            read_nonconvex_prestep::<N>(type_batch, bundle_index, inner_index);
        NonconvexContact {
            offset_b,
            contacts,
            material,
        }
    }
}

impl<const N: usize> TwoBodyConstraintDescription for NonconvexContact<N> {}

#[derive(Clone, Copy, Debug)]
pub struct NonconvexContactOneBody<const N: usize> {
    pub contacts: [NonconvexContactPoint; N],
    pub material: PairMaterialProperties,
}

impl<const N: usize> ConstraintDescription for NonconvexContactOneBody<N> {
    const TYPE_ID: i32 = type_ids::nonconvex_contact(N as i32, false);
    const BODIES_PER_CONSTRAINT: i32 = 1;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(OneBodyTypeProcessor::<NonconvexOneBodyFunctions<N>>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        apply_nonconvex_prestep(
            Vec3::ZERO,
            &self.contacts,
            &self.material,
            type_batch,
            bundle_index,
            inner_index,
        );
    }

    unsafe fn build_description(
        type_batch: &TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) -> Self {
        let (_offset_b, contacts, material) =
            read_nonconvex_prestep::<N>(type_batch, bundle_index, inner_index);
        NonconvexContactOneBody { contacts, material }
    }
}

impl<const N: usize> OneBodyConstraintDescription for NonconvexContactOneBody<N> {}
