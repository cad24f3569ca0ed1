//! Convex contact constraints: 1 to 4 contacts sharing one normal, with
//! combined tangent friction at the manifold center and scalar twist
//! friction about the normal. One-body variants pin against statics and
//! sleeping bodies.

use crate::physics::body_properties::{BodyInertiaWide, BodyVelocityWide};
use crate::physics::constraints::ball_socket::apply_anchor_impulse;
use crate::physics::constraints::contact::common::{
    MaterialPropertiesWide, PairMaterialProperties, PenetrationLimit, PenetrationProjection,
    TangentFriction, TwistFriction,
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
pub struct ConvexContactPointWide {
    pub offset_a: Vector3Wide,
    pub depth: WideFloat,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ConvexContactPrestep<const N: usize> {
    pub normal: Vector3Wide,
    /// Offset from A's center to B's center; zero for one-body constraints.
    pub offset_b: Vector3Wide,
    pub contacts: [ConvexContactPointWide; N],
    pub material: MaterialPropertiesWide,
}

impl<const N: usize> Default for ConvexContactPrestep<N> {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ConvexContactProjection<const N: usize> {
    pub inertia_a: BodyInertiaWide,
    pub inertia_b: BodyInertiaWide,
    pub normal: Vector3Wide,
    pub tangent_x: Vector3Wide,
    pub tangent_y: Vector3Wide,
    pub center_offset_a: Vector3Wide,
    pub center_offset_b: Vector3Wide,
    pub tangent_effective_mass: Symmetric2x2Wide,
    pub twist_effective_mass: WideFloat,
    pub friction_coefficient: WideFloat,
    pub softness_impulse_scale: WideFloat,
    pub penetration: [PenetrationProjection; N],
}

impl<const N: usize> Default for ConvexContactProjection<N> {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

/// Accumulated impulse layout: combined tangent friction, one penetration
/// impulse per contact, then twist friction. The pair cache's impulse
/// transfer depends on this ordering.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ConvexContactImpulses<const N: usize> {
    pub tangent: Vector2Wide,
    pub penetration: [WideFloat; N],
    pub twist: WideFloat,
}

impl<const N: usize> Default for ConvexContactImpulses<N> {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

/// Builds the projection shared by one- and two-body variants. One-body
/// callers pass zero inertia for B; zero inverse mass and inertia make all
/// B-side terms vanish.
fn compute_projection<const N: usize>(
    inertia_a: &BodyInertiaWide,
    inertia_b: &BodyInertiaWide,
    dt: f32,
    inverse_dt: f32,
    prestep: &ConvexContactPrestep<N>,
) -> ConvexContactProjection<N> {
    let springiness = prestep.material.spring_settings.compute_springiness(dt);
    let normal = prestep.normal;
    let (tangent_x, tangent_y) = Vector3Wide::build_orthonormal_basis(&normal);

    let mut center_offset_a = Vector3Wide::ZERO;
    for contact in prestep.contacts.iter() {
        center_offset_a = center_offset_a + contact.offset_a;
    }
    let center_offset_a = center_offset_a.scale(WideFloat::splat(1.0 / N as f32));
    let center_offset_b = center_offset_a - prestep.offset_b;

    let mut projection = ConvexContactProjection::<N> {
        inertia_a: *inertia_a,
        inertia_b: *inertia_b,
        normal,
        tangent_x,
        tangent_y,
        center_offset_a,
        center_offset_b,
        tangent_effective_mass: TangentFriction::compute_effective_mass(
            &tangent_x,
            &tangent_y,
            &center_offset_a,
            &center_offset_b,
            inertia_a,
            inertia_b,
        ),
        twist_effective_mass: TwistFriction::compute_effective_mass(&normal, inertia_a, inertia_b),
        friction_coefficient: prestep.material.friction_coefficient,
        softness_impulse_scale: springiness.softness_impulse_scale,
        penetration: [PenetrationProjection::default(); N],
    };
    for (i, contact) in prestep.contacts.iter().enumerate() {
        let offset_b = contact.offset_a - prestep.offset_b;
        projection.penetration[i] = PenetrationProjection {
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
            lever_arm: (contact.offset_a - center_offset_a).length(),
        };
    }
    projection
}

fn warm_start_impl<const N: usize>(
    projection: &ConvexContactProjection<N>,
    impulses: &ConvexContactImpulses<N>,
    wsv_a: &mut BodyVelocityWide,
    wsv_b: &mut BodyVelocityWide,
) {
    TangentFriction::apply_impulse(
        &projection.tangent_x,
        &projection.tangent_y,
        &projection.center_offset_a,
        &projection.center_offset_b,
        &projection.inertia_a,
        &projection.inertia_b,
        &impulses.tangent,
        wsv_a,
        wsv_b,
    );
    for i in 0..N {
        apply_anchor_impulse(
            &projection.inertia_a,
            &projection.inertia_b,
            &projection.penetration[i].offset_a,
            &projection.penetration[i].offset_b,
            &projection.normal.scale(impulses.penetration[i]),
            wsv_a,
            wsv_b,
        );
    }
    TwistFriction::apply_impulse(
        &projection.normal,
        &projection.inertia_a,
        &projection.inertia_b,
        impulses.twist,
        wsv_a,
        wsv_b,
    );
}

fn solve_impl<const N: usize>(
    projection: &ConvexContactProjection<N>,
    impulses: &mut ConvexContactImpulses<N>,
    wsv_a: &mut BodyVelocityWide,
    wsv_b: &mut BodyVelocityWide,
) {
    // Friction cone radius comes from the previous iteration's (or warm
    // started) penetration impulses.
    let mut total_penetration_impulse = WideFloat::ZERO;
    let mut twist_bound = WideFloat::ZERO;
    for i in 0..N {
        total_penetration_impulse = total_penetration_impulse + impulses.penetration[i];
        twist_bound = twist_bound + impulses.penetration[i] * projection.penetration[i].lever_arm;
    }
    TangentFriction::solve(
        &projection.tangent_x,
        &projection.tangent_y,
        &projection.center_offset_a,
        &projection.center_offset_b,
        &projection.inertia_a,
        &projection.inertia_b,
        &projection.tangent_effective_mass,
        projection.friction_coefficient * total_penetration_impulse,
        &mut impulses.tangent,
        wsv_a,
        wsv_b,
    );
    for i in 0..N {
        PenetrationLimit::solve(
            &projection.penetration[i],
            &projection.normal,
            &projection.inertia_a,
            &projection.inertia_b,
            projection.softness_impulse_scale,
            &mut impulses.penetration[i],
            wsv_a,
            wsv_b,
        );
    }
    TwistFriction::solve(
        &projection.normal,
        &projection.inertia_a,
        &projection.inertia_b,
        projection.twist_effective_mass,
        projection.friction_coefficient * twist_bound,
        &mut impulses.twist,
        wsv_a,
        wsv_b,
    );
}

pub struct ConvexTwoBodyFunctions<const N: usize>;

impl<const N: usize> TwoBodyConstraintFunctions for ConvexTwoBodyFunctions<N> {
    type PrestepData = ConvexContactPrestep<N>;
    type Projection = ConvexContactProjection<N>;
    type AccumulatedImpulses = ConvexContactImpulses<N>;
    const TYPE_ID: i32 = type_ids::convex_contact(N as i32, true);
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32 = N as i32 + 3;

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

pub struct ConvexOneBodyFunctions<const N: usize>;

impl<const N: usize> OneBodyConstraintFunctions for ConvexOneBodyFunctions<N> {
    type PrestepData = ConvexContactPrestep<N>;
    type Projection = ConvexContactProjection<N>;
    type AccumulatedImpulses = ConvexContactImpulses<N>;
    const TYPE_ID: i32 = type_ids::convex_contact(N as i32, false);
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32 = N as i32 + 3;

    fn prestep(
        _position_a: &Vector3Wide,
        _orientation_a: &QuaternionWide,
        inertia_a: &BodyInertiaWide,
        dt: f32,
        inverse_dt: f32,
        prestep: &Self::PrestepData,
    ) -> Self::Projection {
        // The opposing collidable never moves; zero inertia drops every
        // B-side term.
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

/// One scalar contact within a contact constraint description.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContactPoint {
    pub offset_a: Vec3,
    pub depth: f32,
}

/// Description of a two-body convex contact constraint with N contacts.
#[derive(Clone, Copy, Debug)]
pub struct ConvexContact<const N: usize> {
    pub normal: Vec3,
    pub offset_b: Vec3,
    pub contacts: [ContactPoint; N],
    pub material: PairMaterialProperties,
}

unsafe fn apply_convex_prestep<const N: usize>(
    normal: Vec3,
    offset_b: Vec3,
    contacts: &[ContactPoint; N],
    material: &PairMaterialProperties,
    type_batch: &mut TypeBatch,
    bundle_index: i32,
    inner_index: i32,
) {
    let bundle = &mut *(type_batch.prestep_data.shared_mut_ptr()
        as *mut ConvexContactPrestep<N>)
        .add(bundle_index as usize);
    let lane = inner_index as usize;
    bundle.normal.write_slot(normal, lane);
    bundle.offset_b.write_slot(offset_b, lane);
    for i in 0..N {
        bundle.contacts[i].offset_a.write_slot(contacts[i].offset_a, lane);
        bundle.contacts[i].depth.write_slot(contacts[i].depth, lane);
    }
    bundle.material.write_slot(material, lane);
}

unsafe fn read_convex_prestep<const N: usize>(
    type_batch: &TypeBatch,
    bundle_index: i32,
    inner_index: i32,
) -> (Vec3, Vec3, [ContactPoint; N], PairMaterialProperties) {
    let bundle = &*(type_batch.prestep_data.as_ptr() as *const ConvexContactPrestep<N>)
        .add(bundle_index as usize);
    let lane = inner_index as usize;
    let mut contacts = [ContactPoint::default(); N];
    for i in 0..N {
        contacts[i] = ContactPoint {
            offset_a: bundle.contacts[i].offset_a.read_slot(lane),
            depth: bundle.contacts[i].depth.read_slot(lane),
        };
    }
    (
        bundle.normal.read_slot(lane),
        bundle.offset_b.read_slot(lane),
        contacts,
        bundle.material.read_slot(lane),
    )
}

impl<const N: usize> ConstraintDescription for ConvexContact<N> {
    const TYPE_ID: i32 = type_ids::convex_contact(N as i32, true);
    const BODIES_PER_CONSTRAINT: i32 = 2;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(TwoBodyTypeProcessor::<ConvexTwoBodyFunctions<N>>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        apply_convex_prestep(
            self.normal,
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
        let (normal, offset_b, contacts, material) =
            read_convex_prestep::<N>(type_batch, bundle_index, inner_index);
        ConvexContact {
            normal,
            offset_b,
            contacts,
            material,
        }
    }
}

impl<const N: usize> TwoBodyConstraintDescription for ConvexContact<N> {}

/// Description of a one-body convex contact constraint with N contacts.
#[derive(Clone, Copy, Debug)]
pub struct ConvexContactOneBody<const N: usize> {
    pub normal: Vec3,
    pub contacts: [ContactPoint; N],
    pub material: PairMaterialProperties,
}

impl<const N: usize> ConstraintDescription for ConvexContactOneBody<N> {
    const TYPE_ID: i32 = type_ids::convex_contact(N as i32, false);
    const BODIES_PER_CONSTRAINT: i32 = 1;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(OneBodyTypeProcessor::<ConvexOneBodyFunctions<N>>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        apply_convex_prestep(
            self.normal,
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
        let (normal, _offset_b, contacts, material) =
            read_convex_prestep::<N>(type_batch, bundle_index, inner_index);
        ConvexContactOneBody {
            normal,
            contacts,
            material,
        }
    }
}

impl<const N: usize> OneBodyConstraintDescription for ConvexContactOneBody<N> {}
