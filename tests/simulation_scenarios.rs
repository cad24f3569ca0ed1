//! End-to-end scenarios driven through the public API.

mod common;

use common::{build_registry, DemoNarrowPhaseCallbacks, GravityCallbacks};
use glam::{Quat, Vec3};
use impel::physics::constraints::ball_socket::BallSocket;
use impel::physics::constraints::spring_settings::SpringSettings;
use impel::{
    BodyActivityDescription, BodyDescription, BodyInertia, BoxShape, BufferPool,
    CollidableDescription, PairMaterialProperties, RigidPose, Simulation,
    SimulationAllocationSizes, SolveDescription, Sphere, StaticDescription,
};

type TestSimulation = Simulation<DemoNarrowPhaseCallbacks, GravityCallbacks>;

fn create_simulation(friction_coefficient: f32) -> TestSimulation {
    let callbacks = DemoNarrowPhaseCallbacks {
        material: PairMaterialProperties {
            friction_coefficient,
            maximum_recovery_velocity: 2.0,
            spring_settings: SpringSettings::new(30.0, 1.0),
        },
    };
    Simulation::new(
        BufferPool::default(),
        callbacks,
        GravityCallbacks::new(Vec3::new(0.0, -10.0, 0.0)),
        build_registry(),
        SolveDescription::default(),
        SimulationAllocationSizes {
            bodies: 128,
            statics: 16,
            constraints: 512,
            ..Default::default()
        },
    )
}

fn dynamic_sphere(simulation: &mut TestSimulation, position: Vec3, radius: f32) -> impel::BodyHandle {
    let shape = simulation.shapes.add(Sphere { radius }, &mut simulation.pool);
    simulation.add_body(&BodyDescription::create_dynamic(
        RigidPose::at(position),
        BodyInertia::for_sphere(1.0, radius),
        CollidableDescription::new(shape, 0.1),
        BodyActivityDescription::default(),
    ))
}

fn ground(simulation: &mut TestSimulation) {
    let shape = simulation
        .shapes
        .add(BoxShape::new(10.0, 1.0, 10.0), &mut simulation.pool);
    simulation.add_static(&StaticDescription::new(
        RigidPose::at(Vec3::new(0.0, -0.5, 0.0)),
        shape,
    ));
}

const DT: f32 = 1.0 / 60.0;

/// S1: two spheres settle into a resting stack on a static box.
#[test]
fn two_sphere_rest_stack() {
    let mut simulation = create_simulation(1.0);
    ground(&mut simulation);
    let sphere_a = dynamic_sphere(&mut simulation, Vec3::new(0.0, 1.0, 0.0), 0.5);
    let sphere_b = dynamic_sphere(&mut simulation, Vec3::new(0.0, 2.0, 0.0), 0.5);
    for _ in 0..120 {
        simulation.timestep(DT, None);
    }
    let velocity_a = simulation.bodies.velocity(sphere_a).linear.length();
    let velocity_b = simulation.bodies.velocity(sphere_b).linear.length();
    assert!(velocity_a < 0.01, "sphere A still moving: {velocity_a}");
    assert!(velocity_b < 0.01, "sphere B still moving: {velocity_b}");
    let y_a = simulation.bodies.pose(sphere_a).position.y;
    let y_b = simulation.bodies.pose(sphere_b).position.y;
    assert!((y_a - 0.5).abs() < 0.02, "sphere A rests at {y_a}");
    assert!((y_b - 1.5).abs() < 0.04, "sphere B rests at {y_b}");
    // Orientations stay unit length through integration.
    for handle in [sphere_a, sphere_b] {
        let orientation = simulation.bodies.pose(handle).orientation;
        assert!((orientation.length() - 1.0).abs() < 1e-5);
    }
}

/// Every pair cache entry resolves to a live constraint, and every contact
/// constraint is owned by exactly one entry.
#[test]
fn pair_cache_covers_contact_constraints() {
    let mut simulation = create_simulation(1.0);
    ground(&mut simulation);
    dynamic_sphere(&mut simulation, Vec3::new(0.0, 1.0, 0.0), 0.5);
    dynamic_sphere(&mut simulation, Vec3::new(0.0, 2.0, 0.0), 0.5);
    // Stop before the stack can fall asleep; sleeping migrates entries out
    // of the mapping.
    for _ in 0..30 {
        simulation.timestep(DT, None);
    }
    let mapping = &simulation.narrow_phase.pair_cache.mapping;
    assert!(mapping.count > 0, "settled spheres should have contacts");
    for index in 0..mapping.count {
        let entry = mapping.values.get(index);
        assert!(simulation.solver.constraint_exists(entry.constraint_handle));
    }
    assert_eq!(
        mapping.count,
        simulation.solver.active_set().constraint_count(),
        "each contact constraint should have exactly one mapping entry"
    );
}

/// S2: a ball socket chain hanging from a kinematic anchor keeps the
/// bottom body suspended.
#[test]
fn ball_socket_chain_hangs_from_kinematic() {
    let mut simulation = create_simulation(1.0);
    let mut handles = Vec::new();
    for i in 0..4 {
        let pose = RigidPose::at(Vec3::new(0.0, 1.0 + i as f32, 0.0));
        let description = if i == 3 {
            BodyDescription::create_kinematic(
                pose,
                CollidableDescription::none(),
                BodyActivityDescription::default(),
            )
        } else {
            BodyDescription::create_dynamic(
                pose,
                BodyInertia::for_sphere(1.0, 0.5),
                CollidableDescription::none(),
                BodyActivityDescription::default(),
            )
        };
        handles.push(simulation.add_body(&description));
    }
    for i in 0..3 {
        simulation.add_constraint(
            handles[i],
            handles[i + 1],
            &BallSocket {
                local_offset_a: Vec3::new(0.0, 0.5, 0.0),
                local_offset_b: Vec3::new(0.0, -0.5, 0.0),
                spring_settings: SpringSettings::new(30.0, 1.0),
            },
        );
    }
    for _ in 0..60 {
        simulation.timestep(DT, None);
    }
    let bottom_y = simulation.bodies.pose(handles[0]).position.y;
    assert!(
        (0.95..=1.05).contains(&bottom_y),
        "bottom body sagged to {bottom_y}"
    );
    // The kinematic anchor must not have moved or gained velocity.
    assert_eq!(
        simulation.bodies.pose(handles[3]).position,
        Vec3::new(0.0, 4.0, 0.0)
    );
    assert_eq!(simulation.bodies.velocity(handles[3]).linear, Vec3::ZERO);
    assert_eq!(simulation.bodies.velocity(handles[3]).angular, Vec3::ZERO);
}

/// S3: friction holds a box on a 20 degree slope when the coefficient
/// exceeds the tangent.
#[test]
fn friction_holds_box_on_slope() {
    let mut simulation = create_simulation(1.0);
    let slope_orientation = Quat::from_rotation_z(20f32.to_radians());
    let slope_shape = simulation
        .shapes
        .add(BoxShape::new(20.0, 1.0, 20.0), &mut simulation.pool);
    simulation.add_static(&StaticDescription::new(
        RigidPose::new(Vec3::ZERO, slope_orientation),
        slope_shape,
    ));
    let box_shape = simulation
        .shapes
        .add(BoxShape::new(1.0, 1.0, 1.0), &mut simulation.pool);
    let surface_normal = slope_orientation * Vec3::Y;
    let body = simulation.add_body(&BodyDescription::create_dynamic(
        RigidPose::new(surface_normal * 1.001, slope_orientation),
        BodyInertia::for_box(1.0, 1.0, 1.0, 1.0),
        CollidableDescription::new(box_shape, 0.1),
        BodyActivityDescription::default(),
    ));
    for _ in 0..120 {
        simulation.timestep(DT, None);
    }
    let speed = simulation.bodies.velocity(body).linear.length();
    assert!(speed < 0.5, "box slid at {speed}");
}

/// S4: a settled row of touching spheres sleeps as one island and wakes
/// wholesale when one member is disturbed.
#[test]
fn sleep_and_wake_round_trip() {
    let mut simulation = create_simulation(1.0);
    ground(&mut simulation);
    let mut handles = Vec::new();
    for i in 0..16 {
        handles.push(dynamic_sphere(
            &mut simulation,
            Vec3::new(i as f32 * 0.999, 0.5, 0.0),
            0.5,
        ));
    }
    for _ in 0..240 {
        simulation.timestep(DT, None);
    }
    let sleeping = handles
        .iter()
        .filter(|&&handle| simulation.bodies.location(handle).set_index > 0)
        .count();
    assert!(sleeping >= 15, "only {sleeping} bodies went to sleep");
    // Active/inactive separation: every sleeping body's constraints live in
    // the same sleeping set, so no graph edge crosses the boundary.
    for &handle in &handles {
        let location = simulation.bodies.location(handle);
        if location.set_index == 0 {
            continue;
        }
        let set = simulation.bodies.sets.get(location.set_index);
        let constraints = set.constraints.get(location.index);
        for i in 0..constraints.count {
            let constraint_handle = constraints.get(i).connecting_constraint_handle;
            assert_eq!(
                simulation.solver.location(constraint_handle).set_index,
                location.set_index,
                "constraint crossed the active/inactive boundary"
            );
        }
    }

    // Snapshot sleeping state, wake via an impulse, and verify the island
    // returns intact.
    let poses: Vec<_> = handles
        .iter()
        .map(|&handle| *simulation.bodies.pose(handle))
        .collect();
    let velocities: Vec<_> = handles
        .iter()
        .map(|&handle| *simulation.bodies.velocity(handle))
        .collect();
    simulation.apply_linear_impulse(handles[0], Vec3::new(0.0, 0.5, 0.0));
    let awake = handles
        .iter()
        .filter(|&&handle| simulation.bodies.location(handle).set_index == 0)
        .count();
    assert_eq!(awake, 16, "the island should wake as a unit");
    for (i, &handle) in handles.iter().enumerate() {
        let pose = simulation.bodies.pose(handle);
        assert_eq!(pose.position, poses[i].position);
        assert_eq!(pose.orientation, poses[i].orientation);
        if i != 0 {
            assert_eq!(simulation.bodies.velocity(handle).linear, velocities[i].linear);
        }
        // Every woken body with a shape holds an active broadphase leaf.
        let location = simulation.bodies.location(handle);
        let leaf = simulation
            .bodies
            .active_set()
            .collidables
            .get(location.index)
            .broad_phase_index;
        assert!(leaf >= 0 && leaf < simulation.broad_phase.active_tree.leaf_count);
    }
    // Constraints returned to the active solver set.
    assert!(simulation.solver.active_set().constraint_count() > 0);
    // One more step must run cleanly with the woken island.
    simulation.timestep(DT, None);
}

/// S5: identical single-threaded runs are bit-identical at every step.
#[test]
fn single_threaded_determinism()
{
    let build = || {
        let mut simulation = create_simulation(1.0);
        ground(&mut simulation);
        let a = dynamic_sphere(&mut simulation, Vec3::new(0.0, 1.0, 0.0), 0.5);
        let b = dynamic_sphere(&mut simulation, Vec3::new(0.0, 2.0, 0.0), 0.5);
        (simulation, a, b)
    };
    let (mut first, first_a, first_b) = build();
    let (mut second, second_a, second_b) = build();
    for step in 0..120 {
        first.timestep(DT, None);
        second.timestep(DT, None);
        for (&handle_1, &handle_2) in [first_a, first_b].iter().zip([second_a, second_b].iter()) {
            let pose_1 = first.bodies.pose(handle_1);
            let pose_2 = second.bodies.pose(handle_2);
            assert_eq!(
                pose_1.position.to_array().map(f32::to_bits),
                pose_2.position.to_array().map(f32::to_bits),
                "position diverged at step {step}"
            );
            assert_eq!(
                pose_1.orientation.to_array().map(f32::to_bits),
                pose_2.orientation.to_array().map(f32::to_bits),
                "orientation diverged at step {step}"
            );
            let velocity_1 = first.bodies.velocity(handle_1);
            let velocity_2 = second.bodies.velocity(handle_2);
            assert_eq!(
                velocity_1.linear.to_array().map(f32::to_bits),
                velocity_2.linear.to_array().map(f32::to_bits),
                "velocity diverged at step {step}"
            );
        }
    }
}

/// S6: create-and-destroy churn leaks nothing from the buffer pool.
#[test]
fn pool_leak_check() {
    use rand::{Rng, SeedableRng};
    if !cfg!(debug_assertions) {
        // Outstanding allocation accounting only exists in debug builds.
        return;
    }
    let mut simulation = create_simulation(1.0);
    let sphere_shape = simulation
        .shapes
        .add(Sphere { radius: 0.5 }, &mut simulation.pool);
    #[cfg(debug_assertions)]
    let baseline: Vec<usize> = (0..=impel::utilities::memory::buffer_pool::MAXIMUM_POWER)
        .map(|power| simulation.pool.outstanding_allocation_count(power))
        .collect();

    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
    let mut bodies = Vec::new();
    let mut constraints = Vec::new();
    for _ in 0..1000 {
        let position = Vec3::new(
            rng.gen_range(-50.0..50.0),
            rng.gen_range(0.0..50.0),
            rng.gen_range(-50.0..50.0),
        );
        let handle = simulation.add_body(&BodyDescription::create_dynamic(
            RigidPose::at(position),
            BodyInertia::for_sphere(1.0, 0.5),
            CollidableDescription::new(sphere_shape, 0.1),
            BodyActivityDescription::default(),
        ));
        if let Some(&other) = bodies.last() {
            if rng.gen_bool(0.5) {
                constraints.push(simulation.add_constraint(
                    other,
                    handle,
                    &BallSocket {
                        local_offset_a: Vec3::Y,
                        local_offset_b: -Vec3::Y,
                        spring_settings: SpringSettings::new(30.0, 1.0),
                    },
                ));
            }
        }
        bodies.push(handle);
    }
    for handle in constraints.drain(..) {
        simulation.remove_constraint(handle);
    }
    for handle in bodies.drain(..) {
        simulation.remove_body(handle);
    }
    assert_eq!(simulation.bodies.count_bodies(), 0);
    assert_eq!(simulation.solver.count_constraints(), 0);

    #[cfg(debug_assertions)]
    for power in 0..=impel::utilities::memory::buffer_pool::MAXIMUM_POWER {
        assert_eq!(
            simulation.pool.outstanding_allocation_count(power),
            baseline[power as usize],
            "power {power} leaked allocations"
        );
    }
}

/// Bundle boundary: lane-width and lane-width-plus-one type batches produce
/// identical per-constraint results for the shared constraints.
#[test]
fn bundle_boundary_is_seamless() {
    let run = |pair_count: usize| {
        let mut simulation = create_simulation(1.0);
        let mut pairs = Vec::new();
        for i in 0..pair_count {
            let base = Vec3::new(i as f32 * 10.0, 2.0, 0.0);
            let anchor = simulation.add_body(&BodyDescription::create_kinematic(
                RigidPose::at(base),
                CollidableDescription::none(),
                BodyActivityDescription::default(),
            ));
            let swinging = simulation.add_body(
                &BodyDescription::create_dynamic(
                    RigidPose::at(base + Vec3::new(1.0, -1.0, 0.0)),
                    BodyInertia::for_sphere(1.0, 0.5),
                    CollidableDescription::none(),
                    BodyActivityDescription::default(),
                )
                .with_velocity(Vec3::new(0.0, 0.0, 0.5), Vec3::ZERO),
            );
            simulation.add_constraint(
                anchor,
                swinging,
                &BallSocket {
                    local_offset_a: Vec3::ZERO,
                    local_offset_b: Vec3::new(-1.0, 1.0, 0.0),
                    spring_settings: SpringSettings::new(30.0, 1.0),
                },
            );
            pairs.push(swinging);
        }
        for _ in 0..30 {
            simulation.timestep(DT, None);
        }
        pairs
            .iter()
            .map(|&handle| *simulation.bodies.velocity(handle))
            .collect::<Vec<_>>()
    };
    let lane_width = impel::utilities::wide::LANE_WIDTH;
    let narrow = run(lane_width);
    let wide = run(lane_width + 1);
    for (index, (a, b)) in narrow.iter().zip(wide.iter()).enumerate() {
        assert_eq!(
            a.linear.to_array().map(f32::to_bits),
            b.linear.to_array().map(f32::to_bits),
            "constraint {index} diverged across the bundle boundary"
        );
        assert_eq!(
            a.angular.to_array().map(f32::to_bits),
            b.angular.to_array().map(f32::to_bits),
            "constraint {index} angular diverged across the bundle boundary"
        );
    }
}

/// A kinematic body in a constraint never gains velocity but still pushes
/// the dynamic body.
#[test]
fn kinematic_bodies_push_without_moving() {
    let mut simulation = create_simulation(1.0);
    let anchor = simulation.add_body(&BodyDescription::create_kinematic(
        RigidPose::at(Vec3::new(0.0, 5.0, 0.0)),
        CollidableDescription::none(),
        BodyActivityDescription::default(),
    ));
    let hanging = simulation.add_body(&BodyDescription::create_dynamic(
        RigidPose::at(Vec3::new(0.0, 4.0, 0.0)),
        BodyInertia::for_sphere(1.0, 0.5),
        CollidableDescription::none(),
        BodyActivityDescription::default(),
    ));
    simulation.add_constraint(
        anchor,
        hanging,
        &BallSocket {
            local_offset_a: Vec3::new(0.0, -0.5, 0.0),
            local_offset_b: Vec3::new(0.0, 0.5, 0.0),
            spring_settings: SpringSettings::new(30.0, 1.0),
        },
    );
    for _ in 0..60 {
        simulation.timestep(DT, None);
    }
    assert_eq!(simulation.bodies.velocity(anchor).linear, Vec3::ZERO);
    assert_eq!(simulation.bodies.velocity(anchor).angular, Vec3::ZERO);
    assert_eq!(
        simulation.bodies.pose(anchor).position,
        Vec3::new(0.0, 5.0, 0.0)
    );
    // Free fall for one second would put the dynamic body near y = -1;
    // the constraint must hold it near y = 4.
    let hanging_y = simulation.bodies.pose(hanging).position.y;
    assert!(
        (3.9..=4.1).contains(&hanging_y),
        "hanging body at {hanging_y}"
    );
}

/// Round trip law: adding and removing a body restores the store's logical
/// state.
#[test]
fn add_remove_body_round_trip() {
    let mut simulation = create_simulation(1.0);
    ground(&mut simulation);
    let resident = dynamic_sphere(&mut simulation, Vec3::new(0.0, 1.0, 0.0), 0.5);
    let body_count_before = simulation.bodies.count_bodies();
    let leaf_count_before = simulation.broad_phase.active_tree.leaf_count;

    let transient = dynamic_sphere(&mut simulation, Vec3::new(5.0, 1.0, 0.0), 0.5);
    simulation.remove_body(transient);

    assert_eq!(simulation.bodies.count_bodies(), body_count_before);
    assert_eq!(
        simulation.broad_phase.active_tree.leaf_count,
        leaf_count_before
    );
    assert!(!simulation.bodies.body_exists(transient));
    // The surviving body remains fully functional.
    simulation.timestep(DT, None);
    assert!(simulation.bodies.body_exists(resident));
    let location = simulation.bodies.location(resident);
    assert_eq!(
        *simulation
            .bodies
            .active_set()
            .index_to_handle
            .get(location.index),
        resident
    );
}

/// Batch assignment: constraints sharing a body land in different batches;
/// disjoint constraints share the lowest batch.
#[test]
fn batch_assignment_respects_disjointness() {
    let mut simulation = create_simulation(1.0);
    let mut handles = Vec::new();
    for i in 0..4 {
        handles.push(simulation.add_body(&BodyDescription::create_dynamic(
            RigidPose::at(Vec3::new(i as f32 * 3.0, 0.0, 0.0)),
            BodyInertia::for_sphere(1.0, 0.5),
            CollidableDescription::none(),
            BodyActivityDescription::default(),
        )));
    }
    let description = BallSocket {
        local_offset_a: Vec3::ZERO,
        local_offset_b: Vec3::ZERO,
        spring_settings: SpringSettings::new(30.0, 1.0),
    };
    // c0 {0,1} -> batch 0; c1 {1,2} shares body 1 -> batch 1;
    // c2 {2,3} shares body 2 with c1 but not with c0 -> batch 0.
    let c0 = simulation.add_constraint(handles[0], handles[1], &description);
    let c1 = simulation.add_constraint(handles[1], handles[2], &description);
    let c2 = simulation.add_constraint(handles[2], handles[3], &description);
    assert_eq!(simulation.solver.location(c0).batch_index, 0);
    assert_eq!(simulation.solver.location(c1).batch_index, 1);
    assert_eq!(simulation.solver.location(c2).batch_index, 0);
}
