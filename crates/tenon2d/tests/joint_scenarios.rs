//! End-to-end scenarios driving the solver protocol the way an outer
//! world would: initialize, velocity iterations, integration, position
//! iterations.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use tenon2d::prelude::*;

fn integrate(bodies: &mut RigidBodySet, dt: Real) {
    let handles: Vec<RigidBodyHandle> = bodies.iter().map(|(h, _)| h).collect();
    for h in handles {
        let rb = bodies.get_mut(h).unwrap();
        let shift = *rb.linvel() * dt;
        let dtheta = rb.angvel() * dt;
        rb.translate(&shift);
        rb.rotate_about_center(dtheta);
    }
}

/// One world step: velocity solve, integration, position solve.
fn step(
    params: &IntegrationParameters,
    bodies: &mut RigidBodySet,
    joint: &mut dyn Joint,
) -> bool {
    joint.initialize_constraints(params, bodies);
    for _ in 0..params.velocity_iterations {
        joint.solve_velocity_constraints(params, bodies);
    }
    integrate(bodies, params.dt);
    let mut converged = false;
    for _ in 0..params.position_iterations {
        converged = joint.solve_position_constraints(params, bodies);
        if converged {
            break;
        }
    }
    converged
}

#[test]
fn rigid_weld_at_rest_stays_at_rest() {
    let mut bodies = RigidBodySet::new();
    let b1 = bodies.insert(RigidBodyBuilder::dynamic().build());
    let b2 = bodies.insert(RigidBodyBuilder::dynamic().build());
    let mut joint = WeldJoint::new(&bodies, b1, b2, Point::origin()).unwrap();

    let params = IntegrationParameters::default();
    joint.initialize_constraints(&params, &mut bodies);
    for _ in 0..8 {
        joint.solve_velocity_constraints(&params, &mut bodies);
    }
    let converged = joint.solve_position_constraints(&params, &mut bodies);

    assert!(converged);
    for (_, rb) in bodies.iter() {
        assert_abs_diff_eq!(*rb.linvel(), Vector::zeros(), epsilon = 1.0e-10);
        assert_abs_diff_eq!(rb.angvel(), 0.0, epsilon = 1.0e-10);
    }
    let error = joint.anchor1(&bodies).unwrap() - joint.anchor2(&bodies).unwrap();
    assert!(error.norm() <= 1.0e-10);
}

#[test]
fn torsion_spring_weld_decays_with_damped_oscillation() {
    let mut bodies = RigidBodySet::new();
    let b1 = bodies.insert(RigidBodyBuilder::fixed().build());
    let b2 = bodies.insert(
        RigidBodyBuilder::dynamic()
            .translation(vector![1.0, 0.0])
            .rotation(std::f64::consts::FRAC_PI_4 as Real)
            .build(),
    );
    let mut joint = WeldJoint::new(&bodies, b1, b2, point![1.0, 0.0])
        .unwrap()
        .with_spring(8.0, 0.3)
        .unwrap();
    joint.set_reference_angle(0.0, &mut bodies);

    let params = IntegrationParameters::default();
    let amplitude0 = std::f64::consts::FRAC_PI_4 as Real;
    let mut angles = Vec::new();
    for _ in 0..60 {
        step(&params, &mut bodies, &mut joint);
        angles.push(bodies.get(b2).unwrap().rotation_angle());
    }

    // The hinge angle must cross zero (oscillation), and the first
    // rebound peak must have lost energy to the damper.
    let min = angles.iter().cloned().fold(Real::MAX, Real::min);
    assert!(min < 0.0, "the angle never crossed zero: {:?}", angles);
    assert!(
        min.abs() < 0.9 * amplitude0,
        "the rebound peak {} did not decay (start {})",
        min,
        amplitude0
    );
    // Late in the run the oscillation has died down substantially.
    assert!(angles.last().unwrap().abs() < 0.5 * amplitude0);
    // The rigid translational block keeps the body pinned meanwhile.
    assert_relative_eq!(
        bodies.get(b2).unwrap().position().translation.vector.x,
        1.0,
        epsilon = 0.05
    );
}

#[test]
fn frequency_and_stiffness_tuning_give_identical_trajectories() {
    let build = || {
        let mut bodies = RigidBodySet::new();
        let b1 = bodies.insert(RigidBodyBuilder::fixed().build());
        let b2 = bodies.insert(
            RigidBodyBuilder::dynamic()
                .translation(vector![2.5, 0.0])
                .build(),
        );
        let joint = DistanceJoint::new(&bodies, b1, b2, Point::origin(), point![2.0, 0.0])
            .unwrap()
            .with_spring(4.0, 0.5)
            .unwrap();
        (bodies, joint, b2)
    };

    // Reference run driven by the frequency.
    let (mut bodies_a, mut joint_a, b2a) = build();
    // Second run driven by the equivalent stiffness.
    let (mut bodies_b, mut joint_b, b2b) = build();
    let k = joint_b.spring_stiffness(&bodies_b);
    joint_b.set_spring_stiffness(k, &mut bodies_b).unwrap();
    assert_eq!(joint_b.spring_mode(), SpringMode::Stiffness);

    let params = IntegrationParameters::default();
    for _ in 0..30 {
        step(&params, &mut bodies_a, &mut joint_a);
        step(&params, &mut bodies_b, &mut joint_b);
    }

    let pa = bodies_a.get(b2a).unwrap().position().translation.vector;
    let pb = bodies_b.get(b2b).unwrap().position().translation.vector;
    assert_abs_diff_eq!(pa, pb, epsilon = 1.0e-9);
}

#[test]
fn limit_setters_reject_through_the_capability_trait() {
    let mut bodies = RigidBodySet::new();
    let b1 = bodies.insert(RigidBodyBuilder::dynamic().build());
    let b2 = bodies.insert(RigidBodyBuilder::fixed().build());
    let mut joints = JointSet::new();
    let handle = joints
        .insert(
            RevoluteJoint::new(&bodies, b1, b2, Point::origin()).unwrap(),
            &mut bodies,
        )
        .unwrap();

    let joint = joints
        .get_mut(handle)
        .unwrap()
        .downcast_mut::<RevoluteJoint>()
        .unwrap();
    let quarter = (std::f64::consts::FRAC_PI_4) as Real;
    joint
        .set_limits_enabled_between(-quarter, quarter, &mut bodies)
        .unwrap();
    assert!(joint
        .set_lower_limit(2.0 * quarter, &mut bodies)
        .is_err());
    assert_relative_eq!(joint.lower_limit(), -quarter);
    assert_relative_eq!(joint.upper_limit(), quarter);
}

#[test]
fn base_protocol_queries_behave_on_a_paired_joint() {
    let mut bodies = RigidBodySet::new();
    let b1 = bodies.insert(RigidBodyBuilder::dynamic().build());
    let b2 = bodies.insert(
        RigidBodyBuilder::dynamic()
            .translation(vector![1.0, 0.0])
            .build(),
    );
    let stranger = bodies.insert(RigidBodyBuilder::dynamic().build());

    let joint = WeldJoint::new(&bodies, b1, b2, Point::origin()).unwrap();
    let joint: &dyn Joint = &joint;

    assert_eq!(joint.other_body(b1), Some(b2));
    assert_eq!(joint.other_body(b2), Some(b1));
    assert_eq!(joint.other_body(stranger), None);
    assert_eq!(joint.body_count(), 2);
    assert!(joint.body(2).is_err());
    assert!(joint.is_member(b1) && !joint.is_member(stranger));
}

#[test]
fn chained_joints_settle_through_the_island_solver() {
    let mut bodies = RigidBodySet::new();
    let anchor = bodies.insert(RigidBodyBuilder::fixed().build());
    let middle = bodies.insert(
        RigidBodyBuilder::dynamic()
            .translation(vector![1.0, 0.0])
            .build(),
    );
    let tip = bodies.insert(
        RigidBodyBuilder::dynamic()
            .translation(vector![2.0, 0.0])
            .build(),
    );
    bodies
        .get_mut(tip)
        .unwrap()
        .set_linvel(vector![0.0, 1.0]);

    let mut joints = JointSet::new();
    joints
        .insert(
            RevoluteJoint::new(&bodies, anchor, middle, point![0.5, 0.0]).unwrap(),
            &mut bodies,
        )
        .unwrap();
    joints
        .insert(
            WeldJoint::new(&bodies, middle, tip, point![1.5, 0.0]).unwrap(),
            &mut bodies,
        )
        .unwrap();

    let params = IntegrationParameters::default();
    let mut solver = IslandSolver::new();
    let mut converged = false;
    for _ in 0..10 {
        converged = solver.solve(&params, &mut bodies, &mut joints);
        integrate(&mut bodies, params.dt);
    }
    assert!(converged);

    // The weld holds middle and tip rigidly together.
    let rel = bodies.get(tip).unwrap().rotation_angle()
        - bodies.get(middle).unwrap().rotation_angle();
    assert!(rel.abs() < 0.05);
}

#[cfg(feature = "serde-serialize")]
mod persistence {
    use super::*;

    #[test]
    fn a_restored_weld_reproduces_the_next_step() {
        let build = || {
            let mut bodies = RigidBodySet::new();
            let b1 = bodies.insert(RigidBodyBuilder::fixed().build());
            let b2 = bodies.insert(
                RigidBodyBuilder::dynamic()
                    .translation(vector![1.0, 0.0])
                    .rotation(0.3)
                    .build(),
            );
            let joint = WeldJoint::new(&bodies, b1, b2, point![1.0, 0.0])
                .unwrap()
                .with_spring(6.0, 0.4)
                .unwrap();
            (bodies, joint, b2)
        };

        let (mut bodies, mut joint, b2) = build();
        let params = IntegrationParameters::default();
        // Accumulate warm-start state, then snapshot.
        step(&params, &mut bodies, &mut joint);

        let saved_joint = bincode::serialize(&joint).unwrap();
        let saved_bodies = bincode::serialize(&bodies).unwrap();

        step(&params, &mut bodies, &mut joint);
        let expected = *bodies.get(b2).unwrap().position();

        let mut restored_joint: WeldJoint = bincode::deserialize(&saved_joint).unwrap();
        let mut restored_bodies: RigidBodySet = bincode::deserialize(&saved_bodies).unwrap();
        step(&params, &mut restored_bodies, &mut restored_joint);
        let actual = *restored_bodies.get(b2).unwrap().position();

        assert_abs_diff_eq!(
            actual.translation.vector,
            expected.translation.vector,
            epsilon = 1.0e-9
        );
        assert_abs_diff_eq!(
            actual.rotation.angle(),
            expected.rotation.angle(),
            epsilon = 1.0e-9
        );
    }
}
