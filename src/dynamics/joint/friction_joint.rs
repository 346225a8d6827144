//! A joint applying dry friction against relative motion.

use na::Matrix2;

use super::joint::{Joint, JointBinding};
use crate::dynamics::{IntegrationParameters, RigidBodyHandle, RigidBodySet};
use crate::errors::JointError;
use crate::math::{Point, Real, Vector};
use crate::utils::{self, WCross};

/// A friction joint: resists the relative linear velocity at an anchor
/// and the relative angular velocity, each clamped by a maximum force
/// and torque (Coulomb-style, but velocity-based).
///
/// There is no positional constraint.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct FrictionJoint {
    binding: JointBinding,
    local_anchor1: Point,
    local_anchor2: Point,
    max_force: Real,
    max_torque: Real,
    lin_impulse: Vector,
    ang_impulse: Real,

    // Per-step derived state.
    r1: Vector,
    r2: Vector,
    lin_mass: Matrix2<Real>,
    ang_mass: Real,
}

impl FrictionJoint {
    /// Creates a friction joint acting at the given world-space anchor.
    pub fn new(
        bodies: &RigidBodySet,
        body1: RigidBodyHandle,
        body2: RigidBodyHandle,
        anchor: Point,
    ) -> Result<Self, JointError> {
        let binding = JointBinding::pair(body1, body2)?;
        let rb1 = bodies.get(body1).ok_or(JointError::BodyNotInSet)?;
        let rb2 = bodies.get(body2).ok_or(JointError::BodyNotInSet)?;

        Ok(Self {
            binding,
            local_anchor1: rb1.local_point(&anchor),
            local_anchor2: rb2.local_point(&anchor),
            max_force: 0.0,
            max_torque: 0.0,
            lin_impulse: Vector::zeros(),
            ang_impulse: 0.0,
            r1: Vector::zeros(),
            r2: Vector::zeros(),
            lin_mass: Matrix2::zeros(),
            ang_mass: 0.0,
        })
    }

    /// The maximum friction force, in newtons.
    pub fn max_force(&self) -> Real {
        self.max_force
    }

    /// Sets the maximum friction force; must be non-negative (zero
    /// disables the linear friction).
    pub fn set_max_force(
        &mut self,
        force: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if force < 0.0 {
            return Err(JointError::NonPositiveMaxForce(force));
        }
        if self.max_force != force {
            self.max_force = force;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    /// The maximum friction torque, in newton-metres.
    pub fn max_torque(&self) -> Real {
        self.max_torque
    }

    /// Sets the maximum friction torque; must be non-negative (zero
    /// disables the angular friction).
    pub fn set_max_torque(
        &mut self,
        torque: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if torque < 0.0 {
            return Err(JointError::NonPositiveMaxForce(torque));
        }
        if self.max_torque != torque {
            self.max_torque = torque;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    fn pair(&self) -> (RigidBodyHandle, RigidBodyHandle) {
        (self.binding.bodies()[0], self.binding.bodies()[1])
    }
}

impl Joint for FrictionJoint {
    fn binding(&self) -> &JointBinding {
        &self.binding
    }

    fn binding_mut(&mut self) -> &mut JointBinding {
        &mut self.binding
    }

    fn initialize_constraints(
        &mut self,
        params: &IntegrationParameters,
        bodies: &mut RigidBodySet,
    ) {
        let (h1, h2) = self.pair();
        let (Some(rb1), Some(rb2)) = bodies.get_pair_mut(h1, h2) else {
            return;
        };

        let (im1, im2) = (rb1.inv_mass, rb2.inv_mass);
        let (ii1, ii2) = (rb1.inv_inertia, rb2.inv_inertia);
        self.r1 = rb1.position.rotation * (self.local_anchor1 - rb1.local_com);
        self.r2 = rb2.position.rotation * (self.local_anchor2 - rb2.local_com);
        let (r1, r2) = (self.r1, self.r2);

        let k11 = im1 + im2 + r1.y * r1.y * ii1 + r2.y * r2.y * ii2;
        let k12 = -r1.y * r1.x * ii1 - r2.y * r2.x * ii2;
        let k22 = im1 + im2 + r1.x * r1.x * ii1 + r2.x * r2.x * ii2;
        self.lin_mass = Matrix2::new(k11, k12, k12, k22)
            .try_inverse()
            .unwrap_or_else(Matrix2::zeros);
        self.ang_mass = utils::inv(ii1 + ii2);

        self.lin_impulse *= params.dt_ratio;
        self.ang_impulse *= params.dt_ratio;
        let p = self.lin_impulse;
        rb1.linvel -= p * im1;
        rb1.angvel -= ii1 * (r1.gcross(p) + self.ang_impulse);
        rb2.linvel += p * im2;
        rb2.angvel += ii2 * (r2.gcross(p) + self.ang_impulse);
    }

    fn solve_velocity_constraints(
        &mut self,
        params: &IntegrationParameters,
        bodies: &mut RigidBodySet,
    ) {
        let (h1, h2) = self.pair();
        let (Some(rb1), Some(rb2)) = bodies.get_pair_mut(h1, h2) else {
            return;
        };

        let (im1, im2) = (rb1.inv_mass, rb2.inv_mass);
        let (ii1, ii2) = (rb1.inv_inertia, rb2.inv_inertia);

        // Angular friction.
        {
            let cdot = rb2.angvel - rb1.angvel;
            let lambda = -self.ang_mass * cdot;
            let old = self.ang_impulse;
            let max_impulse = self.max_torque * params.dt;
            self.ang_impulse = (old + lambda).clamp(-max_impulse, max_impulse);
            let lambda = self.ang_impulse - old;
            rb1.angvel -= ii1 * lambda;
            rb2.angvel += ii2 * lambda;
        }
        // Linear friction.
        {
            let cdot = rb2.linvel + rb2.angvel.gcross(self.r2)
                - rb1.linvel
                - rb1.angvel.gcross(self.r1);
            let lambda = -(self.lin_mass * cdot);
            let old = self.lin_impulse;
            self.lin_impulse += lambda;
            let max_impulse = self.max_force * params.dt;
            if self.lin_impulse.norm() > max_impulse {
                self.lin_impulse *= max_impulse / self.lin_impulse.norm();
            }
            let lambda = self.lin_impulse - old;
            rb1.linvel -= lambda * im1;
            rb1.angvel -= ii1 * self.r1.gcross(lambda);
            rb2.linvel += lambda * im2;
            rb2.angvel += ii2 * self.r2.gcross(lambda);
        }
    }

    fn solve_position_constraints(
        &mut self,
        _params: &IntegrationParameters,
        _bodies: &mut RigidBodySet,
    ) -> bool {
        true
    }

    fn reaction_force(&self, inv_dt: Real) -> Vector {
        self.lin_impulse * inv_dt
    }

    fn reaction_torque(&self, inv_dt: Real) -> Real {
        self.ang_impulse * inv_dt
    }

    fn duplicate(
        &self,
        substitutes: &[Option<RigidBodyHandle>],
    ) -> Result<Box<dyn Joint>, JointError> {
        let mut copy = self.clone();
        copy.binding.substitute(substitutes)?;
        Ok(Box::new(copy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::RigidBodyBuilder;
    use approx::assert_relative_eq;

    fn sliding_pair() -> (RigidBodySet, FrictionJoint, RigidBodyHandle) {
        let mut bodies = RigidBodySet::new();
        let b1 = bodies.insert(RigidBodyBuilder::fixed().build());
        let b2 = bodies.insert(RigidBodyBuilder::dynamic().build());
        bodies
            .get_mut(b2)
            .unwrap()
            .set_linvel(Vector::new(1.0, 0.0));
        bodies.get_mut(b2).unwrap().set_angvel(2.0);
        let joint = FrictionJoint::new(&bodies, b1, b2, Point::origin()).unwrap();
        (bodies, joint, b2)
    }

    #[test]
    fn high_limits_stop_relative_motion() {
        let (mut bodies, mut joint, b2) = sliding_pair();
        joint.set_max_force(1000.0, &mut bodies).unwrap();
        joint.set_max_torque(1000.0, &mut bodies).unwrap();

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        for _ in 0..params.velocity_iterations {
            joint.solve_velocity_constraints(&params, &mut bodies);
        }
        assert_relative_eq!(
            *bodies.get(b2).unwrap().linvel(),
            Vector::zeros(),
            epsilon = 1.0e-9
        );
        assert_relative_eq!(bodies.get(b2).unwrap().angvel(), 0.0, epsilon = 1.0e-9);
    }

    #[test]
    fn low_limits_only_slow_the_motion() {
        let (mut bodies, mut joint, b2) = sliding_pair();
        joint.set_max_force(1.0, &mut bodies).unwrap();
        joint.set_max_torque(0.5, &mut bodies).unwrap();

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        for _ in 0..params.velocity_iterations {
            joint.solve_velocity_constraints(&params, &mut bodies);
        }
        // |Δv| ≤ F·Δt/m and |Δω| ≤ τ·Δt/I.
        let v = bodies.get(b2).unwrap().linvel().x;
        let w = bodies.get(b2).unwrap().angvel();
        assert_relative_eq!(v, 1.0 - 1.0 / 60.0, epsilon = 1.0e-9);
        assert_relative_eq!(w, 2.0 - 0.5 / 60.0, epsilon = 1.0e-9);
    }

    #[test]
    fn zero_limits_are_inert_and_negatives_rejected() {
        let (mut bodies, mut joint, b2) = sliding_pair();
        assert!(joint.set_max_force(-1.0, &mut bodies).is_err());
        assert_eq!(joint.max_force(), 0.0);

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        joint.solve_velocity_constraints(&params, &mut bodies);
        assert_relative_eq!(bodies.get(b2).unwrap().linvel().x, 1.0);
        assert_relative_eq!(bodies.get(b2).unwrap().angvel(), 2.0);
    }
}
