//! A joint driving the relative transform toward a target pose.

use na::Matrix2;

use super::joint::{Joint, JointBinding};
use crate::dynamics::{IntegrationParameters, RigidBodyHandle, RigidBodySet};
use crate::errors::JointError;
use crate::math::{wrap_angle, Point, Real, Vector};
use crate::utils::{self, WCross};

/// A motor joint: drives body2 toward a target position (expressed in
/// body1's frame) and a target relative angle, applying at most
/// `max_force`/`max_torque`. The correction factor sets how much of the
/// pose error is fed back as a velocity bias each step.
///
/// There is no positional constraint: an unreachable target simply
/// saturates the motor.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct MotorJoint {
    binding: JointBinding,
    /// Target position of body2's origin, in body1's local frame.
    linear_target: Point,
    /// Target relative angle `θ₂ − θ₁`.
    angular_target: Real,
    correction_factor: Real,
    max_force: Real,
    max_torque: Real,
    lin_impulse: Vector,
    ang_impulse: Real,

    // Per-step derived state.
    r1: Vector,
    r2: Vector,
    lin_mass: Matrix2<Real>,
    ang_mass: Real,
    linear_error: Vector,
    angular_error: Real,
}

impl MotorJoint {
    /// Creates a motor joint holding body2 at its current pose relative
    /// to body1.
    pub fn new(
        bodies: &RigidBodySet,
        body1: RigidBodyHandle,
        body2: RigidBodyHandle,
    ) -> Result<Self, JointError> {
        let binding = JointBinding::pair(body1, body2)?;
        let rb1 = bodies.get(body1).ok_or(JointError::BodyNotInSet)?;
        let rb2 = bodies.get(body2).ok_or(JointError::BodyNotInSet)?;

        Ok(Self {
            binding,
            linear_target: rb1.local_point(&Point::from(rb2.position.translation.vector)),
            angular_target: rb2.rotation_angle() - rb1.rotation_angle(),
            correction_factor: 0.3,
            max_force: 1.0,
            max_torque: 1.0,
            lin_impulse: Vector::zeros(),
            ang_impulse: 0.0,
            r1: Vector::zeros(),
            r2: Vector::zeros(),
            lin_mass: Matrix2::zeros(),
            ang_mass: 0.0,
            linear_error: Vector::zeros(),
            angular_error: 0.0,
        })
    }

    /// The target position of body2's origin, in body1's local frame.
    pub fn linear_target(&self) -> &Point {
        &self.linear_target
    }

    /// Sets the linear target, waking the bodies on change.
    pub fn set_linear_target(&mut self, target: Point, bodies: &mut RigidBodySet) {
        if self.linear_target != target {
            self.linear_target = target;
            self.binding.wake_bodies(bodies);
        }
    }

    /// The target relative angle `θ₂ − θ₁`, in radians.
    pub fn angular_target(&self) -> Real {
        self.angular_target
    }

    /// Sets the angular target, waking the bodies on change.
    pub fn set_angular_target(&mut self, target: Real, bodies: &mut RigidBodySet) {
        if self.angular_target != target {
            self.angular_target = target;
            self.binding.wake_bodies(bodies);
        }
    }

    /// The pose-error feedback factor, in `[0, 1]`.
    pub fn correction_factor(&self) -> Real {
        self.correction_factor
    }

    /// Sets the correction factor; must lie in `[0, 1]`.
    pub fn set_correction_factor(
        &mut self,
        factor: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if !(0.0..=1.0).contains(&factor) {
            return Err(JointError::InvalidCorrectionFactor(factor));
        }
        if self.correction_factor != factor {
            self.correction_factor = factor;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    /// The maximum drive force, in newtons.
    pub fn max_force(&self) -> Real {
        self.max_force
    }

    /// Sets the maximum drive force; must be positive.
    pub fn set_max_force(
        &mut self,
        force: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if force <= 0.0 {
            return Err(JointError::NonPositiveMaxForce(force));
        }
        if self.max_force != force {
            self.max_force = force;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    /// The maximum drive torque, in newton-metres.
    pub fn max_torque(&self) -> Real {
        self.max_torque
    }

    /// Sets the maximum drive torque; must be positive.
    pub fn set_max_torque(
        &mut self,
        torque: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if torque <= 0.0 {
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

impl Joint for MotorJoint {
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
        self.r1 = rb1.position.rotation * (self.linear_target - rb1.local_com);
        self.r2 = rb2.position.rotation * (Point::origin() - rb2.local_com);
        let (r1, r2) = (self.r1, self.r2);

        self.linear_error = (rb2.world_com() + r2) - (rb1.world_com() + r1);
        self.angular_error = wrap_angle(
            rb2.position.rotation.angle() - rb1.position.rotation.angle() - self.angular_target,
        );

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
        let inv_h = params.inv_dt();

        // Angular drive.
        {
            let cdot = rb2.angvel - rb1.angvel
                + inv_h * self.correction_factor * self.angular_error;
            let lambda = -self.ang_mass * cdot;
            let old = self.ang_impulse;
            let max_impulse = self.max_torque * params.dt;
            self.ang_impulse = (old + lambda).clamp(-max_impulse, max_impulse);
            let lambda = self.ang_impulse - old;
            rb1.angvel -= ii1 * lambda;
            rb2.angvel += ii2 * lambda;
        }
        // Linear drive.
        {
            let cdot = rb2.linvel + rb2.angvel.gcross(self.r2)
                - rb1.linvel
                - rb1.angvel.gcross(self.r1)
                + inv_h * self.correction_factor * self.linear_error;
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

    fn driven_pair() -> (RigidBodySet, MotorJoint, RigidBodyHandle) {
        let mut bodies = RigidBodySet::new();
        let b1 = bodies.insert(RigidBodyBuilder::fixed().build());
        let b2 = bodies.insert(RigidBodyBuilder::dynamic().build());
        let joint = MotorJoint::new(&bodies, b1, b2).unwrap();
        (bodies, joint, b2)
    }

    #[test]
    fn an_angular_error_produces_a_corrective_velocity() {
        let (mut bodies, mut joint, b2) = driven_pair();
        joint.set_max_torque(1000.0, &mut bodies).unwrap();
        joint.set_angular_target(0.5, &mut bodies);

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        joint.solve_velocity_constraints(&params, &mut bodies);

        // angular_error = −0.5 → the drive spins body2 forward.
        assert!(bodies.get(b2).unwrap().angvel() > 0.0);
    }

    #[test]
    fn a_linear_error_drives_the_body_toward_the_target() {
        let (mut bodies, mut joint, b2) = driven_pair();
        joint.set_max_force(1000.0, &mut bodies).unwrap();
        joint.set_linear_target(Point::new(1.0, 0.0), &mut bodies);

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        joint.solve_velocity_constraints(&params, &mut bodies);

        assert!(bodies.get(b2).unwrap().linvel().x > 0.0);
    }

    #[test]
    fn the_drive_saturates_at_the_force_limit() {
        let (mut bodies, mut joint, b2) = driven_pair();
        joint.set_linear_target(Point::new(100.0, 0.0), &mut bodies);

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        for _ in 0..params.velocity_iterations {
            joint.solve_velocity_constraints(&params, &mut bodies);
        }
        // Default max_force = 1 N → |Δv| ≤ 1/60.
        assert!(bodies.get(b2).unwrap().linvel().norm() <= 1.0 / 60.0 + 1.0e-12);
    }

    #[test]
    fn parameter_setters_validate() {
        let (mut bodies, mut joint, _) = driven_pair();
        assert_eq!(
            joint.set_correction_factor(1.5, &mut bodies).unwrap_err(),
            JointError::InvalidCorrectionFactor(1.5)
        );
        assert!(joint.set_max_force(0.0, &mut bodies).is_err());
        assert!(joint.set_max_torque(-1.0, &mut bodies).is_err());
        assert_eq!(joint.max_force(), 1.0);
        assert_eq!(joint.max_torque(), 1.0);
    }

    #[test]
    fn a_satisfied_motor_applies_nothing() {
        let (mut bodies, mut joint, b2) = driven_pair();
        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        for _ in 0..params.velocity_iterations {
            joint.solve_velocity_constraints(&params, &mut bodies);
        }
        assert_relative_eq!(*bodies.get(b2).unwrap().linvel(), Vector::zeros());
        assert_relative_eq!(bodies.get(b2).unwrap().angvel(), 0.0);
    }
}
