//! A single-body joint pinning a local anchor to a world-space target.

use na::Matrix2;

use super::capabilities::{soft_constraint, LinearSpring, SpringMode, SpringModel};
use super::joint::{Joint, JointBinding};
use crate::dynamics::{IntegrationParameters, RigidBodyHandle, RigidBodySet};
use crate::errors::JointError;
use crate::math::{Point, Real, Vector};
use crate::utils::{self, WCross};

/// A pin joint: drags one body's anchor toward a world-space target
/// point through a spring/damper, with the applied force clamped.
///
/// This is the single-body specialization of the joint protocol. The
/// target is world-frame state, so shifting the world origin moves it
/// along. There is no positional constraint: the spring absorbs the
/// error, and the position pass converges trivially.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct PinJoint {
    binding: JointBinding,
    local_anchor: Point,
    target: Point,
    spring: SpringModel,
    impulse: Vector,

    // Per-step derived state.
    r: Vector,
    mass: Matrix2<Real>,
    gamma: Real,
    bias: Vector,
}

impl PinJoint {
    /// Creates a pin joint dragging `body`'s material point at the
    /// world-space `anchor` toward that same point, with the given
    /// spring tuning and maximum force.
    pub fn new(
        bodies: &RigidBodySet,
        body: RigidBodyHandle,
        anchor: Point,
        frequency: Real,
        damping_ratio: Real,
        max_force: Real,
    ) -> Result<Self, JointError> {
        let rb = bodies.get(body).ok_or(JointError::BodyNotInSet)?;
        let mut spring = SpringModel::from_frequency(frequency, damping_ratio)?;
        spring.set_max(max_force)?;
        spring.max_enabled = true;

        Ok(Self {
            binding: JointBinding::solo(body),
            local_anchor: rb.local_point(&anchor),
            target: anchor,
            spring,
            impulse: Vector::zeros(),
            r: Vector::zeros(),
            mass: Matrix2::zeros(),
            gamma: 0.0,
            bias: Vector::zeros(),
        })
    }

    /// The world-space point the anchor is dragged toward.
    pub fn target(&self) -> &Point {
        &self.target
    }

    /// Moves the target, waking the body.
    pub fn set_target(&mut self, target: Point, bodies: &mut RigidBodySet) {
        if self.target != target {
            self.target = target;
            self.binding.wake_bodies(bodies);
        }
    }

    /// The anchor in the body's local frame.
    pub fn local_anchor(&self) -> &Point {
        &self.local_anchor
    }

    /// The anchor in world space.
    pub fn anchor(&self, bodies: &RigidBodySet) -> Option<Point> {
        let rb = bodies.get(self.binding.bodies()[0])?;
        Some(rb.world_point(&self.local_anchor))
    }

    fn body_handle(&self) -> RigidBodyHandle {
        self.binding.bodies()[0]
    }
}

impl Joint for PinJoint {
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
        let Some(rb) = bodies.get_mut(self.body_handle()) else {
            return;
        };

        let (im, ii) = (rb.inv_mass, rb.inv_inertia);
        self.r = rb.position.rotation * (self.local_anchor - rb.local_com);
        let r = self.r;

        let mu = utils::inv(im);
        let (k, d) = self.spring.coefficients(mu);
        let (gamma, erp) = soft_constraint(params.dt, k, d);
        self.gamma = gamma;
        let c = rb.world_point(&self.local_anchor) - self.target;
        self.bias = c * erp;

        let k11 = im + ii * r.y * r.y + gamma;
        let k12 = -ii * r.x * r.y;
        let k22 = im + ii * r.x * r.x + gamma;
        self.mass = Matrix2::new(k11, k12, k12, k22)
            .try_inverse()
            .unwrap_or_else(Matrix2::zeros);

        self.impulse *= params.dt_ratio;
        rb.linvel += self.impulse * im;
        rb.angvel += ii * r.gcross(self.impulse);
    }

    fn solve_velocity_constraints(
        &mut self,
        params: &IntegrationParameters,
        bodies: &mut RigidBodySet,
    ) {
        let Some(rb) = bodies.get_mut(self.body_handle()) else {
            return;
        };

        let (im, ii) = (rb.inv_mass, rb.inv_inertia);
        let cdot = rb.linvel + rb.angvel.gcross(self.r);
        let lambda = -(self.mass * (cdot + self.bias + self.impulse * self.gamma));

        let old = self.impulse;
        self.impulse += lambda;
        let max_impulse = self.spring.max * params.dt;
        if self.impulse.norm() > max_impulse {
            self.impulse *= max_impulse / self.impulse.norm();
        }
        let lambda = self.impulse - old;

        rb.linvel += lambda * im;
        rb.angvel += ii * self.r.gcross(lambda);
    }

    fn solve_position_constraints(
        &mut self,
        _params: &IntegrationParameters,
        _bodies: &mut RigidBodySet,
    ) -> bool {
        // The spring absorbs positional error over time.
        true
    }

    fn reaction_force(&self, inv_dt: Real) -> Vector {
        self.impulse * inv_dt
    }

    fn reaction_torque(&self, _inv_dt: Real) -> Real {
        0.0
    }

    fn shift_origin(&mut self, shift: &Vector) {
        self.target += shift;
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

impl LinearSpring for PinJoint {
    fn is_spring_enabled(&self) -> bool {
        self.spring.enabled
    }

    fn set_spring_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet) {
        if self.spring.enabled != enabled {
            self.spring.enabled = enabled;
            self.binding.wake_bodies(bodies);
        }
    }

    fn is_damper_enabled(&self) -> bool {
        self.spring.damper_enabled
    }

    fn set_damper_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet) {
        if self.spring.damper_enabled != enabled {
            self.spring.damper_enabled = enabled;
            self.binding.wake_bodies(bodies);
        }
    }

    fn spring_mode(&self) -> SpringMode {
        self.spring.mode()
    }

    fn spring_frequency(&self, bodies: &RigidBodySet) -> Real {
        self.spring.frequency(self.binding.reduced_mass(bodies))
    }

    fn set_spring_frequency(
        &mut self,
        frequency: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.spring.set_frequency(frequency)? {
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    fn spring_stiffness(&self, bodies: &RigidBodySet) -> Real {
        self.spring.stiffness(self.binding.reduced_mass(bodies))
    }

    fn set_spring_stiffness(
        &mut self,
        stiffness: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.spring.set_stiffness(stiffness)? {
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    fn spring_damping_ratio(&self) -> Real {
        self.spring.damping_ratio
    }

    fn set_spring_damping_ratio(
        &mut self,
        ratio: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.spring.set_damping_ratio(ratio)? {
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    fn is_max_spring_force_enabled(&self) -> bool {
        self.spring.max_enabled
    }

    fn set_max_spring_force_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet) {
        if self.spring.max_enabled != enabled {
            self.spring.max_enabled = enabled;
            self.binding.wake_bodies(bodies);
        }
    }

    fn max_spring_force(&self) -> Real {
        self.spring.max
    }

    fn set_max_spring_force(
        &mut self,
        force: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.spring.set_max(force)? {
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::RigidBodyBuilder;

    #[test]
    fn construction_validates_the_spring_parameters() {
        let mut bodies = RigidBodySet::new();
        let b = bodies.insert(RigidBodyBuilder::dynamic().build());
        assert!(PinJoint::new(&bodies, b, Point::origin(), 0.0, 0.5, 100.0).is_err());
        assert!(PinJoint::new(&bodies, b, Point::origin(), 4.0, 2.0, 100.0).is_err());
        assert!(PinJoint::new(&bodies, b, Point::origin(), 4.0, 0.5, -1.0).is_err());
        assert!(PinJoint::new(&bodies, b, Point::origin(), 4.0, 0.5, 100.0).is_ok());
    }

    #[test]
    fn a_displaced_target_drags_the_body() {
        let mut bodies = RigidBodySet::new();
        let b = bodies.insert(RigidBodyBuilder::dynamic().build());
        let mut joint = PinJoint::new(&bodies, b, Point::origin(), 5.0, 0.7, 1000.0).unwrap();
        joint.set_target(Point::new(1.0, 0.0), &mut bodies);

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        for _ in 0..params.velocity_iterations {
            joint.solve_velocity_constraints(&params, &mut bodies);
        }
        // The bias accelerates the body toward the target.
        assert!(bodies.get(b).unwrap().linvel().x > 0.0);
        assert!(joint.solve_position_constraints(&params, &mut bodies));
    }

    #[test]
    fn the_applied_force_is_clamped() {
        let mut bodies = RigidBodySet::new();
        let b = bodies.insert(RigidBodyBuilder::dynamic().build());
        let mut joint = PinJoint::new(&bodies, b, Point::origin(), 50.0, 1.0, 2.0).unwrap();
        joint.set_target(Point::new(100.0, 0.0), &mut bodies);

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        for _ in 0..params.velocity_iterations {
            joint.solve_velocity_constraints(&params, &mut bodies);
        }
        // |Δv| ≤ F_max·Δt/m.
        assert!(bodies.get(b).unwrap().linvel().norm() <= 2.0 / 60.0 + 1.0e-12);
        assert!(joint.reaction_force(params.inv_dt()).norm() <= 2.0 + 1.0e-9);
    }

    #[test]
    fn shifting_the_origin_moves_the_target() {
        let mut bodies = RigidBodySet::new();
        let b = bodies.insert(RigidBodyBuilder::dynamic().build());
        let mut joint = PinJoint::new(&bodies, b, Point::new(1.0, 1.0), 4.0, 0.5, 10.0).unwrap();
        joint.shift_origin(&Vector::new(2.0, 0.0));
        assert_eq!(*joint.target(), Point::new(3.0, 1.0));
    }

    #[test]
    fn a_static_body_is_unaffected() {
        let mut bodies = RigidBodySet::new();
        let b = bodies.insert(RigidBodyBuilder::fixed().build());
        let mut joint = PinJoint::new(&bodies, b, Point::origin(), 4.0, 0.5, 10.0).unwrap();
        joint.set_target(Point::new(1.0, 0.0), &mut bodies);

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        joint.solve_velocity_constraints(&params, &mut bodies);
        assert_eq!(*bodies.get(b).unwrap().linvel(), Vector::zeros());
    }
}
