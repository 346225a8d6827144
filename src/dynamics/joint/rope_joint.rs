//! A rope limiting the distance between two anchors to an interval.

use super::capabilities::LimitsModel;
use super::joint::{Joint, JointBinding};
use crate::dynamics::{IntegrationParameters, RigidBodyHandle, RigidBodySet};
use crate::errors::JointError;
use crate::math::{Point, Real, Vector};
use crate::utils::{self, WCross};

/// A rope joint: the anchor distance stays within
/// `[lower_length, upper_length]`.
///
/// Both bounds are one-sided clipped impulses: the rope pushes apart
/// only below the lower length and pulls together only above the upper
/// length; in between it is slack and applies nothing.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RopeJoint {
    binding: JointBinding,
    local_anchor1: Point,
    local_anchor2: Point,
    limits: LimitsModel,
    lower_impulse: Real,
    upper_impulse: Real,

    // Per-step derived state.
    n: Vector,
    r1: Vector,
    r2: Vector,
    mass: Real,
    length: Real,
}

impl RopeJoint {
    /// Creates a rope joint between the two given world-space anchors.
    /// Both length bounds start at the current anchor distance.
    pub fn new(
        bodies: &RigidBodySet,
        body1: RigidBodyHandle,
        body2: RigidBodyHandle,
        anchor1: Point,
        anchor2: Point,
    ) -> Result<Self, JointError> {
        let binding = JointBinding::pair(body1, body2)?;
        let rb1 = bodies.get(body1).ok_or(JointError::BodyNotInSet)?;
        let rb2 = bodies.get(body2).ok_or(JointError::BodyNotInSet)?;
        let length = (anchor2 - anchor1).norm();

        let limits = LimitsModel {
            enabled: true,
            lower: length,
            upper: length,
        };

        Ok(Self {
            binding,
            local_anchor1: rb1.local_point(&anchor1),
            local_anchor2: rb2.local_point(&anchor2),
            limits,
            lower_impulse: 0.0,
            upper_impulse: 0.0,
            n: Vector::zeros(),
            r1: Vector::zeros(),
            r2: Vector::zeros(),
            mass: 0.0,
            length: 0.0,
        })
    }

    /// The lower length bound, in metres.
    pub fn lower_length(&self) -> Real {
        self.limits.lower
    }

    /// The upper length bound, in metres.
    pub fn upper_length(&self) -> Real {
        self.limits.upper
    }

    /// Sets the lower length bound; must be non-negative and below the
    /// upper bound.
    pub fn set_lower_length(
        &mut self,
        lower: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if lower < 0.0 {
            return Err(JointError::NegativeDistance(lower));
        }
        if self.limits.set_lower(lower)? {
            self.lower_impulse = 0.0;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    /// Sets the upper length bound; must stay above the lower bound.
    pub fn set_upper_length(
        &mut self,
        upper: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.limits.set_upper(upper)? {
            self.upper_impulse = 0.0;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    /// Sets both length bounds atomically.
    pub fn set_lengths(
        &mut self,
        lower: Real,
        upper: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if lower < 0.0 {
            return Err(JointError::NegativeDistance(lower));
        }
        if self.limits.set_both(lower, upper)? {
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    /// The current anchor distance.
    pub fn current_length(&self, bodies: &RigidBodySet) -> Option<Real> {
        let rb1 = bodies.get(self.binding.bodies()[0])?;
        let rb2 = bodies.get(self.binding.bodies()[1])?;
        Some(
            (rb2.world_point(&self.local_anchor2) - rb1.world_point(&self.local_anchor1)).norm(),
        )
    }

    fn pair(&self) -> (RigidBodyHandle, RigidBodyHandle) {
        (self.binding.bodies()[0], self.binding.bodies()[1])
    }
}

impl Joint for RopeJoint {
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

        let u = rb2.world_point(&self.local_anchor2) - rb1.world_point(&self.local_anchor1);
        self.length = u.norm();
        self.n = if self.length > params.allowed_linear_error {
            u / self.length
        } else {
            Vector::zeros()
        };

        let cr1 = self.r1.gcross(self.n);
        let cr2 = self.r2.gcross(self.n);
        self.mass = utils::inv(im1 + ii1 * cr1 * cr1 + im2 + ii2 * cr2 * cr2);

        self.lower_impulse *= params.dt_ratio;
        self.upper_impulse *= params.dt_ratio;
        let p = self.n * (self.lower_impulse - self.upper_impulse);
        rb1.linvel -= p * im1;
        rb1.angvel -= ii1 * self.r1.gcross(p);
        rb2.linvel += p * im2;
        rb2.angvel += ii2 * self.r2.gcross(p);
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

        // Lower bound: pushes the anchors apart only.
        {
            let c = self.length - self.limits.lower;
            let v1 = rb1.linvel + rb1.angvel.gcross(self.r1);
            let v2 = rb2.linvel + rb2.angvel.gcross(self.r2);
            let cdot = self.n.dot(&(v2 - v1));
            let lambda = -self.mass * (cdot + c.max(0.0) * params.inv_dt());
            let old = self.lower_impulse;
            self.lower_impulse = (old + lambda).max(0.0);
            let lambda = self.lower_impulse - old;

            let p = self.n * lambda;
            rb1.linvel -= p * im1;
            rb1.angvel -= ii1 * self.r1.gcross(p);
            rb2.linvel += p * im2;
            rb2.angvel += ii2 * self.r2.gcross(p);
        }
        // Upper bound: pulls the anchors together only.
        {
            let c = self.limits.upper - self.length;
            let v1 = rb1.linvel + rb1.angvel.gcross(self.r1);
            let v2 = rb2.linvel + rb2.angvel.gcross(self.r2);
            let cdot = -self.n.dot(&(v2 - v1));
            let lambda = -self.mass * (cdot + c.max(0.0) * params.inv_dt());
            let old = self.upper_impulse;
            self.upper_impulse = (old + lambda).max(0.0);
            let lambda = self.upper_impulse - old;

            let p = self.n * -lambda;
            rb1.linvel -= p * im1;
            rb1.angvel -= ii1 * self.r1.gcross(p);
            rb2.linvel += p * im2;
            rb2.angvel += ii2 * self.r2.gcross(p);
        }
    }

    fn solve_position_constraints(
        &mut self,
        params: &IntegrationParameters,
        bodies: &mut RigidBodySet,
    ) -> bool {
        let (h1, h2) = self.pair();
        let (Some(rb1), Some(rb2)) = bodies.get_pair_mut(h1, h2) else {
            return true;
        };

        let (im1, im2) = (rb1.inv_mass, rb2.inv_mass);
        let (ii1, ii2) = (rb1.inv_inertia, rb2.inv_inertia);
        let r1 = rb1.position.rotation * (self.local_anchor1 - rb1.local_com);
        let r2 = rb2.position.rotation * (self.local_anchor2 - rb2.local_com);

        let u = rb2.world_point(&self.local_anchor2) - rb1.world_point(&self.local_anchor1);
        let length = u.norm();
        let n = if length > params.allowed_linear_error {
            u / length
        } else {
            Vector::zeros()
        };

        let error = if length < self.limits.lower {
            self.limits.lower - length
        } else if length > self.limits.upper {
            length - self.limits.upper
        } else {
            0.0
        };

        if error > 0.0 {
            let c = if length < self.limits.lower {
                (length - self.limits.lower).clamp(-params.max_linear_correction, 0.0)
            } else {
                (length - self.limits.upper).clamp(0.0, params.max_linear_correction)
            };

            let cr1 = r1.gcross(n);
            let cr2 = r2.gcross(n);
            let mass = utils::inv(im1 + ii1 * cr1 * cr1 + im2 + ii2 * cr2 * cr2);
            let lambda = -mass * c;
            let p = n * lambda;
            rb1.translate(&(-p * im1));
            rb1.rotate_about_center(-ii1 * r1.gcross(p));
            rb2.translate(&(p * im2));
            rb2.rotate_about_center(ii2 * r2.gcross(p));
        }

        error <= params.allowed_linear_error
    }

    fn reaction_force(&self, inv_dt: Real) -> Vector {
        self.n * (self.lower_impulse - self.upper_impulse) * inv_dt
    }

    fn reaction_torque(&self, _inv_dt: Real) -> Real {
        0.0
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

    fn roped_pair() -> (RigidBodySet, RopeJoint, RigidBodyHandle) {
        let mut bodies = RigidBodySet::new();
        let b1 = bodies.insert(RigidBodyBuilder::fixed().build());
        let b2 = bodies.insert(
            RigidBodyBuilder::dynamic()
                .translation(Vector::new(2.0, 0.0))
                .build(),
        );
        let joint =
            RopeJoint::new(&bodies, b1, b2, Point::origin(), Point::new(2.0, 0.0)).unwrap();
        (bodies, joint, b2)
    }

    #[test]
    fn bounds_default_to_the_construction_length() {
        let (_, joint, _) = roped_pair();
        assert_eq!(joint.lower_length(), 2.0);
        assert_eq!(joint.upper_length(), 2.0);
    }

    #[test]
    fn taut_rope_stops_outward_motion_only() {
        let (mut bodies, mut joint, b2) = roped_pair();
        joint.set_lengths(1.0, 2.0, &mut bodies).unwrap();
        bodies.get_mut(b2).unwrap().set_linvel(Vector::new(1.0, 0.0));

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        for _ in 0..params.velocity_iterations {
            joint.solve_velocity_constraints(&params, &mut bodies);
        }
        // Outward velocity is removed by the upper bound.
        assert_relative_eq!(bodies.get(b2).unwrap().linvel().x, 0.0, epsilon = 1.0e-9);

        // Inward motion is left alone: the rope is slack in that
        // direction.
        bodies.get_mut(b2).unwrap().set_linvel(Vector::new(-0.5, 0.0));
        joint.initialize_constraints(&params, &mut bodies);
        joint.solve_velocity_constraints(&params, &mut bodies);
        assert!(bodies.get(b2).unwrap().linvel().x < 0.0);
    }

    #[test]
    fn lower_bound_pushes_a_compressed_rope_apart() {
        let (mut bodies, mut joint, b2) = roped_pair();
        joint.set_lengths(2.0, 3.0, &mut bodies).unwrap();
        bodies.get_mut(b2).unwrap().set_linvel(Vector::new(-1.0, 0.0));

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        for _ in 0..params.velocity_iterations {
            joint.solve_velocity_constraints(&params, &mut bodies);
        }
        assert_relative_eq!(bodies.get(b2).unwrap().linvel().x, 0.0, epsilon = 1.0e-9);
    }

    #[test]
    fn length_setters_validate() {
        let (mut bodies, mut joint, _) = roped_pair();
        assert_eq!(
            joint.set_lower_length(-1.0, &mut bodies).unwrap_err(),
            JointError::NegativeDistance(-1.0)
        );
        assert!(joint.set_lower_length(3.0, &mut bodies).is_err());
        assert_eq!(joint.lower_length(), 2.0);
        joint.set_lengths(0.5, 4.0, &mut bodies).unwrap();
        assert_eq!((joint.lower_length(), joint.upper_length()), (0.5, 4.0));
    }

    #[test]
    fn overstretched_rope_is_position_corrected() {
        let (mut bodies, mut joint, b2) = roped_pair();
        bodies.get_mut(b2).unwrap().translate(&Vector::new(0.1, 0.0));

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        for _ in 0..20 {
            if joint.solve_position_constraints(&params, &mut bodies) {
                break;
            }
        }
        assert!(joint.current_length(&bodies).unwrap() <= 2.0 + 2.0 * params.allowed_linear_error);
    }
}
