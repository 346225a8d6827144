//! A joint keeping two anchors at a fixed (or spring-driven) distance.

use super::capabilities::{soft_constraint, LinearSpring, SpringMode, SpringModel};
use super::joint::{Joint, JointBinding};
use crate::dynamics::{IntegrationParameters, RigidBodyHandle, RigidBodySet};
use crate::errors::JointError;
use crate::math::{Point, Real, Vector};
use crate::utils::{self, WCross};

/// A distance joint: the two anchors stay `rest_distance` apart.
///
/// With the spring enabled the constraint is softened into a
/// spring/damper along the anchor-to-anchor direction; drift is then
/// absorbed by the spring over time instead of being position-corrected.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceJoint {
    binding: JointBinding,
    local_anchor1: Point,
    local_anchor2: Point,
    rest_distance: Real,
    spring: SpringModel,
    impulse: Real,

    // Per-step derived state.
    n: Vector,
    r1: Vector,
    r2: Vector,
    mass: Real,
    gamma: Real,
    bias: Real,
}

impl DistanceJoint {
    /// Creates a distance joint between the two given world-space
    /// anchors, capturing their current distance as the rest distance.
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

        Ok(Self {
            binding,
            local_anchor1: rb1.local_point(&anchor1),
            local_anchor2: rb2.local_point(&anchor2),
            rest_distance: (anchor2 - anchor1).norm(),
            spring: SpringModel::disabled(),
            impulse: 0.0,
            n: Vector::zeros(),
            r1: Vector::zeros(),
            r2: Vector::zeros(),
            mass: 0.0,
            gamma: 0.0,
            bias: 0.0,
        })
    }

    /// Enables the spring with the given frequency (hertz) and damping
    /// ratio.
    pub fn with_spring(mut self, frequency: Real, damping_ratio: Real) -> Result<Self, JointError> {
        self.spring = SpringModel::from_frequency(frequency, damping_ratio)?;
        Ok(self)
    }

    /// The rest distance, in metres.
    pub fn rest_distance(&self) -> Real {
        self.rest_distance
    }

    /// Sets the rest distance; must be non-negative.
    pub fn set_rest_distance(
        &mut self,
        distance: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if distance < 0.0 {
            return Err(JointError::NegativeDistance(distance));
        }
        if self.rest_distance != distance {
            self.rest_distance = distance;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    /// The current distance between the two anchors.
    pub fn current_distance(&self, bodies: &RigidBodySet) -> Option<Real> {
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

impl Joint for DistanceJoint {
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
        let length = u.norm();
        self.n = if length > params.allowed_linear_error {
            u / length
        } else {
            Vector::zeros()
        };

        let cr1 = self.r1.gcross(self.n);
        let cr2 = self.r2.gcross(self.n);
        let mut inv_mass_sum = im1 + ii1 * cr1 * cr1 + im2 + ii2 * cr2 * cr2;

        if self.spring.enabled {
            // The spring stiffness derives from the reduced mass of the
            // pair; the impulse uses the constraint-space effective mass.
            let mu = utils::inv(im1 + im2);
            let (k, d) = self.spring.coefficients(mu);
            let (gamma, erp) = soft_constraint(params.dt, k, d);
            self.gamma = gamma;
            self.bias = (length - self.rest_distance) * erp;
            inv_mass_sum += gamma;
        } else {
            self.gamma = 0.0;
            self.bias = 0.0;
        }
        self.mass = utils::inv(inv_mass_sum);

        self.impulse *= params.dt_ratio;
        let p = self.n * self.impulse;
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

        let v1 = rb1.linvel + rb1.angvel.gcross(self.r1);
        let v2 = rb2.linvel + rb2.angvel.gcross(self.r2);
        let cdot = self.n.dot(&(v2 - v1));

        let lambda = -self.mass * (cdot + self.bias + self.gamma * self.impulse);
        let lambda = if self.spring.enabled && self.spring.max_enabled {
            let max_impulse = self.spring.max * params.dt;
            let old = self.impulse;
            self.impulse = (old + lambda).clamp(-max_impulse, max_impulse);
            self.impulse - old
        } else {
            self.impulse += lambda;
            lambda
        };

        let p = self.n * lambda;
        rb1.linvel -= p * im1;
        rb1.angvel -= ii1 * self.r1.gcross(p);
        rb2.linvel += p * im2;
        rb2.angvel += ii2 * self.r2.gcross(p);
    }

    fn solve_position_constraints(
        &mut self,
        params: &IntegrationParameters,
        bodies: &mut RigidBodySet,
    ) -> bool {
        if self.spring.enabled {
            // The spring absorbs drift across time.
            return true;
        }
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
        let error = length - self.rest_distance;
        let c = error.clamp(-params.max_linear_correction, params.max_linear_correction);

        let cr1 = r1.gcross(n);
        let cr2 = r2.gcross(n);
        let mass = utils::inv(im1 + ii1 * cr1 * cr1 + im2 + ii2 * cr2 * cr2);

        let lambda = -mass * c;
        let p = n * lambda;
        rb1.translate(&(-p * im1));
        rb1.rotate_about_center(-ii1 * r1.gcross(p));
        rb2.translate(&(p * im2));
        rb2.rotate_about_center(ii2 * r2.gcross(p));

        error.abs() <= params.allowed_linear_error
    }

    fn reaction_force(&self, inv_dt: Real) -> Vector {
        self.n * self.impulse * inv_dt
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

impl LinearSpring for DistanceJoint {
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
