//! An ideal pulley constraining two bodies through ground anchors.

use super::joint::{Joint, JointBinding};
use crate::dynamics::{IntegrationParameters, RigidBodyHandle, RigidBodySet};
use crate::errors::JointError;
use crate::math::{Point, Real, Vector};
use crate::utils::{self, WCross};

/// A pulley joint: each body hangs from a fixed world-space ground
/// anchor, and the rope lengths satisfy `ℓ₁ + ratio·ℓ₂ = constant`.
///
/// The ground anchors are world-frame state, so shifting the world
/// origin moves them along.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct PulleyJoint {
    binding: JointBinding,
    ground_anchor1: Point,
    ground_anchor2: Point,
    local_anchor1: Point,
    local_anchor2: Point,
    ratio: Real,
    constant: Real,
    impulse: Real,

    // Per-step derived state.
    u1: Vector,
    u2: Vector,
    r1: Vector,
    r2: Vector,
    mass: Real,
}

impl PulleyJoint {
    /// Creates a pulley joint. `anchor1`/`anchor2` are the world-space
    /// attachment points on the bodies, `ground1`/`ground2` the fixed
    /// pulley points; `ratio` must be positive.
    pub fn new(
        bodies: &RigidBodySet,
        body1: RigidBodyHandle,
        body2: RigidBodyHandle,
        ground1: Point,
        ground2: Point,
        anchor1: Point,
        anchor2: Point,
        ratio: Real,
    ) -> Result<Self, JointError> {
        if ratio <= 0.0 {
            return Err(JointError::NonPositiveRatio(ratio));
        }
        let binding = JointBinding::pair(body1, body2)?;
        let rb1 = bodies.get(body1).ok_or(JointError::BodyNotInSet)?;
        let rb2 = bodies.get(body2).ok_or(JointError::BodyNotInSet)?;

        let length1 = (anchor1 - ground1).norm();
        let length2 = (anchor2 - ground2).norm();

        Ok(Self {
            binding,
            ground_anchor1: ground1,
            ground_anchor2: ground2,
            local_anchor1: rb1.local_point(&anchor1),
            local_anchor2: rb2.local_point(&anchor2),
            ratio,
            constant: length1 + ratio * length2,
            impulse: 0.0,
            u1: Vector::zeros(),
            u2: Vector::zeros(),
            r1: Vector::zeros(),
            r2: Vector::zeros(),
            mass: 0.0,
        })
    }

    /// The pulley transmission ratio.
    pub fn ratio(&self) -> Real {
        self.ratio
    }

    /// The fixed world-space pulley point of the first body.
    pub fn ground_anchor1(&self) -> &Point {
        &self.ground_anchor1
    }

    /// The fixed world-space pulley point of the second body.
    pub fn ground_anchor2(&self) -> &Point {
        &self.ground_anchor2
    }

    /// The current rope length on the first body's side.
    pub fn length1(&self, bodies: &RigidBodySet) -> Option<Real> {
        let rb = bodies.get(self.binding.bodies()[0])?;
        Some((rb.world_point(&self.local_anchor1) - self.ground_anchor1).norm())
    }

    /// The current rope length on the second body's side.
    pub fn length2(&self, bodies: &RigidBodySet) -> Option<Real> {
        let rb = bodies.get(self.binding.bodies()[1])?;
        Some((rb.world_point(&self.local_anchor2) - self.ground_anchor2).norm())
    }

    fn pair(&self) -> (RigidBodyHandle, RigidBodyHandle) {
        (self.binding.bodies()[0], self.binding.bodies()[1])
    }
}

impl Joint for PulleyJoint {
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

        let p1 = rb1.world_com() + self.r1;
        let p2 = rb2.world_com() + self.r2;
        let u1 = p1 - self.ground_anchor1;
        let u2 = p2 - self.ground_anchor2;
        let l1 = u1.norm();
        let l2 = u2.norm();
        // A body sitting on its pulley point has no defined rope
        // direction; its side simply stops contributing.
        self.u1 = if l1 > params.allowed_linear_error {
            u1 / l1
        } else {
            Vector::zeros()
        };
        self.u2 = if l2 > params.allowed_linear_error {
            u2 / l2
        } else {
            Vector::zeros()
        };

        let cr1 = self.r1.gcross(self.u1);
        let cr2 = self.r2.gcross(self.u2);
        let m1 = im1 + ii1 * cr1 * cr1;
        let m2 = im2 + ii2 * cr2 * cr2;
        self.mass = utils::inv(m1 + self.ratio * self.ratio * m2);

        self.impulse *= params.dt_ratio;
        let p1 = self.u1 * -self.impulse;
        let p2 = self.u2 * (-self.ratio * self.impulse);
        rb1.linvel += p1 * im1;
        rb1.angvel += ii1 * self.r1.gcross(p1);
        rb2.linvel += p2 * im2;
        rb2.angvel += ii2 * self.r2.gcross(p2);
    }

    fn solve_velocity_constraints(
        &mut self,
        _params: &IntegrationParameters,
        bodies: &mut RigidBodySet,
    ) {
        let (h1, h2) = self.pair();
        let (Some(rb1), Some(rb2)) = bodies.get_pair_mut(h1, h2) else {
            return;
        };

        let (im1, im2) = (rb1.inv_mass, rb2.inv_mass);
        let (ii1, ii2) = (rb1.inv_inertia, rb2.inv_inertia);

        let vp1 = rb1.linvel + rb1.angvel.gcross(self.r1);
        let vp2 = rb2.linvel + rb2.angvel.gcross(self.r2);
        let cdot = -self.u1.dot(&vp1) - self.ratio * self.u2.dot(&vp2);

        let lambda = -self.mass * cdot;
        self.impulse += lambda;

        let p1 = self.u1 * -lambda;
        let p2 = self.u2 * (-self.ratio * lambda);
        rb1.linvel += p1 * im1;
        rb1.angvel += ii1 * self.r1.gcross(p1);
        rb2.linvel += p2 * im2;
        rb2.angvel += ii2 * self.r2.gcross(p2);
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

        let p1 = rb1.world_com() + r1;
        let p2 = rb2.world_com() + r2;
        let u1 = p1 - self.ground_anchor1;
        let u2 = p2 - self.ground_anchor2;
        let l1 = u1.norm();
        let l2 = u2.norm();
        let u1 = if l1 > params.allowed_linear_error {
            u1 / l1
        } else {
            Vector::zeros()
        };
        let u2 = if l2 > params.allowed_linear_error {
            u2 / l2
        } else {
            Vector::zeros()
        };

        let cr1 = r1.gcross(u1);
        let cr2 = r2.gcross(u2);
        let m1 = im1 + ii1 * cr1 * cr1;
        let m2 = im2 + ii2 * cr2 * cr2;
        let mass = utils::inv(m1 + self.ratio * self.ratio * m2);

        let c = self.constant - l1 - self.ratio * l2;
        let linear_error = c.abs();
        let c = c.clamp(
            -params.max_linear_correction,
            params.max_linear_correction,
        );

        let lambda = -mass * c;
        let p1 = u1 * -lambda;
        let p2 = u2 * (-self.ratio * lambda);
        rb1.translate(&(p1 * im1));
        rb1.rotate_about_center(ii1 * r1.gcross(p1));
        rb2.translate(&(p2 * im2));
        rb2.rotate_about_center(ii2 * r2.gcross(p2));

        linear_error <= params.allowed_linear_error
    }

    fn reaction_force(&self, inv_dt: Real) -> Vector {
        // The rope pulls the first body toward its ground anchor.
        self.u1 * -self.impulse * inv_dt
    }

    fn reaction_torque(&self, _inv_dt: Real) -> Real {
        0.0
    }

    fn shift_origin(&mut self, shift: &Vector) {
        self.ground_anchor1 += shift;
        self.ground_anchor2 += shift;
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
