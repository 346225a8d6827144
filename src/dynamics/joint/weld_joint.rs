//! A joint locking all three relative degrees of freedom of two bodies.

use na::{Matrix2, Matrix3};

use super::capabilities::{soft_constraint, AngularSpring, SpringMode, SpringModel};
use super::joint::{Joint, JointBinding};
use crate::dynamics::{IntegrationParameters, RigidBodyHandle, RigidBodySet};
use crate::errors::JointError;
use crate::math::{wrap_angle, Point, Real, SpacialVector, Vector};
use crate::utils::{self, WCross};

/// A weld joint: both anchors coincide and the relative rotation stays
/// at the reference angle, removing all three relative degrees of
/// freedom.
///
/// With the torsion spring enabled, the angular constraint is softened
/// into a spring/damper (constraint-impulse-mixing) while the
/// translational constraint stays rigid; the point-to-point block and
/// the angular block are then solved separately instead of jointly.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct WeldJoint {
    binding: JointBinding,
    local_anchor1: Point,
    local_anchor2: Point,
    reference_angle: Real,
    spring: SpringModel,
    impulse: SpacialVector,

    // Per-step derived state.
    r1: Vector,
    r2: Vector,
    lin_mass: Matrix2<Real>,
    ang_mass: Real,
    mass3: Option<Matrix3<Real>>,
    gamma: Real,
    bias: Real,
}

impl WeldJoint {
    /// Creates a weld joint attaching `body1` and `body2` at the given
    /// world-space anchor, capturing the current relative rotation as
    /// the reference angle.
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
            reference_angle: rb1.rotation_angle() - rb2.rotation_angle(),
            spring: SpringModel::disabled(),
            impulse: SpacialVector::zeros(),
            r1: Vector::zeros(),
            r2: Vector::zeros(),
            lin_mass: Matrix2::zeros(),
            ang_mass: 0.0,
            mass3: None,
            gamma: 0.0,
            bias: 0.0,
        })
    }

    /// Enables the torsion spring with the given frequency (hertz) and
    /// damping ratio. A zero frequency disables the spring; a zero
    /// damping ratio disables the damper.
    pub fn with_spring(mut self, frequency: Real, damping_ratio: Real) -> Result<Self, JointError> {
        if frequency < 0.0 {
            return Err(JointError::NonPositiveFrequency(frequency));
        }
        if !(0.0..=1.0).contains(&damping_ratio) {
            return Err(JointError::InvalidDampingRatio(damping_ratio));
        }
        let mut spring = SpringModel::disabled();
        if frequency > 0.0 {
            spring.set_frequency(frequency)?;
            spring.enabled = true;
            spring.damper_enabled = damping_ratio > 0.0;
            if damping_ratio > 0.0 {
                spring.set_damping_ratio(damping_ratio)?;
            }
        }
        self.spring = spring;
        Ok(self)
    }

    /// The anchor in the first body's local frame.
    pub fn local_anchor1(&self) -> &Point {
        &self.local_anchor1
    }

    /// The anchor in the second body's local frame.
    pub fn local_anchor2(&self) -> &Point {
        &self.local_anchor2
    }

    /// The anchor on the first body, in world space.
    pub fn anchor1(&self, bodies: &RigidBodySet) -> Option<Point> {
        let rb = bodies.get(self.binding.body(0).ok()?)?;
        Some(rb.world_point(&self.local_anchor1))
    }

    /// The anchor on the second body, in world space.
    pub fn anchor2(&self, bodies: &RigidBodySet) -> Option<Point> {
        let rb = bodies.get(self.binding.body(1).ok()?)?;
        Some(rb.world_point(&self.local_anchor2))
    }

    /// The relative rotation the angular constraint drives toward.
    pub fn reference_angle(&self) -> Real {
        self.reference_angle
    }

    /// Overrides the reference angle captured at construction.
    pub fn set_reference_angle(&mut self, angle: Real, bodies: &mut RigidBodySet) {
        if self.reference_angle != angle {
            self.reference_angle = angle;
            self.binding.wake_bodies(bodies);
        }
    }

    /// The accumulated constraint impulse `(λx, λy, λz)`.
    pub fn impulse(&self) -> SpacialVector {
        self.impulse
    }

    fn pair(&self) -> (RigidBodyHandle, RigidBodyHandle) {
        (self.binding.bodies()[0], self.binding.bodies()[1])
    }
}

impl Joint for WeldJoint {
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
        let k13 = -r1.y * ii1 - r2.y * ii2;
        let k22 = im1 + im2 + r1.x * r1.x * ii1 + r2.x * r2.x * ii2;
        let k23 = r1.x * ii1 + r2.x * ii2;
        let k33 = ii1 + ii2;

        self.lin_mass = Matrix2::new(k11, k12, k12, k22)
            .try_inverse()
            .unwrap_or_else(Matrix2::zeros);

        if self.spring.enabled {
            // Soft angular constraint: the 1×1 angular block gets the
            // constraint-impulse-mixing term, the linear block stays rigid.
            let mu_i = utils::inv(k33);
            let (k, d) = self.spring.coefficients(mu_i);
            let (gamma, erp) = soft_constraint(params.dt, k, d);
            self.gamma = gamma;
            let c = wrap_angle(
                rb1.position.rotation.angle() - rb2.position.rotation.angle()
                    - self.reference_angle,
            );
            self.bias = c * erp;
            self.ang_mass = utils::inv(k33 + gamma);
            self.mass3 = None;
        } else {
            self.gamma = 0.0;
            self.bias = 0.0;
            self.ang_mass = 0.0;
            self.mass3 = if k33 > 0.0 {
                #[rustfmt::skip]
                let k3 = Matrix3::new(
                    k11, k12, k13,
                    k12, k22, k23,
                    k13, k23, k33,
                );
                k3.try_inverse()
            } else {
                None
            };
        }

        // Warm start: rescale the stored impulse to the new timestep
        // and apply it as if it had been solved this step.
        self.impulse *= params.dt_ratio;
        let p = Vector::new(self.impulse.x, self.impulse.y);
        rb1.linvel += p * im1;
        rb1.angvel += ii1 * (r1.gcross(p) + self.impulse.z);
        rb2.linvel -= p * im2;
        rb2.angvel -= ii2 * (r2.gcross(p) + self.impulse.z);
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
        let (r1, r2) = (self.r1, self.r2);

        if self.spring.enabled {
            // Angular block first.
            let cdot = rb1.angvel - rb2.angvel;
            let lambda = -self.ang_mass * (cdot + self.bias + self.gamma * self.impulse.z);
            self.impulse.z += lambda;
            rb1.angvel += ii1 * lambda;
            rb2.angvel -= ii2 * lambda;

            // Then the point-to-point block.
            let cdot = rb1.linvel + rb1.angvel.gcross(r1) - rb2.linvel - rb2.angvel.gcross(r2);
            let lambda = -(self.lin_mass * cdot);
            self.impulse.x += lambda.x;
            self.impulse.y += lambda.y;
            rb1.linvel += lambda * im1;
            rb1.angvel += ii1 * r1.gcross(lambda);
            rb2.linvel -= lambda * im2;
            rb2.angvel -= ii2 * r2.gcross(lambda);
        } else {
            let cdot_lin =
                rb1.linvel + rb1.angvel.gcross(r1) - rb2.linvel - rb2.angvel.gcross(r2);
            let cdot_ang = rb1.angvel - rb2.angvel;

            let lambda = match &self.mass3 {
                Some(mass3) => -(mass3 * SpacialVector::new(cdot_lin.x, cdot_lin.y, cdot_ang)),
                // Both bodies have locked rotation: solve translation
                // only and leave the angular component untouched.
                None => {
                    let l = -(self.lin_mass * cdot_lin);
                    SpacialVector::new(l.x, l.y, 0.0)
                }
            };

            self.impulse += lambda;
            let p = Vector::new(lambda.x, lambda.y);
            rb1.linvel += p * im1;
            rb1.angvel += ii1 * (r1.gcross(p) + lambda.z);
            rb2.linvel -= p * im2;
            rb2.angvel -= ii2 * (r2.gcross(p) + lambda.z);
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

        let mut c_lin = rb1.world_point(&self.local_anchor1) - rb2.world_point(&self.local_anchor2);
        let linear_error = c_lin.norm();
        let c_ang = wrap_angle(
            rb1.position.rotation.angle() - rb2.position.rotation.angle() - self.reference_angle,
        );
        let angular_error = c_ang.abs();

        if linear_error > params.max_linear_correction {
            c_lin *= params.max_linear_correction / linear_error;
        }

        let k11 = im1 + im2 + r1.y * r1.y * ii1 + r2.y * r2.y * ii2;
        let k12 = -r1.y * r1.x * ii1 - r2.y * r2.x * ii2;
        let k13 = -r1.y * ii1 - r2.y * ii2;
        let k22 = im1 + im2 + r1.x * r1.x * ii1 + r2.x * r2.x * ii2;
        let k23 = r1.x * ii1 + r2.x * ii2;
        let k33 = ii1 + ii2;

        if self.spring.enabled {
            // The torsion spring absorbs angular drift over time; only
            // translation is corrected here.
            let p = -(Matrix2::new(k11, k12, k12, k22)
                .try_inverse()
                .unwrap_or_else(Matrix2::zeros)
                * c_lin);
            rb1.translate(&(p * im1));
            rb1.rotate_about_center(ii1 * r1.gcross(p));
            rb2.translate(&(-p * im2));
            rb2.rotate_about_center(-ii2 * r2.gcross(p));

            linear_error <= params.allowed_linear_error
        } else {
            let c_ang_clamped = c_ang.clamp(
                -params.max_angular_correction,
                params.max_angular_correction,
            );

            #[rustfmt::skip]
            let k3 = Matrix3::new(
                k11, k12, k13,
                k12, k22, k23,
                k13, k23, k33,
            );
            let p = match (k33 > 0.0).then(|| k3.try_inverse()).flatten() {
                Some(inv) => -(inv * SpacialVector::new(c_lin.x, c_lin.y, c_ang_clamped)),
                None => {
                    let l = -(Matrix2::new(k11, k12, k12, k22)
                        .try_inverse()
                        .unwrap_or_else(Matrix2::zeros)
                        * c_lin);
                    SpacialVector::new(l.x, l.y, 0.0)
                }
            };

            let p_lin = Vector::new(p.x, p.y);
            rb1.translate(&(p_lin * im1));
            rb1.rotate_about_center(ii1 * (r1.gcross(p_lin) + p.z));
            rb2.translate(&(-p_lin * im2));
            rb2.rotate_about_center(-ii2 * (r2.gcross(p_lin) + p.z));

            linear_error <= params.allowed_linear_error
                && angular_error <= params.allowed_angular_error
        }
    }

    fn reaction_force(&self, inv_dt: Real) -> Vector {
        Vector::new(self.impulse.x, self.impulse.y) * inv_dt
    }

    fn reaction_torque(&self, inv_dt: Real) -> Real {
        self.impulse.z * inv_dt
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

impl AngularSpring for WeldJoint {
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
        self.spring.frequency(self.binding.reduced_inertia(bodies))
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
        self.spring.stiffness(self.binding.reduced_inertia(bodies))
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

    fn is_max_spring_torque_enabled(&self) -> bool {
        self.spring.max_enabled
    }

    fn set_max_spring_torque_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet) {
        if self.spring.max_enabled != enabled {
            self.spring.max_enabled = enabled;
            self.binding.wake_bodies(bodies);
        }
    }

    fn max_spring_torque(&self) -> Real {
        self.spring.max
    }

    fn set_max_spring_torque(
        &mut self,
        torque: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.spring.set_max(torque)? {
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }
}
