//! A slider joint with an optional linear motor and translation limits.

use na::{Matrix2, Matrix3};

use super::capabilities::{LimitsModel, LinearMotor, MotorModel};
use super::joint::{Joint, JointBinding};
use crate::dynamics::{IntegrationParameters, RigidBodyHandle, RigidBodySet};
use crate::errors::JointError;
use crate::math::{wrap_angle, Point, Real, SpacialVector, Vector};
use crate::utils::{WBasis, WCross};

/// A prismatic joint: the second body slides along an axis fixed in the
/// first body's frame, with the relative rotation locked.
///
/// The slide distance can be driven by a linear motor and confined to a
/// `[lower, upper]` translation interval; the limit impulses are
/// one-sided so the slider is never pulled back into the interior.
///
/// Quantities are measured body2-relative-to-body1: the translation is
/// the slide of body2's anchor along the axis, and the locked angle is
/// `θ₂ − θ₁` at construction time.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct PrismaticJoint {
    binding: JointBinding,
    local_anchor1: Point,
    local_anchor2: Point,
    local_axis1: Vector,
    reference_angle: Real,
    /// Perpendicular impulse in `x`, angular impulse in `y`.
    impulse: Vector,
    motor: MotorModel,
    limits: LimitsModel,
    lower_impulse: Real,
    upper_impulse: Real,

    // Per-step derived state.
    axis: Vector,
    perp: Vector,
    a1: Real,
    a2: Real,
    s1: Real,
    s2: Real,
    k2: Matrix2<Real>,
    axial_mass: Real,
    translation: Real,
}

impl PrismaticJoint {
    /// Creates a prismatic joint between `body1` and `body2` with the
    /// given world-space anchor and slide axis.
    pub fn new(
        bodies: &RigidBodySet,
        body1: RigidBodyHandle,
        body2: RigidBodyHandle,
        anchor: Point,
        axis: Vector,
    ) -> Result<Self, JointError> {
        let binding = JointBinding::pair(body1, body2)?;
        let rb1 = bodies.get(body1).ok_or(JointError::BodyNotInSet)?;
        let rb2 = bodies.get(body2).ok_or(JointError::BodyNotInSet)?;
        let norm = axis.norm();
        if norm == 0.0 {
            return Err(JointError::ZeroAxis);
        }
        let local_axis1 = rb1.position.rotation.inverse() * (axis / norm);

        Ok(Self {
            binding,
            local_anchor1: rb1.local_point(&anchor),
            local_anchor2: rb2.local_point(&anchor),
            local_axis1,
            reference_angle: rb2.rotation_angle() - rb1.rotation_angle(),
            impulse: Vector::zeros(),
            motor: MotorModel::disabled(),
            limits: LimitsModel {
                enabled: false,
                lower: 0.0,
                upper: 0.0,
            },
            lower_impulse: 0.0,
            upper_impulse: 0.0,
            axis: Vector::zeros(),
            perp: Vector::zeros(),
            a1: 0.0,
            a2: 0.0,
            s1: 0.0,
            s2: 0.0,
            k2: Matrix2::zeros(),
            axial_mass: 0.0,
            translation: 0.0,
        })
    }

    /// The slide axis in the first body's local frame (unit length).
    pub fn local_axis1(&self) -> &Vector {
        &self.local_axis1
    }

    /// The current slide distance of body2 along the axis, in metres.
    pub fn joint_translation(&self, bodies: &RigidBodySet) -> Option<Real> {
        let rb1 = bodies.get(self.binding.bodies()[0])?;
        let rb2 = bodies.get(self.binding.bodies()[1])?;
        let d = rb2.world_point(&self.local_anchor2) - rb1.world_point(&self.local_anchor1);
        let axis = rb1.position.rotation * self.local_axis1;
        Some(axis.dot(&d))
    }

    /// Whether the translation limits take part in the solve.
    pub fn is_limit_enabled(&self) -> bool {
        self.limits.enabled
    }

    /// Enables or disables the translation limits.
    pub fn set_limit_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet) {
        if self.limits.enabled != enabled {
            self.limits.enabled = enabled;
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
            self.binding.wake_bodies(bodies);
        }
    }

    /// The lower translation limit, in metres.
    pub fn lower_translation(&self) -> Real {
        self.limits.lower
    }

    /// The upper translation limit, in metres.
    pub fn upper_translation(&self) -> Real {
        self.limits.upper
    }

    /// Sets the lower translation limit; fails if it would exceed the
    /// upper limit.
    pub fn set_lower_translation(
        &mut self,
        lower: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.limits.set_lower(lower)? {
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    /// Sets the upper translation limit; fails if it would fall below
    /// the lower limit.
    pub fn set_upper_translation(
        &mut self,
        upper: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.limits.set_upper(upper)? {
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    /// Sets both translation limits atomically; `lower <= upper` is
    /// enforced.
    pub fn set_translation_limits(
        &mut self,
        lower: Real,
        upper: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.limits.set_both(lower, upper)? {
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    fn pair(&self) -> (RigidBodyHandle, RigidBodyHandle) {
        (self.binding.bodies()[0], self.binding.bodies()[1])
    }
}

impl Joint for PrismaticJoint {
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
        let r1 = rb1.position.rotation * (self.local_anchor1 - rb1.local_com);
        let r2 = rb2.position.rotation * (self.local_anchor2 - rb2.local_com);
        let d = (rb2.world_com() + r2) - (rb1.world_com() + r1);

        self.axis = rb1.position.rotation * self.local_axis1;
        self.perp = self.axis.orthonormal_vector();
        self.a1 = (d + r1).gcross(self.axis);
        self.a2 = r2.gcross(self.axis);
        self.s1 = (d + r1).gcross(self.perp);
        self.s2 = r2.gcross(self.perp);
        self.translation = self.axis.dot(&d);

        self.axial_mass = crate::utils::inv(
            im1 + im2 + ii1 * self.a1 * self.a1 + ii2 * self.a2 * self.a2,
        );
        let k11 = im1 + im2 + ii1 * self.s1 * self.s1 + ii2 * self.s2 * self.s2;
        let k12 = ii1 * self.s1 + ii2 * self.s2;
        let mut k22 = ii1 + ii2;
        if k22 == 0.0 {
            // Both rotations locked: the angular row only sees the
            // perpendicular coupling.
            k22 = 1.0;
        }
        self.k2 = Matrix2::new(k11, k12, k12, k22);

        if !self.limits.enabled {
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }
        if !self.motor.enabled {
            self.motor.impulse = 0.0;
        }

        self.impulse *= params.dt_ratio;
        self.motor.impulse *= params.dt_ratio;
        self.lower_impulse *= params.dt_ratio;
        self.upper_impulse *= params.dt_ratio;

        let axial = self.motor.impulse + self.lower_impulse - self.upper_impulse;
        let p = self.impulse.x * self.perp + axial * self.axis;
        let l1 = self.impulse.x * self.s1 + self.impulse.y + axial * self.a1;
        let l2 = self.impulse.x * self.s2 + self.impulse.y + axial * self.a2;
        rb1.linvel -= p * im1;
        rb1.angvel -= ii1 * l1;
        rb2.linvel += p * im2;
        rb2.angvel += ii2 * l2;
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

        if self.motor.enabled {
            let cdot = self.axis.dot(&(rb2.linvel - rb1.linvel)) + self.a2 * rb2.angvel
                - self.a1 * rb1.angvel;
            let mut lambda = self.axial_mass * (self.motor.target_speed - cdot);
            if self.motor.max_enabled {
                let max_impulse = self.motor.max * params.dt;
                let old = self.motor.impulse;
                self.motor.impulse = (old + lambda).clamp(-max_impulse, max_impulse);
                lambda = self.motor.impulse - old;
            } else {
                self.motor.impulse += lambda;
            }
            let p = lambda * self.axis;
            rb1.linvel -= p * im1;
            rb1.angvel -= ii1 * lambda * self.a1;
            rb2.linvel += p * im2;
            rb2.angvel += ii2 * lambda * self.a2;
        }

        if self.limits.enabled {
            // Lower limit: the accumulated impulse only pushes the
            // translation up, never pulls it back down.
            {
                let c = self.translation - self.limits.lower;
                let cdot = self.axis.dot(&(rb2.linvel - rb1.linvel)) + self.a2 * rb2.angvel
                    - self.a1 * rb1.angvel;
                let lambda = -self.axial_mass * (cdot + c.max(0.0) * params.inv_dt());
                let old = self.lower_impulse;
                self.lower_impulse = (old + lambda).max(0.0);
                let lambda = self.lower_impulse - old;

                let p = lambda * self.axis;
                rb1.linvel -= p * im1;
                rb1.angvel -= ii1 * lambda * self.a1;
                rb2.linvel += p * im2;
                rb2.angvel += ii2 * lambda * self.a2;
            }
            // Upper limit, mirrored.
            {
                let c = self.limits.upper - self.translation;
                let cdot = -(self.axis.dot(&(rb2.linvel - rb1.linvel)) + self.a2 * rb2.angvel
                    - self.a1 * rb1.angvel);
                let lambda = -self.axial_mass * (cdot + c.max(0.0) * params.inv_dt());
                let old = self.upper_impulse;
                self.upper_impulse = (old + lambda).max(0.0);
                let lambda = self.upper_impulse - old;

                let p = -lambda * self.axis;
                rb1.linvel -= p * im1;
                rb1.angvel -= ii1 * -lambda * self.a1;
                rb2.linvel += p * im2;
                rb2.angvel += ii2 * -lambda * self.a2;
            }
        }

        // Perpendicular + angular block.
        let cdot = Vector::new(
            self.perp.dot(&(rb2.linvel - rb1.linvel)) + self.s2 * rb2.angvel
                - self.s1 * rb1.angvel,
            rb2.angvel - rb1.angvel,
        );
        let df = -(self.k2.try_inverse().unwrap_or_else(Matrix2::zeros) * cdot);
        self.impulse += df;

        let p = df.x * self.perp;
        let l1 = df.x * self.s1 + df.y;
        let l2 = df.x * self.s2 + df.y;
        rb1.linvel -= p * im1;
        rb1.angvel -= ii1 * l1;
        rb2.linvel += p * im2;
        rb2.angvel += ii2 * l2;
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
        let d = (rb2.world_com() + r2) - (rb1.world_com() + r1);

        let axis = rb1.position.rotation * self.local_axis1;
        let perp = axis.orthonormal_vector();
        let a1 = (d + r1).gcross(axis);
        let a2 = r2.gcross(axis);
        let s1 = (d + r1).gcross(perp);
        let s2 = r2.gcross(perp);
        let translation = axis.dot(&d);

        let c1 = Vector::new(
            perp.dot(&d),
            wrap_angle(
                rb2.position.rotation.angle() - rb1.position.rotation.angle()
                    - self.reference_angle,
            ),
        );
        let mut linear_error = c1.x.abs();
        let angular_error = c1.y.abs();

        let mut active = false;
        let mut c2 = 0.0;
        if self.limits.enabled {
            if translation <= self.limits.lower {
                c2 = (translation - self.limits.lower + params.allowed_linear_error)
                    .clamp(-params.max_linear_correction, 0.0);
                linear_error = linear_error.max(self.limits.lower - translation);
                active = true;
            } else if translation >= self.limits.upper {
                c2 = (translation - self.limits.upper - params.allowed_linear_error)
                    .clamp(0.0, params.max_linear_correction);
                linear_error = linear_error.max(translation - self.limits.upper);
                active = true;
            }
        }

        let impulse = if active {
            let k11 = im1 + im2 + ii1 * s1 * s1 + ii2 * s2 * s2;
            let k12 = ii1 * s1 + ii2 * s2;
            let k13 = ii1 * s1 * a1 + ii2 * s2 * a2;
            let mut k22 = ii1 + ii2;
            if k22 == 0.0 {
                k22 = 1.0;
            }
            let k23 = ii1 * a1 + ii2 * a2;
            let k33 = im1 + im2 + ii1 * a1 * a1 + ii2 * a2 * a2;
            #[rustfmt::skip]
            let k3 = Matrix3::new(
                k11, k12, k13,
                k12, k22, k23,
                k13, k23, k33,
            );
            k3.try_inverse()
                .map(|inv| -(inv * SpacialVector::new(c1.x, c1.y, c2)))
                .unwrap_or_else(SpacialVector::zeros)
        } else {
            let k11 = im1 + im2 + ii1 * s1 * s1 + ii2 * s2 * s2;
            let k12 = ii1 * s1 + ii2 * s2;
            let mut k22 = ii1 + ii2;
            if k22 == 0.0 {
                k22 = 1.0;
            }
            let df = -(Matrix2::new(k11, k12, k12, k22)
                .try_inverse()
                .unwrap_or_else(Matrix2::zeros)
                * c1);
            SpacialVector::new(df.x, df.y, 0.0)
        };

        let p = impulse.x * perp + impulse.z * axis;
        let l1 = impulse.x * s1 + impulse.y + impulse.z * a1;
        let l2 = impulse.x * s2 + impulse.y + impulse.z * a2;
        rb1.translate(&(-p * im1));
        rb1.rotate_about_center(-ii1 * l1);
        rb2.translate(&(p * im2));
        rb2.rotate_about_center(ii2 * l2);

        linear_error <= params.allowed_linear_error
            && angular_error <= params.allowed_angular_error
    }

    fn reaction_force(&self, inv_dt: Real) -> Vector {
        (self.impulse.x * self.perp
            + (self.motor.impulse + self.lower_impulse - self.upper_impulse) * self.axis)
            * inv_dt
    }

    fn reaction_torque(&self, inv_dt: Real) -> Real {
        self.impulse.y * inv_dt
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

impl LinearMotor for PrismaticJoint {
    fn is_motor_enabled(&self) -> bool {
        self.motor.enabled
    }

    fn set_motor_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet) {
        if self.motor.enabled != enabled {
            self.motor.enabled = enabled;
            self.binding.wake_bodies(bodies);
        }
    }

    fn motor_target_speed(&self) -> Real {
        self.motor.target_speed
    }

    fn set_motor_target_speed(&mut self, speed: Real, bodies: &mut RigidBodySet) {
        if self.motor.target_speed != speed {
            self.motor.target_speed = speed;
            self.binding.wake_bodies(bodies);
        }
    }

    fn is_max_motor_force_enabled(&self) -> bool {
        self.motor.max_enabled
    }

    fn set_max_motor_force_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet) {
        if self.motor.max_enabled != enabled {
            self.motor.max_enabled = enabled;
            self.binding.wake_bodies(bodies);
        }
    }

    fn max_motor_force(&self) -> Real {
        self.motor.max
    }

    fn set_max_motor_force(
        &mut self,
        force: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.motor.set_max(force)? {
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    fn motor_force(&self, inv_dt: Real) -> Real {
        self.motor.impulse * inv_dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::RigidBodyBuilder;
    use approx::assert_relative_eq;

    #[test]
    fn motor_without_clamp_reaches_the_target_in_one_step() {
        let mut bodies = RigidBodySet::new();
        let b1 = bodies.insert(RigidBodyBuilder::dynamic().build());
        let b2 = bodies.insert(
            RigidBodyBuilder::dynamic()
                .translation(Vector::new(1.0, 0.0))
                .build(),
        );
        let mut joint =
            PrismaticJoint::new(&bodies, b1, b2, Point::origin(), Vector::new(1.0, 0.0)).unwrap();
        joint.set_motor_enabled(true, &mut bodies);
        joint.set_motor_target_speed(3.0, &mut bodies);

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        joint.solve_velocity_constraints(&params, &mut bodies);

        let v_rel = bodies.get(b2).unwrap().linvel().x - bodies.get(b1).unwrap().linvel().x;
        assert!((v_rel - 3.0).abs() < 1.0e-9);
    }

    #[test]
    fn motor_force_clamp_bounds_the_speed_change_per_step() {
        let mut bodies = RigidBodySet::new();
        let b1 = bodies.insert(RigidBodyBuilder::fixed().build());
        let b2 = bodies.insert(
            RigidBodyBuilder::dynamic()
                .translation(Vector::new(1.0, 0.0))
                .build(),
        );
        let mut joint =
            PrismaticJoint::new(&bodies, b1, b2, Point::origin(), Vector::new(1.0, 0.0)).unwrap();
        joint.set_motor_enabled(true, &mut bodies);
        joint.set_motor_target_speed(3.0, &mut bodies);
        joint.set_max_motor_force(1.0, &mut bodies).unwrap();
        joint.set_max_motor_force_enabled(true, &mut bodies);

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        for _ in 0..params.velocity_iterations {
            joint.solve_velocity_constraints(&params, &mut bodies);
        }

        // With µ = 1 kg: |Δv_rel per step| ≤ F_max·Δt/µ = 1/60.
        let v_rel = bodies.get(b2).unwrap().linvel().x;
        assert!(v_rel > 0.0);
        assert!(v_rel <= 1.0 / 60.0 + 1.0e-12);
        assert_relative_eq!(joint.motor_force(params.inv_dt()), 1.0, epsilon = 1.0e-9);
    }

    #[test]
    fn upper_translation_limit_stops_the_slide() {
        let mut bodies = RigidBodySet::new();
        let b1 = bodies.insert(RigidBodyBuilder::fixed().build());
        let b2 = bodies.insert(
            RigidBodyBuilder::dynamic()
                .translation(Vector::new(0.5, 0.0))
                .build(),
        );
        bodies.get_mut(b2).unwrap().set_linvel(Vector::new(1.0, 0.0));
        let mut joint =
            PrismaticJoint::new(&bodies, b1, b2, Point::origin(), Vector::new(1.0, 0.0)).unwrap();
        // The slide distance is zero at construction, so an upper bound
        // of zero puts the slider exactly on its limit.
        joint.set_translation_limits(-1.0, 0.0, &mut bodies).unwrap();
        joint.set_limit_enabled(true, &mut bodies);

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        for _ in 0..params.velocity_iterations {
            joint.solve_velocity_constraints(&params, &mut bodies);
        }

        // The slider sits on its upper bound moving outward: the limit
        // impulse removes the outward velocity.
        assert!(bodies.get(b2).unwrap().linvel().x.abs() < 1.0e-9);
    }

    #[test]
    fn limit_setters_validate_and_preserve_state() {
        let mut bodies = RigidBodySet::new();
        let b1 = bodies.insert(RigidBodyBuilder::fixed().build());
        let b2 = bodies.insert(
            RigidBodyBuilder::dynamic()
                .translation(Vector::new(1.0, 0.0))
                .build(),
        );
        let mut joint =
            PrismaticJoint::new(&bodies, b1, b2, Point::origin(), Vector::new(1.0, 0.0)).unwrap();
        joint.set_translation_limits(-1.0, 1.0, &mut bodies).unwrap();

        assert!(joint.set_lower_translation(2.0, &mut bodies).is_err());
        assert_eq!(joint.lower_translation(), -1.0);
        assert!(joint.set_upper_translation(-2.0, &mut bodies).is_err());
        assert_eq!(joint.upper_translation(), 1.0);
    }

    #[test]
    fn zero_axis_is_rejected() {
        let mut bodies = RigidBodySet::new();
        let b1 = bodies.insert(RigidBodyBuilder::dynamic().build());
        let b2 = bodies.insert(
            RigidBodyBuilder::dynamic()
                .translation(Vector::new(1.0, 0.0))
                .build(),
        );
        assert_eq!(
            PrismaticJoint::new(&bodies, b1, b2, Point::origin(), Vector::zeros()).unwrap_err(),
            JointError::ZeroAxis
        );
    }

    #[test]
    fn rigid_blocks_keep_the_slide_axis_free() {
        let mut bodies = RigidBodySet::new();
        let b1 = bodies.insert(RigidBodyBuilder::fixed().build());
        let b2 = bodies.insert(
            RigidBodyBuilder::dynamic()
                .translation(Vector::new(1.0, 0.0))
                .build(),
        );
        bodies
            .get_mut(b2)
            .unwrap()
            .set_linvel(Vector::new(2.0, 1.5));
        let mut joint =
            PrismaticJoint::new(&bodies, b1, b2, Point::origin(), Vector::new(1.0, 0.0)).unwrap();

        let params = IntegrationParameters::default();
        joint.initialize_constraints(&params, &mut bodies);
        for _ in 0..params.velocity_iterations {
            joint.solve_velocity_constraints(&params, &mut bodies);
        }

        let v = *bodies.get(b2).unwrap().linvel();
        // The perpendicular component is removed, the axial one kept.
        assert_relative_eq!(v.y, 0.0, epsilon = 1.0e-9);
        assert_relative_eq!(v.x, 2.0, epsilon = 1.0e-9);
    }
}
