//! A hinge joint with an optional angular motor and angular limits.

use na::Matrix3;

use super::capabilities::{AngularLimits, AngularMotor, LimitState, LimitsModel, MotorModel};
use super::joint::{Joint, JointBinding};
use crate::dynamics::{IntegrationParameters, RigidBodyHandle, RigidBodySet};
use crate::errors::JointError;
use crate::math::{wrap_angle, Point, Real, SpacialVector, Vector};
use crate::utils::{self, WCross};

/// Solves the upper-left 2×2 block of `k`, returning zero on a singular
/// block.
fn solve22(k: &Matrix3<Real>, b: &Vector) -> Vector {
    let det = k.m11 * k.m22 - k.m12 * k.m21;
    if det == 0.0 {
        return Vector::zeros();
    }
    let inv_det = 1.0 / det;
    Vector::new(
        inv_det * (k.m22 * b.x - k.m12 * b.y),
        inv_det * (k.m11 * b.y - k.m21 * b.x),
    )
}

/// Solves the full 3×3 system, returning zero on a singular matrix.
fn solve33(k: &Matrix3<Real>, b: &SpacialVector) -> SpacialVector {
    k.try_inverse()
        .map(|inv| inv * b)
        .unwrap_or_else(SpacialVector::zeros)
}

/// A revolute joint: both anchors coincide while the relative rotation
/// stays free, optionally driven by a motor and confined by angular
/// limits.
///
/// The limit impulse is clipped one-sided: at the lower bound only a
/// positive corrective impulse may accumulate, at the upper bound only
/// a negative one, so the hinge never gets over-corrected into the
/// interior.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RevoluteJoint {
    binding: JointBinding,
    local_anchor1: Point,
    local_anchor2: Point,
    reference_angle: Real,
    /// Point impulse in `(x, y)`, limit impulse in `z`.
    impulse: SpacialVector,
    motor: MotorModel,
    limits: LimitsModel,
    limit_state: LimitState,

    // Per-step derived state.
    r1: Vector,
    r2: Vector,
    k3: Matrix3<Real>,
    motor_mass: Real,
}

impl RevoluteJoint {
    /// Creates a revolute joint hinging `body1` and `body2` at the
    /// given world-space anchor.
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
            impulse: SpacialVector::zeros(),
            motor: MotorModel::disabled(),
            limits: LimitsModel {
                enabled: false,
                lower: 0.0,
                upper: 0.0,
            },
            limit_state: LimitState::Inactive,
            r1: Vector::zeros(),
            r2: Vector::zeros(),
            k3: Matrix3::zeros(),
            motor_mass: 0.0,
        })
    }

    /// The anchor in the first body's local frame.
    pub fn local_anchor1(&self) -> &Point {
        &self.local_anchor1
    }

    /// The anchor in the second body's local frame.
    pub fn local_anchor2(&self) -> &Point {
        &self.local_anchor2
    }

    /// The reference angle: the relative rotation treated as zero by
    /// the limits.
    pub fn reference_angle(&self) -> Real {
        self.reference_angle
    }

    /// The current hinge angle relative to the reference angle, wrapped
    /// to (−π, π].
    pub fn joint_angle(&self, bodies: &RigidBodySet) -> Option<Real> {
        let rb1 = bodies.get(self.binding.bodies()[0])?;
        let rb2 = bodies.get(self.binding.bodies()[1])?;
        Some(wrap_angle(
            rb1.rotation_angle() - rb2.rotation_angle() - self.reference_angle,
        ))
    }

    /// The accumulated point and limit impulse `(λx, λy, λz)`.
    pub fn impulse(&self) -> SpacialVector {
        self.impulse
    }

    fn pair(&self) -> (RigidBodyHandle, RigidBodyHandle) {
        (self.binding.bodies()[0], self.binding.bodies()[1])
    }
}

impl Joint for RevoluteJoint {
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
        self.k3 = Matrix3::new(
            k11, k12, k13,
            k12, k22, k23,
            k13, k23, k33,
        );
        self.motor_mass = utils::inv(k33);
        let fixed_rotation = k33 == 0.0;

        if !self.motor.enabled || fixed_rotation {
            self.motor.impulse = 0.0;
        }

        let new_state = if self.limits.enabled && !fixed_rotation {
            let angle = wrap_angle(
                rb1.position.rotation.angle() - rb2.position.rotation.angle()
                    - self.reference_angle,
            );
            if (self.limits.upper - self.limits.lower).abs() < 2.0 * params.allowed_angular_error {
                LimitState::Equal
            } else if angle <= self.limits.lower {
                LimitState::AtLower
            } else if angle >= self.limits.upper {
                LimitState::AtUpper
            } else {
                LimitState::Inactive
            }
        } else {
            LimitState::Inactive
        };
        if new_state != self.limit_state {
            // The accumulated limit impulse points the wrong way once
            // the active bound changes.
            self.impulse.z = 0.0;
        }
        self.limit_state = new_state;
        if self.limit_state == LimitState::Inactive {
            self.impulse.z = 0.0;
        }

        self.impulse *= params.dt_ratio;
        self.motor.impulse *= params.dt_ratio;
        let p = Vector::new(self.impulse.x, self.impulse.y);
        let l = self.impulse.z + self.motor.impulse;
        rb1.linvel += p * im1;
        rb1.angvel += ii1 * (r1.gcross(p) + l);
        rb2.linvel -= p * im2;
        rb2.angvel -= ii2 * (r2.gcross(p) + l);
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
        let (r1, r2) = (self.r1, self.r2);
        let fixed_rotation = ii1 + ii2 == 0.0;

        // Motor.
        if self.motor.enabled && self.limit_state != LimitState::Equal && !fixed_rotation {
            let cdot = rb1.angvel - rb2.angvel - self.motor.target_speed;
            let mut lambda = -self.motor_mass * cdot;
            if self.motor.max_enabled {
                let max_impulse = self.motor.max * params.dt;
                let old = self.motor.impulse;
                self.motor.impulse = (old + lambda).clamp(-max_impulse, max_impulse);
                lambda = self.motor.impulse - old;
            } else {
                self.motor.impulse += lambda;
            }
            rb1.angvel += ii1 * lambda;
            rb2.angvel -= ii2 * lambda;
        }

        // Limit + point, solved jointly while a bound is active.
        if self.limits.enabled && self.limit_state != LimitState::Inactive && !fixed_rotation {
            let cdot_lin =
                rb1.linvel + rb1.angvel.gcross(r1) - rb2.linvel - rb2.angvel.gcross(r2);
            let cdot_ang = rb1.angvel - rb2.angvel;
            let cdot = SpacialVector::new(cdot_lin.x, cdot_lin.y, cdot_ang);
            let mut lambda = solve33(&self.k3, &-cdot);

            match self.limit_state {
                LimitState::Equal => {}
                LimitState::AtLower => {
                    // The accumulated impulse may only push the angle up.
                    if self.impulse.z + lambda.z < 0.0 {
                        let rhs =
                            -cdot_lin + self.impulse.z * Vector::new(self.k3.m13, self.k3.m23);
                        let reduced = solve22(&self.k3, &rhs);
                        lambda.x = reduced.x;
                        lambda.y = reduced.y;
                        lambda.z = -self.impulse.z;
                    }
                }
                LimitState::AtUpper => {
                    if self.impulse.z + lambda.z > 0.0 {
                        let rhs =
                            -cdot_lin + self.impulse.z * Vector::new(self.k3.m13, self.k3.m23);
                        let reduced = solve22(&self.k3, &rhs);
                        lambda.x = reduced.x;
                        lambda.y = reduced.y;
                        lambda.z = -self.impulse.z;
                    }
                }
                LimitState::Inactive => unreachable!(),
            }

            self.impulse += lambda;
            let p = Vector::new(lambda.x, lambda.y);
            rb1.linvel += p * im1;
            rb1.angvel += ii1 * (r1.gcross(p) + lambda.z);
            rb2.linvel -= p * im2;
            rb2.angvel -= ii2 * (r2.gcross(p) + lambda.z);
        } else {
            // Point block only.
            let cdot =
                rb1.linvel + rb1.angvel.gcross(r1) - rb2.linvel - rb2.angvel.gcross(r2);
            let lambda = solve22(&self.k3, &-cdot);
            self.impulse.x += lambda.x;
            self.impulse.y += lambda.y;
            rb1.linvel += lambda * im1;
            rb1.angvel += ii1 * r1.gcross(lambda);
            rb2.linvel -= lambda * im2;
            rb2.angvel -= ii2 * r2.gcross(lambda);
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
        let fixed_rotation = ii1 + ii2 == 0.0;
        let mut angular_error = 0.0;

        // Angular limit correction first.
        if self.limits.enabled && self.limit_state != LimitState::Inactive && !fixed_rotation {
            let angle = wrap_angle(
                rb1.position.rotation.angle() - rb2.position.rotation.angle()
                    - self.reference_angle,
            );
            let inv_i = utils::inv(ii1 + ii2);
            let mut c = 0.0;

            match self.limit_state {
                LimitState::Equal => {
                    c = (angle - self.limits.lower).clamp(
                        -params.max_angular_correction,
                        params.max_angular_correction,
                    );
                    angular_error = c.abs();
                }
                LimitState::AtLower => {
                    let raw = angle - self.limits.lower;
                    angular_error = (-raw).max(0.0);
                    c = (raw + params.allowed_angular_error)
                        .clamp(-params.max_angular_correction, 0.0);
                }
                LimitState::AtUpper => {
                    let raw = angle - self.limits.upper;
                    angular_error = raw.max(0.0);
                    c = (raw - params.allowed_angular_error)
                        .clamp(0.0, params.max_angular_correction);
                }
                LimitState::Inactive => unreachable!(),
            }

            let limit_impulse = -inv_i * c;
            rb1.rotate_about_center(ii1 * limit_impulse);
            rb2.rotate_about_center(-ii2 * limit_impulse);
        }

        // Point correction with the post-limit orientations.
        let r1 = rb1.position.rotation * (self.local_anchor1 - rb1.local_com);
        let r2 = rb2.position.rotation * (self.local_anchor2 - rb2.local_com);
        let mut c = rb1.world_point(&self.local_anchor1) - rb2.world_point(&self.local_anchor2);
        let linear_error = c.norm();
        if linear_error > params.max_linear_correction {
            c *= params.max_linear_correction / linear_error;
        }

        let k11 = im1 + im2 + r1.y * r1.y * ii1 + r2.y * r2.y * ii2;
        let k12 = -r1.y * r1.x * ii1 - r2.y * r2.x * ii2;
        let k22 = im1 + im2 + r1.x * r1.x * ii1 + r2.x * r2.x * ii2;
        let det = k11 * k22 - k12 * k12;
        let p = if det != 0.0 {
            let inv_det = 1.0 / det;
            -Vector::new(
                inv_det * (k22 * c.x - k12 * c.y),
                inv_det * (k11 * c.y - k12 * c.x),
            )
        } else {
            Vector::zeros()
        };

        rb1.translate(&(p * im1));
        rb1.rotate_about_center(ii1 * r1.gcross(p));
        rb2.translate(&(-p * im2));
        rb2.rotate_about_center(-ii2 * r2.gcross(p));

        linear_error <= params.allowed_linear_error
            && angular_error <= params.allowed_angular_error
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

impl AngularLimits for RevoluteJoint {
    fn limits_enabled(&self) -> bool {
        self.limits.enabled
    }

    fn set_limits_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet) {
        if self.limits.enabled != enabled {
            self.limits.enabled = enabled;
            self.impulse.z = 0.0;
            self.binding.wake_bodies(bodies);
        }
    }

    fn lower_limit(&self) -> Real {
        self.limits.lower
    }

    fn upper_limit(&self) -> Real {
        self.limits.upper
    }

    fn set_lower_limit(
        &mut self,
        lower: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.limits.set_lower(lower)? {
            self.impulse.z = 0.0;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    fn set_upper_limit(
        &mut self,
        upper: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.limits.set_upper(upper)? {
            self.impulse.z = 0.0;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    fn set_limits(
        &mut self,
        lower: Real,
        upper: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.limits.set_both(lower, upper)? {
            self.impulse.z = 0.0;
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }
}

impl AngularMotor for RevoluteJoint {
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

    fn is_max_motor_torque_enabled(&self) -> bool {
        self.motor.max_enabled
    }

    fn set_max_motor_torque_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet) {
        if self.motor.max_enabled != enabled {
            self.motor.max_enabled = enabled;
            self.binding.wake_bodies(bodies);
        }
    }

    fn max_motor_torque(&self) -> Real {
        self.motor.max
    }

    fn set_max_motor_torque(
        &mut self,
        torque: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        if self.motor.set_max(torque)? {
            self.binding.wake_bodies(bodies);
        }
        Ok(())
    }

    fn motor_torque(&self, inv_dt: Real) -> Real {
        self.motor.impulse * inv_dt
    }
}
