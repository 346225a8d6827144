//! Capability contracts shared by several joints: angular limits,
//! linear/angular motors, and linear/angular springs.
//!
//! These are trait-level mixins; a concrete joint implements the subset
//! it supports and embeds the small state models defined here.

use num::{FromPrimitive, ToPrimitive};
use num_derive::{FromPrimitive, ToPrimitive};

use crate::dynamics::RigidBodySet;
use crate::errors::JointError;
use crate::math::{Real, TWO_PI};

/// Which of the two spring tuning scalars drives the other.
///
/// The discriminants are stable: a saved tag restores through either
/// `set_*_frequency` or `set_*_stiffness` to the same mode.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum SpringMode {
    /// The frequency (hertz) is authoritative; stiffness is derived as
    /// `k = µ·(2πf)²`.
    Frequency = 0,
    /// The stiffness is authoritative; frequency is derived as
    /// `f = √(k/µ)/2π`.
    Stiffness = 1,
}

impl SpringMode {
    /// The stable integer tag of this mode, suitable for persistence.
    pub fn to_tag(self) -> i32 {
        self.to_i32().unwrap_or(0)
    }

    /// Rebuilds a mode from its stable integer tag.
    pub fn from_tag(tag: i32) -> Option<Self> {
        Self::from_i32(tag)
    }
}

/// Spring/damper tuning state embedded by spring-capable joints.
///
/// Exactly one of frequency and stiffness is authoritative at any time
/// (`mode`); the other is derived lazily from the reduced mass or
/// inertia `µ` of the bound pair at read time.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct SpringModel {
    pub enabled: bool,
    pub damper_enabled: bool,
    mode: SpringMode,
    frequency: Real,
    stiffness: Real,
    pub damping_ratio: Real,
    pub max_enabled: bool,
    pub max: Real,
}

impl SpringModel {
    /// A disabled spring with placeholder tuning.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            damper_enabled: true,
            mode: SpringMode::Frequency,
            frequency: 0.0,
            stiffness: 0.0,
            damping_ratio: 1.0,
            max_enabled: false,
            max: 0.0,
        }
    }

    /// An enabled frequency-driven spring.
    pub fn from_frequency(frequency: Real, damping_ratio: Real) -> Result<Self, JointError> {
        let mut spring = Self::disabled();
        spring.set_frequency(frequency)?;
        spring.set_damping_ratio(damping_ratio)?;
        spring.enabled = true;
        Ok(spring)
    }

    pub fn mode(&self) -> SpringMode {
        self.mode
    }

    /// The frequency in hertz, deriving it from the stiffness when the
    /// stiffness is authoritative. Zero when `µ` is zero (the spring
    /// has no effect on a fully static pair).
    pub fn frequency(&self, mu: Real) -> Real {
        match self.mode {
            SpringMode::Frequency => self.frequency,
            SpringMode::Stiffness => {
                if mu > 0.0 && self.stiffness > 0.0 {
                    (self.stiffness / mu).sqrt() / TWO_PI
                } else {
                    0.0
                }
            }
        }
    }

    /// The stiffness, deriving it from the frequency when the frequency
    /// is authoritative.
    pub fn stiffness(&self, mu: Real) -> Real {
        match self.mode {
            SpringMode::Stiffness => self.stiffness,
            SpringMode::Frequency => {
                let omega = TWO_PI * self.frequency;
                mu * omega * omega
            }
        }
    }

    /// Makes the frequency authoritative. Returns whether the state
    /// changed.
    pub fn set_frequency(&mut self, frequency: Real) -> Result<bool, JointError> {
        if frequency <= 0.0 {
            return Err(JointError::NonPositiveFrequency(frequency));
        }
        let changed = self.mode != SpringMode::Frequency || self.frequency != frequency;
        self.mode = SpringMode::Frequency;
        self.frequency = frequency;
        Ok(changed)
    }

    /// Makes the stiffness authoritative. Returns whether the state
    /// changed.
    pub fn set_stiffness(&mut self, stiffness: Real) -> Result<bool, JointError> {
        if stiffness <= 0.0 {
            return Err(JointError::NonPositiveStiffness(stiffness));
        }
        let changed = self.mode != SpringMode::Stiffness || self.stiffness != stiffness;
        self.mode = SpringMode::Stiffness;
        self.stiffness = stiffness;
        Ok(changed)
    }

    pub fn set_damping_ratio(&mut self, ratio: Real) -> Result<bool, JointError> {
        if ratio <= 0.0 || ratio > 1.0 {
            return Err(JointError::InvalidDampingRatio(ratio));
        }
        let changed = self.damping_ratio != ratio;
        self.damping_ratio = ratio;
        Ok(changed)
    }

    pub fn set_max(&mut self, max: Real) -> Result<bool, JointError> {
        if max <= 0.0 {
            return Err(JointError::NonPositiveMaxForce(max));
        }
        let changed = self.max != max;
        self.max = max;
        Ok(changed)
    }

    /// The stiffness and damping coefficients `(k, d)` for the given
    /// reduced mass/inertia: `k = µω²`, `d = 2µζω` (zero when the
    /// damper is disabled).
    pub fn coefficients(&self, mu: Real) -> (Real, Real) {
        let k = self.stiffness(mu);
        let d = if self.damper_enabled && mu > 0.0 && k > 0.0 {
            2.0 * mu * self.damping_ratio * (k / mu).sqrt()
        } else {
            0.0
        };
        (k, d)
    }
}

/// Computes the constraint-softening terms of a spring constraint:
/// the constraint-impulse-mixing factor `γ = 1/(Δt·(Δt·k + d))` and the
/// error-reduction rate `Δt·k·γ` (multiply by the position error to get
/// the bias velocity). Both are zero when the denominator underflows.
pub(crate) fn soft_constraint(dt: Real, k: Real, d: Real) -> (Real, Real) {
    let raw = dt * (dt * k + d);
    if raw <= Real::EPSILON {
        (0.0, 0.0)
    } else {
        let gamma = 1.0 / raw;
        (gamma, dt * k * gamma)
    }
}

/// Lower/upper bound state embedded by limit-capable joints.
///
/// `lower <= upper` holds at all times; setters that would invert the
/// interval fail without mutating.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct LimitsModel {
    pub enabled: bool,
    pub lower: Real,
    pub upper: Real,
}

impl LimitsModel {
    pub fn new(lower: Real, upper: Real) -> Result<Self, JointError> {
        if lower > upper {
            return Err(JointError::InvalidLimitRange { lower, upper });
        }
        Ok(Self {
            enabled: false,
            lower,
            upper,
        })
    }

    /// Sets the lower bound; fails when it would exceed the current
    /// upper bound. Returns whether the state changed.
    pub fn set_lower(&mut self, lower: Real) -> Result<bool, JointError> {
        if lower > self.upper {
            return Err(JointError::InvalidLimitRange {
                lower,
                upper: self.upper,
            });
        }
        let changed = self.lower != lower;
        self.lower = lower;
        Ok(changed)
    }

    /// Sets the upper bound; fails when it would fall below the current
    /// lower bound. Returns whether the state changed.
    pub fn set_upper(&mut self, upper: Real) -> Result<bool, JointError> {
        if upper < self.lower {
            return Err(JointError::InvalidLimitRange {
                lower: self.lower,
                upper,
            });
        }
        let changed = self.upper != upper;
        self.upper = upper;
        Ok(changed)
    }

    /// Sets both bounds atomically.
    pub fn set_both(&mut self, lower: Real, upper: Real) -> Result<bool, JointError> {
        if lower > upper {
            return Err(JointError::InvalidLimitRange { lower, upper });
        }
        let changed = self.lower != lower || self.upper != upper;
        self.lower = lower;
        self.upper = upper;
        Ok(changed)
    }
}

/// The per-step activity of a limit constraint.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum LimitState {
    Inactive,
    AtLower,
    AtUpper,
    /// Both bounds coincide; the limit acts as an equality constraint.
    Equal,
}

/// Motor tuning state embedded by motor-capable joints.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct MotorModel {
    pub enabled: bool,
    pub target_speed: Real,
    pub max_enabled: bool,
    pub max: Real,
    /// Accumulated motor impulse, warm-started across steps.
    pub impulse: Real,
}

impl MotorModel {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            target_speed: 0.0,
            max_enabled: false,
            max: 0.0,
            impulse: 0.0,
        }
    }

    pub fn set_max(&mut self, max: Real) -> Result<bool, JointError> {
        if max <= 0.0 {
            return Err(JointError::NonPositiveMaxForce(max));
        }
        let changed = self.max != max;
        self.max = max;
        Ok(changed)
    }
}

/// Angular limit capability: a hinge angle confined to
/// `[lower, upper]` radians around the reference angle.
pub trait AngularLimits {
    /// Whether the limits take part in the solve.
    fn limits_enabled(&self) -> bool;
    /// Enables or disables the limits, waking the bodies on change.
    fn set_limits_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet);
    /// The lower limit, in radians.
    fn lower_limit(&self) -> Real;
    /// The upper limit, in radians.
    fn upper_limit(&self) -> Real;
    /// Sets the lower limit; fails if it would exceed the upper limit.
    fn set_lower_limit(&mut self, lower: Real, bodies: &mut RigidBodySet)
        -> Result<(), JointError>;
    /// Sets the upper limit; fails if it would fall below the lower limit.
    fn set_upper_limit(&mut self, upper: Real, bodies: &mut RigidBodySet)
        -> Result<(), JointError>;
    /// Sets both limits atomically; `lower <= upper` is enforced.
    fn set_limits(
        &mut self,
        lower: Real,
        upper: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError>;

    /// Sets both limits and enables them.
    fn set_limits_enabled_between(
        &mut self,
        lower: Real,
        upper: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError> {
        self.set_limits(lower, upper, bodies)?;
        self.set_limits_enabled(true, bodies);
        Ok(())
    }
}

/// Linear motor capability: drives the relative velocity along the
/// joint axis toward a target speed.
pub trait LinearMotor {
    /// Whether the motor takes part in the solve.
    fn is_motor_enabled(&self) -> bool;
    /// Enables or disables the motor, waking the bodies on change.
    fn set_motor_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet);
    /// The target speed, in metres per second (signed).
    fn motor_target_speed(&self) -> Real;
    /// Sets the target speed, waking the bodies on change.
    fn set_motor_target_speed(&mut self, speed: Real, bodies: &mut RigidBodySet);
    /// Whether the applied force is clamped.
    fn is_max_motor_force_enabled(&self) -> bool;
    /// Enables or disables the force clamp, waking the bodies on change.
    fn set_max_motor_force_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet);
    /// The maximum motor force, in newtons.
    fn max_motor_force(&self) -> Real;
    /// Sets the maximum motor force; must be positive.
    fn set_max_motor_force(
        &mut self,
        force: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError>;
    /// The force applied by the motor during the last step, in newtons.
    fn motor_force(&self, inv_dt: Real) -> Real;
}

/// Angular motor capability: drives the relative angular velocity
/// toward a target speed.
pub trait AngularMotor {
    /// Whether the motor takes part in the solve.
    fn is_motor_enabled(&self) -> bool;
    /// Enables or disables the motor, waking the bodies on change.
    fn set_motor_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet);
    /// The target angular speed, in radians per second (signed).
    fn motor_target_speed(&self) -> Real;
    /// Sets the target angular speed, waking the bodies on change.
    fn set_motor_target_speed(&mut self, speed: Real, bodies: &mut RigidBodySet);
    /// Whether the applied torque is clamped.
    fn is_max_motor_torque_enabled(&self) -> bool;
    /// Enables or disables the torque clamp, waking the bodies on change.
    fn set_max_motor_torque_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet);
    /// The maximum motor torque, in newton-metres.
    fn max_motor_torque(&self) -> Real;
    /// Sets the maximum motor torque; must be positive.
    fn set_max_motor_torque(
        &mut self,
        torque: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError>;
    /// The torque applied by the motor during the last step.
    fn motor_torque(&self, inv_dt: Real) -> Real;
}

/// Linear spring capability: softens a distance constraint with a
/// tunable spring/damper.
pub trait LinearSpring {
    /// Whether the spring takes part in the solve.
    fn is_spring_enabled(&self) -> bool;
    /// Enables or disables the spring, waking the bodies on change.
    fn set_spring_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet);
    /// Whether the damper takes part in the solve. Only meaningful when
    /// the spring is enabled.
    fn is_damper_enabled(&self) -> bool;
    /// Enables or disables the damper, waking the bodies on change.
    fn set_damper_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet);
    /// Which tuning scalar is authoritative.
    fn spring_mode(&self) -> SpringMode;
    /// The spring frequency in hertz, derived from the stiffness in
    /// stiffness mode.
    fn spring_frequency(&self, bodies: &RigidBodySet) -> Real;
    /// Makes the frequency authoritative; must be positive.
    fn set_spring_frequency(
        &mut self,
        frequency: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError>;
    /// The spring stiffness, derived from the frequency in frequency
    /// mode.
    fn spring_stiffness(&self, bodies: &RigidBodySet) -> Real;
    /// Makes the stiffness authoritative; must be positive.
    fn set_spring_stiffness(
        &mut self,
        stiffness: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError>;
    /// The damping ratio, in `(0, 1]`.
    fn spring_damping_ratio(&self) -> Real;
    /// Sets the damping ratio; must lie in `(0, 1]`.
    fn set_spring_damping_ratio(
        &mut self,
        ratio: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError>;
    /// Whether the spring force is clamped.
    fn is_max_spring_force_enabled(&self) -> bool;
    /// Enables or disables the force clamp, waking the bodies on change.
    fn set_max_spring_force_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet);
    /// The maximum spring force, in newtons.
    fn max_spring_force(&self) -> Real;
    /// Sets the maximum spring force; must be positive.
    fn set_max_spring_force(
        &mut self,
        force: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError>;
}

/// Angular spring capability: softens an angular constraint with a
/// tunable torsion spring/damper.
pub trait AngularSpring {
    /// Whether the spring takes part in the solve.
    fn is_spring_enabled(&self) -> bool;
    /// Enables or disables the spring, waking the bodies on change.
    fn set_spring_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet);
    /// Whether the damper takes part in the solve.
    fn is_damper_enabled(&self) -> bool;
    /// Enables or disables the damper, waking the bodies on change.
    fn set_damper_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet);
    /// Which tuning scalar is authoritative.
    fn spring_mode(&self) -> SpringMode;
    /// The spring frequency in hertz.
    fn spring_frequency(&self, bodies: &RigidBodySet) -> Real;
    /// Makes the frequency authoritative; must be positive.
    fn set_spring_frequency(
        &mut self,
        frequency: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError>;
    /// The torsion stiffness.
    fn spring_stiffness(&self, bodies: &RigidBodySet) -> Real;
    /// Makes the stiffness authoritative; must be positive.
    fn set_spring_stiffness(
        &mut self,
        stiffness: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError>;
    /// The damping ratio, in `(0, 1]`.
    fn spring_damping_ratio(&self) -> Real;
    /// Sets the damping ratio; must lie in `(0, 1]`.
    fn set_spring_damping_ratio(
        &mut self,
        ratio: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError>;
    /// Whether the spring torque is clamped.
    fn is_max_spring_torque_enabled(&self) -> bool;
    /// Enables or disables the torque clamp, waking the bodies on change.
    fn set_max_spring_torque_enabled(&mut self, enabled: bool, bodies: &mut RigidBodySet);
    /// The maximum spring torque, in newton-metres.
    fn max_spring_torque(&self) -> Real;
    /// Sets the maximum spring torque; must be positive.
    fn set_max_spring_torque(
        &mut self,
        torque: Real,
        bodies: &mut RigidBodySet,
    ) -> Result<(), JointError>;
}
