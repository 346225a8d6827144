//! Errors reported by joint construction and setters.

use crate::math::Real;

/// Failure modes of joint construction and parameter setters.
///
/// Setters validate before assigning: when an error is returned, the
/// joint state is unchanged. Numerical pathologies during solving
/// (near-singular effective mass, CIM underflow) are not errors; the
/// solver falls back gracefully instead.
#[derive(thiserror::Error, Copy, Clone, Debug, PartialEq)]
pub enum JointError {
    /// A two-body joint was given the same body for both attachment slots.
    #[error("both attachment slots refer to the same rigid-body")]
    SameBody,
    /// A body index outside `[0, body_count)` was queried.
    #[error("invalid body index {index} (this joint binds {count} bodies)")]
    InvalidBodyIndex {
        /// The out-of-range index.
        index: usize,
        /// The number of bodies bound by the joint.
        count: usize,
    },
    /// A handle passed to the joint does not resolve to a body in the set.
    #[error("the rigid-body handle does not resolve to a body in this set")]
    BodyNotInSet,
    /// A limit setter would leave `lower > upper`.
    #[error("invalid limit range: lower {lower} is greater than upper {upper}")]
    InvalidLimitRange {
        /// The offending lower bound.
        lower: Real,
        /// The offending upper bound.
        upper: Real,
    },
    /// A spring frequency must be strictly positive (in hertz).
    #[error("spring frequency must be positive, got {0}")]
    NonPositiveFrequency(Real),
    /// A spring stiffness must be strictly positive.
    #[error("spring stiffness must be positive, got {0}")]
    NonPositiveStiffness(Real),
    /// A damping ratio outside the permitted interval.
    #[error("damping ratio must lie in (0, 1], got {0}")]
    InvalidDampingRatio(Real),
    /// A maximum force or torque must be strictly positive.
    #[error("maximum force/torque must be positive, got {0}")]
    NonPositiveMaxForce(Real),
    /// A joint axis must be a non-zero vector.
    #[error("the joint axis must be a non-zero vector")]
    ZeroAxis,
    /// A pulley ratio must be strictly positive.
    #[error("pulley ratio must be positive, got {0}")]
    NonPositiveRatio(Real),
    /// A correction factor outside `[0, 1]`.
    #[error("correction factor must lie in [0, 1], got {0}")]
    InvalidCorrectionFactor(Real),
    /// A distance limit cannot be negative.
    #[error("distance limit must be non-negative, got {0}")]
    NegativeDistance(Real),
}
