//! Parameters controlling one step of the constraint solver.

use crate::math::Real;

/// Parameters for one step of the joint solver.
///
/// The outer world owns the stepping loop and hands these to every
/// joint; in particular it supplies `dt_ratio`, the ratio between the
/// current and the previous timestep, used to rescale warm-start
/// impulses. Joints never track time on their own.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IntegrationParameters {
    /// The timestep length (default: `1.0 / 60.0`).
    pub dt: Real,
    /// The ratio `dt / dt_prev` between this step and the previous one
    /// (default: `1.0`).
    pub dt_ratio: Real,
    /// Number of velocity-correction iterations per step (default: `8`).
    pub velocity_iterations: usize,
    /// Maximum number of position-correction iterations per step
    /// (default: `3`). The position loop exits early once every joint
    /// reports convergence.
    pub position_iterations: usize,
    /// Residual linear drift below which a positional constraint counts
    /// as satisfied, in metres (default: `0.005`).
    pub allowed_linear_error: Real,
    /// Residual angular drift below which an angular constraint counts
    /// as satisfied, in radians (default: 2°).
    pub allowed_angular_error: Real,
    /// Largest linear position correction applied in one iteration, in
    /// metres (default: `0.2`).
    pub max_linear_correction: Real,
    /// Largest angular position correction applied in one iteration, in
    /// radians (default: 8°).
    pub max_angular_correction: Real,
}

impl IntegrationParameters {
    /// The inverse of the timestep, or zero if the timestep is zero.
    pub fn inv_dt(&self) -> Real {
        if self.dt == 0.0 {
            0.0
        } else {
            1.0 / self.dt
        }
    }
}

impl Default for IntegrationParameters {
    fn default() -> Self {
        Self {
            dt: 1.0 / 60.0,
            dt_ratio: 1.0,
            velocity_iterations: 8,
            position_iterations: 3,
            allowed_linear_error: 0.005,
            allowed_angular_error: 2.0f64.to_radians() as Real,
            max_linear_correction: 0.2,
            max_angular_correction: 8.0f64.to_radians() as Real,
        }
    }
}
