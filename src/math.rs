//! Type aliases for the math primitives used by the solver.

/// The scalar type used throughout the crate.
#[cfg(feature = "f32")]
pub type Real = f32;
/// The scalar type used throughout the crate.
#[cfg(feature = "f64")]
pub type Real = f64;

/// A 2D vector.
pub type Vector = na::Vector2<Real>;
/// A 2D point.
pub type Point = na::Point2<Real>;
/// A 2D rotation (unit complex number).
pub type Rotation = na::UnitComplex<Real>;
/// A 2D rigid transformation (rotation + translation).
pub type Isometry = na::Isometry2<Real>;
/// The vector of accumulated constraint impulses: two linear components
/// and one angular component.
pub type SpacialVector = na::Vector3<Real>;

/// π in the crate's scalar precision.
pub const PI: Real = core::f64::consts::PI as Real;
/// 2π in the crate's scalar precision.
pub const TWO_PI: Real = 2.0 * PI;

/// Normalizes an angle to the interval (−π, π].
///
/// Relative-angle constraints must wrap before comparing against a
/// reference angle, otherwise a full turn registers as a huge error.
pub fn wrap_angle(mut angle: Real) -> Real {
    while angle > PI {
        angle -= TWO_PI;
    }
    while angle <= -PI {
        angle += TWO_PI;
    }
    angle
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wrap_angle_is_identity_inside_range() {
        for &a in &[0.0, 1.0, -1.0, PI, -PI + 1.0e-6] {
            assert_relative_eq!(wrap_angle(a), a);
        }
    }

    #[test]
    fn wrap_angle_removes_full_turns() {
        assert_relative_eq!(wrap_angle(PI / 4.0 + TWO_PI), PI / 4.0, epsilon = 1.0e-9);
        assert_relative_eq!(wrap_angle(-PI / 3.0 - 3.0 * TWO_PI), -PI / 3.0, epsilon = 1.0e-9);
    }

    #[test]
    fn wrap_angle_lands_in_half_open_interval() {
        // −π maps to +π: the interval is (−π, π].
        assert_relative_eq!(wrap_angle(-PI), PI);
        for i in -20..20 {
            let a = i as Real * 0.777;
            let w = wrap_angle(a);
            assert!(w > -PI && w <= PI, "{} wrapped to {}", a, w);
        }
    }
}
