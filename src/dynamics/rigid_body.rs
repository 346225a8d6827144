//! The rigid-body view consumed by joints.

use crate::math::{Isometry, Point, Real, Rotation, Vector};
use crate::utils::{self, WCross};

/// A 2D rigid body.
///
/// A zero inverse mass encodes infinite translational inertia and a
/// zero inverse inertia encodes infinite rotational inertia; both bits
/// are independent, and a body with both set is static.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RigidBody {
    pub(crate) position: Isometry,
    pub(crate) local_com: Point,
    pub(crate) linvel: Vector,
    pub(crate) angvel: Real,
    pub(crate) inv_mass: Real,
    pub(crate) inv_inertia: Real,
    pub(crate) enabled: bool,
    pub(crate) sleeping: bool,
    pub(crate) user_data: u128,
}

impl RigidBody {
    /// The world-space transform of this body.
    pub fn position(&self) -> &Isometry {
        &self.position
    }

    /// The world-space orientation angle, in radians.
    pub fn rotation_angle(&self) -> Real {
        self.position.rotation.angle()
    }

    /// Sets the world-space transform of this body.
    pub fn set_position(&mut self, position: Isometry) {
        self.position = position;
    }

    /// The center of mass, in the body's local frame.
    pub fn local_com(&self) -> &Point {
        &self.local_com
    }

    /// The center of mass, in world space.
    pub fn world_com(&self) -> Point {
        self.position * self.local_com
    }

    /// The linear velocity of the center of mass.
    pub fn linvel(&self) -> &Vector {
        &self.linvel
    }

    /// The angular velocity, in radians per second (counter-clockwise
    /// positive).
    pub fn angvel(&self) -> Real {
        self.angvel
    }

    /// Sets the linear velocity.
    pub fn set_linvel(&mut self, linvel: Vector) {
        self.linvel = linvel;
    }

    /// Sets the angular velocity.
    pub fn set_angvel(&mut self, angvel: Real) {
        self.angvel = angvel;
    }

    /// The inverse mass. Zero for a translationally static body.
    pub fn inv_mass(&self) -> Real {
        self.inv_mass
    }

    /// The inverse angular inertia. Zero for a rotationally static body.
    pub fn inv_inertia(&self) -> Real {
        self.inv_inertia
    }

    /// The mass, or zero for a translationally static body.
    pub fn mass(&self) -> Real {
        utils::inv(self.inv_mass)
    }

    /// Whether this body takes part in the simulation.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables this body.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether this body is at rest.
    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    /// Puts this body at rest.
    pub fn sleep(&mut self) {
        self.sleeping = true;
    }

    /// Clears the at-rest flag.
    pub fn wake_up(&mut self) {
        self.sleeping = false;
    }

    /// Arbitrary user data attached to this body.
    pub fn user_data(&self) -> u128 {
        self.user_data
    }

    /// Attaches arbitrary user data to this body.
    pub fn set_user_data(&mut self, data: u128) {
        self.user_data = data;
    }

    /// Converts a world-space point to this body's local frame.
    pub fn local_point(&self, world: &Point) -> Point {
        self.position.inverse_transform_point(world)
    }

    /// Converts a local-frame point to world space.
    pub fn world_point(&self, local: &Point) -> Point {
        self.position * local
    }

    /// The velocity of the material point of this body located at the
    /// given world-space position.
    pub fn velocity_at_point(&self, point: &Point) -> Vector {
        let r = point - self.world_com();
        self.linvel + self.angvel.gcross(r)
    }

    /// Translates this body by the given world-space displacement.
    ///
    /// Used by position correction; does not touch velocities.
    pub fn translate(&mut self, shift: &Vector) {
        self.position.translation.vector += shift;
    }

    /// Rotates this body about its center of mass.
    ///
    /// Used by position correction; does not touch velocities.
    pub fn rotate_about_center(&mut self, angle: Real) {
        let com = self.world_com();
        self.position.rotation = Rotation::new(angle) * self.position.rotation;
        self.position.translation.vector = com.coords - self.position.rotation * self.local_com.coords;
    }
}

/// A builder for rigid bodies.
#[derive(Clone, Debug)]
#[must_use = "the builder does nothing until `build` is called"]
pub struct RigidBodyBuilder {
    position: Isometry,
    local_com: Point,
    linvel: Vector,
    angvel: Real,
    inv_mass: Real,
    inv_inertia: Real,
    enabled: bool,
    sleeping: bool,
    user_data: u128,
}

impl RigidBodyBuilder {
    /// Starts building a dynamic body with unit mass and unit angular
    /// inertia.
    pub fn dynamic() -> Self {
        Self {
            position: Isometry::identity(),
            local_com: Point::origin(),
            linvel: Vector::zeros(),
            angvel: 0.0,
            inv_mass: 1.0,
            inv_inertia: 1.0,
            enabled: true,
            sleeping: false,
            user_data: 0,
        }
    }

    /// Starts building a static body (infinite mass and inertia).
    pub fn fixed() -> Self {
        Self {
            inv_mass: 0.0,
            inv_inertia: 0.0,
            ..Self::dynamic()
        }
    }

    /// Sets the initial world-space translation.
    pub fn translation(mut self, translation: Vector) -> Self {
        self.position.translation.vector = translation;
        self
    }

    /// Sets the initial orientation angle, in radians.
    pub fn rotation(mut self, angle: Real) -> Self {
        self.position.rotation = Rotation::new(angle);
        self
    }

    /// Sets the initial world-space transform.
    pub fn position(mut self, position: Isometry) -> Self {
        self.position = position;
        self
    }

    /// Sets the center of mass, in the body's local frame.
    pub fn local_com(mut self, local_com: Point) -> Self {
        self.local_com = local_com;
        self
    }

    /// Sets the initial linear velocity.
    pub fn linvel(mut self, linvel: Vector) -> Self {
        self.linvel = linvel;
        self
    }

    /// Sets the initial angular velocity.
    pub fn angvel(mut self, angvel: Real) -> Self {
        self.angvel = angvel;
        self
    }

    /// Sets the mass. Zero yields a translationally static body.
    pub fn mass(mut self, mass: Real) -> Self {
        self.inv_mass = crate::utils::inv(mass);
        self
    }

    /// Sets the angular inertia. Zero yields a rotationally static body.
    pub fn angular_inertia(mut self, inertia: Real) -> Self {
        self.inv_inertia = crate::utils::inv(inertia);
        self
    }

    /// Sets whether the body takes part in the simulation.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets whether the body starts at rest.
    pub fn sleeping(mut self, sleeping: bool) -> Self {
        self.sleeping = sleeping;
        self
    }

    /// Attaches arbitrary user data to the body.
    pub fn user_data(mut self, data: u128) -> Self {
        self.user_data = data;
        self
    }

    /// Builds the rigid body.
    pub fn build(self) -> RigidBody {
        RigidBody {
            position: self.position,
            local_com: self.local_com,
            linvel: self.linvel,
            angvel: self.angvel,
            inv_mass: self.inv_mass,
            inv_inertia: self.inv_inertia,
            enabled: self.enabled,
            sleeping: self.sleeping,
            user_data: self.user_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::math::PI;

    #[test]
    fn local_world_point_round_trip() {
        let body = RigidBodyBuilder::dynamic()
            .translation(Vector::new(2.0, -1.0))
            .rotation(PI / 3.0)
            .build();
        let p = Point::new(0.5, 0.25);
        let round_trip = body.local_point(&body.world_point(&p));
        assert_relative_eq!(round_trip, p, epsilon = 1.0e-12);
    }

    #[test]
    fn rotate_about_center_keeps_com_fixed() {
        let mut body = RigidBodyBuilder::dynamic()
            .translation(Vector::new(1.0, 2.0))
            .local_com(Point::new(0.3, -0.4))
            .build();
        let com_before = body.world_com();
        body.rotate_about_center(0.7);
        assert_relative_eq!(body.world_com(), com_before, epsilon = 1.0e-12);
        assert_relative_eq!(body.rotation_angle(), 0.7, epsilon = 1.0e-12);
    }

    #[test]
    fn velocity_at_point_composes_angular_part() {
        let mut body = RigidBodyBuilder::dynamic().build();
        body.set_linvel(Vector::new(1.0, 0.0));
        body.set_angvel(2.0);
        // A point one metre above the com moves left in addition to the
        // linear velocity.
        let v = body.velocity_at_point(&Point::new(0.0, 1.0));
        assert_relative_eq!(v, Vector::new(-1.0, 0.0), epsilon = 1.0e-12);
    }

    #[test]
    fn fixed_builder_zeroes_inverse_mass_and_inertia() {
        let body = RigidBodyBuilder::fixed().build();
        assert_eq!(body.inv_mass(), 0.0);
        assert_eq!(body.inv_inertia(), 0.0);
        assert_eq!(body.mass(), 0.0);
    }
}
