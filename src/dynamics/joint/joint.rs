//! The joint protocol and the state shared by every joint.

use arrayvec::ArrayVec;
use downcast_rs::{impl_downcast, Downcast};

use super::joint_set::JointHandle;
use crate::dynamics::{IntegrationParameters, RigidBodyHandle, RigidBodySet};
use crate::errors::JointError;
use crate::math::{Real, Vector};
use crate::utils;

/// The state common to every joint: the bound bodies, the
/// collision-allowed flag, opaque user data, and the owner handle.
///
/// A joint binds one or two bodies; the bodies of a pair are always
/// distinct objects.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct JointBinding {
    bodies: ArrayVec<RigidBodyHandle, 2>,
    collision_allowed: bool,
    user_data: u128,
    pub(crate) handle: JointHandle,
}

impl JointBinding {
    /// Binds two distinct bodies. Fails with [`JointError::SameBody`]
    /// when both handles name the same body.
    pub fn pair(body1: RigidBodyHandle, body2: RigidBodyHandle) -> Result<Self, JointError> {
        if body1 == body2 {
            return Err(JointError::SameBody);
        }
        let mut bodies = ArrayVec::new();
        bodies.push(body1);
        bodies.push(body2);
        Ok(Self {
            bodies,
            collision_allowed: false,
            user_data: 0,
            handle: JointHandle::invalid(),
        })
    }

    /// Binds a single body (pin-style joints).
    pub fn solo(body: RigidBodyHandle) -> Self {
        let mut bodies = ArrayVec::new();
        bodies.push(body);
        Self {
            bodies,
            collision_allowed: false,
            user_data: 0,
            handle: JointHandle::invalid(),
        }
    }

    /// The bound bodies, in binding order.
    pub fn bodies(&self) -> &[RigidBodyHandle] {
        &self.bodies
    }

    /// The number of bound bodies (1 or 2).
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// The body at the given binding slot.
    pub fn body(&self, i: usize) -> Result<RigidBodyHandle, JointError> {
        self.bodies
            .get(i)
            .copied()
            .ok_or(JointError::InvalidBodyIndex {
                index: i,
                count: self.bodies.len(),
            })
    }

    /// Whether the given body is bound by this joint.
    pub fn is_member(&self, body: RigidBodyHandle) -> bool {
        self.bodies.contains(&body)
    }

    /// The partner of `body` in a two-body binding, or `None` when
    /// `body` is not a member or the binding is single-body.
    pub fn other_body(&self, body: RigidBodyHandle) -> Option<RigidBodyHandle> {
        if self.bodies.len() != 2 {
            return None;
        }
        if self.bodies[0] == body {
            Some(self.bodies[1])
        } else if self.bodies[1] == body {
            Some(self.bodies[0])
        } else {
            None
        }
    }

    /// Whether every bound body exists and is enabled.
    pub fn is_enabled(&self, bodies: &RigidBodySet) -> bool {
        self.bodies
            .iter()
            .all(|h| bodies.get(*h).map(|rb| rb.is_enabled()).unwrap_or(false))
    }

    /// Whether the bound bodies may collide with each other.
    pub fn is_collision_allowed(&self) -> bool {
        self.collision_allowed
    }

    /// Allows or forbids collisions between the bound bodies, waking
    /// them on an actual change.
    pub fn set_collision_allowed(&mut self, allowed: bool, bodies: &mut RigidBodySet) {
        if self.collision_allowed != allowed {
            self.collision_allowed = allowed;
            self.wake_bodies(bodies);
        }
    }

    /// Arbitrary user data attached to this joint.
    pub fn user_data(&self) -> u128 {
        self.user_data
    }

    /// Attaches arbitrary user data to this joint.
    pub fn set_user_data(&mut self, data: u128) {
        self.user_data = data;
    }

    /// The handle of this joint inside its [`JointSet`], or an invalid
    /// handle if it was never inserted.
    ///
    /// [`JointSet`]: crate::dynamics::JointSet
    pub fn handle(&self) -> JointHandle {
        self.handle
    }

    /// Clears the at-rest flag of every bound body.
    pub fn wake_bodies(&self, bodies: &mut RigidBodySet) {
        for h in &self.bodies {
            bodies.wake_up(*h);
        }
    }

    /// The reduced mass of the bound pair: `m₁m₂/(m₁+m₂)` when both are
    /// finite, the finite mass when only one is, zero when none is.
    pub fn reduced_mass(&self, bodies: &RigidBodySet) -> Real {
        let inv_sum: Real = self
            .bodies
            .iter()
            .filter_map(|h| bodies.get(*h))
            .map(|rb| rb.inv_mass())
            .sum();
        utils::inv(inv_sum)
    }

    /// The reduced angular inertia of the bound pair, with the same
    /// structure as [`Self::reduced_mass`].
    pub fn reduced_inertia(&self, bodies: &RigidBodySet) -> Real {
        let inv_sum: Real = self
            .bodies
            .iter()
            .filter_map(|h| bodies.get(*h))
            .map(|rb| rb.inv_inertia())
            .sum();
        utils::inv(inv_sum)
    }

    /// Splices substitute bodies into the binding slots; `None` keeps
    /// the original body. The same-body guard re-applies.
    pub(crate) fn substitute(
        &mut self,
        substitutes: &[Option<RigidBodyHandle>],
    ) -> Result<(), JointError> {
        let mut bodies = self.bodies.clone();
        for (slot, sub) in bodies.iter_mut().zip(substitutes.iter()) {
            if let Some(handle) = sub {
                *slot = *handle;
            }
        }
        if bodies.len() == 2 && bodies[0] == bodies[1] {
            return Err(JointError::SameBody);
        }
        self.bodies = bodies;
        self.handle = JointHandle::invalid();
        Ok(())
    }
}

/// The protocol every joint exposes to the outer world.
///
/// A step runs `initialize_constraints` once, then several velocity
/// iterations, then position iterations until every joint reports
/// convergence (or the iteration cap is reached). Implementations keep
/// their accumulated impulse across steps for warm starting; the
/// initialization scales it by the step's `dt_ratio` before applying
/// it.
pub trait Joint: Downcast {
    /// The shared joint state.
    fn binding(&self) -> &JointBinding;

    /// The shared joint state, mutably.
    fn binding_mut(&mut self) -> &mut JointBinding;

    /// Computes the per-step derived quantities (effective mass, bias,
    /// constraint softening) and applies the warm-start impulse.
    fn initialize_constraints(
        &mut self,
        params: &IntegrationParameters,
        bodies: &mut RigidBodySet,
    );

    /// Runs one velocity-correction iteration.
    fn solve_velocity_constraints(
        &mut self,
        params: &IntegrationParameters,
        bodies: &mut RigidBodySet,
    );

    /// Runs one position-correction iteration. Returns `true` when the
    /// residual drift is within the tolerances of `params`.
    fn solve_position_constraints(
        &mut self,
        params: &IntegrationParameters,
        bodies: &mut RigidBodySet,
    ) -> bool;

    /// The constraint reaction force, in newtons, reconstructed from
    /// the accumulated impulse.
    fn reaction_force(&self, inv_dt: Real) -> Vector;

    /// The constraint reaction torque, in newton-metres, reconstructed
    /// from the accumulated impulse.
    fn reaction_torque(&self, inv_dt: Real) -> Real;

    /// Deep-copies this joint, splicing the provided substitute bodies
    /// into the binding slots (`None` keeps the original body).
    ///
    /// This lets a caller copy two joints that share a body while
    /// sharing a single copy of that body between them. The accumulated
    /// impulse is preserved; the copy is not owned by any set.
    fn duplicate(
        &self,
        substitutes: &[Option<RigidBodyHandle>],
    ) -> Result<Box<dyn Joint>, JointError>;

    /// Offsets every world-frame anchor stored by this joint. Joints
    /// storing anchors in body-local frames do nothing.
    fn shift_origin(&mut self, _shift: &Vector) {}

    /// The bound bodies, in binding order.
    fn bodies(&self) -> &[RigidBodyHandle] {
        self.binding().bodies()
    }

    /// The number of bound bodies (1 or 2).
    fn body_count(&self) -> usize {
        self.binding().body_count()
    }

    /// The body at the given binding slot.
    fn body(&self, i: usize) -> Result<RigidBodyHandle, JointError> {
        self.binding().body(i)
    }

    /// Whether the given body is bound by this joint.
    fn is_member(&self, body: RigidBodyHandle) -> bool {
        self.binding().is_member(body)
    }

    /// The partner of `body` in a two-body joint.
    fn other_body(&self, body: RigidBodyHandle) -> Option<RigidBodyHandle> {
        self.binding().other_body(body)
    }

    /// Whether every bound body exists and is enabled. A joint with a
    /// disabled (or removed) body contributes nothing to the step.
    fn is_enabled(&self, bodies: &RigidBodySet) -> bool {
        self.binding().is_enabled(bodies)
    }

    /// Whether the bound bodies may collide with each other.
    fn is_collision_allowed(&self) -> bool {
        self.binding().is_collision_allowed()
    }

    /// Allows or forbids collisions between the bound bodies, waking
    /// them on an actual change.
    fn set_collision_allowed(&mut self, allowed: bool, bodies: &mut RigidBodySet) {
        self.binding_mut().set_collision_allowed(allowed, bodies);
    }

    /// The handle of this joint inside its set.
    fn handle(&self) -> JointHandle {
        self.binding().handle()
    }
}

impl_downcast!(Joint);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::RigidBodyBuilder;

    fn three_bodies() -> (RigidBodySet, RigidBodyHandle, RigidBodyHandle, RigidBodyHandle) {
        let mut bodies = RigidBodySet::new();
        let a = bodies.insert(RigidBodyBuilder::dynamic().mass(2.0).angular_inertia(4.0).build());
        let b = bodies.insert(RigidBodyBuilder::dynamic().mass(6.0).angular_inertia(12.0).build());
        let c = bodies.insert(RigidBodyBuilder::fixed().build());
        (bodies, a, b, c)
    }

    #[test]
    fn pair_rejects_same_body() {
        let (_, a, _, _) = three_bodies();
        assert_eq!(JointBinding::pair(a, a).unwrap_err(), JointError::SameBody);
    }

    #[test]
    fn other_body_returns_the_partner_or_none() {
        let (_, a, b, c) = three_bodies();
        let binding = JointBinding::pair(a, b).unwrap();
        assert_eq!(binding.other_body(a), Some(b));
        assert_eq!(binding.other_body(b), Some(a));
        assert_eq!(binding.other_body(c), None);

        let solo = JointBinding::solo(a);
        assert_eq!(solo.other_body(a), None);
    }

    #[test]
    fn body_index_out_of_range_fails() {
        let (_, a, b, _) = three_bodies();
        let binding = JointBinding::pair(a, b).unwrap();
        assert_eq!(binding.body(0), Ok(a));
        assert_eq!(binding.body(1), Ok(b));
        assert_eq!(
            binding.body(2),
            Err(JointError::InvalidBodyIndex { index: 2, count: 2 })
        );
    }

    #[test]
    fn reduced_mass_of_two_finite_bodies() {
        let (bodies, a, b, _) = three_bodies();
        let binding = JointBinding::pair(a, b).unwrap();
        // 2·6/(2+6) = 1.5 and 4·12/(4+12) = 3.
        approx::assert_relative_eq!(binding.reduced_mass(&bodies), 1.5);
        approx::assert_relative_eq!(binding.reduced_inertia(&bodies), 3.0);
    }

    #[test]
    fn reduced_mass_with_a_static_partner_is_the_finite_mass() {
        let (bodies, a, _, c) = three_bodies();
        let binding = JointBinding::pair(a, c).unwrap();
        approx::assert_relative_eq!(binding.reduced_mass(&bodies), 2.0);
        approx::assert_relative_eq!(binding.reduced_inertia(&bodies), 4.0);
    }

    #[test]
    fn reduced_mass_of_two_static_bodies_is_zero() {
        let mut bodies = RigidBodySet::new();
        let a = bodies.insert(RigidBodyBuilder::fixed().build());
        let b = bodies.insert(RigidBodyBuilder::fixed().build());
        let binding = JointBinding::pair(a, b).unwrap();
        assert_eq!(binding.reduced_mass(&bodies), 0.0);
        assert_eq!(binding.reduced_inertia(&bodies), 0.0);
    }

    #[test]
    fn collision_allowed_wakes_only_on_change() {
        let (mut bodies, a, b, _) = three_bodies();
        let mut binding = JointBinding::pair(a, b).unwrap();

        bodies.get_mut(a).unwrap().sleep();
        bodies.get_mut(b).unwrap().sleep();
        // Setting the flag to its current value must not wake anything.
        binding.set_collision_allowed(false, &mut bodies);
        assert!(bodies.get(a).unwrap().is_sleeping());
        assert!(bodies.get(b).unwrap().is_sleeping());

        binding.set_collision_allowed(true, &mut bodies);
        assert!(!bodies.get(a).unwrap().is_sleeping());
        assert!(!bodies.get(b).unwrap().is_sleeping());
    }

    #[test]
    fn is_enabled_requires_every_body_enabled() {
        let (mut bodies, a, b, _) = three_bodies();
        let binding = JointBinding::pair(a, b).unwrap();
        assert!(binding.is_enabled(&bodies));
        bodies.get_mut(b).unwrap().set_enabled(false);
        assert!(!binding.is_enabled(&bodies));
        bodies.get_mut(b).unwrap().set_enabled(true);
        assert!(binding.is_enabled(&bodies));
    }

    #[test]
    fn substitute_rejects_an_aliasing_splice() {
        let (_, a, b, _) = three_bodies();
        let mut binding = JointBinding::pair(a, b).unwrap();
        assert_eq!(
            binding.substitute(&[Some(b), None]).unwrap_err(),
            JointError::SameBody
        );
        // Failure leaves the binding untouched.
        assert_eq!(binding.bodies(), &[a, b]);
    }
}
