//! The set owning every joint of a world.

use crate::data::{Arena, Index};
use crate::dynamics::joint::Joint;
use crate::dynamics::{RigidBodyHandle, RigidBodySet};
use crate::errors::JointError;

/// The handle of a joint stored in a [`JointSet`].
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct JointHandle(pub(crate) Index);

impl JointHandle {
    /// A handle that will never resolve to a joint.
    pub fn invalid() -> Self {
        JointHandle(Index::invalid())
    }

    /// The raw parts of this handle.
    pub fn into_raw_parts(self) -> (u32, u32) {
        self.0.into_raw_parts()
    }

    /// Rebuilds a handle from its raw parts.
    pub fn from_raw_parts(index: u32, generation: u32) -> Self {
        JointHandle(Index::from_raw_parts(index, generation))
    }
}

/// A set of joints addressed by generational handles.
///
/// Inserting validates that every bound body exists in the body set and
/// wakes the bodies; removal wakes the surviving bodies so they react
/// to the vanished constraint.
#[derive(Default)]
pub struct JointSet {
    joints: Arena<Box<dyn Joint>>,
}

impl JointSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            joints: Arena::new(),
        }
    }

    /// The number of joints in the set.
    pub fn len(&self) -> usize {
        self.joints.len()
    }

    /// Whether the set holds no joint.
    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Inserts a joint, waking its bodies.
    ///
    /// Fails with [`JointError::BodyNotInSet`] when a bound body does
    /// not resolve in `bodies`.
    pub fn insert(
        &mut self,
        joint: impl Joint,
        bodies: &mut RigidBodySet,
    ) -> Result<JointHandle, JointError> {
        self.insert_boxed(Box::new(joint), bodies)
    }

    /// Inserts an already-boxed joint (e.g. the result of
    /// [`Joint::duplicate`]), waking its bodies.
    pub fn insert_boxed(
        &mut self,
        mut joint: Box<dyn Joint>,
        bodies: &mut RigidBodySet,
    ) -> Result<JointHandle, JointError> {
        for body in joint.bodies() {
            if !bodies.contains(*body) {
                return Err(JointError::BodyNotInSet);
            }
        }
        joint.binding().wake_bodies(bodies);
        let handle = JointHandle(self.joints.insert(joint));
        self.joints.get_mut(handle.0).unwrap().binding_mut().handle = handle;
        log::debug!("inserted joint {:?}", handle);
        Ok(handle)
    }

    /// Removes a joint, optionally waking the bodies it was attached to.
    pub fn remove(
        &mut self,
        handle: JointHandle,
        bodies: &mut RigidBodySet,
        wake_up: bool,
    ) -> Option<Box<dyn Joint>> {
        let joint = self.joints.remove(handle.0)?;
        if wake_up {
            joint.binding().wake_bodies(bodies);
        }
        log::debug!("removed joint {:?}", handle);
        Some(joint)
    }

    /// Removes every joint attached to `body`, waking the partners.
    ///
    /// The world calls this before removing a body so no joint outlives
    /// a body it references.
    pub fn remove_attached_to(
        &mut self,
        body: RigidBodyHandle,
        bodies: &mut RigidBodySet,
    ) -> usize {
        let attached: Vec<JointHandle> = self
            .joints
            .iter()
            .filter(|(_, j)| j.is_member(body))
            .map(|(i, _)| JointHandle(i))
            .collect();
        for handle in &attached {
            self.remove(*handle, bodies, true);
        }
        if !attached.is_empty() {
            log::debug!(
                "removed {} joint(s) attached to removed body {:?}",
                attached.len(),
                body
            );
        }
        attached.len()
    }

    /// Whether the handle resolves to a joint of this set.
    pub fn contains(&self, handle: JointHandle) -> bool {
        self.joints.contains(handle.0)
    }

    /// Gets a reference to the joint identified by `handle`.
    pub fn get(&self, handle: JointHandle) -> Option<&dyn Joint> {
        self.joints.get(handle.0).map(|j| &**j)
    }

    /// Gets a mutable reference to the joint identified by `handle`.
    pub fn get_mut(&mut self, handle: JointHandle) -> Option<&mut (dyn Joint + 'static)> {
        self.joints.get_mut(handle.0).map(|j| &mut **j)
    }

    /// Iterates over the joints and their handles.
    pub fn iter(&self) -> impl Iterator<Item = (JointHandle, &dyn Joint)> {
        self.joints.iter().map(|(i, j)| (JointHandle(i), &**j))
    }

    /// Iterates mutably over the joints and their handles.
    pub fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (JointHandle, &mut (dyn Joint + 'static))> {
        self.joints
            .iter_mut()
            .map(|(i, j)| (JointHandle(i), &mut **j))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::joint::{RevoluteJoint, WeldJoint};
    use crate::dynamics::RigidBodyBuilder;
    use crate::math::{Point, Vector};

    fn world() -> (RigidBodySet, RigidBodyHandle, RigidBodyHandle, RigidBodyHandle) {
        let mut bodies = RigidBodySet::new();
        let a = bodies.insert(RigidBodyBuilder::dynamic().build());
        let b = bodies.insert(
            RigidBodyBuilder::dynamic()
                .translation(Vector::new(1.0, 0.0))
                .build(),
        );
        let c = bodies.insert(
            RigidBodyBuilder::dynamic()
                .translation(Vector::new(2.0, 0.0))
                .build(),
        );
        (bodies, a, b, c)
    }

    #[test]
    fn insert_stamps_the_owner_handle_and_wakes_bodies() {
        let (mut bodies, a, b, _) = world();
        bodies.get_mut(a).unwrap().sleep();
        let mut joints = JointSet::new();
        let joint = WeldJoint::new(&bodies, a, b, Point::origin()).unwrap();
        let handle = joints.insert(joint, &mut bodies).unwrap();

        assert_eq!(joints.get(handle).unwrap().handle(), handle);
        assert!(!bodies.get(a).unwrap().is_sleeping());
    }

    #[test]
    fn insert_rejects_a_dead_body_handle() {
        let (mut bodies, a, b, _) = world();
        let joint = WeldJoint::new(&bodies, a, b, Point::origin()).unwrap();
        bodies.remove(b);
        let mut joints = JointSet::new();
        assert_eq!(
            joints.insert(joint, &mut bodies).unwrap_err(),
            JointError::BodyNotInSet
        );
        assert!(joints.is_empty());
    }

    #[test]
    fn removing_a_body_cascades_to_its_joints() {
        let (mut bodies, a, b, c) = world();
        let mut joints = JointSet::new();
        let ab = joints
            .insert(
                WeldJoint::new(&bodies, a, b, Point::origin()).unwrap(),
                &mut bodies,
            )
            .unwrap();
        let bc = joints
            .insert(
                RevoluteJoint::new(&bodies, b, c, Point::new(1.5, 0.0)).unwrap(),
                &mut bodies,
            )
            .unwrap();

        bodies.get_mut(a).unwrap().sleep();
        let removed = joints.remove_attached_to(b, &mut bodies);
        bodies.remove(b);

        assert_eq!(removed, 2);
        assert!(!joints.contains(ab));
        assert!(!joints.contains(bc));
        // The surviving partner is woken by the removal.
        assert!(!bodies.get(a).unwrap().is_sleeping());
    }

    #[test]
    fn a_downcast_recovers_the_concrete_joint() {
        let (mut bodies, a, b, _) = world();
        let mut joints = JointSet::new();
        let handle = joints
            .insert(
                WeldJoint::new(&bodies, a, b, Point::origin()).unwrap(),
                &mut bodies,
            )
            .unwrap();

        let joint = joints.get(handle).unwrap();
        assert!(joint.downcast_ref::<WeldJoint>().is_some());
        assert!(joint.downcast_ref::<RevoluteJoint>().is_none());
    }

    #[test]
    fn duplicate_with_substitution_shares_a_body_copy() {
        let (mut bodies, a, b, _) = world();
        let mut joints = JointSet::new();
        let handle = joints
            .insert(
                WeldJoint::new(&bodies, a, b, Point::origin()).unwrap(),
                &mut bodies,
            )
            .unwrap();

        // Copy body `a`, then duplicate the joint onto the copy while
        // keeping `b` shared.
        let a_copy = {
            let body = bodies.get(a).unwrap().clone();
            bodies.insert(body)
        };
        let copy = joints
            .get(handle)
            .unwrap()
            .duplicate(&[Some(a_copy), None])
            .unwrap();
        let copy_handle = joints.insert_boxed(copy, &mut bodies).unwrap();

        let copied = joints.get(copy_handle).unwrap();
        assert_eq!(copied.bodies(), &[a_copy, b]);
        // The original is untouched.
        assert_eq!(joints.get(handle).unwrap().bodies(), &[a, b]);
    }
}
