//! The set owning every rigid body of a world.

use crate::data::{Arena, Index};
use crate::dynamics::RigidBody;

/// The handle of a rigid body stored in a [`RigidBodySet`].
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct RigidBodyHandle(pub(crate) Index);

impl RigidBodyHandle {
    /// A handle that will never resolve to a body.
    pub fn invalid() -> Self {
        RigidBodyHandle(Index::invalid())
    }

    /// The raw parts of this handle.
    pub fn into_raw_parts(self) -> (u32, u32) {
        self.0.into_raw_parts()
    }

    /// Rebuilds a handle from its raw parts.
    pub fn from_raw_parts(index: u32, generation: u32) -> Self {
        RigidBodyHandle(Index::from_raw_parts(index, generation))
    }
}

/// A set of rigid bodies addressed by generational handles.
///
/// Joints never store references to bodies; they store handles into
/// this set, and handles of removed bodies resolve to nothing.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default)]
pub struct RigidBodySet {
    bodies: Arena<RigidBody>,
}

impl RigidBodySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            bodies: Arena::new(),
        }
    }

    /// The number of bodies in the set.
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Whether the set holds no body.
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Inserts a body and returns its handle.
    pub fn insert(&mut self, body: RigidBody) -> RigidBodyHandle {
        RigidBodyHandle(self.bodies.insert(body))
    }

    /// Removes a body from the set.
    ///
    /// The world is responsible for first removing every joint attached
    /// to it (see [`JointSet::remove_attached_to`]).
    ///
    /// [`JointSet::remove_attached_to`]: crate::dynamics::JointSet::remove_attached_to
    pub fn remove(&mut self, handle: RigidBodyHandle) -> Option<RigidBody> {
        self.bodies.remove(handle.0)
    }

    /// Whether the handle resolves to a body of this set.
    pub fn contains(&self, handle: RigidBodyHandle) -> bool {
        self.bodies.contains(handle.0)
    }

    /// Gets a reference to the body identified by `handle`.
    pub fn get(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle.0)
    }

    /// Gets a mutable reference to the body identified by `handle`.
    pub fn get_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut RigidBody> {
        self.bodies.get_mut(handle.0)
    }

    /// Gets mutable references to two distinct bodies at once.
    ///
    /// Panics if both handles point at the same body.
    pub fn get_pair_mut(
        &mut self,
        h1: RigidBodyHandle,
        h2: RigidBodyHandle,
    ) -> (Option<&mut RigidBody>, Option<&mut RigidBody>) {
        self.bodies.get2_mut(h1.0, h2.0)
    }

    /// Iterates over the bodies and their handles.
    pub fn iter(&self) -> impl Iterator<Item = (RigidBodyHandle, &RigidBody)> {
        self.bodies.iter().map(|(i, rb)| (RigidBodyHandle(i), rb))
    }

    /// Iterates mutably over the bodies and their handles.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (RigidBodyHandle, &mut RigidBody)> {
        self.bodies
            .iter_mut()
            .map(|(i, rb)| (RigidBodyHandle(i), rb))
    }

    /// Clears the at-rest flag of the body identified by `handle`.
    pub fn wake_up(&mut self, handle: RigidBodyHandle) {
        if let Some(rb) = self.bodies.get_mut(handle.0) {
            rb.wake_up();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::RigidBodyBuilder;

    #[test]
    fn removed_handle_stops_resolving() {
        let mut bodies = RigidBodySet::new();
        let h = bodies.insert(RigidBodyBuilder::dynamic().build());
        assert!(bodies.contains(h));
        bodies.remove(h);
        assert!(!bodies.contains(h));
        assert!(bodies.get(h).is_none());
    }

    #[test]
    fn get_pair_mut_yields_distinct_bodies() {
        let mut bodies = RigidBodySet::new();
        let h1 = bodies.insert(RigidBodyBuilder::dynamic().build());
        let h2 = bodies.insert(RigidBodyBuilder::fixed().build());
        let (rb1, rb2) = bodies.get_pair_mut(h1, h2);
        assert_eq!(rb1.unwrap().inv_mass(), 1.0);
        assert_eq!(rb2.unwrap().inv_mass(), 0.0);
    }

    #[test]
    fn wake_up_clears_the_at_rest_flag() {
        let mut bodies = RigidBodySet::new();
        let h = bodies.insert(RigidBodyBuilder::dynamic().sleeping(true).build());
        assert!(bodies.get(h).unwrap().is_sleeping());
        bodies.wake_up(h);
        assert!(!bodies.get(h).unwrap().is_sleeping());
    }
}
