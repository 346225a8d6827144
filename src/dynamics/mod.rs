//! Structures related to the dynamics of rigid bodies and joints.

pub mod integration_parameters;
pub mod joint;
pub mod rigid_body;
pub mod rigid_body_set;
pub mod solver;

pub use self::integration_parameters::IntegrationParameters;
pub use self::joint::{Joint, JointHandle, JointSet};
pub use self::rigid_body::{RigidBody, RigidBodyBuilder};
pub use self::rigid_body_set::{RigidBodyHandle, RigidBodySet};
pub use self::solver::IslandSolver;
