//! Joints restricting the relative motion of one or two rigid bodies.

pub mod capabilities;
pub mod distance_joint;
pub mod friction_joint;
#[allow(clippy::module_inception)]
pub mod joint;
pub mod joint_set;
pub mod motor_joint;
pub mod pin_joint;
pub mod prismatic_joint;
pub mod pulley_joint;
pub mod revolute_joint;
pub mod rope_joint;
pub mod weld_joint;

pub use self::capabilities::{
    AngularLimits, AngularMotor, AngularSpring, LinearMotor, LinearSpring, SpringMode,
};
pub use self::distance_joint::DistanceJoint;
pub use self::friction_joint::FrictionJoint;
pub use self::joint::{Joint, JointBinding};
pub use self::joint_set::{JointHandle, JointSet};
pub use self::motor_joint::MotorJoint;
pub use self::pin_joint::PinJoint;
pub use self::prismatic_joint::PrismaticJoint;
pub use self::pulley_joint::PulleyJoint;
pub use self::revolute_joint::RevoluteJoint;
pub use self::rope_joint::RopeJoint;
pub use self::weld_joint::WeldJoint;
