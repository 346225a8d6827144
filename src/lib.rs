/*!
tenon2d — a 2-dimensional rigid-body joint constraint solver.

A joint encodes a geometric restriction between one or two rigid bodies:
weld, revolute hinge, prismatic slider, distance spring, pulley, rope,
pin, friction, and motor joints are provided. Each simulation step the
outer world asks every joint to prepare derived quantities from the
current body state, iteratively correct velocities, and iteratively
correct positions, in a Gauss-Seidel manner with warm starting.

The crate is a library without I/O: bodies live in a [`RigidBodySet`],
joints in a [`JointSet`], and [`IslandSolver`] drives the per-step
protocol over one island.

[`RigidBodySet`]: crate::dynamics::RigidBodySet
[`JointSet`]: crate::dynamics::JointSet
[`IslandSolver`]: crate::dynamics::IslandSolver
*/
#![deny(bare_trait_objects)]
#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

#[cfg(all(feature = "f32", feature = "f64"))]
compile_error!("The `f32` and `f64` features are mutually exclusive.");

#[cfg(not(any(feature = "f32", feature = "f64")))]
compile_error!("Exactly one of the `f32` and `f64` features must be enabled.");

pub extern crate nalgebra as na;
extern crate num_traits as num;
#[cfg(feature = "serde-serialize")]
#[macro_use]
extern crate serde;

pub mod data;
pub mod dynamics;
pub mod errors;
pub mod math;
pub(crate) mod utils;

/// The most commonly used types and traits, re-exported.
pub mod prelude {
    pub use crate::dynamics::joint::{
        AngularLimits, AngularMotor, AngularSpring, DistanceJoint, FrictionJoint, Joint,
        JointHandle, JointSet, LinearMotor, LinearSpring, MotorJoint, PinJoint, PrismaticJoint,
        PulleyJoint, RevoluteJoint, RopeJoint, SpringMode, WeldJoint,
    };
    pub use crate::dynamics::{
        IntegrationParameters, IslandSolver, RigidBody, RigidBodyBuilder, RigidBodyHandle,
        RigidBodySet,
    };
    pub use crate::errors::JointError;
    pub use crate::math::{Isometry, Point, Real, Rotation, Vector};
    pub use na::{point, vector};
}
