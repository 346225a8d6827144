//! Data structures used by the dynamics components.

pub mod arena;

pub use arena::{Arena, Index};
