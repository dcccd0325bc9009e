//! `minimap_shared`
//!
//! Libraries shared by the broadcaster and its tests.
//!
//! Design goals:
//! - Pure, deterministic building blocks (coordinate mapping, styles, wire
//!   codec) that can be tested without a network.
//! - A small scene store standing in for the host simulation.
//! - No `unsafe`.

pub mod config;
pub mod coords;
pub mod ecs;
pub mod error;
pub mod math;
pub mod style;
pub mod wire;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::coords::*;
    pub use crate::ecs::*;
    pub use crate::error::*;
    pub use crate::math::*;
    pub use crate::style::*;
    pub use crate::wire::*;
}
