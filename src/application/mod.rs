//! Application bootstrap and error surface.

pub mod context;
pub mod error;
