//! Presentation layer: page templates and demo components.

pub mod components;
pub mod views;
