pub mod actions;
pub mod component;
pub mod error;
pub mod reactive;
