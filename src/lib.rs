//! Component render caching, cache warming and reactive action dispatch.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
pub mod reactive;
