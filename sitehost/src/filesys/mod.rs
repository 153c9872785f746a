//! Filesystem module

pub mod browser;
pub mod dir;
pub mod file;
pub mod sandbox;
