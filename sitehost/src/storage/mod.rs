//! Storage module

pub mod deployments;
pub mod layout;
pub mod registry;
pub mod settings;
