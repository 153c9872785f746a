//! Deployment module

pub mod fsm;
pub mod git;
pub mod pipeline;
pub mod privilege;
pub mod publish;
pub mod render;
pub mod runner;
pub mod teardown;
