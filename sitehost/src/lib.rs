//! sitehost library
//!
//! Single-host deployment engine for nginx + gunicorn web projects.

pub mod app;
pub mod console;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod locks;
pub mod logs;
pub mod models;
pub mod storage;
pub mod utils;
pub mod workers;
