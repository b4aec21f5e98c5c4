//! Common utilities shared by the CLI, the harness and the mock service

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
