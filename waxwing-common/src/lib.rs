//! Shared types for the waxwing workspace
//!
//! Error taxonomy, the progress event bus, and TOML configuration loading
//! used by the identification engine and the CLI.

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
