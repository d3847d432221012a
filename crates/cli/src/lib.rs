//! Command-line front end for the thing engine.
//!
//! Provides commands for:
//! - Running a two-tier proxy demo over the in-memory transport
//! - Inspecting the addresses a server tier would advertise

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
