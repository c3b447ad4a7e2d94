// ABOUTME: sqlrs library: pipeline orchestration for a database provisioning engine
// ABOUTME: The binary in main.rs only parses flags and wires these modules together

pub mod args;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;
pub mod paths;
pub mod pipeline;
pub mod prepare;
pub mod remote;
pub mod run;
pub mod wsl;

#[cfg(test)]
mod testing;

pub use error::CliError;
