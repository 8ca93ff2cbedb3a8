//! Simulated customer service calls between two language model personas.
//!
//! This crate wires the core simulation engine to an OpenAI-compatible
//! model service and to file storage, and hosts the `callsim` binary.

#[macro_use]
extern crate tracing;

pub mod config;
mod file_storage;
mod simulator;

pub use config::{Config, ConfigError};
pub use file_storage::JsonFileStorage;
pub use simulator::*;
