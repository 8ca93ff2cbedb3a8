//! An abstraction layer for the language-model services that back the
//! simulated personas.
//!
//! This crate establishes an unified protocol for registering agent
//! personas with a model service and sampling completions from them, so
//! that the simulation engine can switch between providers without
//! modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod agent;
mod error;
mod provider;
mod request;
mod response;

pub use agent::*;
pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
