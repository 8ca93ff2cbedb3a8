//! Core logic including the agent registry, persona management, the
//! conversation simulation loop and result persistence.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod aggregator;
pub mod conversation;
mod error;
pub mod invoker;
mod model_client;
pub mod persona;
pub mod registry;
pub mod simulation;
pub mod storage;

pub use aggregator::SimulationDocument;
pub use error::{Error, StorageError};
pub use invoker::{AgentInvoker, AgentRun, Completion};
pub use model_client::{ClientError, ModelClient, TranscriptFn};
pub use persona::{AgentPersona, PersonaCache};
pub use registry::{AgentConfig, AgentRegistry};
pub use simulation::{
    ConversationMessage, ConversationProperties, SimulationEngine,
    SimulationEngineBuilder, SimulationError, SimulationResult,
    SimulationStatus, SpeakerRole, TerminationReason,
};
pub use storage::{MemoryStorage, Order, Page, Storage};
