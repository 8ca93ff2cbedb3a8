use std::time::Duration;

use thiserror::Error;

use crate::model_client::ClientError;

/// Errors raised by the registry, the invoker and the engine.
///
/// None of them are retried inside this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The agent identifier is not registered.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// The model service refused or failed to register the persona.
    #[error("failed to create persona for agent `{agent_id}`")]
    PersonaCreation {
        /// The agent whose persona could not be created.
        agent_id: String,
        /// The provider error.
        #[source]
        source: ClientError,
    },

    /// Transport or service fault while sampling a completion.
    #[error("invocation of agent `{agent_id}` failed")]
    Invocation {
        /// The agent that was invoked.
        agent_id: String,
        /// The provider error.
        #[source]
        source: ClientError,
    },

    /// The invocation deadline expired before the completion arrived.
    #[error("invocation of agent `{agent_id}` timed out after {timeout:?}")]
    Timeout {
        /// The agent that was invoked.
        agent_id: String,
        /// The deadline that expired.
        timeout: Duration,
    },

    /// The persona produced no usable text.
    #[error("agent `{agent_id}` returned an empty response")]
    EmptyResponse {
        /// The agent that answered with nothing.
        agent_id: String,
    },

    /// The request was rejected before anything ran.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Returns `true` if the error was caused by the model service rather
    /// than by the caller's input.
    pub fn is_service_fault(&self) -> bool {
        matches!(
            self,
            Error::PersonaCreation { .. }
                | Error::Invocation { .. }
                | Error::Timeout { .. }
                | Error::EmptyResponse { .. }
        )
    }
}

/// Errors raised by a [`crate::storage::Storage`] backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The document has no usable `id` field.
    #[error("document has no `id` field")]
    MissingId,

    /// No document with this id exists in the container.
    #[error("document `{0}` not found")]
    NotFound(String),

    /// The backend failed to read or write.
    #[error("storage I/O failed")]
    Io(#[from] std::io::Error),

    /// A document could not be encoded or decoded.
    #[error("document serialization failed")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure.
    #[error("storage backend failed: {0}")]
    Backend(String),
}
