use serde::{Deserialize, Serialize};

/// Describes an agent persona to be registered with a model provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AgentSpec {
    /// The logical name of the agent. Providers treat it as the
    /// idempotency key: registering the same name twice should yield an
    /// equivalent handle.
    pub name: String,
    /// The system instructions the agent is bound to.
    pub instructions: String,
    /// Overrides the provider's default model if set.
    pub model: Option<String>,
}

/// A provider-issued handle to a registered agent persona.
///
/// The handle is plain data, it can be cloned and shared freely. Requests
/// carry the handle so that the provider knows which persona to sample.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentHandle {
    /// The identifier assigned by the provider.
    pub id: String,
    /// The logical name the agent was registered with.
    pub name: String,
    /// The model the agent is bound to.
    pub model: String,
    /// The system instructions the agent is bound to.
    pub instructions: String,
}
