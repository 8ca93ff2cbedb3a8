//! Static configuration of the agents known to the system.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The identifier of the built-in service representative agent.
pub const REPRESENTATIVE_AGENT_ID: &str = "C1";
/// The identifier of the built-in customer agent.
pub const CUSTOMER_AGENT_ID: &str = "C2";

/// Configuration of one logical agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// The logical identifier, unique in a registry.
    pub agent_id: String,
    /// A human readable name.
    pub display_name: String,
    /// The system instructions the persona is bound to. Opaque to the
    /// engine.
    pub system_instructions: String,
    /// The storage container single-agent runs are saved into.
    pub storage_container: String,
    /// Example inputs, shown to users of the single-agent surface.
    #[serde(default)]
    pub sample_inputs: Vec<String>,
    /// Overrides the provider's default model if set.
    #[serde(default)]
    pub model: Option<String>,
}

/// A lookup table from agent identifier to [`AgentConfig`].
///
/// The registry is immutable once it is shared; build it up front with
/// [`AgentRegistry::with_agent`].
#[derive(Clone, Debug, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentConfig>,
}

impl AgentRegistry {
    /// Creates a registry holding the built-in representative and
    /// customer agents.
    pub fn builtin() -> Self {
        Self::default()
            .with_agent(AgentConfig {
                agent_id: REPRESENTATIVE_AGENT_ID.to_owned(),
                display_name: "Service Representative".to_owned(),
                system_instructions: include_str!(
                    "../prompts/representative.md"
                )
                .to_owned(),
                storage_container: "representative_runs".to_owned(),
                sample_inputs: vec![
                    "Hi, I was charged twice for my last bill.".to_owned(),
                    "I'd like to cancel my subscription.".to_owned(),
                ],
                model: None,
            })
            .with_agent(AgentConfig {
                agent_id: CUSTOMER_AGENT_ID.to_owned(),
                display_name: "Customer".to_owned(),
                system_instructions: include_str!("../prompts/customer.md")
                    .to_owned(),
                storage_container: "customer_runs".to_owned(),
                sample_inputs: vec![
                    "Thank you for calling, how can I help you today?"
                        .to_owned(),
                ],
                model: None,
            })
    }

    /// Adds an agent, replacing any existing one with the same id.
    #[inline]
    pub fn with_agent(mut self, config: AgentConfig) -> Self {
        self.agents.insert(config.agent_id.clone(), config);
        self
    }

    /// Looks up an agent by its identifier.
    pub fn get(&self, agent_id: &str) -> Result<&AgentConfig, Error> {
        self.agents
            .get(agent_id)
            .ok_or_else(|| Error::UnknownAgent(agent_id.to_owned()))
    }

    /// Iterates over all agents, ordered by identifier.
    #[inline]
    pub fn agents(&self) -> impl Iterator<Item = &AgentConfig> {
        self.agents.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_agents() {
        let registry = AgentRegistry::builtin();
        let rep = registry.get(REPRESENTATIVE_AGENT_ID).unwrap();
        assert!(
            rep.system_instructions
                .contains("I will end this call now.")
        );
        let customer = registry.get(CUSTOMER_AGENT_ID).unwrap();
        assert_ne!(rep.storage_container, customer.storage_container);

        let ids: Vec<_> =
            registry.agents().map(|a| a.agent_id.as_str()).collect();
        assert_eq!(ids, ["C1", "C2"]);
    }

    #[test]
    fn test_unknown_agent() {
        let registry = AgentRegistry::builtin();
        let err = registry.get("c1").unwrap_err();
        assert!(matches!(err, Error::UnknownAgent(id) if id == "c1"));
    }

    #[test]
    fn test_override() {
        let mut rep = AgentRegistry::builtin()
            .get(REPRESENTATIVE_AGENT_ID)
            .unwrap()
            .clone();
        rep.system_instructions = "Be terse.".to_owned();
        let registry = AgentRegistry::builtin().with_agent(rep);
        assert_eq!(
            registry
                .get(REPRESENTATIVE_AGENT_ID)
                .unwrap()
                .system_instructions,
            "Be terse."
        );
        assert_eq!(registry.agents().count(), 2);
    }
}
