use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::persona::AgentPersona;
use crate::registry::{CUSTOMER_AGENT_ID, REPRESENTATIVE_AGENT_ID};

/// The scenario a simulated call is played out in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationProperties {
    /// What the customer is calling about, e.g. "Billing Inquiry".
    pub customer_intent: String,
    /// How the customer feels, e.g. "Frustrated".
    pub customer_sentiment: String,
    /// The concrete subject, e.g. "Duplicate charge".
    pub conversation_subject: String,
}

impl ConversationProperties {
    /// Creates the properties of a call.
    pub fn new(
        customer_intent: impl Into<String>,
        customer_sentiment: impl Into<String>,
        conversation_subject: impl Into<String>,
    ) -> Self {
        Self {
            customer_intent: customer_intent.into(),
            customer_sentiment: customer_sentiment.into(),
            conversation_subject: conversation_subject.into(),
        }
    }

    /// Renders the scenario as a brief for the customer persona.
    pub fn brief(&self) -> String {
        format!(
            "Scenario for this call.\n\
             Intent: {}\n\
             Sentiment: {}\n\
             Subject: {}\n\
             Reply with your next line as the customer.",
            self.customer_intent,
            self.customer_sentiment,
            self.conversation_subject,
        )
    }
}

/// The side of the call a message was spoken by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerRole {
    /// The service representative, played by agent C1.
    Representative,
    /// The customer, played by agent C2.
    Customer,
}

impl SpeakerRole {
    /// Returns the identifier of the agent that speaks for this role.
    #[inline]
    pub fn agent_id(self) -> &'static str {
        match self {
            SpeakerRole::Representative => REPRESENTATIVE_AGENT_ID,
            SpeakerRole::Customer => CUSTOMER_AGENT_ID,
        }
    }
}

/// One message of a simulated call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Who said it.
    #[serde(rename = "role")]
    pub speaker_role: SpeakerRole,
    /// The trimmed text.
    pub content: String,
    /// Tokens billed for the completion, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    /// When the message was appended.
    pub timestamp: DateTime<Utc>,
}

/// The lifecycle of a simulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    /// The call is still being played.
    #[default]
    Ongoing,
    /// A termination phrase was detected.
    Completed,
    /// The turn budget ran out before either side ended the call.
    MaxTurnsReached,
}

/// Why a simulation reached [`SimulationStatus::Completed`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The representative ended the call.
    CallEnded,
    /// The representative transferred the call to a supervisor.
    Escalated,
    /// A custom detector ended the call, with its own label.
    Custom(String),
}

/// Persona metadata attached to a result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaInfo {
    /// The logical agent.
    pub agent_id: String,
    /// The agent's display name.
    pub display_name: String,
    /// The id the model service issued for the persona.
    pub handle_id: String,
    /// The model behind the persona.
    pub model: String,
    /// The persona version that took part.
    pub version: u32,
}

impl From<&AgentPersona> for PersonaInfo {
    fn from(persona: &AgentPersona) -> Self {
        Self {
            agent_id: persona.agent_id.clone(),
            display_name: persona.display_name.clone(),
            handle_id: persona.handle.id.clone(),
            model: persona.model().to_owned(),
            version: persona.version,
        }
    }
}

/// The terminal snapshot of a simulation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// The messages in the order they were produced.
    pub history: Vec<ConversationMessage>,
    /// `Completed` or `MaxTurnsReached`.
    pub status: SimulationStatus,
    /// Why the call ended, when `status` is `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<TerminationReason>,
    /// Completed representative and customer rounds.
    pub turn_count: u32,
    /// Sum of the token usage over `history`, treating unreported usage as
    /// zero.
    pub total_tokens_used: u64,
    /// Wall time of the whole run.
    pub total_time_taken_ms: u64,
    /// When the run started.
    pub start_time: DateTime<Utc>,
    /// When the run ended.
    pub end_time: DateTime<Utc>,
    /// The representative persona.
    pub representative: PersonaInfo,
    /// The customer persona.
    pub customer: PersonaInfo,
}
