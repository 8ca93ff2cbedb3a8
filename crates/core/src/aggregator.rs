//! Shapes results into storage documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::invoker::AgentRun;
use crate::simulation::{
    ConversationMessage, ConversationProperties, PersonaInfo, SimulationResult,
    SimulationStatus, TerminationReason,
};
use crate::storage::Storage;

/// The container simulated conversations are stored in by default.
pub const CONVERSATIONS_CONTAINER: &str = "conversations";

/// A simulated conversation as it is stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
///
/// The fields other than `id` and `properties` mirror
/// [`SimulationResult`].
pub struct SimulationDocument {
    /// The conversation id, unique in its container.
    pub id: String,
    /// The scenario the conversation was played for.
    pub properties: ConversationProperties,
    /// The messages in the order they were produced.
    pub history: Vec<ConversationMessage>,
    /// The terminal status.
    pub status: SimulationStatus,
    /// Why the call ended early, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<TerminationReason>,
    /// Completed representative and customer rounds.
    pub turn_count: u32,
    /// Tokens summed over `history`.
    pub total_tokens_used: u64,
    /// Wall time of the whole simulation.
    pub total_time_taken_ms: u64,
    /// When the simulation started.
    pub start_time: DateTime<Utc>,
    /// When the simulation ended.
    pub end_time: DateTime<Utc>,
    /// The representative persona that took part.
    pub representative: PersonaInfo,
    /// The customer persona that took part.
    pub customer: PersonaInfo,
}

/// Builds the document for a finished simulation.
///
/// The document takes `conversation_id` as its id when one is given and
/// not blank, otherwise a fresh UUID.
pub fn to_document(
    properties: &ConversationProperties,
    result: SimulationResult,
    conversation_id: Option<&str>,
) -> SimulationDocument {
    let id = match conversation_id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_owned(),
        _ => uuid::Uuid::new_v4().to_string(),
    };
    SimulationDocument {
        id,
        properties: properties.clone(),
        history: result.history,
        status: result.status,
        termination: result.termination,
        turn_count: result.turn_count,
        total_tokens_used: result.total_tokens_used,
        total_time_taken_ms: result.total_time_taken_ms,
        start_time: result.start_time,
        end_time: result.end_time,
        representative: result.representative,
        customer: result.customer,
    }
}

/// Upserts a simulation document and returns its id.
pub async fn store<S: Storage + ?Sized>(
    storage: &S,
    container: &str,
    document: &SimulationDocument,
) -> Result<String, StorageError> {
    let doc = serde_json::to_value(document)?;
    storage.upsert(container, doc).await?;
    debug!("stored conversation {} in {container}", document.id);
    Ok(document.id.clone())
}

/// Upserts a single-agent run and returns its id.
pub async fn store_agent_run<S: Storage + ?Sized>(
    storage: &S,
    container: &str,
    run: &AgentRun,
) -> Result<String, StorageError> {
    let doc = serde_json::to_value(run)?;
    storage.upsert(container, doc).await?;
    debug!("stored agent run {} in {container}", run.id);
    Ok(run.id.clone())
}
