use serde::{Deserialize, Serialize};

use super::{
    ConversationMessage, ConversationProperties, SimulationStatus, SpeakerRole,
    TerminationReason,
};
use crate::conversation::{Context, ContextRole};

/// The directive that opens the representative's thread, so that its first
/// turn is a greeting rather than a reply to nothing.
pub const BEGIN_DIRECTIVE: &str = "A customer has just been connected. \
     Begin the conversation with your opening greeting.";

/// The mutable state of one simulation run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationState {
    /// Completed representative and customer rounds.
    pub turn_count: u32,
    /// `Ongoing` until the run ends.
    pub status: SimulationStatus,
    /// Set together with `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<TerminationReason>,
    /// The messages so far, in order.
    pub history: Vec<ConversationMessage>,
}

impl SimulationState {
    /// Sums the token usage over the history.
    pub fn total_tokens_used(&self) -> u64 {
        self.history.iter().filter_map(|msg| msg.tokens_used).sum()
    }

    #[inline]
    pub(crate) fn is_ongoing(&self) -> bool {
        self.status == SimulationStatus::Ongoing
    }

    pub(crate) fn complete(&mut self, reason: TerminationReason) {
        self.status = SimulationStatus::Completed;
        self.termination = Some(reason);
    }

    /// Builds the context the representative is invoked with: the begin
    /// directive, then the history with its own messages as the assistant
    /// side.
    pub(crate) fn representative_context(&self) -> Context {
        let mut context = Context::new();
        context.add_turn(ContextRole::User, BEGIN_DIRECTIVE);
        for msg in &self.history {
            let role = match msg.speaker_role {
                SpeakerRole::Representative => ContextRole::Assistant,
                SpeakerRole::Customer => ContextRole::User,
            };
            context.add_turn(role, msg.content.as_str());
        }
        context
    }

    /// Builds the context the customer is invoked with: the scenario brief,
    /// then the history with its own messages as the assistant side.
    pub(crate) fn customer_context(
        &self,
        properties: &ConversationProperties,
    ) -> Context {
        let mut context = Context::new();
        context.add_turn(ContextRole::System, properties.brief());
        for msg in &self.history {
            let role = match msg.speaker_role {
                SpeakerRole::Representative => ContextRole::User,
                SpeakerRole::Customer => ContextRole::Assistant,
            };
            context.add_turn(role, msg.content.as_str());
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use callsim_model::ModelMessage;
    use chrono::Utc;

    use super::*;

    fn message(role: SpeakerRole, content: &str, tokens: Option<u64>) -> ConversationMessage {
        ConversationMessage {
            speaker_role: role,
            content: content.to_owned(),
            tokens_used: tokens,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_contexts_mirror_roles() {
        let state = SimulationState {
            history: vec![
                message(SpeakerRole::Representative, "Hello!", Some(3)),
                message(SpeakerRole::Customer, "I was charged twice.", None),
            ],
            ..Default::default()
        };
        assert_eq!(state.total_tokens_used(), 3);

        let rep = state.representative_context();
        assert_eq!(
            rep.messages(),
            &[
                ModelMessage::User(BEGIN_DIRECTIVE.to_owned()),
                ModelMessage::Assistant("Hello!".to_owned()),
                ModelMessage::User("I was charged twice.".to_owned()),
            ]
        );

        let properties =
            ConversationProperties::new("Billing Inquiry", "Frustrated", "Duplicate charge");
        let customer = state.customer_context(&properties);
        assert_eq!(
            customer.messages(),
            &[
                ModelMessage::System(properties.brief()),
                ModelMessage::User("Hello!".to_owned()),
                ModelMessage::Assistant("I was charged twice.".to_owned()),
            ]
        );
    }
}
