//! The conversation simulation loop.

mod builder;
mod state;
mod termination;
mod types;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::Instrument;

use crate::error::Error;
use crate::invoker::{AgentInvoker, Completion};
use crate::persona::AgentPersona;
pub use builder::SimulationEngineBuilder;
pub use state::{BEGIN_DIRECTIVE, SimulationState};
pub use termination::*;
pub use types::*;

/// A callback receiving each message appended to the history.
pub type MessageFn = Arc<dyn Fn(&ConversationMessage) + Send + Sync>;

/// A failed simulation.
#[derive(Debug, thiserror::Error)]
#[error("simulation failed during turn {turn}")]
pub struct SimulationError {
    /// The 1-based round that was being played.
    pub turn: u32,
    /// What went wrong.
    #[source]
    pub source: Error,
    /// The state before the failure, if the engine was asked to keep it.
    pub partial: Option<SimulationState>,
}

/// Plays simulated calls between the representative and the customer.
///
/// Each run owns its state exclusively. The engine itself is cheap to
/// clone and can drive any number of runs concurrently, sharing personas
/// through its invoker.
#[derive(Clone)]
pub struct SimulationEngine {
    invoker: AgentInvoker,
    detector: Arc<dyn TerminationDetector>,
    on_message: Option<MessageFn>,
    keep_partial_on_error: bool,
}

impl SimulationEngine {
    /// Creates an engine with the default options.
    #[inline]
    pub fn new(invoker: AgentInvoker) -> Self {
        SimulationEngineBuilder::with_invoker(invoker).build()
    }

    fn from_builder(builder: SimulationEngineBuilder) -> Self {
        let SimulationEngineBuilder {
            invoker,
            detector,
            on_message,
            keep_partial_on_error,
        } = builder;
        Self {
            invoker,
            detector,
            on_message,
            keep_partial_on_error,
        }
    }

    /// Returns the invoker the engine samples personas with.
    #[inline]
    pub fn invoker(&self) -> &AgentInvoker {
        &self.invoker
    }

    /// Plays one call until a termination phrase is detected or
    /// `max_turns` rounds have completed.
    ///
    /// `max_turns` is not validated here. A budget of zero returns right
    /// away with [`SimulationStatus::MaxTurnsReached`] and an empty
    /// history.
    pub async fn run(
        &self,
        properties: &ConversationProperties,
        max_turns: u32,
    ) -> Result<SimulationResult, SimulationError> {
        let span = info_span!(
            "simulation",
            intent = %properties.customer_intent,
            max_turns,
        );
        self.run_inner(properties, max_turns).instrument(span).await
    }

    async fn run_inner(
        &self,
        properties: &ConversationProperties,
        max_turns: u32,
    ) -> Result<SimulationResult, SimulationError> {
        let start_time = Utc::now();
        let started = Instant::now();
        let mut state = SimulationState::default();

        let personas = async {
            let representative = self
                .invoker
                .ensure_persona(SpeakerRole::Representative.agent_id())
                .await?;
            let customer = self
                .invoker
                .ensure_persona(SpeakerRole::Customer.agent_id())
                .await?;
            Ok::<_, Error>((representative, customer))
        };
        let (representative, customer) = match personas.await {
            Ok(personas) => personas,
            Err(source) => return Err(self.fail(1, state, source)),
        };

        while state.is_ongoing() {
            if state.turn_count >= max_turns {
                state.status = SimulationStatus::MaxTurnsReached;
                break;
            }

            let turn = state.turn_count + 1;
            let round = self
                .play_round(&mut state, properties, &representative, &customer)
                .instrument(debug_span!("turn", turn));
            if let Err(source) = round.await {
                return Err(self.fail(turn, state, source));
            }
        }

        info!(
            "simulation ended after {} turns: {:?}",
            state.turn_count, state.status
        );
        let total_tokens_used = state.total_tokens_used();
        Ok(SimulationResult {
            history: state.history,
            status: state.status,
            termination: state.termination,
            turn_count: state.turn_count,
            total_tokens_used,
            total_time_taken_ms: started.elapsed().as_millis() as u64,
            start_time,
            end_time: Utc::now(),
            representative: representative.as_ref().into(),
            customer: customer.as_ref().into(),
        })
    }

    async fn play_round(
        &self,
        state: &mut SimulationState,
        properties: &ConversationProperties,
        representative: &AgentPersona,
        customer: &AgentPersona,
    ) -> Result<(), Error> {
        let context = state.representative_context();
        let completion = self.invoker.invoke(representative, &context).await?;
        let termination = self.detector.detect(&completion.text);
        self.append(state, SpeakerRole::Representative, completion);

        if let Some(reason) = termination {
            debug!("representative ended the call: {reason:?}");
            state.complete(reason);
            return Ok(());
        }

        let context = state.customer_context(properties);
        let completion = self.invoker.invoke(customer, &context).await?;
        self.append(state, SpeakerRole::Customer, completion);

        state.turn_count += 1;
        Ok(())
    }

    fn append(
        &self,
        state: &mut SimulationState,
        speaker_role: SpeakerRole,
        completion: Completion,
    ) {
        let msg = ConversationMessage {
            speaker_role,
            content: completion.text,
            tokens_used: completion.tokens_used,
            timestamp: Utc::now(),
        };
        trace!("{speaker_role:?}: {}", msg.content);
        if let Some(on_message) = &self.on_message {
            on_message(&msg);
        }
        state.history.push(msg);
    }

    fn fail(
        &self,
        turn: u32,
        state: SimulationState,
        source: Error,
    ) -> SimulationError {
        error!("simulation failed during turn {turn}: {source}");
        SimulationError {
            turn,
            source,
            partial: self.keep_partial_on_error.then_some(state),
        }
    }
}
