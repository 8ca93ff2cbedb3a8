use std::sync::Arc;

use super::{
    ConversationMessage, MessageFn, PhraseDetector, SimulationEngine,
    TerminationDetector,
};
use crate::invoker::AgentInvoker;

/// [`SimulationEngine`] builder.
pub struct SimulationEngineBuilder {
    pub(crate) invoker: AgentInvoker,
    pub(crate) detector: Arc<dyn TerminationDetector>,
    pub(crate) on_message: Option<MessageFn>,
    pub(crate) keep_partial_on_error: bool,
}

impl SimulationEngineBuilder {
    /// Creates a new builder with the specified invoker.
    #[inline]
    pub fn with_invoker(invoker: AgentInvoker) -> Self {
        Self {
            invoker,
            detector: Arc::new(PhraseDetector::default()),
            on_message: None,
            keep_partial_on_error: false,
        }
    }

    /// Replaces the default phrase detector.
    #[inline]
    pub fn with_detector<D: TerminationDetector + 'static>(
        mut self,
        detector: D,
    ) -> Self {
        self.detector = Arc::new(detector);
        self
    }

    /// Attaches a callback to be invoked with every message appended to the
    /// history.
    #[inline]
    pub fn on_message(
        mut self,
        on_message: impl Fn(&ConversationMessage) + Send + Sync + 'static,
    ) -> Self {
        self.on_message = Some(Arc::new(on_message));
        self
    }

    /// Makes failed runs carry the state accumulated before the failure.
    #[inline]
    pub fn keep_partial_on_error(mut self, keep: bool) -> Self {
        self.keep_partial_on_error = keep;
        self
    }

    /// Builds the engine.
    #[inline]
    pub fn build(self) -> SimulationEngine {
        SimulationEngine::from_builder(self)
    }
}
