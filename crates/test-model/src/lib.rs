//! A local fake model for testing purpose.

mod preset;

use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use callsim_model::{
    AgentHandle, AgentSpec, ErrorKind, ModelFinishReason, ModelMessage,
    ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: Vec<PresetEvent>,
    finish_reason: Option<ModelFinishReason>,
    delay: Duration,
    event_idx: usize,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };

        if let Some(sleep) = &mut this.sleep {
            let sleep = sleep.as_mut();
            ready!(sleep.poll(cx));
            this.sleep = None;

            if this.event_idx < this.events.len() {
                let event = match &this.events[this.event_idx] {
                    PresetEvent::MessageDelta(msg) => {
                        ModelResponseEvent::MessageDelta(msg.clone())
                    }
                    PresetEvent::Usage(usage) => {
                        ModelResponseEvent::Usage(*usage)
                    }
                };
                this.event_idx += 1;
                return Poll::Ready(Ok(Some(event)));
            } else if this.event_idx == this.events.len() {
                this.event_idx += 1;
                return Poll::Ready(Ok(this
                    .finish_reason
                    .map(ModelResponseEvent::Completed)));
            } else {
                // In case this method is called after completion.
                return Poll::Ready(Ok(None));
            }
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }
}

#[derive(Default)]
struct Log {
    created_agents: Vec<String>,
    requests: Vec<ModelRequest>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup a script per agent name,
/// which is how that agent should respond. The step is selected by the
/// number of assistant messages in the request, i.e. the number of turns
/// the agent has already taken in that context. If there are no enough
/// steps in the script, an error will be returned.
///
/// Clones share the same log of created agents and received requests, so
/// tests can hand a clone to the code under test and inspect the calls
/// afterwards.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    scripts: HashMap<String, Vec<PresetResponse>>,
    failing_agents: HashSet<String>,
    delay: Option<Duration>,
    creation_delay: Option<Duration>,
    log: Arc<Mutex<Log>>,
}

impl TestModelProvider {
    /// Appends a response step to the script of `agent`.
    #[inline]
    pub fn add_response<S: Into<String>>(
        &mut self,
        agent: S,
        preset: PresetResponse,
    ) {
        self.scripts.entry(agent.into()).or_default().push(preset);
    }

    /// Makes agent registration fail for `agent`.
    #[inline]
    pub fn fail_agent_creation<S: Into<String>>(&mut self, agent: S) {
        self.failing_agents.insert(agent.into());
    }

    /// Sets the delay between two streamed events.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Sets how long agent registration takes.
    #[inline]
    pub fn set_creation_delay(&mut self, duration: Duration) {
        self.creation_delay = Some(duration);
    }

    /// Returns the names of all agent registrations, in call order.
    pub fn created_agents(&self) -> Vec<String> {
        self.log().created_agents.clone()
    }

    /// Returns how many times `agent` was registered.
    pub fn creation_count(&self, agent: &str) -> usize {
        self.log()
            .created_agents
            .iter()
            .filter(|name| name.as_str() == agent)
            .count()
    }

    /// Returns the requests sent to `agent`, in call order.
    pub fn requests_for(&self, agent: &str) -> Vec<ModelRequest> {
        self.log()
            .requests
            .iter()
            .filter(|req| req.agent.name == agent)
            .cloned()
            .collect()
    }

    /// Returns the names of the agents that received requests, in call
    /// order.
    pub fn request_order(&self) -> Vec<String> {
        self.log()
            .requests
            .iter()
            .map(|req| req.agent.name.clone())
            .collect()
    }

    fn log(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn create_agent(
        &self,
        spec: &AgentSpec,
    ) -> impl Future<Output = Result<AgentHandle, Self::Error>> + Send + 'static
    {
        let generation = {
            let mut log = self.log();
            log.created_agents.push(spec.name.clone());
            log.created_agents
                .iter()
                .filter(|name| **name == spec.name)
                .count()
        };

        let result = if self.failing_agents.contains(&spec.name) {
            Err(Error::new("agent registration rejected", ErrorKind::Other))
        } else {
            Ok(AgentHandle {
                id: format!("test-agent:{}:{generation}", spec.name),
                name: spec.name.clone(),
                model: spec.model.clone().unwrap_or_else(|| "test".to_owned()),
                instructions: spec.instructions.clone(),
            })
        };

        let delay = self.creation_delay;
        async move {
            if let Some(delay) = delay {
                sleep(delay).await;
            }
            result
        }
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        self.log().requests.push(req.clone());

        let step_idx = req
            .messages
            .iter()
            .filter(|msg| matches!(msg, ModelMessage::Assistant(_)))
            .count();
        let preset = self
            .scripts
            .get(&req.agent.name)
            .and_then(|script| script.get(step_idx));

        let result = match preset {
            None => Err(Error::new("no enough steps", ErrorKind::Other)),
            Some(PresetResponse {
                failure: Some(failure),
                ..
            }) => Err(Error::new("preset failure", (*failure).into())),
            Some(preset) => Ok(TestModelResponse {
                events: preset.events.clone(),
                finish_reason: preset.finish_reason,
                delay: self.delay.unwrap_or(Duration::from_millis(1)),
                event_idx: 0,
                sleep: None,
            }),
        };
        ready(result)
    }
}
