//! Persona management and single completions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use callsim_model::{AgentSpec, ModelFinishReason, ModelProvider, ModelRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::Instrument;

use crate::conversation::{Context, ContextRole};
use crate::error::Error;
use crate::model_client::{ModelClient, TranscriptFn};
use crate::persona::{AgentPersona, PersonaCache};
use crate::registry::AgentRegistry;

/// A callback receiving `(agent_id, delta)` while a completion streams in.
pub type DeltaFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// One completion produced by a persona.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    /// The generated text, trimmed. Never empty.
    pub text: String,
    /// Total tokens billed for the completion, if the provider reports
    /// usage.
    pub tokens_used: Option<u64>,
}

/// The outcome of running one agent on one input, outside of a
/// simulation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRun {
    /// A fresh UUID identifying the run.
    pub id: String,
    /// The agent that was run.
    pub agent_id: String,
    /// The input given to the agent.
    pub input: String,
    /// The trimmed completion.
    pub output: String,
    /// Total tokens billed, if the provider reports usage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    /// Time spent waiting for the completion.
    pub time_taken_ms: u64,
    /// When the run started.
    pub timestamp: DateTime<Utc>,
}

/// Gets or creates personas and samples completions from them.
///
/// The invoker is cheap to clone. Clones share the persona cache, so one
/// invoker can serve any number of concurrent simulations.
#[derive(Clone)]
pub struct AgentInvoker {
    registry: Arc<AgentRegistry>,
    client: ModelClient,
    cache: Arc<PersonaCache>,
    invocation_timeout: Option<Duration>,
    on_delta: Option<DeltaFn>,
}

impl AgentInvoker {
    /// Creates an invoker from its parts.
    pub fn new(
        registry: Arc<AgentRegistry>,
        client: ModelClient,
        cache: Arc<PersonaCache>,
    ) -> Self {
        Self {
            registry,
            client,
            cache,
            invocation_timeout: None,
            on_delta: None,
        }
    }

    /// Creates an invoker with a fresh cache over the given provider.
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
        registry: AgentRegistry,
    ) -> Self {
        Self::new(
            Arc::new(registry),
            ModelClient::new(provider),
            Arc::new(PersonaCache::new()),
        )
    }

    /// Sets a deadline for every invocation. Without one, an invocation
    /// that never returns blocks its caller forever.
    #[inline]
    pub fn with_invocation_timeout(mut self, deadline: Duration) -> Self {
        self.invocation_timeout = Some(deadline);
        self
    }

    /// Attaches a callback to be invoked with each streamed delta.
    #[inline]
    pub fn on_delta(
        mut self,
        on_delta: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_delta = Some(Arc::new(on_delta));
        self
    }

    /// Returns the registry this invoker resolves agents with.
    #[inline]
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Returns the persona for `agent_id`, creating it with the model
    /// service on first use.
    ///
    /// Repeated calls return the same `Arc`, and at most one creation
    /// request per agent reaches the model service, even when called
    /// concurrently.
    pub async fn ensure_persona(
        &self,
        agent_id: &str,
    ) -> Result<Arc<AgentPersona>, Error> {
        let config = self.registry.get(agent_id)?;
        self.cache
            .get_or_create(agent_id, |version| {
                debug!("creating persona {agent_id} v{version}");
                let spec = AgentSpec {
                    name: config.agent_id.clone(),
                    instructions: config.system_instructions.clone(),
                    model: config.model.clone(),
                };
                let display_name = config.display_name.clone();
                let client = self.client.clone();
                async move {
                    let handle = client.create_agent(spec).await.map_err(
                        |source| Error::PersonaCreation {
                            agent_id: agent_id.to_owned(),
                            source,
                        },
                    )?;
                    Ok(AgentPersona {
                        agent_id: agent_id.to_owned(),
                        display_name,
                        version,
                        handle,
                        created_at: Utc::now(),
                    })
                }
            })
            .await
    }

    /// Drops the cached persona for `agent_id`.
    #[inline]
    pub fn invalidate(&self, agent_id: &str) -> bool {
        self.cache.invalidate(agent_id)
    }

    /// Samples one completion from `persona` for the given context.
    pub async fn invoke(
        &self,
        persona: &AgentPersona,
        context: &Context,
    ) -> Result<Completion, Error> {
        let agent_id = persona.agent_id.as_str();
        let request = ModelRequest {
            agent: persona.handle.clone(),
            messages: context.items.clone(),
        };
        let on_transcript = self.on_delta.as_ref().map(|on_delta| {
            let on_delta = Arc::clone(on_delta);
            let agent_id = agent_id.to_owned();
            let f: TranscriptFn =
                Arc::new(move |delta: &str| on_delta(&agent_id, delta));
            f
        });

        let fut = self
            .client
            .send_request(request, on_transcript)
            .instrument(debug_span!("invoke", agent = agent_id));
        let resp_or_err = match self.invocation_timeout {
            Some(deadline) => timeout(deadline, fut).await.map_err(|_| {
                warn!("invocation of {agent_id} timed out");
                Error::Timeout {
                    agent_id: agent_id.to_owned(),
                    timeout: deadline,
                }
            })?,
            None => fut.await,
        };
        let resp = resp_or_err.map_err(|source| Error::Invocation {
            agent_id: agent_id.to_owned(),
            source,
        })?;

        if resp.finish_reason == ModelFinishReason::Length {
            warn!("completion of {agent_id} was cut off by the token limit");
        }
        let text = resp.transcript.trim();
        if text.is_empty() {
            return Err(Error::EmptyResponse {
                agent_id: agent_id.to_owned(),
            });
        }
        Ok(Completion {
            text: text.to_owned(),
            tokens_used: resp.usage.map(|usage| usage.total()),
        })
    }

    /// Appends one message to `context` without invoking any model.
    #[inline]
    pub fn add_turn<S: Into<String>>(
        context: &mut Context,
        role: ContextRole,
        message: S,
    ) {
        context.add_turn(role, message);
    }

    /// Runs a single agent on a single input.
    pub async fn run_agent(
        &self,
        agent_id: &str,
        input: &str,
    ) -> Result<AgentRun, Error> {
        let persona = self.ensure_persona(agent_id).await?;
        let mut context = Context::new();
        Self::add_turn(&mut context, ContextRole::User, input);

        let timestamp = Utc::now();
        let started = Instant::now();
        let completion = self.invoke(&persona, &context).await?;

        Ok(AgentRun {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_owned(),
            input: input.to_owned(),
            output: completion.text,
            tokens_used: completion.tokens_used,
            time_taken_ms: started.elapsed().as_millis() as u64,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use callsim_model::ModelMessage;
    use callsim_test_model::{PresetFailure, PresetResponse, TestModelProvider};

    use super::*;
    use crate::registry::{CUSTOMER_AGENT_ID, REPRESENTATIVE_AGENT_ID};

    fn invoker(provider: &TestModelProvider) -> AgentInvoker {
        AgentInvoker::with_model_provider(
            provider.clone(),
            AgentRegistry::builtin(),
        )
    }

    #[tokio::test]
    async fn test_ensure_persona_is_idempotent() {
        let provider = TestModelProvider::default();
        let invoker = invoker(&provider);

        let first = invoker.ensure_persona(REPRESENTATIVE_AGENT_ID).await.unwrap();
        let second = invoker.ensure_persona(REPRESENTATIVE_AGENT_ID).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.creation_count(REPRESENTATIVE_AGENT_ID), 1);

        // Clones share the cache.
        let third = invoker
            .clone()
            .ensure_persona(REPRESENTATIVE_AGENT_ID)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(provider.creation_count(REPRESENTATIVE_AGENT_ID), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ensure_persona_creates_once() {
        let mut provider = TestModelProvider::default();
        provider.set_creation_delay(Duration::from_millis(20));
        let invoker = invoker(&provider);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let invoker = invoker.clone();
                tokio::spawn(async move {
                    invoker.ensure_persona(CUSTOMER_AGENT_ID).await.unwrap()
                })
            })
            .collect();
        let mut personas = vec![];
        for task in tasks {
            personas.push(task.await.unwrap());
        }

        assert_eq!(provider.creation_count(CUSTOMER_AGENT_ID), 1);
        assert!(personas.iter().all(|p| Arc::ptr_eq(p, &personas[0])));
    }

    #[tokio::test]
    async fn test_unknown_agent_and_creation_failure() {
        let mut provider = TestModelProvider::default();
        provider.fail_agent_creation(CUSTOMER_AGENT_ID);
        let invoker = invoker(&provider);

        let err = invoker.ensure_persona("C9").await.unwrap_err();
        assert!(matches!(err, Error::UnknownAgent(_)));
        assert!(provider.created_agents().is_empty());

        let err = invoker.ensure_persona(CUSTOMER_AGENT_ID).await.unwrap_err();
        assert!(matches!(err, Error::PersonaCreation { .. }));

        // Nothing is cached, so the next call reaches the service again.
        invoker.ensure_persona(CUSTOMER_AGENT_ID).await.unwrap_err();
        assert_eq!(provider.creation_count(CUSTOMER_AGENT_ID), 2);
    }

    #[tokio::test]
    async fn test_invoke() {
        let mut provider = TestModelProvider::default();
        provider.add_response(
            REPRESENTATIVE_AGENT_ID,
            PresetResponse::text_with_usage("  Hello, how can I help?\n", 7),
        );
        let deltas = Arc::new(Mutex::new(vec![]));
        let invoker = invoker(&provider).on_delta({
            let deltas = Arc::clone(&deltas);
            move |agent_id, delta| {
                deltas
                    .lock()
                    .unwrap()
                    .push(format!("{agent_id}:{delta}"));
            }
        });

        let persona = invoker.ensure_persona(REPRESENTATIVE_AGENT_ID).await.unwrap();
        let mut context = Context::new();
        AgentInvoker::add_turn(&mut context, ContextRole::User, "Begin.");
        let completion = invoker.invoke(&persona, &context).await.unwrap();

        assert_eq!(completion.text, "Hello, how can I help?");
        assert_eq!(completion.tokens_used, Some(7));
        assert_eq!(deltas.lock().unwrap().len(), 1);
        assert!(deltas.lock().unwrap()[0].starts_with("C1:"));

        let sent = provider.requests_for(REPRESENTATIVE_AGENT_ID);
        assert_eq!(sent[0].agent, persona.handle);
        assert_eq!(sent[0].messages, [ModelMessage::User("Begin.".to_owned())]);
    }

    #[tokio::test]
    async fn test_invoke_failures() {
        let mut provider = TestModelProvider::default();
        provider.add_response(
            REPRESENTATIVE_AGENT_ID,
            PresetResponse::text(" \n "),
        );
        provider.add_response(
            CUSTOMER_AGENT_ID,
            PresetResponse::failing(PresetFailure::Other),
        );
        let invoker = invoker(&provider);
        let context = Context::new();

        let rep = invoker.ensure_persona(REPRESENTATIVE_AGENT_ID).await.unwrap();
        let err = invoker.invoke(&rep, &context).await.unwrap_err();
        assert!(matches!(err, Error::EmptyResponse { .. }));

        let customer = invoker.ensure_persona(CUSTOMER_AGENT_ID).await.unwrap();
        let err = invoker.invoke(&customer, &context).await.unwrap_err();
        assert!(matches!(err, Error::Invocation { .. }));
        assert!(err.is_service_fault());
    }

    #[tokio::test]
    async fn test_invoke_rejects_cut_off_stream() {
        let mut provider = TestModelProvider::default();
        provider.add_response(
            CUSTOMER_AGENT_ID,
            PresetResponse::text("I was charged tw").with_finish_reason(None),
        );
        provider.add_response(
            REPRESENTATIVE_AGENT_ID,
            PresetResponse::text("Let me check your")
                .with_finish_reason(Some(ModelFinishReason::Length)),
        );
        let invoker = invoker(&provider);
        let context = Context::new();

        let customer = invoker.ensure_persona(CUSTOMER_AGENT_ID).await.unwrap();
        let err = invoker.invoke(&customer, &context).await.unwrap_err();
        assert!(
            matches!(&err, Error::Invocation { agent_id, .. } if agent_id == CUSTOMER_AGENT_ID)
        );
        assert!(err.is_service_fault());

        // Hitting the token limit still completes the stream.
        let rep = invoker.ensure_persona(REPRESENTATIVE_AGENT_ID).await.unwrap();
        let completion = invoker.invoke(&rep, &context).await.unwrap();
        assert_eq!(completion.text, "Let me check your");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invocation_timeout() {
        let mut provider = TestModelProvider::default();
        provider.set_delay(Duration::from_secs(60));
        provider.add_response(
            REPRESENTATIVE_AGENT_ID,
            PresetResponse::text("Too late."),
        );
        let invoker =
            invoker(&provider).with_invocation_timeout(Duration::from_secs(5));

        let rep = invoker.ensure_persona(REPRESENTATIVE_AGENT_ID).await.unwrap();
        let err = invoker.invoke(&rep, &Context::new()).await.unwrap_err();
        assert!(
            matches!(err, Error::Timeout { timeout, .. } if timeout == Duration::from_secs(5))
        );
    }

    #[tokio::test]
    async fn test_run_agent() {
        let mut provider = TestModelProvider::default();
        provider.add_response(
            CUSTOMER_AGENT_ID,
            PresetResponse::text_with_usage("I was charged twice.", 5),
        );
        let invoker = invoker(&provider);

        let run = invoker
            .run_agent(CUSTOMER_AGENT_ID, "How can I help you today?")
            .await
            .unwrap();
        assert_eq!(run.agent_id, CUSTOMER_AGENT_ID);
        assert_eq!(run.output, "I was charged twice.");
        assert_eq!(run.tokens_used, Some(5));
        assert!(uuid::Uuid::parse_str(&run.id).is_ok());
    }
}
