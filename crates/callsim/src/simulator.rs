use std::sync::Arc;
use std::time::Duration;

use callsim_core::aggregator::{self, CONVERSATIONS_CONTAINER, SimulationDocument};
use callsim_core::storage::{MemoryStorage, Order, Page, Storage};
use callsim_core::{
    AgentConfig, AgentInvoker, AgentRegistry, AgentRun, ConversationMessage,
    ConversationProperties, Error, ModelClient, PersonaCache, SimulationEngine,
    SimulationEngineBuilder, SimulationError, SimulationResult, StorageError,
};
use callsim_model::ModelProvider;
use callsim_openai_model::OpenAIProvider;

use crate::config::{Config, ConfigError, StorageBackend};
use crate::file_storage::JsonFileStorage;

/// The largest turn budget a request may ask for.
pub const MAX_TURNS_LIMIT: u32 = 20;

/// Errors raised by the [`Simulator`].
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error(transparent)]
    Core(#[from] Error),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A request to simulate one call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulationRequest {
    pub properties: ConversationProperties,
    /// Falls back to the simulator's default budget.
    pub max_turns: Option<u32>,
    /// Becomes the id of the stored document if set.
    pub conversation_id: Option<String>,
}

/// A finished simulation and, separately, whether storing it worked.
#[derive(Debug)]
pub struct SimulationOutcome {
    /// The id the conversation was, or would have been, stored under.
    pub id: String,
    pub result: SimulationResult,
    pub storage: Result<(), StorageError>,
}

/// A finished single-agent run and, separately, whether storing it worked.
#[derive(Debug)]
pub struct AgentRunOutcome {
    pub run: AgentRun,
    pub storage: Result<(), StorageError>,
}

/// Checks a requested turn budget.
pub fn validate_max_turns(max_turns: u32) -> Result<u32, Error> {
    if (1..=MAX_TURNS_LIMIT).contains(&max_turns) {
        Ok(max_turns)
    } else {
        Err(Error::InvalidRequest(format!(
            "max_turns must be between 1 and {MAX_TURNS_LIMIT}, got {max_turns}"
        )))
    }
}

fn validate_properties(properties: &ConversationProperties) -> Result<(), Error> {
    let fields = [
        ("customer_intent", &properties.customer_intent),
        ("customer_sentiment", &properties.customer_sentiment),
        ("conversation_subject", &properties.conversation_subject),
    ];
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(Error::InvalidRequest(format!("`{name}` is empty")));
        }
    }
    Ok(())
}

/// [`Simulator`] builder.
pub struct SimulatorBuilder {
    client: ModelClient,
    registry: AgentRegistry,
    storage: Arc<dyn Storage>,
    conversations: String,
    default_max_turns: u32,
    invocation_timeout: Option<Duration>,
    keep_partial_on_error: bool,
    on_message: Option<Box<dyn Fn(&ConversationMessage) + Send + Sync>>,
    on_delta: Option<Box<dyn Fn(&str, &str) + Send + Sync>>,
}

impl SimulatorBuilder {
    /// Creates a new builder with the specified model provider, the
    /// built-in agents and in-memory storage.
    pub fn with_model_provider<P: ModelProvider + 'static>(provider: P) -> Self {
        Self {
            client: ModelClient::new(provider),
            registry: AgentRegistry::builtin(),
            storage: Arc::new(MemoryStorage::new()),
            conversations: CONVERSATIONS_CONTAINER.to_owned(),
            default_max_turns: 5,
            invocation_timeout: None,
            keep_partial_on_error: false,
            on_message: None,
            on_delta: None,
        }
    }

    /// Creates a builder from the configuration, talking to an
    /// OpenAI-compatible service.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let provider = OpenAIProvider::new(config.model.openai_config()?);
        let archive = Archive::from_config(config);
        let mut builder = Self::with_model_provider(provider)
            .with_registry(config.registry()?)
            .with_storage(archive.storage)
            .with_conversations_container(archive.conversations)
            .with_default_max_turns(config.simulation.default_max_turns)
            .keep_partial_on_error(config.simulation.keep_partial_on_error);
        if let Some(secs) = config.simulation.invocation_timeout_secs {
            builder = builder.with_invocation_timeout(Duration::from_secs(secs));
        }
        Ok(builder)
    }

    #[inline]
    pub fn with_registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[inline]
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    #[inline]
    pub fn with_conversations_container<S: Into<String>>(mut self, container: S) -> Self {
        self.conversations = container.into();
        self
    }

    #[inline]
    pub fn with_default_max_turns(mut self, max_turns: u32) -> Self {
        self.default_max_turns = max_turns;
        self
    }

    #[inline]
    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = Some(timeout);
        self
    }

    #[inline]
    pub fn keep_partial_on_error(mut self, keep: bool) -> Self {
        self.keep_partial_on_error = keep;
        self
    }

    /// Attaches a callback to be invoked with every message of a call.
    #[inline]
    pub fn on_message(
        mut self,
        on_message: impl Fn(&ConversationMessage) + Send + Sync + 'static,
    ) -> Self {
        self.on_message = Some(Box::new(on_message));
        self
    }

    /// Attaches a callback to be invoked with `(agent_id, delta)` while
    /// completions stream in.
    #[inline]
    pub fn on_delta(
        mut self,
        on_delta: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_delta = Some(Box::new(on_delta));
        self
    }

    /// Builds the simulator, checking the default turn budget.
    pub fn build(self) -> Result<Simulator, Error> {
        let default_max_turns = validate_max_turns(self.default_max_turns)?;

        let mut invoker = AgentInvoker::new(
            Arc::new(self.registry),
            self.client,
            Arc::new(PersonaCache::new()),
        );
        if let Some(timeout) = self.invocation_timeout {
            invoker = invoker.with_invocation_timeout(timeout);
        }
        if let Some(on_delta) = self.on_delta {
            invoker = invoker.on_delta(on_delta);
        }

        let mut engine = SimulationEngineBuilder::with_invoker(invoker)
            .keep_partial_on_error(self.keep_partial_on_error);
        if let Some(on_message) = self.on_message {
            engine = engine.on_message(on_message);
        }

        Ok(Simulator {
            engine: engine.build(),
            archive: Archive::new(self.storage, self.conversations),
            default_max_turns,
        })
    }
}

/// Runs calls and single-agent requests, and stores what they produce.
///
/// A simulation that succeeds is returned even if storing it fails; the
/// two outcomes are reported separately.
#[derive(Clone)]
pub struct Simulator {
    engine: SimulationEngine,
    archive: Archive,
    default_max_turns: u32,
}

impl Simulator {
    /// Returns the registered agents, ordered by id.
    pub fn agents(&self) -> impl Iterator<Item = &AgentConfig> {
        self.engine.invoker().registry().agents()
    }

    /// Validates the request, plays the call and stores the result.
    pub async fn simulate(
        &self,
        request: SimulationRequest,
    ) -> Result<SimulationOutcome, SimulatorError> {
        let max_turns = validate_max_turns(
            request.max_turns.unwrap_or(self.default_max_turns),
        )?;
        validate_properties(&request.properties)?;

        let result = self.engine.run(&request.properties, max_turns).await?;

        let document = aggregator::to_document(
            &request.properties,
            result.clone(),
            request.conversation_id.as_deref(),
        );
        let storage =
            aggregator::store(self.archive.storage(), &self.archive.conversations, &document)
                .await
                .map(|_| ())
                .inspect_err(|err| {
                    error!("failed to store conversation {}: {err}", document.id);
                });

        Ok(SimulationOutcome {
            id: document.id,
            result,
            storage,
        })
    }

    /// Runs one agent on one input and stores the run in the agent's
    /// container.
    pub async fn ask(
        &self,
        agent_id: &str,
        input: &str,
    ) -> Result<AgentRunOutcome, SimulatorError> {
        let invoker = self.engine.invoker();
        let container = invoker.registry().get(agent_id)?.storage_container.clone();
        if input.trim().is_empty() {
            return Err(Error::InvalidRequest("input is empty".to_owned()).into());
        }

        let run = invoker.run_agent(agent_id, input).await?;
        let storage = aggregator::store_agent_run(self.archive.storage(), &container, &run)
            .await
            .map(|_| ())
            .inspect_err(|err| {
                error!("failed to store run {}: {err}", run.id);
            });
        Ok(AgentRunOutcome { run, storage })
    }

    /// Returns the stored conversations.
    #[inline]
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Lists stored conversations, newest first.
    #[inline]
    pub async fn list(&self, page: Page) -> Result<Vec<SimulationDocument>, SimulatorError> {
        self.archive.list(page).await
    }

    /// Fetches one stored conversation.
    #[inline]
    pub async fn show(&self, id: &str) -> Result<SimulationDocument, SimulatorError> {
        self.archive.show(id).await
    }
}

/// Read access to stored conversations, usable without a model service.
#[derive(Clone)]
pub struct Archive {
    storage: Arc<dyn Storage>,
    conversations: String,
}

impl Archive {
    #[inline]
    pub fn new<S: Into<String>>(storage: Arc<dyn Storage>, conversations: S) -> Self {
        Self {
            storage,
            conversations: conversations.into(),
        }
    }

    /// Opens the storage named by the `[storage]` section.
    pub fn from_config(config: &Config) -> Self {
        let storage: Arc<dyn Storage> = match config.storage.backend {
            StorageBackend::File => {
                Arc::new(JsonFileStorage::new(&config.storage.data_dir))
            }
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };
        Self::new(storage, config.storage.conversations.clone())
    }

    #[inline]
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Lists stored conversations, newest first.
    pub async fn list(&self, page: Page) -> Result<Vec<SimulationDocument>, SimulatorError> {
        let docs = self
            .storage
            .list(&self.conversations, page, &Order::descending("start_time"))
            .await?;
        let docs = docs
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(StorageError::from)?;
        Ok(docs)
    }

    /// Fetches one stored conversation.
    pub async fn show(&self, id: &str) -> Result<SimulationDocument, SimulatorError> {
        let doc = self.storage.get(&self.conversations, id).await?;
        Ok(serde_json::from_value(doc).map_err(StorageError::from)?)
    }
}
