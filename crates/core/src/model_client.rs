use std::fmt::{self, Display};
use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use callsim_model::{
    AgentHandle, AgentSpec, ErrorKind, ModelFinishReason, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
    TokenUsage,
};
use tracing::Instrument;

type SendRequestResult = Result<ModelClientResponse, ClientError>;
type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
#[rustfmt::skip]
type SendRequestFn = Arc<
    dyn Fn(ModelRequest, Option<TranscriptFn>)
        -> BoxedFuture<SendRequestResult> + Send + Sync
>;
type CreateAgentFn = Arc<
    dyn Fn(AgentSpec) -> BoxedFuture<Result<AgentHandle, ClientError>>
        + Send
        + Sync,
>;

/// A callback receiving message deltas while a response streams in.
pub type TranscriptFn = Arc<dyn Fn(&str) + Send + Sync>;

/// A type-erased error from the model provider.
///
/// Only the kind and the rendered message are kept, so the error can
/// outlive the provider and be shared between threads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientError {
    kind: ErrorKind,
    message: String,
}

impl ClientError {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn from_provider<E: ModelProviderError>(err: E) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Returns the message of the underlying provider error.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for ClientError {}

impl ModelProviderError for ClientError {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    send_request_fn: SendRequestFn,
    create_agent_fn: CreateAgentFn,
}

impl ModelClient {
    /// Creates a client that drives `provider`.
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let provider = Arc::new(provider);

        let send_request_fn: SendRequestFn = {
            let provider = Arc::clone(&provider);
            Arc::new(move |req, on_transcript| {
                let fut = provider.send_request(&req);
                Box::pin(
                    async move {
                        trace!("got a request: {:?}", req);
                        let resp_or_err = fut.await;
                        handle_response::<P>(resp_or_err, on_transcript).await
                    }
                    .instrument(trace_span!("model client req")),
                )
            })
        };

        let create_agent_fn: CreateAgentFn = Arc::new(move |spec| {
            let fut = provider.create_agent(&spec);
            Box::pin(
                async move {
                    fut.await.map_err(|err| {
                        error!("failed to create agent: {err:?}");
                        ClientError::from_provider(err)
                    })
                }
                .instrument(debug_span!("create agent", name = %spec.name)),
            )
        });

        Self {
            send_request_fn,
            create_agent_fn,
        }
    }

    /// Registers an agent persona with the provider.
    #[inline]
    pub async fn create_agent(
        &self,
        spec: AgentSpec,
    ) -> Result<AgentHandle, ClientError> {
        (self.create_agent_fn)(spec).await
    }

    /// Sends a request and returns the fully received response.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_transcript: Option<TranscriptFn>,
    ) -> Result<ModelClientResponse, ClientError> {
        (self.send_request_fn)(req, on_transcript).await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug)]
pub struct ModelClientResponse {
    /// The concatenated message deltas.
    pub transcript: String,
    /// The token usage, if the provider reported one.
    pub usage: Option<TokenUsage>,
    /// The reason the model finished generating.
    pub finish_reason: ModelFinishReason,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    on_transcript: Option<TranscriptFn>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(ClientError::from_provider(err));
        }
    };

    let mut transcript = String::new();
    let mut usage = None;
    let mut finish_reason = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(ClientError::from_provider(err));
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                if let Some(on_transcript) = &on_transcript {
                    on_transcript(&msg);
                }
                transcript.push_str(&msg);
            }
            ModelResponseEvent::Usage(u) => {
                usage = Some(u);
            }
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    // A stream closed without a finish reason was cut off in transit.
    let Some(finish_reason) = finish_reason else {
        error!("stream ended before completion");
        return Err(ClientError::new(
            "stream ended before completion",
            ErrorKind::Other,
        ));
    };

    trace!("finished a request");

    Ok(ModelClientResponse {
        transcript,
        usage,
        finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use callsim_model::ModelMessage;
    use callsim_test_model::{
        PresetEvent, PresetFailure, PresetResponse, TestModelProvider,
    };

    use super::*;

    fn spec() -> AgentSpec {
        AgentSpec {
            name: "rep".to_owned(),
            instructions: "Answer politely.".to_owned(),
            model: None,
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_response(
            "rep",
            PresetResponse::with_events([
                PresetEvent::MessageDelta("How ".to_owned()),
                PresetEvent::MessageDelta("are ".to_owned()),
                PresetEvent::MessageDelta("you?".to_owned()),
                PresetEvent::Usage(TokenUsage {
                    prompt_tokens: 5,
                    completion_tokens: 3,
                }),
            ]),
        );

        let model_client = ModelClient::new(model_provider);
        let agent = model_client.create_agent(spec()).await.unwrap();

        for _ in 0..3 {
            let on_transcript_called = Arc::new(AtomicBool::new(false));
            let resp = model_client
                .send_request(
                    ModelRequest {
                        agent: agent.clone(),
                        messages: vec![ModelMessage::User("Hi".to_owned())],
                    },
                    Some({
                        let on_transcript_called =
                            Arc::clone(&on_transcript_called);
                        Arc::new(move |_: &str| {
                            on_transcript_called.store(true, Ordering::Relaxed);
                        })
                    }),
                )
                .await
                .unwrap();
            assert_eq!(resp.transcript, "How are you?");
            assert_eq!(resp.usage.unwrap().total(), 8);
            assert_eq!(resp.finish_reason, ModelFinishReason::Stop);
            assert!(on_transcript_called.load(Ordering::Relaxed));
        }
    }

    #[tokio::test]
    async fn test_error_handling() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_response(
            "rep",
            PresetResponse::failing(PresetFailure::RateLimited),
        );
        model_provider.fail_agent_creation("broken");
        let model_client = ModelClient::new(model_provider);

        let err = model_client
            .create_agent(AgentSpec {
                name: "broken".to_owned(),
                ..spec()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);

        let agent = model_client.create_agent(spec()).await.unwrap();
        let resp_or_err = model_client
            .send_request(
                ModelRequest {
                    agent,
                    messages: vec![ModelMessage::User("Hi".to_owned())],
                },
                None,
            )
            .await;
        let err = resp_or_err.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
    }

    #[tokio::test]
    async fn test_stream_without_completion() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_response(
            "rep",
            PresetResponse::text("I was charged tw").with_finish_reason(None),
        );
        let model_client = ModelClient::new(model_provider);

        let agent = model_client.create_agent(spec()).await.unwrap();
        let err = model_client
            .send_request(
                ModelRequest {
                    agent,
                    messages: vec![ModelMessage::User("Hi".to_owned())],
                },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(err.message(), "stream ended before completion");
    }
}
