//! A model provider for OpenAI-compatible APIs.

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::future::ready;
use std::sync::Arc;

use backoff::ExponentialBackoffBuilder;
use backoff::future::retry;
use callsim_model::{
    AgentHandle, AgentSpec, ErrorKind, ModelProvider, ModelProviderError,
    ModelRequest,
};
use mime::Mime;
use reqwest::{Client, StatusCode, header};

pub use config::{OpenAIConfig, OpenAIConfigBuilder};
use io::Sse;
use proto::ChatCompletionRequest;
use response::OpenAIResponse;

/// Error type for [`OpenAIProvider`].
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

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// OpenAI-compatible model provider.
///
/// Chat completion APIs have no server-side notion of an agent, so agent
/// registration is local: the handle just binds the instructions and the
/// model, and they are sent along with every request.
#[derive(Clone, Debug)]
pub struct OpenAIProvider {
    client: Client,
    config: Arc<OpenAIConfig>,
}

impl OpenAIProvider {
    /// Creates a new `OpenAIProvider` with the given configuration.
    #[inline]
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }
}

impl ModelProvider for OpenAIProvider {
    type Error = Error;
    type Response = OpenAIResponse;

    fn create_agent(
        &self,
        spec: &AgentSpec,
    ) -> impl Future<Output = Result<AgentHandle, Self::Error>> + Send + 'static
    {
        let model = spec
            .model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());
        debug!("registering agent {} with model {model}", spec.name);
        ready(Ok(AgentHandle {
            id: format!("{model}:{}", spec.name),
            name: spec.name.clone(),
            model,
            instructions: spec.instructions.clone(),
        }))
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let openai_req = Arc::new(proto::create_request(req));
        let client = self.client.clone();
        let config = Arc::clone(&self.config);
        let policy = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(config.max_retry_elapsed))
            .build();

        async move {
            // Only establishing the stream is retried. Once events start
            // flowing, failures are reported to the caller as is.
            let resp = retry(policy, || {
                let client = client.clone();
                let config = Arc::clone(&config);
                let openai_req = Arc::clone(&openai_req);
                async move { post_once(&client, &config, &openai_req).await }
            })
            .await?;

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let is_valid_content_type = content_type
                .and_then(|v| v.parse().ok())
                .map(|m: Mime| m.subtype().as_str() == "event-stream")
                .unwrap_or(false);
            if !is_valid_content_type {
                return Err(Error::new(
                    format!("Unexpected content type: {content_type:?}"),
                    ErrorKind::Other,
                ));
            }

            // Here we got a successful response.
            Ok(OpenAIResponse::from_sse(Sse::from_response(resp)))
        }
    }
}

async fn post_once(
    client: &Client,
    config: &OpenAIConfig,
    openai_req: &ChatCompletionRequest,
) -> Result<reqwest::Response, backoff::Error<Error>> {
    let resp = client
        .post(format!("{}{}", config.base_url, "/chat/completions"))
        .header(header::AUTHORIZATION, format!("Bearer {}", config.api_key))
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "text/event-stream")
        .json(openai_req)
        .send()
        .await
        .map_err(|err| {
            let transient = err.is_connect() || err.is_timeout();
            let err = Error::new(format!("{err}"), ErrorKind::Other);
            if transient {
                warn!("request failed, will retry: {err}");
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            }
        })?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = format!("server responded with {status}: {body}");
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            warn!("rate limited, will retry");
            Err(backoff::Error::transient(Error::new(
                message,
                ErrorKind::RateLimitExceeded,
            )))
        }
        status if status.is_server_error() => {
            warn!("server error, will retry: {status}");
            Err(backoff::Error::transient(Error::new(
                message,
                ErrorKind::Other,
            )))
        }
        _ => Err(backoff::Error::permanent(Error::new(
            message,
            ErrorKind::Other,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_agent_is_local() {
        let provider = OpenAIProvider::new(
            OpenAIConfigBuilder::with_api_key("xxx")
                .with_model("gpt-test")
                .build(),
        );
        let spec = AgentSpec {
            name: "C1".to_owned(),
            instructions: "Greet the customer.".to_owned(),
            model: None,
        };
        let first = provider.create_agent(&spec).await.unwrap();
        let second = provider.create_agent(&spec).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.id, "gpt-test:C1");

        let spec = AgentSpec {
            model: Some("gpt-other".to_owned()),
            ..spec
        };
        let overridden = provider.create_agent(&spec).await.unwrap();
        assert_eq!(overridden.model, "gpt-other");
    }
}
