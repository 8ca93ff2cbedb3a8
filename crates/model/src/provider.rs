use std::error::Error;

use crate::agent::{AgentHandle, AgentSpec};
use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// The error type for a model provider.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// A type that represents a model provider, which is an entry for
/// registering agent personas, sampling requests, etc.
///
/// Once the provider is created, it should behave like a stateless object.
/// It can still have internal state, but callers should not rely on it,
/// and the provider should be prepared for being dropped anytime.
pub trait ModelProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// The response type for this provider.
    type Response: ModelResponse<Error = Self::Error>;

    /// Registers an agent persona, or returns the existing one with the
    /// same name.
    ///
    /// Implementations should be idempotent by `spec.name`. Callers are
    /// expected to cache the returned handle, this method is not supposed
    /// to be called for every request.
    fn create_agent(
        &self,
        spec: &AgentSpec,
    ) -> impl Future<Output = Result<AgentHandle, Self::Error>> + Send + 'static;

    /// Sends a request to the model.
    ///
    /// Implementations must not retry a failed completion implicitly once
    /// the response has started streaming.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}
